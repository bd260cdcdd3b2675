use super::permissions::ToolPermissions;
use super::limits::ToolResourceLimits;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a tool invocation needs beyond its own parameters: who's
/// asking, from where, under what permissions/limits, and how to report
/// progress or notice cancellation.
#[derive(Clone)]
pub struct ToolExecutionContext {
    pub correlation_id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub working_directory: Option<String>,
    pub environment: HashMap<String, String>,
    pub permissions: ToolPermissions,
    pub resource_limits: ToolResourceLimits,
    pub cancellation: CancellationToken,
    pub on_progress: Option<Arc<dyn Fn(f64, &str) + Send + Sync>>,
    pub additional_data: HashMap<String, Value>,
}

impl std::fmt::Debug for ToolExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutionContext")
            .field("correlation_id", &self.correlation_id)
            .field("user_id", &self.user_id)
            .field("session_id", &self.session_id)
            .field("working_directory", &self.working_directory)
            .field("permissions", &self.permissions)
            .field("resource_limits", &self.resource_limits)
            .field("additional_data", &self.additional_data)
            .finish_non_exhaustive()
    }
}

impl Default for ToolExecutionContext {
    fn default() -> Self {
        Self {
            correlation_id: String::new(),
            user_id: None,
            session_id: None,
            working_directory: None,
            environment: HashMap::new(),
            permissions: ToolPermissions::default(),
            resource_limits: ToolResourceLimits::default(),
            cancellation: CancellationToken::new(),
            on_progress: None,
            additional_data: HashMap::new(),
        }
    }
}

impl ToolExecutionContext {
    /// `true` when the caller asked the execution cache to be consulted
    /// (`additionalData["EnableCaching"] == true`, spec.md 4.6).
    pub fn caching_enabled(&self) -> bool {
        self.additional_data
            .get("EnableCaching")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn cache_ttl_seconds(&self) -> Option<u64> {
        self.additional_data
            .get("CacheTimeToLiveSeconds")
            .and_then(Value::as_u64)
    }
}

/// A request to run one tool once.
#[derive(Clone)]
pub struct ToolExecutionRequest {
    pub tool_id: String,
    pub parameters: HashMap<String, Value>,
    pub context: ToolExecutionContext,
    pub validate_parameters: bool,
    pub enforce_permissions: bool,
    pub enforce_resource_limits: bool,
    /// Per-request timeout override. Falls back to
    /// `context.resource_limits.max_execution_time_ms` when absent.
    pub timeout_ms: Option<u64>,
}

impl ToolExecutionRequest {
    pub fn new(tool_id: impl Into<String>, parameters: HashMap<String, Value>) -> Self {
        Self {
            tool_id: tool_id.into(),
            parameters,
            context: ToolExecutionContext::default(),
            validate_parameters: true,
            enforce_permissions: true,
            enforce_resource_limits: true,
            timeout_ms: None,
        }
    }

    pub fn with_context(mut self, context: ToolExecutionContext) -> Self {
        self.context = context;
        self
    }

    pub fn effective_timeout_ms(&self) -> u64 {
        self.timeout_ms
            .unwrap_or(self.context.resource_limits.max_execution_time_ms)
    }
}
