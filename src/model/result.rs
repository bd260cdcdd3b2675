use super::violation::SecurityViolation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// What a tool body hands back to the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub is_successful: bool,
    pub data: Option<Value>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn success(data: Value) -> Self {
        Self {
            is_successful: true,
            data: Some(data),
            error_message: None,
            metadata: HashMap::new(),
            duration_ms: 0,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            is_successful: false,
            data: None,
            error_message: Some(message.into()),
            metadata: HashMap::new(),
            duration_ms: 0,
        }
    }
}

/// Cumulative resource accounting for one execution, reported by
/// [`crate::resource_monitor`] (spec.md 3).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceUsageSnapshot {
    pub peak_memory_bytes: u64,
    pub average_memory_bytes: u64,
    pub cpu_time_ms: u64,
    pub files_accessed: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub network_requests: u64,
    pub network_bytes_sent: u64,
    pub network_bytes_received: u64,
    pub processes_started: u64,
}

/// The full envelope the executor returns to callers: a [`ToolResult`]
/// plus everything the pipeline itself observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    pub result: ToolResult,
    pub tool_id: String,
    pub correlation_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub was_cancelled: bool,
    pub hit_resource_limits: bool,
    pub resource_usage: ResourceUsageSnapshot,
    pub security_violations: Vec<SecurityViolation>,
}

impl ToolExecutionResult {
    pub fn duration_ms(&self) -> i64 {
        (self.end_time - self.start_time).num_milliseconds().max(0)
    }
}
