//! The tool contract (spec.md 9 "Polymorphic tool contract"): the minimal
//! surface the executor needs from a tool body. Concrete tools are opaque
//! collaborators per spec.md 1 -- only this contract matters to the core.

use crate::error::ToolWardenError;
use crate::model::{ToolExecutionContext, ToolMetadata, ToolResult};
use crate::validator::ValidationResult;
use async_trait::async_trait;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// A minimal dependency-injection container passed to tool factories.
///
/// Tools rarely need more than a handful of shared collaborators (an HTTP
/// client, a config handle); a type-keyed map avoids a bespoke trait per
/// dependency while staying fully typed at the call site, the same
/// `TypeId`-keyed shape `http::Extensions`/axum's `Extensions` use.
#[derive(Clone, Default)]
pub struct ServiceLocator {
    services: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ServiceLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> &mut Self {
        self.services.insert(TypeId::of::<T>(), Arc::new(value));
        self
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.services
            .get(&TypeId::of::<T>())
            .and_then(|svc| svc.clone().downcast::<T>().ok())
    }
}

/// A fresh instance of this is created by the registry's factory on every
/// execution and disposed at the end of the pipeline (spec.md 5 "tools are
/// instantiated fresh per call and disposed at the end").
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static identity and contract surface. Must match the id the tool was
    /// registered under.
    fn metadata(&self) -> &ToolMetadata;

    /// Called once after construction, before `execute`. Receives the
    /// registration's mutable `configuration` map and the composed
    /// cancellation token so long setup can bail out early.
    async fn initialize(
        &mut self,
        _configuration: &HashMap<String, Value>,
        _cancellation: &tokio_util::sync::CancellationToken,
    ) -> Result<(), ToolWardenError> {
        Ok(())
    }

    /// Run the tool body. `ctx.cancellation` is the composed token
    /// (timeout + caller + resource limits); well-behaved bodies poll it at
    /// natural suspension points.
    async fn execute(
        &self,
        parameters: HashMap<String, Value>,
        ctx: &ToolExecutionContext,
    ) -> Result<ToolResult, ToolWardenError>;

    /// Tool-specific parameter validation beyond the generic schema check
    /// in [`crate::validator`]. Default accepts everything.
    fn validate_parameters(&self, _parameters: &HashMap<String, Value>) -> ValidationResult {
        ValidationResult::ok()
    }

    /// Tool-specific pre-check beyond the generic capability/path/host
    /// gating in [`crate::security_manager`]. Default accepts everything.
    fn can_execute_with_permissions(&self, _permissions: &crate::model::ToolPermissions) -> bool {
        true
    }

    /// Release any resources held by this instance. Errors are logged and
    /// swallowed by the executor (spec.md 7 "disposal errors ... logged and
    /// swallowed").
    async fn dispose(&mut self) -> Result<(), ToolWardenError> {
        Ok(())
    }
}

/// Constructs a fresh [`Tool`] instance given a service locator. Stored by
/// the registry and invoked once per execution.
pub type ToolFactory = Arc<dyn Fn(&ServiceLocator) -> Box<dyn Tool> + Send + Sync>;
