//! Minimal tool bodies exercising the end-to-end scenarios in spec.md 8.
//!
//! These are test fixtures, not part of the public surface (spec.md 4.8:
//! "this crate ships a minimal EchoTool, SleepTool, AllocTool, and AddTool
//! purely as fixtures"), mirroring how the teacher's own registry tests
//! define `DummyTool`/`CacheTestTool` inline rather than shipping
//! production tools as test scaffolding.

use crate::error::ToolWardenError;
use crate::model::{
    CapabilitySet, ParameterType, ToolCategory, ToolExecutionContext, ToolMetadata, ToolParameter,
    ToolResult,
};
use crate::registry::ToolRegistry;
use crate::tool::Tool;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn integer_parameter(name: &str, required: bool) -> ToolParameter {
    ToolParameter {
        name: name.to_string(),
        param_type: ParameterType::Integer,
        required,
        description: None,
        default_value: None,
        allowed_values: None,
        minimum: None,
        maximum: None,
        min_length: None,
        max_length: None,
        pattern: None,
        item_type: None,
    }
}

/// Echoes back the `text` parameter verbatim (spec.md 8 scenario 1 and 2).
pub struct EchoTool(ToolMetadata);

impl EchoTool {
    pub fn new() -> Self {
        Self(ToolMetadata {
            id: "echo".to_string(),
            name: "echo".to_string(),
            description: "Echoes the text parameter back as the result data".to_string(),
            version: "1.0.0".to_string(),
            category: ToolCategory::Utility,
            required_capabilities: CapabilitySet::empty(),
            parameters: vec![ToolParameter::required_string("text")],
            examples: vec![],
            deprecated: false,
            experimental: false,
            tags: vec!["fixture".to_string()],
        })
    }

    pub fn register(registry: &ToolRegistry) {
        registry
            .register_from_factory(
                Self::new().0,
                Arc::new(|_locator| Box::new(EchoTool::new()) as Box<dyn Tool>),
                None,
            )
            .expect("fixture tools register under unique ids");
    }
}

impl Default for EchoTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn metadata(&self) -> &ToolMetadata {
        &self.0
    }

    async fn execute(
        &self,
        parameters: HashMap<String, Value>,
        _ctx: &ToolExecutionContext,
    ) -> Result<ToolResult, ToolWardenError> {
        let text = parameters.get("text").cloned().unwrap_or(Value::Null);
        Ok(ToolResult::success(text))
    }
}

/// Adds `a` and `b`, returning their sum (spec.md 8 scenario 6, cache hit).
pub struct AddTool(ToolMetadata);

impl AddTool {
    pub fn new() -> Self {
        Self(ToolMetadata {
            id: "add".to_string(),
            name: "add".to_string(),
            description: "Adds the a and b parameters".to_string(),
            version: "1.0.0".to_string(),
            category: ToolCategory::Utility,
            required_capabilities: CapabilitySet::empty(),
            parameters: vec![integer_parameter("a", true), integer_parameter("b", true)],
            examples: vec![],
            deprecated: false,
            experimental: false,
            tags: vec!["fixture".to_string()],
        })
    }

    pub fn register(registry: &ToolRegistry) {
        registry
            .register_from_factory(
                Self::new().0,
                Arc::new(|_locator| Box::new(AddTool::new()) as Box<dyn Tool>),
                None,
            )
            .expect("fixture tools register under unique ids");
    }
}

impl Default for AddTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for AddTool {
    fn metadata(&self) -> &ToolMetadata {
        &self.0
    }

    async fn execute(
        &self,
        parameters: HashMap<String, Value>,
        _ctx: &ToolExecutionContext,
    ) -> Result<ToolResult, ToolWardenError> {
        let a = parameters.get("a").and_then(Value::as_i64).unwrap_or(0);
        let b = parameters.get("b").and_then(Value::as_i64).unwrap_or(0);
        Ok(ToolResult::success(Value::from(a + b)))
    }
}

/// Sleeps for `millis` milliseconds, yielding early on cancellation
/// (spec.md 8 scenario 4, timeout).
pub struct SleepTool(ToolMetadata);

impl SleepTool {
    pub fn new() -> Self {
        Self(ToolMetadata {
            id: "sleep".to_string(),
            name: "sleep".to_string(),
            description: "Sleeps for millis milliseconds".to_string(),
            version: "1.0.0".to_string(),
            category: ToolCategory::Other,
            required_capabilities: CapabilitySet::from_iter([crate::model::Capability::LongRunning]),
            parameters: vec![integer_parameter("millis", true)],
            examples: vec![],
            deprecated: false,
            experimental: false,
            tags: vec!["fixture".to_string()],
        })
    }

    pub fn register(registry: &ToolRegistry) {
        registry
            .register_from_factory(
                Self::new().0,
                Arc::new(|_locator| Box::new(SleepTool::new()) as Box<dyn Tool>),
                None,
            )
            .expect("fixture tools register under unique ids");
    }
}

impl Default for SleepTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for SleepTool {
    fn metadata(&self) -> &ToolMetadata {
        &self.0
    }

    async fn execute(
        &self,
        parameters: HashMap<String, Value>,
        ctx: &ToolExecutionContext,
    ) -> Result<ToolResult, ToolWardenError> {
        let millis = parameters.get("millis").and_then(Value::as_u64).unwrap_or(0);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(millis)) => {
                Ok(ToolResult::success(Value::Bool(true)))
            }
            _ = ctx.cancellation.cancelled() => {
                Ok(ToolResult::failure("sleep interrupted by cancellation"))
            }
        }
    }
}

/// Allocates and briefly holds `megabytes` of memory, giving the
/// resource monitor's ticker a window to sample a raised working set
/// (spec.md 8 scenario 5, memory limit trip).
pub struct AllocTool(ToolMetadata);

impl AllocTool {
    pub fn new() -> Self {
        Self(ToolMetadata {
            id: "alloc".to_string(),
            name: "alloc".to_string(),
            description: "Allocates megabytes of memory for hold_millis milliseconds".to_string(),
            version: "1.0.0".to_string(),
            category: ToolCategory::System,
            required_capabilities: CapabilitySet::empty(),
            parameters: vec![
                integer_parameter("megabytes", false),
                integer_parameter("hold_millis", false),
            ],
            examples: vec![],
            deprecated: false,
            experimental: false,
            tags: vec!["fixture".to_string()],
        })
    }

    pub fn register(registry: &ToolRegistry) {
        registry
            .register_from_factory(
                Self::new().0,
                Arc::new(|_locator| Box::new(AllocTool::new()) as Box<dyn Tool>),
                None,
            )
            .expect("fixture tools register under unique ids");
    }
}

impl Default for AllocTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for AllocTool {
    fn metadata(&self) -> &ToolMetadata {
        &self.0
    }

    async fn execute(
        &self,
        parameters: HashMap<String, Value>,
        ctx: &ToolExecutionContext,
    ) -> Result<ToolResult, ToolWardenError> {
        let megabytes = parameters.get("megabytes").and_then(Value::as_u64).unwrap_or(1);
        let hold_millis = parameters.get("hold_millis").and_then(Value::as_u64).unwrap_or(100);

        let mut block: Vec<u8> = vec![0u8; (megabytes as usize) * 1024 * 1024];
        // Touch every page so the allocation actually lands in the working
        // set the resource monitor's ticker samples, instead of staying
        // unmapped until first write.
        for byte in block.iter_mut().step_by(4096) {
            *byte = 1;
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(hold_millis)) => {}
            _ = ctx.cancellation.cancelled() => {}
        }

        Ok(ToolResult::success(Value::from(block.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ToolExecutionContext;

    #[tokio::test]
    async fn echo_returns_text_verbatim() {
        let tool = EchoTool::new();
        let mut params = HashMap::new();
        params.insert("text".to_string(), Value::String("hi".to_string()));
        let result = tool.execute(params, &ToolExecutionContext::default()).await.unwrap();
        assert_eq!(result.data, Some(Value::String("hi".to_string())));
    }

    #[tokio::test]
    async fn add_sums_operands() {
        let tool = AddTool::new();
        let mut params = HashMap::new();
        params.insert("a".to_string(), Value::from(2));
        params.insert("b".to_string(), Value::from(3));
        let result = tool.execute(params, &ToolExecutionContext::default()).await.unwrap();
        assert_eq!(result.data, Some(Value::from(5)));
    }

    #[tokio::test]
    async fn sleep_returns_early_on_cancellation() {
        let tool = SleepTool::new();
        let mut params = HashMap::new();
        params.insert("millis".to_string(), Value::from(5_000));
        let ctx = ToolExecutionContext::default();
        ctx.cancellation.cancel();

        let start = std::time::Instant::now();
        let result = tool.execute(params, &ctx).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(!result.is_successful);
    }

    #[tokio::test]
    async fn alloc_reports_allocated_byte_count() {
        let tool = AllocTool::new();
        let mut params = HashMap::new();
        params.insert("megabytes".to_string(), Value::from(1));
        params.insert("hold_millis".to_string(), Value::from(1));
        let result = tool.execute(params, &ToolExecutionContext::default()).await.unwrap();
        assert_eq!(result.data, Some(Value::from(1024 * 1024)));
    }
}
