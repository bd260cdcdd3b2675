//! End-to-end pipeline scenarios (spec.md 8): one `Executor` wired up the
//! same way `toolwarden::executor`'s own inline tests build one, exercised
//! through the public API only.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use toolwarden::cache::ExecutionCache;
use toolwarden::fixtures::{AddTool, AllocTool, EchoTool, SleepTool};
use toolwarden::model::{
    ToolCategory, ToolExecutionContext, ToolMetadata, ToolPermissions, ToolResult,
};
use toolwarden::observability::Observability;
use toolwarden::output_limiter::OutputLimiter;
use toolwarden::registry::ToolRegistry;
use toolwarden::resource_monitor::ResourceMonitor;
use toolwarden::security_manager::{AccessType, SecurityManager};
use toolwarden::settings::{CacheConfig, OutputLimiterConfig};
use toolwarden::tool::{ServiceLocator, Tool};
use toolwarden::{Executor, ToolWardenError};

fn build_executor_with_tick(tick: Duration) -> Executor {
    let registry = Arc::new(ToolRegistry::new());
    EchoTool::register(&registry);
    AddTool::register(&registry);
    SleepTool::register(&registry);
    AllocTool::register(&registry);

    Executor::new(
        registry,
        Arc::new(SecurityManager::new()),
        ResourceMonitor::with_tick_interval(tick),
        Some(Arc::new(ExecutionCache::new(&CacheConfig::default()))),
        &CacheConfig::default(),
        OutputLimiter::new(OutputLimiterConfig::default()),
        Arc::new(Observability::new()),
        ServiceLocator::new(),
    )
}

fn permissive_context() -> ToolExecutionContext {
    ToolExecutionContext {
        permissions: ToolPermissions::permissive(),
        ..Default::default()
    }
}

/// Scenario 1: happy path.
#[tokio::test]
async fn happy_path_echo() {
    let executor = build_executor_with_tick(Duration::from_millis(50));
    let mut params = HashMap::new();
    params.insert("text".to_string(), json!("hi"));

    let result = executor.execute_tool("echo", params, permissive_context()).await;

    assert!(result.result.is_successful);
    assert_eq!(result.result.data, Some(json!("hi")));
    assert!(!result.was_cancelled);
    assert!(result.security_violations.is_empty());
}

/// Scenario 2: required parameter missing.
#[tokio::test]
async fn required_parameter_missing_fails_before_monitoring_starts() {
    let executor = build_executor_with_tick(Duration::from_millis(50));

    let result = executor.execute_tool("echo", HashMap::new(), permissive_context()).await;

    assert!(!result.result.is_successful);
    let message = result.result.error_message.unwrap();
    assert!(message.starts_with("Validation failed"));
    assert!(message.contains("text"));
    assert!(executor.running_executions().is_empty());
}

/// Scenario 3: blocked path is denied by the security manager.
#[tokio::test]
async fn blocked_path_denies_read_access() {
    let security = SecurityManager::new();
    let mut permissions = ToolPermissions::permissive();
    permissions.blocked_paths = vec!["/etc".to_string()];

    let outcome = security.is_file_access_allowed("/etc/passwd", &permissions, AccessType::Read);
    assert!(outcome.is_err());
}

/// Scenario 3 (whole pipeline): a tool that denies itself via the
/// executor's capability gate reports a security violation.
#[tokio::test]
async fn capability_gate_denies_without_filesystem_access() {
    let registry = Arc::new(ToolRegistry::new());

    struct ReadFileTool(ToolMetadata);
    #[async_trait]
    impl Tool for ReadFileTool {
        fn metadata(&self) -> &ToolMetadata {
            &self.0
        }
        async fn execute(
            &self,
            _parameters: HashMap<String, Value>,
            _ctx: &ToolExecutionContext,
        ) -> Result<ToolResult, ToolWardenError> {
            Ok(ToolResult::success(json!("should never run")))
        }
    }
    let meta = ToolMetadata {
        id: "read_file".to_string(),
        name: "read_file".to_string(),
        description: "reads a file".to_string(),
        version: "1.0.0".to_string(),
        category: ToolCategory::FileSystem,
        required_capabilities: toolwarden::model::CapabilitySet::from_iter([
            toolwarden::model::Capability::FileSystem,
        ]),
        parameters: vec![],
        examples: vec![],
        deprecated: false,
        experimental: false,
        tags: vec![],
    };
    registry
        .register_from_factory(
            meta.clone(),
            Arc::new(move |_| Box::new(ReadFileTool(meta.clone())) as Box<dyn Tool>),
            None,
        )
        .unwrap();

    let executor = Executor::new(
        registry,
        Arc::new(SecurityManager::new()),
        ResourceMonitor::with_tick_interval(Duration::from_millis(50)),
        None,
        &CacheConfig::default(),
        OutputLimiter::new(OutputLimiterConfig::default()),
        Arc::new(Observability::new()),
        ServiceLocator::new(),
    );

    // No filesystem access granted at all.
    let ctx = ToolExecutionContext::default();
    let result = executor.execute_tool("read_file", HashMap::new(), ctx).await;

    assert!(!result.result.is_successful);
    assert!(!result.security_violations.is_empty());
    assert_eq!(result.security_violations[0].severity, toolwarden::model::Severity::High);
    assert!(result
        .result
        .error_message
        .unwrap()
        .starts_with("Security validation failed"));
}

/// Scenario 4: timeout cancels a sleeping tool.
#[tokio::test]
async fn timeout_cancels_sleeping_tool() {
    let executor = build_executor_with_tick(Duration::from_millis(50));
    let mut params = HashMap::new();
    params.insert("millis".to_string(), json!(500));
    let mut ctx = permissive_context();
    ctx.resource_limits.max_execution_time_ms = 100;

    let start = std::time::Instant::now();
    let result = executor.execute_tool("sleep", params, ctx).await;
    let elapsed = start.elapsed();

    assert!(result.was_cancelled);
    assert_eq!(result.result.error_message.as_deref(), Some("Tool execution was cancelled"));
    assert!(elapsed < Duration::from_millis(450));
}

/// Scenario 5: a memory ceiling low enough that the very first host sample
/// trips it.
#[tokio::test]
async fn memory_limit_trip_is_reported() {
    let executor = build_executor_with_tick(Duration::from_millis(10));
    let mut params = HashMap::new();
    params.insert("megabytes".to_string(), json!(1));
    params.insert("hold_millis".to_string(), json!(200));
    let mut ctx = permissive_context();
    ctx.resource_limits.max_memory_bytes = 1;

    let result = executor.execute_tool("alloc", params, ctx).await;

    assert!(result.was_cancelled || result.hit_resource_limits);
    if result.hit_resource_limits {
        let exceeded = result.result.metadata.get("exceeded_limits").unwrap();
        assert!(exceeded.as_array().unwrap().iter().any(|v| v == "memory"));
    }
}

/// Scenario 6: caching makes the second identical call a zero-duration hit.
#[tokio::test]
async fn cache_hit_on_repeated_call() {
    let executor = build_executor_with_tick(Duration::from_millis(50));
    let mut params = HashMap::new();
    params.insert("a".to_string(), json!(1));
    params.insert("b".to_string(), json!(2));
    let mut ctx = permissive_context();
    ctx.additional_data.insert("EnableCaching".to_string(), Value::Bool(true));

    let first = executor.execute_tool("add", params.clone(), ctx.clone()).await;
    assert!(first.result.is_successful);
    assert_eq!(first.result.data, Some(json!(3)));

    let second = executor.execute_tool("add", params, ctx).await;
    assert!(second.result.is_successful);
    assert_eq!(second.result.metadata["cache_hit"], Value::Bool(true));
    assert_eq!(second.result.duration_ms, 0);
}

/// Scenario 7: a tool returning ten thousand file entries gets truncated
/// with a populated summary and suggestions.
#[tokio::test]
async fn large_file_list_is_truncated_with_summary() {
    let registry = Arc::new(ToolRegistry::new());

    struct ListFilesTool(ToolMetadata);
    #[async_trait]
    impl Tool for ListFilesTool {
        fn metadata(&self) -> &ToolMetadata {
            &self.0
        }
        async fn execute(
            &self,
            _parameters: HashMap<String, Value>,
            _ctx: &ToolExecutionContext,
        ) -> Result<ToolResult, ToolWardenError> {
            let entries: Vec<Value> = (0..10_000)
                .map(|i| json!({"path": format!("src/mod_{}/file_{i}.rs", i % 20)}))
                .collect();
            Ok(ToolResult::success(Value::Array(entries)))
        }
    }
    let meta = ToolMetadata {
        id: "list_dir_files".to_string(),
        name: "list_dir_files".to_string(),
        description: "lists files in a directory".to_string(),
        version: "1.0.0".to_string(),
        category: ToolCategory::FileSystem,
        required_capabilities: Default::default(),
        parameters: vec![],
        examples: vec![],
        deprecated: false,
        experimental: false,
        tags: vec![],
    };
    registry
        .register_from_factory(
            meta.clone(),
            Arc::new(move |_| Box::new(ListFilesTool(meta.clone())) as Box<dyn Tool>),
            None,
        )
        .unwrap();

    let executor = Executor::new(
        registry,
        Arc::new(SecurityManager::new()),
        ResourceMonitor::with_tick_interval(Duration::from_millis(50)),
        None,
        &CacheConfig::default(),
        OutputLimiter::new(OutputLimiterConfig::default()),
        Arc::new(Observability::new()),
        ServiceLocator::new(),
    );

    let result = executor
        .execute_tool("list_dir_files", HashMap::new(), permissive_context())
        .await;

    assert!(result.result.is_successful);
    assert_eq!(result.result.metadata["output_truncated"], Value::Bool(true));
    let info = &result.result.metadata["truncation_info"];
    assert!(info["summary"]["groups"].as_array().unwrap().len() <= 10);
    let suggestions = info["suggestions"].as_array().unwrap();
    assert!(suggestions.iter().any(|s| s.as_str().unwrap().to_lowercase().contains("pattern")));
}

/// Universal property: statistics conserve total = successful + failed +
/// cancelled across a mixed batch of outcomes.
#[tokio::test]
async fn statistics_conserve_total() {
    let executor = build_executor_with_tick(Duration::from_millis(50));

    let mut ok = HashMap::new();
    ok.insert("text".to_string(), json!("x"));
    executor.execute_tool("echo", ok, permissive_context()).await;
    executor.execute_tool("echo", HashMap::new(), permissive_context()).await;

    let mut sleep_params = HashMap::new();
    sleep_params.insert("millis".to_string(), json!(500));
    let mut ctx = permissive_context();
    ctx.resource_limits.max_execution_time_ms = 20;
    executor.execute_tool("sleep", sleep_params, ctx).await;

    let stats = executor.statistics();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.successful + stats.failed + stats.cancelled, stats.total);
}

/// Universal property: `cancelExecutions` cancels in-flight work and every
/// subsequent completion for that correlation id reports `wasCancelled`.
#[tokio::test]
async fn cancel_executions_cancels_in_flight_work() {
    let executor = Arc::new(build_executor_with_tick(Duration::from_millis(50)));
    let mut params = HashMap::new();
    params.insert("millis".to_string(), json!(5_000));
    let mut ctx = permissive_context();
    ctx.correlation_id = "long-running".to_string();

    let handle = {
        let executor = executor.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { executor.execute_tool("sleep", params, ctx).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    let cancelled = executor.cancel_executions("long-running");
    assert_eq!(cancelled, 1);

    let result = handle.await.unwrap();
    assert!(result.was_cancelled);
}
