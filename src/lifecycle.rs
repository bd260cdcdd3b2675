//! Lifecycle Manager (spec.md 4.9, C9): boot-time registration, shutdown,
//! and a periodic maintenance sweep.
//!
//! Discovery/reflection is out of the hard core (spec.md 9): `initialize`
//! just consumes an explicit list of registrations handed to it at
//! construction, the "reduced to a registration list" substitution the
//! spec calls for.

use crate::error::ToolWardenError;
use crate::executor::Executor;
use crate::model::ToolMetadata;
use crate::observability::Observability;
use crate::registry::ToolRegistry;
use crate::security_manager::SecurityManager;
use crate::settings::FrameworkConfig;
use crate::tool::ToolFactory;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// One entry in the static set of tool registrations handed to
/// `LifecycleManager::initialize` (spec.md 4.9 "registers the static set
/// of tool registrations handed in at construction").
pub struct ToolRegistrationSpec {
    pub metadata: ToolMetadata,
    pub factory: ToolFactory,
    pub configuration: Option<HashMap<String, Value>>,
}

impl ToolRegistrationSpec {
    pub fn new(metadata: ToolMetadata, factory: ToolFactory) -> Self {
        Self {
            metadata,
            factory,
            configuration: None,
        }
    }
}

/// Snapshot returned by `LifecycleManager::status` (spec.md 4.9 `getStatus`).
#[derive(Debug, Clone)]
pub struct LifecycleStatus {
    pub is_initialized: bool,
    pub registered_tools_count: usize,
    pub active_executions_count: i64,
    pub total_executions: u64,
    pub initialized_at: Option<DateTime<Utc>>,
    pub last_maintenance_at: Option<DateTime<Utc>>,
    pub startup_errors: Vec<String>,
}

/// Drives boot-time registration, shutdown, and an hourly maintenance
/// sweep (spec.md 4.9). Owns no data of its own beyond bookkeeping --
/// the registry, executor, security manager, and observability store are
/// all shared with the caller via `Arc`.
pub struct LifecycleManager {
    registry: Arc<ToolRegistry>,
    executor: Arc<Executor>,
    security: Arc<SecurityManager>,
    observability: Arc<Observability>,
    config: FrameworkConfig,
    is_initialized: AtomicBool,
    initialized_at: Mutex<Option<DateTime<Utc>>>,
    last_maintenance_at: Mutex<Option<DateTime<Utc>>>,
    startup_errors: Mutex<Vec<String>>,
    maintenance_ticker: Mutex<Option<JoinHandle<()>>>,
}

impl LifecycleManager {
    pub fn new(
        registry: Arc<ToolRegistry>,
        executor: Arc<Executor>,
        security: Arc<SecurityManager>,
        observability: Arc<Observability>,
        config: FrameworkConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            executor,
            security,
            observability,
            config,
            is_initialized: AtomicBool::new(false),
            initialized_at: Mutex::new(None),
            last_maintenance_at: Mutex::new(None),
            startup_errors: Mutex::new(Vec::new()),
            maintenance_ticker: Mutex::new(None),
        })
    }

    /// Registers every entry in `registrations`. Startup errors are
    /// recorded without aborting the run unless
    /// `fail_on_explicit_tool_registration_error` is set, in which case the
    /// first error short-circuits the whole call (spec.md 4.9 "records
    /// startup errors without aborting unless ... is set").
    pub fn initialize(
        self: &Arc<Self>,
        registrations: impl IntoIterator<Item = ToolRegistrationSpec>,
        fail_on_explicit_tool_registration_error: bool,
    ) -> Result<(), ToolWardenError> {
        let mut errors = Vec::new();
        for spec in registrations {
            let tool_id = spec.metadata.id.clone();
            if let Err(err) = self
                .registry
                .register_from_factory(spec.metadata, spec.factory, spec.configuration)
            {
                let message = format!("failed to register '{tool_id}': {err}");
                if fail_on_explicit_tool_registration_error {
                    error!(tool_id = %tool_id, error = %err, "startup registration failed, aborting initialize");
                    return Err(err);
                }
                warn!(tool_id = %tool_id, error = %err, "startup registration failed; continuing");
                errors.push(message);
            }
        }

        *self.startup_errors.lock().unwrap_or_else(|e| e.into_inner()) = errors;
        *self.initialized_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        self.is_initialized.store(true, Ordering::SeqCst);

        let ticker = self.clone().spawn_maintenance_ticker();
        *self
            .maintenance_ticker
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(ticker);

        info!(
            registered = self.registry.len(),
            "lifecycle manager initialized"
        );
        Ok(())
    }

    fn spawn_maintenance_ticker(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60 * 60));
            loop {
                interval.tick().await;
                self.perform_maintenance();
            }
        })
    }

    /// Purges security violations older than `securityViolationMaxAge` and
    /// observability records past their retention window (spec.md 4.9
    /// `performMaintenance`).
    pub fn perform_maintenance(&self) {
        let max_age = chrono::Duration::from_std(self.config.security_violation_max_age)
            .unwrap_or(chrono::Duration::zero());
        let purged_violations = self.security.clear_old_violations(max_age);
        let cutoff = Utc::now() - max_age;
        let purged_records = self.observability.purge_older_than(cutoff);

        *self
            .last_maintenance_at
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        info!(
            purged_violations,
            purged_records, "maintenance sweep completed"
        );
    }

    /// Cancels every running execution best-effort and flips
    /// `is_initialized` to false (spec.md 4.9 `shutdown`).
    pub fn shutdown(&self) {
        self.executor.dispose();
        self.is_initialized.store(false, Ordering::SeqCst);
        if let Some(handle) = self
            .maintenance_ticker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
        info!("lifecycle manager shut down");
    }

    pub fn status(&self) -> LifecycleStatus {
        LifecycleStatus {
            is_initialized: self.is_initialized.load(Ordering::SeqCst),
            registered_tools_count: self.registry.len(),
            active_executions_count: self.observability.active_execution_count(),
            total_executions: self.executor.statistics().total,
            initialized_at: *self.initialized_at.lock().unwrap_or_else(|e| e.into_inner()),
            last_maintenance_at: *self
                .last_maintenance_at
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
            startup_errors: self
                .startup_errors
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }
}
