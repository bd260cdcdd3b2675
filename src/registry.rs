//! Thread-safe tool catalog (spec.md 4.5, C5).
//!
//! Storage is an `RwLock<HashMap>` keyed by lower-cased id -- serialized
//! writes, lock-free-relative-to-each-other reads, the same shape
//! `oxicrab::agent::subagent` gets from `OnceLock<Arc<ToolRegistry>>` plus
//! interior mutability.

use crate::events::{tool_registered, tool_unregistered, EventBus};
use crate::model::{Capability, CapabilitySet, ToolCategory, ToolMetadata};
use crate::tool::{ServiceLocator, Tool, ToolFactory};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Where a registration came from, kept for the statistics breakdown
/// in spec.md 4.5.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source: String,
    pub assembly_name: Option<String>,
    pub registered_at: DateTime<Utc>,
}

impl Provenance {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            assembly_name: None,
            registered_at: Utc::now(),
        }
    }
}

/// Metadata + factory + mutable configuration + enabled flag, owned by
/// the registry (spec.md 3 "ToolRegistration").
pub struct ToolRegistration {
    pub metadata: ToolMetadata,
    factory: ToolFactory,
    pub configuration: HashMap<String, Value>,
    pub is_enabled: bool,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Default)]
pub struct RegistryStatistics {
    pub total: usize,
    pub by_category: HashMap<ToolCategory, usize>,
    pub by_source: HashMap<String, usize>,
    pub by_capability: HashMap<Capability, usize>,
}

/// Thread-safe catalog mapping tool ids to factories + metadata.
pub struct ToolRegistry {
    registrations: RwLock<HashMap<String, ToolRegistration>>,
    events: EventBus,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
            events: EventBus::new(),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn key(id: &str) -> String {
        id.to_ascii_lowercase()
    }

    /// Registers a tool built from an already-constructed `metadata` plus
    /// a factory closure (spec.md 4.5 `registerFromFactory`).
    pub fn register_from_factory(
        &self,
        metadata: ToolMetadata,
        factory: ToolFactory,
        configuration: Option<HashMap<String, Value>>,
    ) -> Result<(), crate::error::ToolWardenError> {
        let validation = crate::validator::validate_metadata(&metadata);
        if !validation.is_valid() {
            return Err(crate::error::ToolWardenError::Validation(
                validation.joined_error_message(),
            ));
        }

        let key = Self::key(&metadata.id);
        let mut guard = self.registrations.write().unwrap_or_else(|e| e.into_inner());
        if guard.contains_key(&key) {
            return Err(crate::error::ToolWardenError::Validation(format!(
                "Tool id '{}' is already registered",
                metadata.id
            )));
        }

        let tool_id = metadata.id.clone();
        guard.insert(
            key,
            ToolRegistration {
                metadata,
                factory,
                configuration: configuration.unwrap_or_default(),
                is_enabled: true,
                provenance: Provenance::new("factory"),
            },
        );
        drop(guard);

        info!(tool_id = %tool_id, "tool registered");
        self.events.emit(tool_registered(&tool_id));
        Ok(())
    }

    /// Instantiates `tool` once (with a default service locator) to read
    /// its metadata, then registers it the same way `register_from_factory`
    /// does (spec.md 4.5 `registerFromType`).
    pub fn register_from_type<F>(
        &self,
        build: F,
        configuration: Option<HashMap<String, Value>>,
    ) -> Result<(), crate::error::ToolWardenError>
    where
        F: Fn(&ServiceLocator) -> Box<dyn Tool> + Send + Sync + 'static,
    {
        let probe = build(&ServiceLocator::new());
        let metadata = probe.metadata().clone();
        let factory: ToolFactory = Arc::new(build);
        self.register_from_factory(metadata, factory, configuration)
    }

    pub fn unregister(&self, id: &str) -> bool {
        let key = Self::key(id);
        let removed = self
            .registrations
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key)
            .is_some();
        if removed {
            debug!(tool_id = %id, "tool unregistered");
            self.events.emit(tool_unregistered(id));
        }
        removed
    }

    /// Case-insensitive lookup returning a metadata snapshot.
    pub fn get(&self, id: &str) -> Option<ToolMetadata> {
        self.registrations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&Self::key(id))
            .map(|r| r.metadata.clone())
    }

    pub fn is_enabled(&self, id: &str) -> Option<bool> {
        self.registrations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&Self::key(id))
            .map(|r| r.is_enabled)
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut guard = self.registrations.write().unwrap_or_else(|e| e.into_inner());
        match guard.get_mut(&Self::key(id)) {
            Some(reg) => {
                reg.is_enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn update_configuration(&self, id: &str, configuration: HashMap<String, Value>) -> bool {
        let mut guard = self.registrations.write().unwrap_or_else(|e| e.into_inner());
        match guard.get_mut(&Self::key(id)) {
            Some(reg) => {
                reg.configuration.extend(configuration);
                true
            }
            None => false,
        }
    }

    pub fn configuration(&self, id: &str) -> Option<HashMap<String, Value>> {
        self.registrations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&Self::key(id))
            .map(|r| r.configuration.clone())
    }

    /// Returns tools matching every filter given (must-have-all for
    /// capabilities; spec.md 4.5 `query`).
    pub fn query(
        &self,
        category: Option<ToolCategory>,
        capabilities: Option<CapabilitySet>,
        tags: Option<&[String]>,
        enabled_only: bool,
    ) -> Vec<ToolMetadata> {
        self.registrations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|reg| !enabled_only || reg.is_enabled)
            .filter(|reg| category.map(|c| reg.metadata.category == c).unwrap_or(true))
            .filter(|reg| {
                capabilities
                    .map(|need| reg.metadata.required_capabilities.contains_all(&need))
                    .unwrap_or(true)
            })
            .filter(|reg| match tags {
                None => true,
                Some(wanted) => wanted.iter().all(|t| reg.metadata.tags.contains(t)),
            })
            .map(|reg| reg.metadata.clone())
            .collect()
    }

    /// Substring match over name, description, tags; ordered by name
    /// (spec.md 4.5 `search`).
    pub fn search(&self, term: &str, enabled_only: bool) -> Vec<ToolMetadata> {
        let needle = term.to_ascii_lowercase();
        let mut results: Vec<ToolMetadata> = self
            .registrations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|reg| !enabled_only || reg.is_enabled)
            .filter(|reg| {
                reg.metadata.name.to_ascii_lowercase().contains(&needle)
                    || reg.metadata.description.to_ascii_lowercase().contains(&needle)
                    || reg
                        .metadata
                        .tags
                        .iter()
                        .any(|t| t.to_ascii_lowercase().contains(&needle))
            })
            .map(|reg| reg.metadata.clone())
            .collect();
        results.sort_by(|a, b| a.name.cmp(&b.name));
        results
    }

    /// Instantiates a fresh tool via its registered factory. Returns
    /// `None` for not-found, disabled, or a factory that panics/errors
    /// (spec.md 4.5 `createInstance`: "returns a new tool instance or
    /// null").
    pub fn create_instance(&self, id: &str, locator: &ServiceLocator) -> Option<Box<dyn Tool>> {
        let guard = self.registrations.read().unwrap_or_else(|e| e.into_inner());
        let reg = guard.get(&Self::key(id))?;
        if !reg.is_enabled {
            warn!(tool_id = %id, "create_instance: tool is disabled");
            return None;
        }
        let factory = reg.factory.clone();
        drop(guard);

        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| factory(locator))) {
            Ok(instance) => Some(instance),
            Err(_) => {
                warn!(tool_id = %id, "tool factory panicked");
                None
            }
        }
    }

    /// Removes every registration, emitting one `ToolUnregistered` event
    /// per removed tool (spec.md 4.5 `clear`).
    pub fn clear(&self) {
        let removed: Vec<String> = {
            let mut guard = self.registrations.write().unwrap_or_else(|e| e.into_inner());
            let ids: Vec<String> = guard.values().map(|r| r.metadata.id.clone()).collect();
            guard.clear();
            ids
        };
        for id in removed {
            self.events.emit(tool_unregistered(&id));
        }
    }

    pub fn statistics(&self) -> RegistryStatistics {
        let guard = self.registrations.read().unwrap_or_else(|e| e.into_inner());
        let mut stats = RegistryStatistics {
            total: guard.len(),
            ..Default::default()
        };
        for reg in guard.values() {
            *stats.by_category.entry(reg.metadata.category).or_insert(0) += 1;
            *stats
                .by_source
                .entry(reg.provenance.source.clone())
                .or_insert(0) += 1;
            for cap in reg.metadata.required_capabilities.iter() {
                *stats.by_capability.entry(cap).or_insert(0) += 1;
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.registrations.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ToolExecutionContext, ToolResult};
    use async_trait::async_trait;
    use std::collections::HashMap as Map;

    struct DummyTool(ToolMetadata);

    #[async_trait]
    impl Tool for DummyTool {
        fn metadata(&self) -> &ToolMetadata {
            &self.0
        }

        async fn execute(
            &self,
            _parameters: Map<String, Value>,
            _ctx: &ToolExecutionContext,
        ) -> Result<ToolResult, crate::error::ToolWardenError> {
            Ok(ToolResult::success(Value::String("ok".to_string())))
        }
    }

    fn metadata(id: &str) -> ToolMetadata {
        ToolMetadata {
            id: id.to_string(),
            name: id.to_string(),
            description: "a dummy tool".to_string(),
            version: "1.0.0".to_string(),
            category: ToolCategory::Utility,
            required_capabilities: CapabilitySet::empty(),
            parameters: vec![],
            examples: vec![],
            deprecated: false,
            experimental: false,
            tags: vec!["test".to_string()],
        }
    }

    fn register(registry: &ToolRegistry, id: &str) {
        let meta = metadata(id);
        registry
            .register_from_factory(
                meta.clone(),
                Arc::new(move |_locator| Box::new(DummyTool(meta.clone())) as Box<dyn Tool>),
                None,
            )
            .unwrap();
    }

    #[test]
    fn duplicate_registration_fails_and_state_is_unchanged() {
        let registry = ToolRegistry::new();
        register(&registry, "echo");
        let err = registry.register_from_factory(
            metadata("echo"),
            Arc::new(|_| Box::new(DummyTool(metadata("echo"))) as Box<dyn Tool>),
            None,
        );
        assert!(err.is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = ToolRegistry::new();
        register(&registry, "Echo");
        assert!(registry.get("echo").is_some());
        assert!(registry.get("ECHO").is_some());
    }

    #[test]
    fn disabled_tool_cannot_be_instantiated() {
        let registry = ToolRegistry::new();
        register(&registry, "echo");
        registry.set_enabled("echo", false);
        assert!(registry.create_instance("echo", &ServiceLocator::new()).is_none());
    }

    #[test]
    fn search_orders_by_name() {
        let registry = ToolRegistry::new();
        register(&registry, "zeta");
        register(&registry, "alpha");
        let results = registry.search("test", true);
        let names: Vec<_> = results.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn clear_emits_one_unregistered_event_per_tool() {
        let registry = ToolRegistry::new();
        register(&registry, "a");
        register(&registry, "b");

        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let c = count.clone();
        registry.events().subscribe(move |event| {
            if matches!(event, crate::events::Event::ToolUnregistered { .. }) {
                c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        });

        registry.clear();
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn query_filters_by_capability_must_have_all() {
        let registry = ToolRegistry::new();
        let mut meta = metadata("fs-tool");
        meta.required_capabilities = CapabilitySet::from_iter([Capability::FileSystem]);
        registry
            .register_from_factory(
                meta.clone(),
                Arc::new(move |_| Box::new(DummyTool(meta.clone())) as Box<dyn Tool>),
                None,
            )
            .unwrap();
        register(&registry, "plain");

        let need = CapabilitySet::from_iter([Capability::FileSystem]);
        let results = registry.query(None, Some(need), None, true);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "fs-tool");
    }
}
