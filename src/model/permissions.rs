use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A permission profile. Clone-on-modify: callers that need a tweaked
/// profile clone this and change the clone, they never mutate a shared
/// instance in place (spec.md 3 "Clone-on-modify").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPermissions {
    pub file_system_access: bool,
    pub network_access: bool,
    pub process_execution: bool,
    pub environment_access: bool,

    pub allowed_paths: Vec<String>,
    pub blocked_paths: Vec<String>,
    pub allowed_hosts: Vec<String>,
    pub blocked_hosts: Vec<String>,

    pub custom_permissions: HashMap<String, Value>,
    /// Per-tool allow/deny override, keyed by tool id.
    pub tool_specific_permissions: HashMap<String, bool>,

    pub profile_name: String,
    pub profile_description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ToolPermissions {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            file_system_access: false,
            network_access: false,
            process_execution: false,
            environment_access: false,
            allowed_paths: Vec::new(),
            blocked_paths: Vec::new(),
            allowed_hosts: Vec::new(),
            blocked_hosts: Vec::new(),
            custom_permissions: HashMap::new(),
            tool_specific_permissions: HashMap::new(),
            profile_name: "default".to_string(),
            profile_description: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl ToolPermissions {
    /// A profile with every capability flag granted, used in tests and as
    /// a starting point for trusted embedders.
    pub fn permissive() -> Self {
        Self {
            file_system_access: true,
            network_access: true,
            process_execution: true,
            environment_access: true,
            ..Self::default()
        }
    }

    /// Returns a clone with `custom_permissions[key] = true`.
    pub fn with_custom_flag(&self, key: &str) -> Self {
        let mut clone = self.clone();
        clone
            .custom_permissions
            .insert(key.to_string(), Value::Bool(true));
        clone.updated_at = Utc::now();
        clone
    }

    pub fn custom_flag(&self, key: &str) -> bool {
        self.custom_permissions
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Per-tool override, if one is configured for `tool_id` (case-insensitive).
    pub fn tool_override(&self, tool_id: &str) -> Option<bool> {
        self.tool_specific_permissions
            .iter()
            .find(|(id, _)| id.eq_ignore_ascii_case(tool_id))
            .map(|(_, allowed)| *allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_on_modify_leaves_original_untouched() {
        let base = ToolPermissions::default();
        let modified = base.with_custom_flag("allow_destructive");
        assert!(!base.custom_flag("allow_destructive"));
        assert!(modified.custom_flag("allow_destructive"));
    }

    #[test]
    fn tool_override_is_case_insensitive() {
        let mut perms = ToolPermissions::default();
        perms
            .tool_specific_permissions
            .insert("Shell".to_string(), false);
        assert_eq!(perms.tool_override("shell"), Some(false));
        assert_eq!(perms.tool_override("OTHER"), None);
    }
}
