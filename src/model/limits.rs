use serde::{Deserialize, Serialize};

/// Resource ceilings enforced by [`crate::resource_monitor`] and by the
/// executor's cancellation composition (spec.md 3, 4.3, 4.8).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolResourceLimits {
    pub max_execution_time_ms: u64,
    pub max_memory_bytes: u64,
    pub max_file_size_bytes: u64,
    pub max_file_count: u64,
    pub max_output_size_bytes: u64,
}

impl Default for ToolResourceLimits {
    fn default() -> Self {
        Self {
            max_execution_time_ms: 30_000,
            max_memory_bytes: 100 * 1024 * 1024,
            max_file_size_bytes: 10 * 1024 * 1024,
            max_file_count: 100,
            max_output_size_bytes: 1024 * 1024,
        }
    }
}
