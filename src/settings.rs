//! Plain config structs with `Default` impls, serializable to/from
//! TOML/JSON for embedding in a host's config file (spec.md 6
//! "Configuration surface"; SPEC_FULL.md 2, modeled the way
//! `oxicrab::config::schema` shapes its config tree).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Closed truncation-strategy choice for the output limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationStrategy {
    Simple,
    Intelligent,
    SummarizeOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputLimiterConfig {
    pub max_output_characters: usize,
    pub max_file_list_characters: usize,
    pub max_file_list_entries: usize,
    pub max_file_content_characters: usize,
    pub max_lines_per_file: usize,
    pub enable_smart_summaries: bool,
    pub default_strategy: TruncationStrategy,
}

impl Default for OutputLimiterConfig {
    fn default() -> Self {
        Self {
            max_output_characters: 50_000,
            max_file_list_characters: 50_000,
            max_file_list_entries: 1_000,
            max_file_content_characters: 100_000,
            max_lines_per_file: 1_000,
            enable_smart_summaries: true,
            default_strategy: TruncationStrategy::Intelligent,
        }
    }
}

/// Relative priority of a cache entry under eviction pressure (spec.md
/// 4.6 "Options").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePriority {
    Low,
    Normal,
    High,
    NeverEvict,
}

impl Default for CachePriority {
    fn default() -> Self {
        Self::Normal
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(with = "humantime_secs")]
    pub default_time_to_live: Duration,
    pub max_size_bytes: u64,
    #[serde(with = "humantime_secs")]
    pub cleanup_interval: Duration,
    pub max_entries_per_tool: usize,
    pub use_sliding_expiration: bool,
    pub memory_pressure_threshold: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_time_to_live: Duration::from_secs(5 * 60),
            max_size_bytes: 100 * 1024 * 1024,
            cleanup_interval: Duration::from_secs(5 * 60),
            max_entries_per_tool: 1_000,
            use_sliding_expiration: true,
            memory_pressure_threshold: 0.9,
        }
    }
}

/// Round-trips a `Duration` as whole seconds, the cheapest representation
/// that's still human-editable in a TOML/JSON config file.
mod humantime_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkConfig {
    pub auto_discover_tools: bool,
    pub register_built_in_tools: bool,
    pub default_resource_limits: crate::model::ToolResourceLimits,
    pub default_permissions: crate::model::ToolPermissions,
    pub enable_security: bool,
    pub enable_resource_monitoring: bool,
    pub enable_observability: bool,
    #[serde(with = "humantime_secs")]
    pub security_violation_max_age: Duration,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            auto_discover_tools: false,
            register_built_in_tools: true,
            default_resource_limits: crate::model::ToolResourceLimits::default(),
            default_permissions: crate::model::ToolPermissions::default(),
            enable_security: true,
            enable_resource_monitoring: true,
            enable_observability: true,
            security_violation_max_age: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_limiter_defaults_match_spec() {
        let c = OutputLimiterConfig::default();
        assert_eq!(c.max_output_characters, 50_000);
        assert_eq!(c.max_file_list_entries, 1_000);
        assert!(c.enable_smart_summaries);
    }

    #[test]
    fn cache_defaults_match_spec() {
        let c = CacheConfig::default();
        assert_eq!(c.default_time_to_live, Duration::from_secs(300));
        assert_eq!(c.max_size_bytes, 100 * 1024 * 1024);
        assert!(c.use_sliding_expiration);
    }

    #[test]
    fn framework_defaults_match_spec() {
        let c = FrameworkConfig::default();
        assert!(c.enable_security);
        assert_eq!(c.security_violation_max_age, Duration::from_secs(7 * 24 * 60 * 60));
    }

    #[test]
    fn config_round_trips_through_json() {
        let c = CacheConfig::default();
        let json = serde_json::to_string(&c).unwrap();
        let back: CacheConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_size_bytes, c.max_size_bytes);
    }
}
