use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed severity scale for [`SecurityViolation`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// One denied access attempt, recorded by [`crate::security_manager`] and
/// surfaced on the corresponding [`crate::model::ToolExecutionResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityViolation {
    pub tool_id: String,
    pub correlation_id: String,
    pub description: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub context: String,
}

impl SecurityViolation {
    pub fn new(
        tool_id: impl Into<String>,
        correlation_id: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            tool_id: tool_id.into(),
            correlation_id: correlation_id.into(),
            description: description.into(),
            severity,
            timestamp: Utc::now(),
            context: String::new(),
        }
    }
}
