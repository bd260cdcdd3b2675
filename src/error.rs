use thiserror::Error;

/// Typed error hierarchy for toolwarden.
///
/// Used at module boundaries (registry, security, executor). Leaf call
/// sites can keep using `anyhow::Result` internally -- the `Internal`
/// variant lets those propagate through `?` without a manual conversion.
#[derive(Debug, Error)]
pub enum ToolWardenError {
    #[error("Tool '{0}' not found")]
    NotFound(String),

    #[error("Tool '{0}' is disabled")]
    Disabled(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Security validation failed: {0}")]
    Permission(String),

    #[error("Resource limit exceeded: {0}")]
    ResourceLimit(String),

    #[error("Tool execution was cancelled")]
    Cancelled,

    #[error("Tool execution failed: {0}")]
    ToolFailure(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ToolWardenError {
    /// Whether retrying the same request might succeed without caller changes.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ResourceLimit(_) | Self::Cancelled | Self::Internal(_) => true,
            Self::NotFound(_)
            | Self::Disabled(_)
            | Self::Validation(_)
            | Self::Permission(_)
            | Self::ToolFailure(_) => false,
        }
    }

    /// Stable category name used for observability tagging and error-distribution
    /// aggregation (spec.md 4.7 "error distribution by category").
    pub fn category(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::Disabled(_) => "Disabled",
            Self::Validation(_) => "Validation",
            Self::Permission(_) => "Permission",
            Self::ResourceLimit(_) => "ResourceLimit",
            Self::Cancelled => "Cancelled",
            Self::ToolFailure(_) => "ToolFailure",
            Self::Internal(_) => "InternalError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_limit_is_retryable() {
        assert!(ToolWardenError::ResourceLimit("memory".into()).is_retryable());
    }

    #[test]
    fn validation_is_not_retryable() {
        assert!(!ToolWardenError::Validation("bad".into()).is_retryable());
    }

    #[test]
    fn category_names_are_stable() {
        assert_eq!(ToolWardenError::NotFound("x".into()).category(), "NotFound");
        assert_eq!(ToolWardenError::Cancelled.category(), "Cancelled");
    }
}
