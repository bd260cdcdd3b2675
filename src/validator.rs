//! Pure, synchronous, stateless validation (spec.md 4.1, C1).
//!
//! Every function here takes its subject by reference and returns a
//! [`ValidationResult`]; none of them touch the registry, the filesystem,
//! or the clock.

use crate::model::{
    Capability, ParameterType, ToolMetadata, ToolParameter, ToolPermissions, ToolResourceLimits,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Error vs. warning: errors make [`ValidationResult::is_valid`] false,
/// warnings never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// One validation finding. `path` points at the offending field
/// (dotted, e.g. `"parameters.timeout"`) when applicable.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub code: &'static str,
    pub message: String,
    pub path: Option<String>,
    pub attempted_value: Option<Value>,
    pub severity: Severity,
}

impl ValidationIssue {
    fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: None,
            attempted_value: None,
            severity: Severity::Error,
        }
    }

    fn warning(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: None,
            attempted_value: None,
            severity: Severity::Warning,
        }
    }

    fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    fn with_value(mut self, value: Value) -> Self {
        self.attempted_value = Some(value);
        self
    }
}

/// Aggregate outcome of a validation pass.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn push(&mut self, issue: ValidationIssue) {
        match issue.severity {
            Severity::Error => self.errors.push(issue),
            Severity::Warning => self.warnings.push(issue),
        }
    }

    fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Joins error messages for surfacing as `ToolWardenError::Validation`
    /// (spec.md 7: "Surfaced errors carry a stable, human-readable prefix").
    pub fn joined_error_message(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Validates a [`ToolMetadata`] and its parameter schema (spec.md 4.1
/// "Metadata validation").
pub fn validate_metadata(metadata: &ToolMetadata) -> ValidationResult {
    let mut result = ValidationResult::ok();

    if metadata.id.trim().is_empty() {
        result.push(ValidationIssue::error(
            "METADATA_ID_REQUIRED",
            "Tool id is required",
        ));
    } else if !ToolMetadata::id_is_well_formed(&metadata.id) {
        result.push(
            ValidationIssue::error(
                "METADATA_ID_INVALID",
                format!(
                    "Tool id '{}' must be printable, match [A-Za-z0-9_-], and be at most 100 chars",
                    metadata.id
                ),
            )
            .with_path("id"),
        );
    }

    if metadata.name.trim().is_empty() {
        result.push(ValidationIssue::error(
            "METADATA_NAME_REQUIRED",
            "Tool name is required",
        ));
    }

    if metadata.description.trim().is_empty() {
        result.push(ValidationIssue::error(
            "METADATA_DESCRIPTION_REQUIRED",
            "Tool description is required",
        ));
    }

    if !ToolMetadata::version_is_well_formed(&metadata.version) {
        result.push(
            ValidationIssue::error(
                "METADATA_VERSION_INVALID",
                format!("Version '{}' must be dotted-numeric, e.g. '1.2.0'", metadata.version),
            )
            .with_path("version"),
        );
    }

    let mut seen: HashSet<String> = HashSet::new();
    for (idx, param) in metadata.parameters.iter().enumerate() {
        let path = format!("parameters[{idx}]");

        if param.name.trim().is_empty() {
            result.push(
                ValidationIssue::error("PARAMETER_NAME_REQUIRED", "Parameter name is required")
                    .with_path(path.clone()),
            );
            continue;
        }

        let lower = param.name.to_ascii_lowercase();
        if !seen.insert(lower) {
            result.push(
                ValidationIssue::error(
                    "PARAMETER_NAME_DUPLICATE",
                    format!("Parameter '{}' is declared more than once", param.name),
                )
                .with_path(path.clone()),
            );
        }

        if param.description.as_deref().unwrap_or("").trim().is_empty() {
            result.push(
                ValidationIssue::warning(
                    "PARAMETER_DESCRIPTION_MISSING",
                    format!("Parameter '{}' has no description", param.name),
                )
                .with_path(path.clone()),
            );
        }

        // PARAMETER_TYPE_INVALID exists for completeness with schemas sourced
        // from untyped config (manifest/JSON); `ParameterType` itself is a
        // closed Rust enum so a value that deserializes successfully is
        // already valid by construction. Array item types still need the
        // check since `item_type` is only meaningful for `Array`.
        if param.param_type != ParameterType::Array && param.item_type.is_some() {
            result.push(
                ValidationIssue::warning(
                    "PARAMETER_TYPE_INVALID",
                    format!(
                        "Parameter '{}' sets item_type but is not an array",
                        param.name
                    ),
                )
                .with_path(path),
            );
        }
    }

    result
}

/// Validates a parameter map against a tool's declared schema (spec.md 4.1
/// "Parameter validation").
pub fn validate_parameters(
    schema: &[ToolParameter],
    parameters: &HashMap<String, Value>,
) -> ValidationResult {
    let mut result = ValidationResult::ok();

    // Case-insensitive lookup: schema keys are unique case-insensitively
    // (spec.md 3), so build a lowercased index once.
    let lookup: HashMap<String, &Value> = parameters
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v))
        .collect();
    let known: HashSet<String> = schema.iter().map(|p| p.name.to_ascii_lowercase()).collect();

    for param in schema {
        let key = param.name.to_ascii_lowercase();
        let path = param.name.clone();
        let provided = lookup.get(&key);

        let value = match provided {
            None => {
                if param.required {
                    result.push(
                        ValidationIssue::error(
                            "PARAMETER_REQUIRED",
                            format!("Required parameter '{}' is missing", param.name),
                        )
                        .with_path(path),
                    );
                }
                continue;
            }
            Some(Value::Null) => {
                if param.required {
                    result.push(
                        ValidationIssue::error(
                            "PARAMETER_NULL",
                            format!("Required parameter '{}' is null", param.name),
                        )
                        .with_path(path),
                    );
                }
                continue;
            }
            Some(v) => *v,
        };

        result.merge(validate_parameter_value(param, value, &path));
    }

    for key in parameters.keys() {
        if !known.contains(&key.to_ascii_lowercase()) {
            result.push(
                ValidationIssue::warning(
                    "PARAMETER_UNKNOWN",
                    format!("Parameter '{key}' is not declared by this tool and is ignored"),
                )
                .with_path(key.clone())
                .with_value(parameters[key].clone()),
            );
        }
    }

    result
}

fn type_matches(param_type: ParameterType, value: &Value) -> bool {
    match param_type {
        ParameterType::String => value.is_string(),
        ParameterType::Integer | ParameterType::Number => value.is_number(),
        ParameterType::Boolean => value.is_boolean(),
        ParameterType::Array => value.is_array(),
        ParameterType::Object => value.is_object(),
    }
}

fn validate_parameter_value(param: &ToolParameter, value: &Value, path: &str) -> ValidationResult {
    let mut result = ValidationResult::ok();

    if !type_matches(param.param_type, value) {
        result.push(
            ValidationIssue::error(
                "PARAMETER_TYPE_MISMATCH",
                format!(
                    "Parameter '{}' expected type {:?}, got {}",
                    param.name,
                    param.param_type,
                    json_type_name(value)
                ),
            )
            .with_path(path.to_string())
            .with_value(value.clone()),
        );
        return result;
    }

    if param.param_type == ParameterType::Integer {
        if let Some(n) = value.as_f64() {
            if n.floor() != n {
                result.push(
                    ValidationIssue::error(
                        "PARAMETER_NOT_INTEGER",
                        format!("Parameter '{}' must be an integer, got {n}", param.name),
                    )
                    .with_path(path.to_string()),
                );
            }
        }
    }

    if matches!(param.param_type, ParameterType::Integer | ParameterType::Number) {
        if let Some(n) = value.as_f64() {
            if let Some(min) = param.minimum {
                if n < min {
                    result.push(
                        ValidationIssue::error(
                            "PARAMETER_NUMBER_TOO_SMALL",
                            format!("Parameter '{}' must be >= {min}, got {n}", param.name),
                        )
                        .with_path(path.to_string()),
                    );
                }
            }
            if let Some(max) = param.maximum {
                if n > max {
                    result.push(
                        ValidationIssue::error(
                            "PARAMETER_NUMBER_TOO_LARGE",
                            format!("Parameter '{}' must be <= {max}, got {n}", param.name),
                        )
                        .with_path(path.to_string()),
                    );
                }
            }
        }
    }

    if param.param_type == ParameterType::String {
        if let Some(s) = value.as_str() {
            if let Some(min) = param.min_length {
                if s.chars().count() < min {
                    result.push(
                        ValidationIssue::error(
                            "PARAMETER_STRING_TOO_SHORT",
                            format!(
                                "Parameter '{}' must be at least {min} characters",
                                param.name
                            ),
                        )
                        .with_path(path.to_string()),
                    );
                }
            }
            if let Some(max) = param.max_length {
                if s.chars().count() > max {
                    result.push(
                        ValidationIssue::error(
                            "PARAMETER_STRING_TOO_LONG",
                            format!(
                                "Parameter '{}' must be at most {max} characters",
                                param.name
                            ),
                        )
                        .with_path(path.to_string()),
                    );
                }
            }
            if let Some(pattern) = &param.pattern {
                match regex::Regex::new(pattern) {
                    Ok(re) if !re.is_match(s) => {
                        result.push(
                            ValidationIssue::error(
                                "PARAMETER_STRING_PATTERN_MISMATCH",
                                format!(
                                    "Parameter '{}' does not match pattern '{pattern}'",
                                    param.name
                                ),
                            )
                            .with_path(path.to_string()),
                        );
                    }
                    Err(_) | Ok(_) => {}
                }
            }
        }
    }

    if param.param_type == ParameterType::Array {
        if let Some(arr) = value.as_array() {
            if let Some(min) = param.min_length {
                if arr.len() < min {
                    result.push(
                        ValidationIssue::error(
                            "PARAMETER_ARRAY_TOO_SHORT",
                            format!("Parameter '{}' must have at least {min} items", param.name),
                        )
                        .with_path(path.to_string()),
                    );
                }
            }
            if let Some(max) = param.max_length {
                if arr.len() > max {
                    result.push(
                        ValidationIssue::error(
                            "PARAMETER_ARRAY_TOO_LONG",
                            format!("Parameter '{}' must have at most {max} items", param.name),
                        )
                        .with_path(path.to_string()),
                    );
                }
            }
        }
    }

    if let Some(allowed) = &param.allowed_values {
        if !allowed.contains(value) {
            result.push(
                ValidationIssue::error(
                    "PARAMETER_VALUE_NOT_ALLOWED",
                    format!("Parameter '{}' value is not one of the allowed values", param.name),
                )
                .with_path(path.to_string())
                .with_value(value.clone()),
            );
        }
    }

    result
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validates that `permissions` grants every capability `metadata` requires
/// (spec.md 4.1 "Permissions validation").
pub fn validate_permissions(
    metadata: &ToolMetadata,
    permissions: &ToolPermissions,
) -> ValidationResult {
    let mut result = ValidationResult::ok();

    for cap in metadata.required_capabilities.iter() {
        let granted = match cap {
            Capability::FileSystem => permissions.file_system_access,
            Capability::Network => permissions.network_access,
            Capability::ProcessExecution => permissions.process_execution,
            Capability::Environment => permissions.environment_access,
            Capability::Elevated => permissions.custom_flag("allow_elevated"),
            Capability::Destructive => permissions.custom_flag("allow_destructive"),
            // LongRunning/Interactive are advisory capabilities with no
            // dedicated grant flag; they never block authorization on their
            // own.
            Capability::LongRunning | Capability::Interactive => true,
        };

        if !granted {
            let code: &'static str = match cap {
                Capability::FileSystem => "PERMISSION_FILESYSTEM_DENIED",
                Capability::Network => "PERMISSION_NETWORK_DENIED",
                Capability::ProcessExecution => "PERMISSION_PROCESS_DENIED",
                Capability::Environment => "PERMISSION_ENVIRONMENT_DENIED",
                Capability::Elevated => "PERMISSION_ELEVATED_DENIED",
                Capability::Destructive => "PERMISSION_DESTRUCTIVE_DENIED",
                Capability::LongRunning | Capability::Interactive => unreachable!(),
            };
            result.push(ValidationIssue::error(
                code,
                format!("Tool '{}' requires {cap:?} but it was not granted", metadata.id),
            ));
        }
    }

    result
}

/// Resource-limit sanity checks. Warnings only (spec.md 4.1): an
/// over-budget request is still allowed to run, it's just flagged.
pub fn validate_resource_limits(
    limits: &ToolResourceLimits,
    ceiling: &ToolResourceLimits,
) -> ValidationResult {
    let mut result = ValidationResult::ok();

    if limits.max_memory_bytes > ceiling.max_memory_bytes {
        result.push(ValidationIssue::warning(
            "RESOURCE_MEMORY_EXCEEDED",
            format!(
                "Requested max_memory_bytes {} exceeds ceiling {}",
                limits.max_memory_bytes, ceiling.max_memory_bytes
            ),
        ));
    }
    if limits.max_file_count > ceiling.max_file_count {
        result.push(ValidationIssue::warning(
            "RESOURCE_FILE_COUNT_EXCEEDED",
            format!(
                "Requested max_file_count {} exceeds ceiling {}",
                limits.max_file_count, ceiling.max_file_count
            ),
        ));
    }
    if limits.max_file_size_bytes > ceiling.max_file_size_bytes {
        result.push(ValidationIssue::warning(
            "RESOURCE_FILE_SIZE_EXCEEDED",
            format!(
                "Requested max_file_size_bytes {} exceeds ceiling {}",
                limits.max_file_size_bytes, ceiling.max_file_size_bytes
            ),
        ));
    }

    result
}
