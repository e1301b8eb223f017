//! Argument and result validation against a tool's schema.

use serde_json::{Map, Value};

use super::types::{json_type_name, OutcomeStatus, OutputSpec, ToolSchema};
use crate::error::{ToolError, ToolResult};

/// Check call arguments against the declared parameters.
///
/// Required parameters must be present and non-null, present values must have
/// the declared type, and undeclared arguments are rejected.
pub fn validate_arguments(schema: &ToolSchema, args: &Map<String, Value>) -> ToolResult<()> {
    let invalid = |field: &str, reason: String| ToolError::InvalidArguments {
        tool: schema.name.clone(),
        field: field.to_string(),
        reason,
    };

    for param in &schema.params {
        match args.get(&param.name) {
            None | Some(Value::Null) if param.required => {
                return Err(invalid(&param.name, "missing required parameter".to_string()));
            }
            None | Some(Value::Null) => {}
            Some(value) if !param.value_type.matches(value) => {
                return Err(invalid(
                    &param.name,
                    format!(
                        "expected {}, got {}",
                        param.value_type.as_str(),
                        json_type_name(value)
                    ),
                ));
            }
            Some(_) => {}
        }
    }

    if let Some(unknown) = args.keys().find(|k| schema.param(k).is_none()) {
        return Err(invalid(unknown, "unknown parameter".to_string()));
    }

    Ok(())
}

/// Outcome of validating a raw result.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub status: OutcomeStatus,
    pub issues: Vec<String>,
}

/// Validates raw tool results against an [`OutputSpec`].
///
/// A wrong type or a missing required field fails the result; a value outside
/// the sanity range keeps it but marks it partial.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultValidator;

impl ResultValidator {
    /// Validate `value` against `spec`.
    pub fn validate(&self, spec: &OutputSpec, value: &Value) -> ValidationReport {
        let mut issues = Vec::new();

        if !spec.value_type.matches(value) {
            issues.push(format!(
                "expected {} result, got {}",
                spec.value_type.as_str(),
                json_type_name(value)
            ));
            return ValidationReport {
                status: OutcomeStatus::Failed,
                issues,
            };
        }

        let missing: Vec<_> = spec
            .required_fields
            .iter()
            .filter(|f| value.get(f.as_str()).map_or(true, Value::is_null))
            .collect();
        if !missing.is_empty() {
            for field in missing {
                issues.push(format!("missing required field '{}'", field));
            }
            return ValidationReport {
                status: OutcomeStatus::Failed,
                issues,
            };
        }

        if let Some(range) = &spec.sanity_range {
            let target = match &range.field {
                Some(field) => value.get(field.as_str()),
                None => Some(value),
            };
            match target.and_then(Value::as_f64) {
                Some(n) if n.is_finite() && n >= range.min && n <= range.max => {}
                Some(n) => issues.push(format!(
                    "value {} outside sanity range [{}, {}]",
                    n, range.min, range.max
                )),
                None => issues.push(format!(
                    "sanity range field '{}' is not numeric",
                    range.field.as_deref().unwrap_or("<result>")
                )),
            }
        }

        let status = if issues.is_empty() {
            OutcomeStatus::Success
        } else {
            OutcomeStatus::Partial
        };
        ValidationReport { status, issues }
    }
}
