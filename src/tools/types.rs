//! Tool contract and schema types.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ToolResult;

// ============================================================================
// Capabilities
// ============================================================================

/// Capability tag declared by a tool. Selection dispatches on these only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ReadOnly,
    Mutating,
    ExternalCall,
}

impl Capability {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::ReadOnly => "read_only",
            Capability::Mutating => "mutating",
            Capability::ExternalCall => "external_call",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "read_only" => Ok(Capability::ReadOnly),
            "mutating" => Ok(Capability::Mutating),
            "external_call" => Ok(Capability::ExternalCall),
            _ => Err(format!("Unknown capability: {}", s)),
        }
    }
}

// ============================================================================
// Schema
// ============================================================================

/// JSON type expected for a parameter or result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Any,
}

impl ValueType {
    /// Whether `value` has this type. Integers also satisfy `Number`.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ValueType::String => value.is_string(),
            ValueType::Number => value.is_number(),
            ValueType::Integer => value.is_i64() || value.is_u64(),
            ValueType::Boolean => value.is_boolean(),
            ValueType::Array => value.is_array(),
            ValueType::Object => value.is_object(),
            ValueType::Any => true,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Integer => "integer",
            ValueType::Boolean => "boolean",
            ValueType::Array => "array",
            ValueType::Object => "object",
            ValueType::Any => "any",
        }
    }
}

/// Name of the JSON type of `value`.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub value_type: ValueType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

impl ParamSpec {
    /// A required parameter.
    pub fn required(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            required: true,
            description: String::new(),
        }
    }

    /// An optional parameter.
    pub fn optional(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            required: false,
            ..Self::required(name, value_type)
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Inclusive numeric bounds a result must fall in to be considered sane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanityRange {
    /// Field of an object result to check; the whole result when `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub min: f64,
    pub max: f64,
}

/// Expected shape of a tool's raw result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub value_type: ValueType,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sanity_range: Option<SanityRange>,
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            value_type: ValueType::Any,
            required_fields: Vec::new(),
            sanity_range: None,
        }
    }
}

impl OutputSpec {
    /// Expect a value of `value_type`.
    pub fn of(value_type: ValueType) -> Self {
        Self {
            value_type,
            ..Default::default()
        }
    }

    /// Require these fields on an object result.
    pub fn with_required_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Require the result (or one of its fields) to lie in `[min, max]`.
    pub fn with_range(mut self, field: Option<&str>, min: f64, max: f64) -> Self {
        self.sanity_range = Some(SanityRange {
            field: field.map(str::to_string),
            min,
            max,
        });
        self
    }
}

/// Declared interface of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    pub capabilities: BTreeSet<Capability>,
    /// Declared probability of a successful call, in [0, 1].
    pub reliability: f64,
    #[serde(default)]
    pub output: OutputSpec,
}

impl ToolSchema {
    /// Create a schema with no parameters, no capabilities and reliability 0.9.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            capabilities: BTreeSet::new(),
            reliability: 0.9,
            output: OutputSpec::default(),
        }
    }

    /// Add a parameter.
    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// Add a capability tag.
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    /// Set the declared reliability, clamped to [0, 1].
    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.reliability = reliability.clamp(0.0, 1.0);
        self
    }

    /// Set the output spec.
    pub fn with_output(mut self, output: OutputSpec) -> Self {
        self.output = output;
        self
    }

    /// Look up a declared parameter.
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }
}

// ============================================================================
// Tool contract
// ============================================================================

/// A callable capability.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Declared interface; must not change after registration.
    fn schema(&self) -> &ToolSchema;

    /// Run the tool with already-validated arguments.
    async fn invoke(&self, args: &Map<String, Value>) -> ToolResult<Value>;

    /// Tool name.
    fn name(&self) -> &str {
        &self.schema().name
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Status of a tool call or chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Partial,
    Failed,
}

impl OutcomeStatus {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Partial => "partial",
            OutcomeStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of one validated, possibly retried tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub tool: String,
    pub status: OutcomeStatus,
    /// Raw result, present unless the call itself failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Validation issues found in the raw result.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
    pub attempts: u32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutcome {
    /// Whether the call fully succeeded.
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}
