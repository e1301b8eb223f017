//! Tool chain plans and execution traces.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::types::{OutcomeStatus, ToolOutcome};

/// Context key under which chain inputs are addressable.
pub const INPUT_SOURCE: &str = "input";

/// One tool invocation in a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolChainStep {
    /// Unique step identifier within the chain.
    pub step_id: String,
    /// Tool to invoke.
    pub tool: String,
    /// Maps tool parameters to `step_id.field` or `input.field` sources.
    #[serde(default)]
    pub input_map: IndexMap<String, String>,
    /// Fixed arguments; override mapped values with the same key.
    #[serde(default)]
    pub static_args: Map<String, Value>,
    /// Result fields exposed to later steps. A scalar result binds to the
    /// single declared field.
    #[serde(default)]
    pub output_fields: Vec<String>,
    /// If true, failures don't stop the chain.
    #[serde(default)]
    pub optional: bool,
}

impl ToolChainStep {
    /// Create a step invoking `tool`.
    pub fn new(step_id: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            tool: tool.into(),
            input_map: IndexMap::new(),
            static_args: Map::new(),
            output_fields: Vec::new(),
            optional: false,
        }
    }

    /// Map a parameter from a `source.field` reference.
    pub fn map_input(mut self, param: impl Into<String>, source: impl Into<String>) -> Self {
        self.input_map.insert(param.into(), source.into());
        self
    }

    /// Set a fixed argument.
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.static_args.insert(key.into(), value.into());
        self
    }

    /// Declare an output field.
    pub fn output(mut self, field: impl Into<String>) -> Self {
        self.output_fields.push(field.into());
        self
    }

    /// Mark the step optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Build the step's arguments from the chain context.
    pub(crate) fn build_arguments(&self, context: &HashMap<String, Value>) -> Map<String, Value> {
        let mut args = Map::new();

        for (param, source) in &self.input_map {
            let value = match source.split_once('.') {
                Some((step, field)) => context.get(step).and_then(|v| v.get(field)).cloned(),
                None => context.get(source).cloned(),
            };
            if let Some(v) = value {
                args.insert(param.clone(), v);
            }
        }

        for (key, value) in &self.static_args {
            args.insert(key.clone(), value.clone());
        }

        args
    }

    /// Project a raw result onto the declared output fields.
    pub(crate) fn bind_outputs(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) if !self.output_fields.is_empty() => Value::Object(
                self.output_fields
                    .iter()
                    .filter_map(|f| map.get(f).map(|v| (f.clone(), v.clone())))
                    .collect(),
            ),
            Value::Object(_) => value.clone(),
            scalar => match self.output_fields.as_slice() {
                [field] => {
                    let mut map = Map::new();
                    map.insert(field.clone(), scalar.clone());
                    Value::Object(map)
                }
                _ => scalar.clone(),
            },
        }
    }
}

/// An ordered plan of tool invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolChain {
    pub id: String,
    pub steps: Vec<ToolChainStep>,
}

impl ToolChain {
    /// Create an empty chain with a fresh id.
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            steps: Vec::new(),
        }
    }

    /// Append a step.
    pub fn step(mut self, step: ToolChainStep) -> Self {
        self.steps.push(step);
        self
    }
}

impl Default for ToolChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Trace entry for one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTrace {
    pub index: usize,
    pub step_id: String,
    pub optional: bool,
    pub arguments: Map<String, Value>,
    pub outcome: ToolOutcome,
}

/// Result and audit trace of a chain execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainResult {
    pub chain_id: String,
    pub status: OutcomeStatus,
    pub steps: Vec<StepTrace>,
    /// Raw value of the last successful step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    pub steps_total: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChainResult {
    /// Number of steps that succeeded.
    pub fn steps_succeeded(&self) -> usize {
        self.steps.iter().filter(|s| s.outcome.is_success()).count()
    }
}
