//! Tool framework.
//!
//! Tools declare a [`ToolSchema`] (parameters, capability tags, reliability,
//! expected output) and are registered once in a [`ToolRegistry`]. The
//! [`ToolExecutor`] validates arguments, invokes tools under a timeout with
//! retries, validates results and runs [`ToolChain`]s.

mod builtins;
mod chain;
mod executor;
mod registry;
mod types;
mod validator;

pub use builtins::{FnTool, GraphQuestionTool, LlmTool};
pub use chain::{ChainResult, StepTrace, ToolChain, ToolChainStep, INPUT_SOURCE};
pub use executor::ToolExecutor;
pub use registry::{SelectionCriteria, ToolCandidate, ToolRegistry, ToolUsage};
pub use types::{
    json_type_name, Capability, OutcomeStatus, OutputSpec, ParamSpec, SanityRange, Tool,
    ToolOutcome, ToolSchema, ValueType,
};
pub use validator::{validate_arguments, ResultValidator, ValidationReport};
