//! Reasoning engine.
//!
//! A [`ReasoningChain`] holds hypotheses, evidence and an append-only list of
//! steps. The [`ReasoningEngine`] gathers evidence through tools and the graph
//! adapter, propagates confidence and backtracks to checkpoints when a step
//! fails or the leading hypothesis collapses.

mod confidence;
mod engine;
mod evidence;
mod generator;
mod types;

pub use confidence::{calculate_overall_confidence, hypothesis_confidence, EVIDENCE_SCALE};
pub use engine::{EvidenceLookup, GraphLookup, ReasoningEngine, ReasoningRequest};
pub use evidence::{EvidenceInterpreter, ScopedEvidence};
pub use generator::{ContextHypothesisGenerator, HypothesisGenerator, HypothesisSeed};
pub use types::{
    ChainState, Checkpoint, Evidence, EvidenceStance, Hypothesis, ReasoningChain, ReasoningStep,
    StepKind, StepStatus, TerminationReason,
};
