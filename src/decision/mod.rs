//! Decision analyzer.
//!
//! Options are grouped into decision nodes and expanded into paths scored
//! against weighted criteria. The analyzer finds the Pareto frontier,
//! simulates outcomes under each criterion's uncertainty and measures how
//! sensitive a path's score is to one criterion.

mod analyzer;
mod optimizer;
mod predictor;
mod sensitivity;
mod tree;
mod types;

pub use analyzer::{DecisionAnalysis, DecisionAnalyzer};
pub use optimizer::MultiObjectiveOptimizer;
pub(crate) use predictor::standard_normal;
pub use predictor::{ConfidenceInterval, OutcomePredictor, SimulationResult, MAX_ITERATIONS, MIN_ITERATIONS};
pub use sensitivity::{
    sensitivity_analysis, DeltaRange, SensitivityPoint, SensitivityReport, SensitivityTarget,
};
pub use tree::build_tree;
pub use types::{
    weighted_total, Criterion, DecisionNode, DecisionOption, DecisionPath, DecisionTree,
    Direction, Uncertainty, ROOT_NODE,
};
