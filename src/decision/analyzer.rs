//! End-to-end decision analysis.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::optimizer::MultiObjectiveOptimizer;
use super::predictor::{OutcomePredictor, SimulationResult};
use super::sensitivity::{sensitivity_analysis, DeltaRange, SensitivityReport, SensitivityTarget};
use super::tree::{build_tree, validate_criteria};
use super::types::{Criterion, DecisionOption, DecisionPath};
use crate::config::DecisionConfig;
use crate::error::DecisionResult;

/// Weight perturbation applied when checking the recommendation.
const RECOMMENDATION_SPREAD: f64 = 0.1;
const RECOMMENDATION_STEPS: usize = 5;

/// Result of [`DecisionAnalyzer::analyze`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionAnalysis {
    pub id: String,
    pub criteria: Vec<Criterion>,
    pub paths_evaluated: usize,
    pub pareto_set: Vec<DecisionPath>,
    /// Highest weighted score on the frontier.
    pub recommendation: Option<DecisionPath>,
    /// Weight sensitivity of the recommendation, per criterion.
    pub sensitivity: Vec<SensitivityReport>,
}

/// Builds the tree, finds the frontier and picks a recommendation.
#[derive(Debug, Clone, Default)]
pub struct DecisionAnalyzer {
    config: DecisionConfig,
}

impl DecisionAnalyzer {
    pub fn new(config: DecisionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// Analyze `options` against `criteria`.
    ///
    /// # Errors
    /// Propagates [`build_tree`] errors unmodified.
    pub fn analyze(&self, options: &[DecisionOption], criteria: &[Criterion]) -> DecisionResult<DecisionAnalysis> {
        let start = Instant::now();
        let tree = build_tree(options, criteria, &self.config)?;
        let pareto_set = MultiObjectiveOptimizer::new(&tree.criteria).pareto_frontier(&tree.paths);

        // Earliest frontier member wins ties.
        let recommendation = pareto_set
            .iter()
            .fold(None, |best: Option<&DecisionPath>, p| match best {
                Some(b) if b.weighted_score >= p.weighted_score => Some(b),
                _ => Some(p),
            })
            .cloned();

        let sensitivity = match &recommendation {
            Some(path) => tree
                .criteria
                .iter()
                .map(|c| {
                    sensitivity_analysis(
                        path,
                        &tree.criteria,
                        &c.name,
                        DeltaRange::symmetric(RECOMMENDATION_SPREAD, RECOMMENDATION_STEPS),
                        SensitivityTarget::Weight,
                        self.config.sensitivity_threshold,
                    )
                })
                .collect::<DecisionResult<Vec<_>>>()?,
            None => Vec::new(),
        };

        let analysis = DecisionAnalysis {
            id: uuid::Uuid::new_v4().to_string(),
            criteria: tree.criteria,
            paths_evaluated: tree.paths.len(),
            pareto_set,
            recommendation,
            sensitivity,
        };

        info!(
            analysis_id = %analysis.id,
            paths = analysis.paths_evaluated,
            pareto = analysis.pareto_set.len(),
            recommendation = analysis.recommendation.as_ref().map(|p| p.id.as_str()).unwrap_or("none"),
            latency_ms = start.elapsed().as_millis(),
            "Decision analysis completed"
        );
        Ok(analysis)
    }

    /// Sensitivity of `path` with this analyzer's threshold.
    pub fn sensitivity(
        &self,
        path: &DecisionPath,
        criteria: &[Criterion],
        criterion: &str,
        range: DeltaRange,
        target: SensitivityTarget,
    ) -> DecisionResult<SensitivityReport> {
        sensitivity_analysis(path, criteria, criterion, range, target, self.config.sensitivity_threshold)
    }

    /// Simulate `path` under the configured timeout.
    ///
    /// # Errors
    /// Criteria are validated as for [`analyze`](Self::analyze) before any
    /// sampling starts.
    pub async fn predict(
        &self,
        path: &DecisionPath,
        criteria: &[Criterion],
        iterations: usize,
        seed: u64,
    ) -> DecisionResult<SimulationResult> {
        validate_criteria(criteria, self.config.weight_epsilon)?;
        OutcomePredictor::new(criteria)
            .simulate_with_timeout(
                path,
                iterations,
                seed,
                Duration::from_millis(self.config.simulation_timeout_ms),
            )
            .await
    }
}
