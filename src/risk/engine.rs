//! Risk assessment pipeline: identify, score, advise, monitor.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::calculator::{RiskCalculator, RiskMethod, RiskScore};
use super::identifier::RiskIdentifier;
use super::mitigation::{MitigationAction, MitigationAdvisor};
use super::monitor::{RiskMonitor, RiskThresholds};
use super::types::{RiskAlert, RiskFactor};
use crate::config::RiskConfig;
use crate::error::RiskResult;

/// Output of [`RiskEngine::assess`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub method: RiskMethod,
    pub factors: Vec<RiskFactor>,
    pub scores: Vec<RiskScore>,
    pub mitigations: Vec<MitigationAction>,
    /// Alerts opened by this assessment.
    pub alerts: Vec<RiskAlert>,
    /// Highest score across factors, 0 when none were found.
    pub overall_score: f64,
}

/// Ties the risk components together behind one call.
pub struct RiskEngine {
    identifier: RiskIdentifier,
    calculator: RiskCalculator,
    advisor: MitigationAdvisor,
    monitor: Arc<RiskMonitor>,
    thresholds: RiskThresholds,
}

impl RiskEngine {
    pub fn new(config: &RiskConfig, monitor: Arc<RiskMonitor>) -> Self {
        Self {
            identifier: RiskIdentifier::default(),
            calculator: RiskCalculator::new(config),
            advisor: MitigationAdvisor::new(),
            monitor,
            thresholds: RiskThresholds::new(config.alert_threshold),
        }
    }

    pub fn with_identifier(mut self, identifier: RiskIdentifier) -> Self {
        self.identifier = identifier;
        self
    }

    pub fn with_thresholds(mut self, thresholds: RiskThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn monitor(&self) -> &Arc<RiskMonitor> {
        &self.monitor
    }

    pub fn calculator(&self) -> &RiskCalculator {
        &self.calculator
    }

    /// Assess a decision context.
    ///
    /// Factors come from the identifier plus any explicit `factors` array in
    /// the context. Each is scored with `method`, the best mitigation is
    /// attached and the monitor opens alerts for threshold crossings.
    ///
    /// # Errors
    /// [`crate::error::RiskError::UnknownRiskMethod`] and validation errors
    /// from scoring.
    pub fn assess(&self, context: &Value, method: &str) -> RiskResult<RiskAssessment> {
        let start = Instant::now();
        let method: RiskMethod = method.parse()?;

        let mut factors = self.identifier.identify(context);
        if let Some(items) = context.get("factors").and_then(Value::as_array) {
            for item in items {
                match serde_json::from_value::<RiskFactor>(item.clone()) {
                    Ok(f) => factors.push(f),
                    Err(e) => warn!(error = %e, "Skipping malformed risk factor"),
                }
            }
        }

        let mut scores = Vec::with_capacity(factors.len());
        for factor in &mut factors {
            let score = self.calculator.score_with(factor, method)?;
            factor.score = score.score;
            scores.push(score);
        }

        let mitigations: Vec<MitigationAction> = factors
            .iter()
            .filter_map(|f| self.advisor.suggest(f).into_iter().next())
            .collect();
        let alerts = self.monitor.evaluate(&factors, &self.thresholds);
        let overall_score = scores.iter().map(|s| s.score).fold(0.0, f64::max);

        info!(
            method = %method,
            factors = factors.len(),
            alerts = alerts.len(),
            overall_score = overall_score,
            latency_ms = start.elapsed().as_millis(),
            "Risk assessment completed"
        );

        Ok(RiskAssessment {
            method,
            factors,
            scores,
            mitigations,
            alerts,
            overall_score,
        })
    }
}
