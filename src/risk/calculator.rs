//! Risk scoring methods.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{RiskCategory, RiskFactor};
use crate::config::RiskConfig;
use crate::decision::standard_normal;
use crate::error::{RiskError, RiskResult};

/// Spread used by Monte Carlo when a factor declares no uncertainty.
const DEFAULT_UNCERTAINTY: f64 = 0.1;

/// Supported scoring methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskMethod {
    /// `probability * impact`.
    Simple,
    /// Simple score scaled by a per-category weight, capped at 1.
    Weighted,
    /// Beta-Binomial posterior probability times impact.
    Bayesian,
    /// Expected product of sampled probability and impact.
    MonteCarlo,
}

impl RiskMethod {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskMethod::Simple => "simple",
            RiskMethod::Weighted => "weighted",
            RiskMethod::Bayesian => "bayesian",
            RiskMethod::MonteCarlo => "monte_carlo",
        }
    }
}

impl std::fmt::Display for RiskMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RiskMethod {
    type Err = RiskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(RiskMethod::Simple),
            "weighted" => Ok(RiskMethod::Weighted),
            "bayesian" => Ok(RiskMethod::Bayesian),
            "monte_carlo" => Ok(RiskMethod::MonteCarlo),
            _ => Err(RiskError::UnknownRiskMethod {
                method: s.to_string(),
            }),
        }
    }
}

/// Score of one factor under one method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    pub factor_id: String,
    pub method: RiskMethod,
    pub score: f64,
    /// Probability the score was computed from (posterior for Bayesian).
    pub probability: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variance: Option<f64>,
}

fn default_weights() -> HashMap<RiskCategory, f64> {
    HashMap::from([
        (RiskCategory::Operational, 1.0),
        (RiskCategory::Financial, 1.1),
        (RiskCategory::Technical, 1.0),
        (RiskCategory::Schedule, 0.9),
        (RiskCategory::Compliance, 1.2),
        (RiskCategory::Security, 1.3),
        (RiskCategory::Market, 0.9),
    ])
}

/// Computes risk scores.
#[derive(Debug, Clone)]
pub struct RiskCalculator {
    weights: HashMap<RiskCategory, f64>,
    iterations: usize,
    seed: u64,
    prior_strength: f64,
}

impl Default for RiskCalculator {
    fn default() -> Self {
        Self::new(&RiskConfig::default())
    }
}

impl RiskCalculator {
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            weights: default_weights(),
            iterations: config.monte_carlo_iterations.max(1),
            seed: config.seed,
            prior_strength: config.prior_strength.max(0.0),
        }
    }

    /// Override the weight of one category.
    pub fn with_category_weight(mut self, category: RiskCategory, weight: f64) -> Self {
        self.weights.insert(category, weight.max(0.0));
        self
    }

    /// Score `factor` with the method named `method`.
    ///
    /// # Errors
    /// [`RiskError::UnknownRiskMethod`] for an unrecognised name;
    /// [`RiskError::Validation`] for out-of-range inputs.
    pub fn score(&self, factor: &RiskFactor, method: &str) -> RiskResult<RiskScore> {
        self.score_with(factor, method.parse()?)
    }

    /// Score `factor` with `method`.
    pub fn score_with(&self, factor: &RiskFactor, method: RiskMethod) -> RiskResult<RiskScore> {
        validate_unit("probability", factor.probability)?;
        validate_unit("impact", factor.impact)?;

        let (score, probability, variance) = match method {
            RiskMethod::Simple => (factor.probability * factor.impact, factor.probability, None),
            RiskMethod::Weighted => {
                let weight = self.weights.get(&factor.category).copied().unwrap_or(1.0);
                (
                    (factor.probability * factor.impact * weight).min(1.0),
                    factor.probability,
                    None,
                )
            }
            RiskMethod::Bayesian => self.bayesian(factor)?,
            RiskMethod::MonteCarlo => self.monte_carlo(factor)?,
        };

        debug!(factor = %factor.name, method = %method, score = score, "Scored risk factor");
        Ok(RiskScore {
            factor_id: factor.id.clone(),
            method,
            score,
            probability,
            variance,
        })
    }

    /// Beta prior with mean `probability` and strength `prior_strength`,
    /// updated with Binomial observations.
    fn bayesian(&self, factor: &RiskFactor) -> RiskResult<(f64, f64, Option<f64>)> {
        let (k, n) = factor
            .observations
            .map(|o| (o.occurrences as f64, o.trials as f64))
            .unwrap_or((0.0, 0.0));
        if k > n {
            return Err(RiskError::Validation {
                field: "observations".to_string(),
                reason: format!("occurrences ({}) exceed trials ({})", k, n),
            });
        }

        let alpha = factor.probability * self.prior_strength + k;
        let beta = (1.0 - factor.probability) * self.prior_strength + (n - k);
        let total = alpha + beta;
        if total == 0.0 {
            return Ok((factor.probability * factor.impact, factor.probability, Some(0.0)));
        }

        let mean = alpha / total;
        let variance = alpha * beta / (total * total * (total + 1.0));
        Ok((
            mean * factor.impact,
            mean,
            Some(variance * factor.impact * factor.impact),
        ))
    }

    /// Seeded sampling of probability and impact, each normal around its
    /// estimate and clamped to [0, 1].
    fn monte_carlo(&self, factor: &RiskFactor) -> RiskResult<(f64, f64, Option<f64>)> {
        let spread = factor.uncertainty.unwrap_or(DEFAULT_UNCERTAINTY);
        if !spread.is_finite() || spread < 0.0 {
            return Err(RiskError::Validation {
                field: "uncertainty".to_string(),
                reason: "must be a non-negative number".to_string(),
            });
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let n = self.iterations as f64;
        let (mut sum, mut sum_sq, mut p_sum) = (0.0, 0.0, 0.0);
        for _ in 0..self.iterations {
            let p = (factor.probability + spread * standard_normal(&mut rng)).clamp(0.0, 1.0);
            let i = (factor.impact + spread * standard_normal(&mut rng)).clamp(0.0, 1.0);
            let s = p * i;
            sum += s;
            sum_sq += s * s;
            p_sum += p;
        }
        let mean = sum / n;
        let variance = (sum_sq / n - mean * mean).max(0.0);
        Ok((mean, p_sum / n, Some(variance)))
    }
}

fn validate_unit(field: &str, value: f64) -> RiskResult<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(RiskError::Validation {
            field: field.to_string(),
            reason: format!("must be in [0, 1], got {}", value),
        })
    }
}
