//! Monte Carlo outcome prediction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::types::{weighted_total, Criterion, DecisionPath, Uncertainty};
use crate::error::{DecisionError, DecisionResult};

/// Smallest accepted iteration count.
pub const MIN_ITERATIONS: usize = 100;
/// Largest accepted iteration count.
pub const MAX_ITERATIONS: usize = 1_000_000;
/// Iterations between two cancellation checks.
const CANCEL_CHECK_EVERY: usize = 1024;

/// Two-sided percentile interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    pub level: f64,
}

/// Summary of a simulated outcome distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub path_id: String,
    pub iterations: usize,
    pub seed: u64,
    pub expected_value: f64,
    pub std_dev: f64,
    pub confidence_interval: ConfidenceInterval,
}

/// Samples weighted outcomes of a path from each criterion's uncertainty.
#[derive(Debug, Clone)]
pub struct OutcomePredictor {
    criteria: Vec<Criterion>,
}

impl Uncertainty {
    /// Draw one realisation around `estimate`.
    fn sample(&self, estimate: f64, rng: &mut StdRng) -> f64 {
        match *self {
            Uncertainty::Fixed => estimate,
            Uncertainty::Uniform { spread } => {
                if spread == 0.0 {
                    estimate
                } else {
                    rng.gen_range(estimate - spread..=estimate + spread)
                }
            }
            Uncertainty::Normal { std_dev } => estimate + std_dev * standard_normal(rng),
            Uncertainty::Triangular { below, above } => {
                let (low, high) = (estimate - below, estimate + above);
                let width = high - low;
                if width == 0.0 {
                    return estimate;
                }
                let u: f64 = rng.gen();
                let split = below / width;
                if u < split {
                    low + (u * width * below).sqrt()
                } else {
                    high - ((1.0 - u) * width * above).sqrt()
                }
            }
        }
    }
}

/// Standard normal draw via Box-Muller.
pub(crate) fn standard_normal(rng: &mut StdRng) -> f64 {
    // u1 in (0, 1] keeps ln finite.
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

impl OutcomePredictor {
    /// Predictor for paths scored against `criteria`.
    pub fn new(criteria: &[Criterion]) -> Self {
        Self {
            criteria: criteria.to_vec(),
        }
    }

    /// Simulate `iterations` outcomes of `path` with a seeded generator.
    ///
    /// The same seed always produces the same result.
    ///
    /// # Errors
    /// [`DecisionError::InsufficientSamples`] below [`MIN_ITERATIONS`];
    /// [`DecisionError::Validation`] above [`MAX_ITERATIONS`], for negative or
    /// non-finite uncertainty parameters, or when the path's score vector does
    /// not match the criteria.
    pub fn simulate(&self, path: &DecisionPath, iterations: usize, seed: u64) -> DecisionResult<SimulationResult> {
        self.simulate_cancellable(path, iterations, seed, &AtomicBool::new(false))
    }

    fn check_inputs(&self, path: &DecisionPath, iterations: usize) -> DecisionResult<()> {
        if iterations < MIN_ITERATIONS {
            return Err(DecisionError::InsufficientSamples {
                requested: iterations,
                minimum: MIN_ITERATIONS,
            });
        }
        if iterations > MAX_ITERATIONS {
            return Err(DecisionError::Validation {
                field: "iterations".to_string(),
                reason: format!("at most {} iterations are allowed (got {})", MAX_ITERATIONS, iterations),
            });
        }
        if let Some(c) = self.criteria.iter().find(|c| !c.has_valid_uncertainty()) {
            return Err(DecisionError::Validation {
                field: "criteria".to_string(),
                reason: format!("uncertainty of '{}' must have non-negative parameters", c.name),
            });
        }
        if path.scores.iter().any(|s| !s.is_finite()) {
            return Err(DecisionError::Validation {
                field: "path".to_string(),
                reason: format!("path '{}' has a non-finite score", path.id),
            });
        }
        if path.scores.len() != self.criteria.len() {
            return Err(DecisionError::Validation {
                field: "path".to_string(),
                reason: format!(
                    "path '{}' has {} scores for {} criteria",
                    path.id,
                    path.scores.len(),
                    self.criteria.len()
                ),
            });
        }
        Ok(())
    }

    /// [`simulate`](Self::simulate), giving up once `cancel` is set.
    fn simulate_cancellable(
        &self,
        path: &DecisionPath,
        iterations: usize,
        seed: u64,
        cancel: &AtomicBool,
    ) -> DecisionResult<SimulationResult> {
        self.check_inputs(path, iterations)?;

        let mut rng = StdRng::seed_from_u64(seed);
        let mut realised = vec![0.0; self.criteria.len()];
        let mut samples: Vec<f64> = Vec::with_capacity(iterations);
        for i in 0..iterations {
            if i % CANCEL_CHECK_EVERY == 0 && cancel.load(Ordering::Relaxed) {
                debug!(path = %path.id, completed = i, "Simulation cancelled");
                return Err(DecisionError::SimulationFailed {
                    message: format!("cancelled after {} of {} iterations", i, iterations),
                });
            }
            for ((slot, c), estimate) in realised.iter_mut().zip(&self.criteria).zip(&path.scores) {
                *slot = c.uncertainty.sample(*estimate, &mut rng);
            }
            samples.push(weighted_total(&self.criteria, &realised));
        }

        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (n - 1.0);
        samples.sort_by(|a, b| a.total_cmp(b));

        debug!(path = %path.id, iterations = iterations, mean = mean, "Simulated path outcomes");
        Ok(SimulationResult {
            path_id: path.id.clone(),
            iterations,
            seed,
            expected_value: mean,
            std_dev: variance.sqrt(),
            confidence_interval: ConfidenceInterval {
                lower: percentile(&samples, 2.5),
                upper: percentile(&samples, 97.5),
                level: 0.95,
            },
        })
    }

    /// Run [`simulate`](Self::simulate) on the blocking pool, bounded by `timeout`.
    ///
    /// On timeout the blocking job is told to stop at its next checkpoint.
    ///
    /// # Errors
    /// [`DecisionError::SimulationTimeout`] when the batch does not finish in
    /// time, plus everything [`simulate`](Self::simulate) rejects.
    pub async fn simulate_with_timeout(
        &self,
        path: &DecisionPath,
        iterations: usize,
        seed: u64,
        timeout: Duration,
    ) -> DecisionResult<SimulationResult> {
        self.check_inputs(path, iterations)?;
        let predictor = self.clone();
        let path = path.clone();
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let handle = tokio::task::spawn_blocking(move || {
            predictor.simulate_cancellable(&path, iterations, seed, &flag)
        });

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(DecisionError::SimulationFailed { message: e.to_string() }),
            Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                warn!(iterations = iterations, timeout_ms = timeout.as_millis() as u64, "Simulation timed out");
                Err(DecisionError::SimulationTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn path(scores: &[f64]) -> DecisionPath {
        DecisionPath {
            id: "p".to_string(),
            choices: vec!["p".to_string()],
            scores: scores.to_vec(),
            weighted_score: 0.0,
        }
    }

    fn criteria() -> Vec<Criterion> {
        vec![
            Criterion::new("value", 0.5).with_uncertainty(Uncertainty::Normal { std_dev: 0.1 }),
            Criterion::new("cost", 0.3)
                .minimize()
                .with_uncertainty(Uncertainty::Uniform { spread: 0.2 }),
            Criterion::new("speed", 0.2).with_uncertainty(Uncertainty::Triangular { below: 0.1, above: 0.3 }),
        ]
    }

    #[test]
    fn test_rejects_few_iterations() {
        let err = OutcomePredictor::new(&criteria())
            .simulate(&path(&[0.5, 0.5, 0.5]), 99, 1)
            .unwrap_err();
        assert!(matches!(err, DecisionError::InsufficientSamples { requested: 99, minimum: 100 }));
    }

    #[test]
    fn test_same_seed_same_result() {
        let predictor = OutcomePredictor::new(&criteria());
        let a = predictor.simulate(&path(&[0.6, 0.4, 0.5]), 500, 11).unwrap();
        let b = predictor.simulate(&path(&[0.6, 0.4, 0.5]), 500, 11).unwrap();
        assert_eq!(a, b);
        let c = predictor.simulate(&path(&[0.6, 0.4, 0.5]), 500, 12).unwrap();
        assert_ne!(a.expected_value, c.expected_value);
    }

    #[test]
    fn test_fixed_distribution_has_no_spread() {
        let criteria = vec![Criterion::new("x", 1.0)];
        let result = OutcomePredictor::new(&criteria).simulate(&path(&[0.7]), 100, 3).unwrap();
        assert!((result.expected_value - 0.7).abs() < 1e-12);
        assert!(result.std_dev.abs() < 1e-12);
        assert_eq!(result.confidence_interval.lower, result.confidence_interval.upper);
    }

    #[test]
    fn test_estimates_converge() {
        // value 0.5*0.6 - cost 0.3*0.4 + speed 0.2*(mean of triangular 0.4,0.5,0.8)
        let expected = 0.3 - 0.12 + 0.2 * (0.4 + 0.5 + 0.8) / 3.0;
        let result = OutcomePredictor::new(&criteria())
            .simulate(&path(&[0.6, 0.4, 0.5]), 20_000, 5)
            .unwrap();
        assert!((result.expected_value - expected).abs() < 0.01);
        let ci = result.confidence_interval;
        assert!(ci.lower < result.expected_value && result.expected_value < ci.upper);
    }

    #[test]
    fn test_rejects_invalid_distributions_and_excess_iterations() {
        let predictor = OutcomePredictor::new(&[Criterion::new("x", 1.0)
            .with_uncertainty(Uncertainty::Uniform { spread: -0.1 })]);
        let err = predictor.simulate(&path(&[0.5]), 100, 1).unwrap_err();
        assert!(matches!(err, DecisionError::Validation { ref field, .. } if field == "criteria"));

        let err = OutcomePredictor::new(&criteria())
            .simulate(&path(&[0.5, 0.5, 0.5]), MAX_ITERATIONS + 1, 1)
            .unwrap_err();
        assert!(matches!(err, DecisionError::Validation { ref field, .. } if field == "iterations"));
    }

    #[test]
    fn test_cancelled_simulation_stops() {
        let cancel = AtomicBool::new(true);
        let err = OutcomePredictor::new(&criteria())
            .simulate_cancellable(&path(&[0.5, 0.5, 0.5]), 10_000, 1, &cancel)
            .unwrap_err();
        assert!(matches!(err, DecisionError::SimulationFailed { .. }));
    }

    #[tokio::test]
    async fn test_simulate_with_timeout() {
        let predictor = OutcomePredictor::new(&criteria());
        let result = predictor
            .simulate_with_timeout(&path(&[0.6, 0.4, 0.5]), 1000, 9, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result, predictor.simulate(&path(&[0.6, 0.4, 0.5]), 1000, 9).unwrap());

        let err = predictor
            .simulate_with_timeout(&path(&[0.6, 0.4, 0.5]), MAX_ITERATIONS, 9, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DecisionError::SimulationTimeout { timeout_ms: 1 }));
    }
}
