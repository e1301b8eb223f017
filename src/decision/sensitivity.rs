//! Sensitivity of a path's score to one criterion.

use serde::{Deserialize, Serialize};

use super::types::{weighted_total, Criterion, DecisionPath};
use crate::error::{DecisionError, DecisionResult};

/// What gets perturbed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityTarget {
    /// The criterion's weight; other weights are rescaled to keep the sum at 1.
    #[default]
    Weight,
    /// The path's score on the criterion.
    Score,
}

/// Evenly spaced perturbations from `from` to `to`, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeltaRange {
    pub from: f64,
    pub to: f64,
    pub steps: usize,
}

impl DeltaRange {
    pub fn new(from: f64, to: f64, steps: usize) -> Self {
        Self { from, to, steps }
    }

    /// `[-spread, +spread]` in `steps` points.
    pub fn symmetric(spread: f64, steps: usize) -> Self {
        Self::new(-spread, spread, steps)
    }

    fn points(&self) -> DecisionResult<Vec<f64>> {
        if !self.from.is_finite() || !self.to.is_finite() || self.from > self.to || self.steps < 2 {
            return Err(DecisionError::Validation {
                field: "delta_range".to_string(),
                reason: "needs finite bounds with from <= to and at least 2 steps".to_string(),
            });
        }
        let step = (self.to - self.from) / (self.steps - 1) as f64;
        Ok((0..self.steps).map(|i| self.from + step * i as f64).collect())
    }
}

/// One point of a sensitivity curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensitivityPoint {
    pub delta: f64,
    pub score: f64,
}

/// Score curve for one criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityReport {
    pub path_id: String,
    pub criterion: String,
    pub target: SensitivityTarget,
    pub baseline: f64,
    pub curve: Vec<SensitivityPoint>,
    /// Largest minus smallest score on the curve.
    pub swing: f64,
    pub sensitive: bool,
}

/// Weights with `index` moved by `delta` (clamped to [0, 1]) and the rest
/// rescaled so the total stays 1.
fn perturbed_weights(criteria: &[Criterion], index: usize, delta: f64) -> Vec<Criterion> {
    let mut out = criteria.to_vec();
    if out.len() == 1 {
        return out;
    }
    let old = out[index].weight;
    let new = (old + delta).clamp(0.0, 1.0);
    let rest_old = 1.0 - old;
    let rest_new = 1.0 - new;
    let others = (out.len() - 1) as f64;
    for (i, c) in out.iter_mut().enumerate() {
        if i == index {
            c.weight = new;
        } else if rest_old > 0.0 {
            c.weight *= rest_new / rest_old;
        } else {
            c.weight = rest_new / others;
        }
    }
    out
}

/// Re-score `path` while perturbing `criterion` across `range`.
///
/// # Errors
/// [`DecisionError::Validation`] for an unknown criterion, a score vector
/// that does not match `criteria`, or an invalid range.
pub fn sensitivity_analysis(
    path: &DecisionPath,
    criteria: &[Criterion],
    criterion: &str,
    range: DeltaRange,
    target: SensitivityTarget,
    threshold: f64,
) -> DecisionResult<SensitivityReport> {
    let index = criteria
        .iter()
        .position(|c| c.name == criterion)
        .ok_or_else(|| DecisionError::Validation {
            field: "criterion".to_string(),
            reason: format!("unknown criterion '{}'", criterion),
        })?;
    if path.scores.len() != criteria.len() {
        return Err(DecisionError::Validation {
            field: "path".to_string(),
            reason: format!("path '{}' does not match the criteria", path.id),
        });
    }

    let curve: Vec<SensitivityPoint> = range
        .points()?
        .into_iter()
        .map(|delta| {
            let score = match target {
                SensitivityTarget::Weight => {
                    weighted_total(&perturbed_weights(criteria, index, delta), &path.scores)
                }
                SensitivityTarget::Score => {
                    let mut scores = path.scores.clone();
                    scores[index] += delta;
                    weighted_total(criteria, &scores)
                }
            };
            SensitivityPoint { delta, score }
        })
        .collect();

    let (min, max) = curve
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p.score), hi.max(p.score)));
    let swing = max - min;

    Ok(SensitivityReport {
        path_id: path.id.clone(),
        criterion: criterion.to_string(),
        target,
        baseline: weighted_total(criteria, &path.scores),
        curve,
        swing,
        sensitive: swing > threshold,
    })
}
