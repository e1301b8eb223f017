//! Hypothesis generation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A hypothesis to create at the start of a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisSeed {
    pub statement: String,
    #[serde(default = "default_prior")]
    pub prior: f64,
}

fn default_prior() -> f64 {
    0.5
}

impl HypothesisSeed {
    /// A seed with the neutral prior 0.5.
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            prior: default_prior(),
        }
    }

    /// Set the prior.
    pub fn with_prior(mut self, prior: f64) -> Self {
        self.prior = prior;
        self
    }
}

/// Produces candidate hypotheses for a question.
pub trait HypothesisGenerator: Send + Sync {
    /// Candidate hypotheses for `question`. Explicit `seeds` come first.
    fn generate(&self, question: &str, context: &Value, seeds: &[HypothesisSeed]) -> Vec<HypothesisSeed>;
}

/// Deterministic generator using request seeds, then `context.hypotheses`,
/// then the question itself.
#[derive(Debug, Clone)]
pub struct ContextHypothesisGenerator {
    max_hypotheses: usize,
}

impl ContextHypothesisGenerator {
    /// Keep at most `max_hypotheses` candidates.
    pub fn new(max_hypotheses: usize) -> Self {
        Self {
            max_hypotheses: max_hypotheses.max(1),
        }
    }
}

impl Default for ContextHypothesisGenerator {
    fn default() -> Self {
        Self::new(5)
    }
}

fn push_unique(out: &mut Vec<HypothesisSeed>, seed: HypothesisSeed) {
    let statement = seed.statement.trim();
    if !statement.is_empty() && !out.iter().any(|s| s.statement == statement) {
        out.push(HypothesisSeed {
            statement: statement.to_string(),
            prior: seed.prior,
        });
    }
}

impl HypothesisGenerator for ContextHypothesisGenerator {
    fn generate(&self, question: &str, context: &Value, seeds: &[HypothesisSeed]) -> Vec<HypothesisSeed> {
        let mut out: Vec<HypothesisSeed> = Vec::new();

        for seed in seeds {
            push_unique(&mut out, seed.clone());
        }

        if let Some(items) = context.get("hypotheses").and_then(Value::as_array) {
            for item in items {
                match item {
                    Value::String(s) => push_unique(&mut out, HypothesisSeed::new(s.clone())),
                    other => {
                        if let Ok(seed) = serde_json::from_value::<HypothesisSeed>(other.clone()) {
                            push_unique(&mut out, seed);
                        }
                    }
                }
            }
        }

        if out.is_empty() {
            let statement = question.trim().trim_end_matches('?').trim();
            push_unique(&mut out, HypothesisSeed::new(statement));
        }

        out.truncate(self.max_hypotheses);
        out
    }
}
