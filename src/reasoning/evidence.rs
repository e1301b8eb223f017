//! Turning lookup output into weighted evidence.
//!
//! Output carrying an explicit `evidence` array is used as-is. Anything else
//! is flattened into text observations and matched against hypotheses by
//! term overlap; observations containing a negation marker contradict.

use std::collections::BTreeSet;

use serde_json::Value;

use super::types::{Evidence, EvidenceStance, Hypothesis};

const NEGATIONS: &[&str] = &[
    "not", "no", "never", "false", "unlikely", "contradicts", "refutes", "fails", "without",
    "none", "cannot",
];

const MIN_OVERLAP: f64 = 0.3;

/// Content terms of a text, lower-cased.
fn terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_lowercase)
        .filter(|w| !NEGATIONS.contains(&w.as_str()))
        .collect()
}

fn is_negated(text: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .any(|w| NEGATIONS.contains(&w.to_lowercase().as_str()))
}

/// Collect leaf strings (and rendered scalars) from a value.
fn observations(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) if !s.trim().is_empty() => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| observations(v, out)),
        Value::Object(map) => {
            // Graph facts render as a single sentence.
            if let (Some(s), Some(r), Some(t)) = (
                map.get("source").and_then(Value::as_str),
                map.get("relation").and_then(Value::as_str),
                map.get("target").and_then(Value::as_str),
            ) {
                out.push(format!("{} {} {}", s, r, t));
            } else {
                map.values().for_each(|v| observations(v, out));
            }
        }
        _ => {}
    }
}

/// Evidence addressed to one hypothesis.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedEvidence {
    pub hypothesis_id: String,
    pub evidence: Evidence,
}

/// Maps lookup output onto the chain's active hypotheses.
#[derive(Debug, Clone)]
pub struct EvidenceInterpreter {
    /// Multiplier applied to heuristic weights.
    source_weight: f64,
}

impl Default for EvidenceInterpreter {
    fn default() -> Self {
        Self { source_weight: 1.0 }
    }
}

impl EvidenceInterpreter {
    /// Scale heuristic evidence weights by `source_weight`.
    pub fn new(source_weight: f64) -> Self {
        Self {
            source_weight: source_weight.clamp(0.0, 1.0),
        }
    }

    /// Interpret `output` from `source` against the active hypotheses.
    pub fn interpret(&self, source: &str, output: &Value, hypotheses: &[Hypothesis]) -> Vec<ScopedEvidence> {
        let active: Vec<&Hypothesis> = hypotheses.iter().filter(|h| h.is_active()).collect();
        if active.is_empty() {
            return Vec::new();
        }

        if let Some(items) = output.get("evidence").and_then(Value::as_array) {
            return self.explicit(source, items, &active);
        }

        let mut texts = Vec::new();
        observations(output, &mut texts);
        if texts.is_empty() {
            if let Some(n) = output.as_f64() {
                texts.push(n.to_string());
            }
        }

        let mut out = Vec::new();
        for text in &texts {
            let text_terms = terms(text);
            let stance = if is_negated(text) {
                EvidenceStance::Contradicting
            } else {
                EvidenceStance::Supporting
            };
            for h in &active {
                let h_terms = terms(h.statement());
                if h_terms.is_empty() {
                    continue;
                }
                let overlap =
                    h_terms.intersection(&text_terms).count() as f64 / h_terms.len() as f64;
                if overlap >= MIN_OVERLAP {
                    out.push(ScopedEvidence {
                        hypothesis_id: h.id().to_string(),
                        evidence: Evidence::new(text.clone(), stance, overlap * self.source_weight, source),
                    });
                }
            }
        }
        out
    }

    fn explicit(&self, source: &str, items: &[Value], active: &[&Hypothesis]) -> Vec<ScopedEvidence> {
        let leading = active
            .iter()
            .fold(None, |best: Option<&&Hypothesis>, h| match best {
                Some(b) if b.confidence() >= h.confidence() => Some(b),
                _ => Some(h),
            });

        items
            .iter()
            .filter_map(|item| {
                let description = item
                    .get("description")
                    .or_else(|| item.get("text"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let stance = item
                    .get("stance")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(if is_negated(description) {
                        EvidenceStance::Contradicting
                    } else {
                        EvidenceStance::Supporting
                    });
                let weight = item.get("weight").and_then(Value::as_f64).unwrap_or(0.5);

                let target = match item.get("hypothesis").and_then(Value::as_str) {
                    Some(key) => active
                        .iter()
                        .find(|h| h.id() == key || h.statement().eq_ignore_ascii_case(key)),
                    None => leading,
                }?;

                Some(ScopedEvidence {
                    hypothesis_id: target.id().to_string(),
                    evidence: Evidence::new(description, stance, weight, source),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::types::ReasoningChain;
    use serde_json::json;

    fn chain() -> ReasoningChain {
        let mut chain = ReasoningChain::new("q", json!({}));
        chain.add_hypothesis("steel supplier delay", 0.5);
        chain.add_hypothesis("customer demand spike", 0.6);
        chain
    }

    #[test]
    fn test_explicit_evidence_targets_hypothesis() {
        let chain = chain();
        let output = json!({"evidence": [
            {"description": "port congestion", "stance": "supporting", "weight": 0.9, "hypothesis": "h1"},
            {"description": "orders flat", "stance": "contradicting", "weight": 0.4}
        ]});
        let out = EvidenceInterpreter::default().interpret("tool", &output, chain.hypotheses());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].hypothesis_id, "h1");
        assert_eq!(out[0].evidence.weight, 0.9);
        // No target: goes to the leading hypothesis.
        assert_eq!(out[1].hypothesis_id, "h2");
        assert_eq!(out[1].evidence.stance, EvidenceStance::Contradicting);
    }

    #[test]
    fn test_heuristic_overlap_and_negation() {
        let chain = chain();
        let output = json!({"text": "The steel supplier reported a delay"});
        let out = EvidenceInterpreter::default().interpret("llm", &output, chain.hypotheses());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].hypothesis_id, "h1");
        assert_eq!(out[0].evidence.stance, EvidenceStance::Supporting);
        assert!((out[0].evidence.weight - 1.0).abs() < 1e-9);

        let output = json!("no steel supplier delay observed");
        let out = EvidenceInterpreter::default().interpret("llm", &output, chain.hypotheses());
        assert_eq!(out[0].evidence.stance, EvidenceStance::Contradicting);
    }

    #[test]
    fn test_graph_facts_are_sentences() {
        let chain = chain();
        let output = json!({"facts": [{"source": "Customer", "relation": "SHOWS", "target": "demand spike"}], "coverage": 1.0});
        let out = EvidenceInterpreter::new(0.5).interpret("graph", &output, chain.hypotheses());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].hypothesis_id, "h2");
        assert!((out[0].evidence.weight - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_unrelated_output_yields_nothing() {
        let chain = chain();
        let out = EvidenceInterpreter::default().interpret("t", &json!({"x": "weather is sunny"}), chain.hypotheses());
        assert!(out.is_empty());
    }
}
