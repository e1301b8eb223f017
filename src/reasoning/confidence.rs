//! Confidence propagation.
//!
//! Both functions are pure: the same hypotheses and evidence always give the
//! same value.

use super::types::{Evidence, Hypothesis};

/// Log-odds shift per unit of net evidence weight.
pub const EVIDENCE_SCALE: f64 = 1.5;

const PRIOR_EPSILON: f64 = 1e-6;

fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// `sigmoid(logit(prior) + k * (sum supporting - sum contradicting))`.
///
/// Monotone: more supporting weight never lowers the result, more
/// contradicting weight never raises it.
pub fn hypothesis_confidence(prior: f64, supporting: &[Evidence], contradicting: &[Evidence]) -> f64 {
    let prior = prior.clamp(PRIOR_EPSILON, 1.0 - PRIOR_EPSILON);
    let support: f64 = supporting.iter().map(|e| e.weight).sum();
    let contra: f64 = contradicting.iter().map(|e| e.weight).sum();
    let net = support - contra;
    if net == 0.0 {
        return prior;
    }
    sigmoid(logit(prior) + EVIDENCE_SCALE * net)
}

/// Weighted mean of active hypotheses' confidences with weight
/// `1 + total evidence weight`; 0 when nothing is active.
pub fn calculate_overall_confidence(hypotheses: &[Hypothesis]) -> f64 {
    let (weighted, total) = hypotheses
        .iter()
        .filter(|h| h.is_active())
        .fold((0.0, 0.0), |(weighted, total), h| {
            let w = 1.0 + h.evidence_weight();
            (weighted + w * h.confidence(), total + w)
        });
    if total == 0.0 {
        0.0
    } else {
        weighted / total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::types::{EvidenceStance, ReasoningChain};
    use serde_json::json;

    fn ev(stance: EvidenceStance, w: f64) -> Evidence {
        Evidence::new("e", stance, w, "test")
    }

    #[test]
    fn test_no_evidence_returns_prior() {
        assert_eq!(hypothesis_confidence(0.3, &[], &[]), 0.3);
    }

    #[test]
    fn test_balanced_evidence_returns_prior() {
        let s = [ev(EvidenceStance::Supporting, 0.5)];
        let c = [ev(EvidenceStance::Contradicting, 0.5)];
        assert!((hypothesis_confidence(0.4, &s, &c) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_monotone_in_supporting_and_contradicting() {
        let mut support = Vec::new();
        let mut last = hypothesis_confidence(0.5, &support, &[]);
        for w in [0.1, 0.5, 1.0, 0.0, 0.3] {
            support.push(ev(EvidenceStance::Supporting, w));
            let next = hypothesis_confidence(0.5, &support, &[]);
            assert!(next >= last, "{} < {}", next, last);
            last = next;
        }

        let mut contra = Vec::new();
        let mut last = hypothesis_confidence(0.5, &support, &contra);
        for w in [0.2, 1.0, 0.0, 0.7] {
            contra.push(ev(EvidenceStance::Contradicting, w));
            let next = hypothesis_confidence(0.5, &support, &contra);
            assert!(next <= last, "{} > {}", next, last);
            last = next;
        }
    }

    #[test]
    fn test_extreme_priors_stay_in_range() {
        let s = [ev(EvidenceStance::Supporting, 1.0)];
        let c = [ev(EvidenceStance::Contradicting, 1.0)];
        for prior in [0.0, 1.0] {
            let v = hypothesis_confidence(prior, &s, &[]);
            assert!((0.0..=1.0).contains(&v));
            let v = hypothesis_confidence(prior, &[], &c);
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn test_overall_confidence_is_pure_and_weighted() {
        let mut chain = ReasoningChain::new("q", json!({}));
        let a = chain.add_hypothesis("a", 0.9);
        chain.add_hypothesis("b", 0.1);
        chain.add_evidence(&a, ev(EvidenceStance::Supporting, 1.0));

        let first = calculate_overall_confidence(chain.hypotheses());
        let second = calculate_overall_confidence(chain.hypotheses());
        assert_eq!(first, second);

        let ca = chain.hypotheses()[0].confidence();
        let expected = (2.0 * ca + 1.0 * 0.1) / 3.0;
        assert!((first - expected).abs() < 1e-12);
        assert_eq!(chain.confidence(), first);
    }

    #[test]
    fn test_overall_confidence_ignores_inactive() {
        let mut chain = ReasoningChain::new("q", json!({}));
        let a = chain.add_hypothesis("a", 0.2);
        chain.add_hypothesis("b", 0.8);
        chain.push_checkpoint();
        chain.backtrack(Some(&a));
        assert!((calculate_overall_confidence(chain.hypotheses()) - 0.8).abs() < 1e-12);
        assert_eq!(calculate_overall_confidence(&[]), 0.0);
    }
}
