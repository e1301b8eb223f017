//! Mitigation playbooks.

use serde::{Deserialize, Serialize};

use super::types::{RiskCategory, RiskFactor};

/// A suggested action and the risk expected to remain after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MitigationAction {
    pub factor_id: String,
    pub action: String,
    pub description: String,
    /// Fractional reduction in probability, in [0, 1].
    pub probability_reduction: f64,
    /// Fractional reduction in impact, in [0, 1].
    pub impact_reduction: f64,
    /// Never below zero.
    pub estimated_residual_risk: f64,
}

struct Play {
    action: &'static str,
    description: &'static str,
    probability_reduction: f64,
    impact_reduction: f64,
}

const fn play(action: &'static str, description: &'static str, p: f64, i: f64) -> Play {
    Play {
        action,
        description,
        probability_reduction: p,
        impact_reduction: i,
    }
}

const FALLBACK: &[Play] = &[play(
    "monitor",
    "Assign an owner and review the factor at every checkpoint",
    0.1,
    0.0,
)];

const OPERATIONAL: &[Play] = &[
    play("dual_source", "Qualify a second supplier for critical inputs", 0.5, 0.2),
    play("safety_stock", "Hold buffer inventory for the critical path", 0.1, 0.5),
];
const FINANCIAL: &[Play] = &[
    play("contingency_budget", "Reserve a contingency of 10-15% of spend", 0.0, 0.5),
    play("staged_funding", "Release funding in milestones tied to results", 0.3, 0.3),
];
const TECHNICAL: &[Play] = &[
    play("staged_rollout", "Roll out behind a flag to a small cohort first", 0.3, 0.5),
    play("rollback_plan", "Rehearse a tested rollback before cut-over", 0.0, 0.6),
];
const SCHEDULE: &[Play] = &[
    play("buffer_milestones", "Add schedule buffer before hard milestones", 0.4, 0.2),
    play("descope", "Agree on scope that can be dropped if late", 0.0, 0.5),
];
const COMPLIANCE: &[Play] = &[
    play("legal_review", "Get a compliance review before commitment", 0.6, 0.2),
    play("audit_trail", "Keep evidence of controls for auditors", 0.2, 0.4),
];
const SECURITY: &[Play] = &[
    play("threat_model", "Threat-model the change and fix high findings", 0.5, 0.2),
    play("least_privilege", "Restrict credentials and rotate secrets", 0.4, 0.4),
];
const MARKET: &[Play] = &[
    play("pilot", "Validate demand with a limited pilot", 0.4, 0.3),
    play("hedge", "Keep a fallback offering for the existing segment", 0.0, 0.4),
];

fn playbook(category: RiskCategory) -> &'static [Play] {
    match category {
        RiskCategory::Operational => OPERATIONAL,
        RiskCategory::Financial => FINANCIAL,
        RiskCategory::Technical => TECHNICAL,
        RiskCategory::Schedule => SCHEDULE,
        RiskCategory::Compliance => COMPLIANCE,
        RiskCategory::Security => SECURITY,
        RiskCategory::Market => MARKET,
    }
}

/// Suggests mitigations by risk category.
#[derive(Debug, Clone, Default)]
pub struct MitigationAdvisor;

impl MitigationAdvisor {
    pub fn new() -> Self {
        Self
    }

    /// One or more actions for `factor`, lowest residual risk first.
    pub fn suggest(&self, factor: &RiskFactor) -> Vec<MitigationAction> {
        let mut actions: Vec<MitigationAction> = playbook(factor.category)
            .iter()
            .chain(FALLBACK)
            .map(|p| {
                let probability = factor.probability * (1.0 - p.probability_reduction);
                let impact = factor.impact * (1.0 - p.impact_reduction);
                MitigationAction {
                    factor_id: factor.id.clone(),
                    action: p.action.to_string(),
                    description: p.description.to_string(),
                    probability_reduction: p.probability_reduction,
                    impact_reduction: p.impact_reduction,
                    estimated_residual_risk: (probability * impact).max(0.0),
                }
            })
            .collect();
        actions.sort_by(|a, b| a.estimated_residual_risk.total_cmp(&b.estimated_residual_risk));
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_category_has_actions_with_non_negative_residual() {
        let advisor = MitigationAdvisor::new();
        for category in RiskCategory::ALL {
            for (p, i) in [(0.0, 0.0), (0.5, 0.5), (1.0, 1.0)] {
                let factor = RiskFactor::new("f", category, p, i);
                let actions = advisor.suggest(&factor);
                assert!(actions.len() >= 2);
                for a in &actions {
                    assert!(a.estimated_residual_risk >= 0.0);
                    assert!(a.estimated_residual_risk <= factor.score + 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_sorted_by_residual() {
        let factor = RiskFactor::new("supplier", RiskCategory::Operational, 0.8, 0.5);
        let actions = MitigationAdvisor::new().suggest(&factor);
        assert_eq!(actions[0].action, "dual_source");
        assert!((actions[0].estimated_residual_risk - 0.4 * 0.4).abs() < 1e-12);
        assert!(actions
            .windows(2)
            .all(|w| w[0].estimated_residual_risk <= w[1].estimated_residual_risk));
    }
}
