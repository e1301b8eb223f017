//! Risk data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Broad risk area, used to pick weights and playbooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Operational,
    Financial,
    Technical,
    Schedule,
    Compliance,
    Security,
    Market,
}

impl RiskCategory {
    /// All categories in declaration order.
    pub const ALL: [RiskCategory; 7] = [
        RiskCategory::Operational,
        RiskCategory::Financial,
        RiskCategory::Technical,
        RiskCategory::Schedule,
        RiskCategory::Compliance,
        RiskCategory::Security,
        RiskCategory::Market,
    ];

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::Operational => "operational",
            RiskCategory::Financial => "financial",
            RiskCategory::Technical => "technical",
            RiskCategory::Schedule => "schedule",
            RiskCategory::Compliance => "compliance",
            RiskCategory::Security => "security",
            RiskCategory::Market => "market",
        }
    }
}

impl std::fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RiskCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RiskCategory::ALL
            .iter()
            .find(|c| c.as_str() == s.to_lowercase())
            .copied()
            .ok_or_else(|| format!("Unknown risk category: {}", s))
    }
}

/// Observed outcomes used by the Bayesian method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observations {
    /// How often the risk materialised.
    pub occurrences: u32,
    /// How many opportunities there were.
    pub trials: u32,
}

/// A single identified risk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: RiskCategory,
    /// Likelihood in [0, 1].
    pub probability: f64,
    /// Severity in [0, 1].
    pub impact: f64,
    /// Computed score; `probability * impact` until rescored.
    #[serde(default)]
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observations: Option<Observations>,
    /// Standard deviation of probability and impact estimates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncertainty: Option<f64>,
}

impl RiskFactor {
    /// Create a factor; probability and impact are clamped to [0, 1].
    pub fn new(name: impl Into<String>, category: RiskCategory, probability: f64, impact: f64) -> Self {
        let probability = probability.clamp(0.0, 1.0);
        let impact = impact.clamp(0.0, 1.0);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            category,
            probability,
            impact,
            score: probability * impact,
            observations: None,
            uncertainty: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_observations(mut self, occurrences: u32, trials: u32) -> Self {
        self.observations = Some(Observations { occurrences, trials });
        self
    }

    pub fn with_uncertainty(mut self, std_dev: f64) -> Self {
        self.uncertainty = Some(std_dev);
        self
    }
}

// ============================================================================
// Alerts
// ============================================================================

/// Acknowledgement state of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Open,
    Acknowledged,
    Resolved,
}

impl AlertState {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Open => "open",
            AlertState::Acknowledged => "acknowledged",
            AlertState::Resolved => "resolved",
        }
    }
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AlertState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(AlertState::Open),
            "acknowledged" => Ok(AlertState::Acknowledged),
            "resolved" => Ok(AlertState::Resolved),
            _ => Err(format!("Unknown alert state: {}", s)),
        }
    }
}

/// Raised when a factor's score crosses its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    pub id: String,
    pub factor_ids: Vec<String>,
    pub message: String,
    pub score: f64,
    pub threshold: f64,
    pub state: AlertState,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl RiskAlert {
    /// An open alert for `factor`.
    pub fn for_factor(factor: &RiskFactor, threshold: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            factor_ids: vec![factor.id.clone()],
            message: format!(
                "{} risk '{}' scored {:.3} (threshold {:.3})",
                factor.category, factor.name, factor.score, threshold
            ),
            score: factor.score,
            threshold,
            state: AlertState::Open,
            created_at: Utc::now(),
            acknowledged_at: None,
            resolved_at: None,
        }
    }

    /// Move an open alert to `acknowledged`. Returns whether anything changed.
    pub fn acknowledge(&mut self) -> bool {
        if self.state != AlertState::Open {
            return false;
        }
        self.state = AlertState::Acknowledged;
        self.acknowledged_at = Some(Utc::now());
        true
    }

    /// Move the alert to `resolved`. Returns whether anything changed.
    pub fn resolve(&mut self) -> bool {
        if self.state == AlertState::Resolved {
            return false;
        }
        self.state = AlertState::Resolved;
        self.resolved_at = Some(Utc::now());
        true
    }

    pub fn is_resolved(&self) -> bool {
        self.state == AlertState::Resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factor_score_is_product() {
        let f = RiskFactor::new("outage", RiskCategory::Technical, 0.5, 0.8);
        assert_eq!(f.score, 0.5 * 0.8);
        let clamped = RiskFactor::new("x", RiskCategory::Market, 1.4, -0.2);
        assert_eq!((clamped.probability, clamped.impact, clamped.score), (1.0, 0.0, 0.0));
    }

    #[test]
    fn test_alert_lifecycle_is_idempotent() {
        let factor = RiskFactor::new("breach", RiskCategory::Security, 0.9, 0.9);
        let mut alert = RiskAlert::for_factor(&factor, 0.7);
        assert_eq!(alert.state, AlertState::Open);
        assert!(alert.acknowledge());
        assert!(!alert.acknowledge());
        assert!(alert.resolve());
        let resolved_at = alert.resolved_at;
        assert!(!alert.resolve());
        assert!(!alert.acknowledge());
        assert_eq!(alert.state, AlertState::Resolved);
        assert_eq!(alert.resolved_at, resolved_at);
    }

    #[test]
    fn test_category_round_trip() {
        for c in RiskCategory::ALL {
            assert_eq!(c.as_str().parse::<RiskCategory>().unwrap(), c);
        }
        assert!("weather".parse::<RiskCategory>().is_err());
    }
}
