//! Decision data model.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ============================================================================
// Criteria
// ============================================================================

/// Whether larger or smaller criterion scores are better.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Maximize,
    Minimize,
}

impl Direction {
    /// Map a raw score so that larger is always better.
    pub fn orient(&self, score: f64) -> f64 {
        match self {
            Direction::Maximize => score,
            Direction::Minimize => -score,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Maximize => write!(f, "maximize"),
            Direction::Minimize => write!(f, "minimize"),
        }
    }
}

/// Distribution of a criterion's realised score around its estimate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "distribution", rename_all = "snake_case")]
pub enum Uncertainty {
    /// The estimate is exact.
    #[default]
    Fixed,
    /// Uniform on `[estimate - spread, estimate + spread]`.
    Uniform { spread: f64 },
    /// Normal with mean at the estimate.
    Normal { std_dev: f64 },
    /// Triangular with its mode at the estimate.
    Triangular { below: f64, above: f64 },
}

impl Uncertainty {
    fn is_valid(&self) -> bool {
        let ok = |v: f64| v.is_finite() && v >= 0.0;
        match *self {
            Uncertainty::Fixed => true,
            Uncertainty::Uniform { spread } => ok(spread),
            Uncertainty::Normal { std_dev } => ok(std_dev),
            Uncertainty::Triangular { below, above } => ok(below) && ok(above),
        }
    }
}

/// A named, weighted scoring criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub name: String,
    /// Weight in [0, 1]; the weights of one analysis sum to 1.
    pub weight: f64,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub uncertainty: Uncertainty,
}

impl Criterion {
    /// A maximised criterion with an exact estimate.
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
            direction: Direction::Maximize,
            uncertainty: Uncertainty::Fixed,
        }
    }

    /// Prefer smaller scores.
    pub fn minimize(mut self) -> Self {
        self.direction = Direction::Minimize;
        self
    }

    /// Set the uncertainty distribution.
    pub fn with_uncertainty(mut self, uncertainty: Uncertainty) -> Self {
        self.uncertainty = uncertainty;
        self
    }

    pub(crate) fn has_valid_uncertainty(&self) -> bool {
        self.uncertainty.is_valid()
    }
}

// ============================================================================
// Options, nodes and paths
// ============================================================================

/// Default decision node for flat option lists.
pub const ROOT_NODE: &str = "root";

fn default_node() -> String {
    ROOT_NODE.to_string()
}

/// One mutually exclusive choice at a decision node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOption {
    pub id: String,
    #[serde(default = "default_node")]
    pub node: String,
    /// Score per criterion name.
    pub scores: HashMap<String, f64>,
}

impl DecisionOption {
    /// An option at the root node with no scores yet.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node: default_node(),
            scores: HashMap::new(),
        }
    }

    /// Place the option at `node`.
    pub fn at_node(mut self, node: impl Into<String>) -> Self {
        self.node = node.into();
        self
    }

    /// Set the score for `criterion`.
    pub fn score(mut self, criterion: impl Into<String>, value: f64) -> Self {
        self.scores.insert(criterion.into(), value);
        self
    }
}

/// A decision point holding its options in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionNode {
    pub id: String,
    pub options: Vec<DecisionOption>,
}

/// One option per node, with its derived score vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionPath {
    /// Chosen option ids joined by `/`.
    pub id: String,
    /// Chosen option ids in node order.
    pub choices: Vec<String>,
    /// Mean score of the chosen options per criterion, in criteria order.
    pub scores: Vec<f64>,
    /// Sum of weighted, direction-adjusted scores.
    pub weighted_score: f64,
}

/// Signed weighted total of a score vector.
pub fn weighted_total(criteria: &[Criterion], scores: &[f64]) -> f64 {
    criteria
        .iter()
        .zip(scores)
        .map(|(c, s)| c.weight * c.direction.orient(*s))
        .sum()
}

/// Expanded decision tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub criteria: Vec<Criterion>,
    pub nodes: Vec<DecisionNode>,
    pub paths: Vec<DecisionPath>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_total_is_direction_aware() {
        let criteria = vec![Criterion::new("value", 0.6), Criterion::new("cost", 0.4).minimize()];
        let total = weighted_total(&criteria, &[0.5, 0.25]);
        assert!((total - (0.3 - 0.1)).abs() < 1e-12);
    }

    #[test]
    fn test_option_defaults_to_root() {
        let option: DecisionOption = serde_json::from_str(r#"{"id": "a", "scores": {"x": 1.0}}"#).unwrap();
        assert_eq!(option.node, ROOT_NODE);
    }

    #[test]
    fn test_uncertainty_serde() {
        let c: Criterion = serde_json::from_str(
            r#"{"name": "cost", "weight": 1.0, "direction": "minimize",
                "uncertainty": {"distribution": "triangular", "below": 0.1, "above": 0.3}}"#,
        )
        .unwrap();
        assert_eq!(c.direction, Direction::Minimize);
        assert_eq!(c.uncertainty, Uncertainty::Triangular { below: 0.1, above: 0.3 });
        assert!(!Criterion::new("x", 1.0)
            .with_uncertainty(Uncertainty::Normal { std_dev: -1.0 })
            .has_valid_uncertainty());
    }
}
