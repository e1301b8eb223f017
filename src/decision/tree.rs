//! Decision tree expansion.

use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::debug;

use super::types::{weighted_total, Criterion, DecisionNode, DecisionOption, DecisionPath, DecisionTree};
use crate::config::DecisionConfig;
use crate::error::{DecisionError, DecisionResult};

fn invalid(field: &str, reason: impl Into<String>) -> DecisionError {
    DecisionError::Validation {
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// Check criteria: non-empty, unique names, valid weights summing to 1.
pub(crate) fn validate_criteria(criteria: &[Criterion], epsilon: f64) -> DecisionResult<()> {
    if criteria.is_empty() {
        return Err(invalid("criteria", "at least one criterion is required"));
    }
    let mut seen = HashSet::new();
    for c in criteria {
        if c.name.trim().is_empty() {
            return Err(invalid("criteria", "criterion name must not be empty"));
        }
        if !seen.insert(c.name.as_str()) {
            return Err(invalid("criteria", format!("duplicate criterion '{}'", c.name)));
        }
        if !c.weight.is_finite() || c.weight < 0.0 {
            return Err(invalid(
                "criteria",
                format!("weight of '{}' must be a non-negative number", c.name),
            ));
        }
        if !c.has_valid_uncertainty() {
            return Err(invalid(
                "criteria",
                format!("uncertainty of '{}' must have non-negative parameters", c.name),
            ));
        }
    }
    let sum: f64 = criteria.iter().map(|c| c.weight).sum();
    if (sum - 1.0).abs() > epsilon {
        return Err(DecisionError::InvalidCriteriaWeights { sum });
    }
    Ok(())
}

/// Group options into nodes and expand every path through them.
///
/// Nodes appear in order of first use; a path picks one option per node.
///
/// # Errors
/// [`DecisionError::InvalidCriteriaWeights`] when weights do not sum to 1
/// within `config.weight_epsilon`, [`DecisionError::Validation`] for empty
/// input, duplicates or missing scores, and [`DecisionError::TooManyPaths`]
/// when the expansion exceeds `config.max_paths`.
pub fn build_tree(
    options: &[DecisionOption],
    criteria: &[Criterion],
    config: &DecisionConfig,
) -> DecisionResult<DecisionTree> {
    validate_criteria(criteria, config.weight_epsilon)?;
    if options.is_empty() {
        return Err(invalid("options", "at least one option is required"));
    }

    let mut ids = HashSet::new();
    let mut grouped: IndexMap<String, Vec<DecisionOption>> = IndexMap::new();
    for option in options {
        if !ids.insert(option.id.as_str()) {
            return Err(invalid("options", format!("duplicate option '{}'", option.id)));
        }
        for c in criteria {
            match option.scores.get(&c.name) {
                Some(s) if s.is_finite() => {}
                Some(_) => {
                    return Err(invalid(
                        "options",
                        format!("score of '{}' for '{}' is not finite", option.id, c.name),
                    ))
                }
                None => {
                    return Err(invalid(
                        "options",
                        format!("option '{}' has no score for '{}'", option.id, c.name),
                    ))
                }
            }
        }
        grouped.entry(option.node.clone()).or_default().push(option.clone());
    }

    let nodes: Vec<DecisionNode> = grouped
        .into_iter()
        .map(|(id, options)| DecisionNode { id, options })
        .collect();

    let total = nodes
        .iter()
        .try_fold(1usize, |acc, n| acc.checked_mul(n.options.len()));
    match total {
        Some(paths) if paths <= config.max_paths => {}
        other => {
            return Err(DecisionError::TooManyPaths {
                paths: other.unwrap_or(usize::MAX),
                limit: config.max_paths,
            })
        }
    }

    let paths = expand_paths(&nodes, criteria);
    debug!(nodes = nodes.len(), paths = paths.len(), "Built decision tree");

    Ok(DecisionTree {
        criteria: criteria.to_vec(),
        nodes,
        paths,
    })
}

/// Cartesian product of node options, first node varying slowest.
fn expand_paths(nodes: &[DecisionNode], criteria: &[Criterion]) -> Vec<DecisionPath> {
    let mut paths = Vec::new();
    let mut cursor = vec![0usize; nodes.len()];

    loop {
        let chosen: Vec<&DecisionOption> = nodes
            .iter()
            .zip(&cursor)
            .map(|(node, &i)| &node.options[i])
            .collect();

        let n = chosen.len() as f64;
        let scores: Vec<f64> = criteria
            .iter()
            .map(|c| {
                chosen
                    .iter()
                    .map(|o| o.scores.get(&c.name).copied().unwrap_or_default())
                    .sum::<f64>()
                    / n
            })
            .collect();
        let choices: Vec<String> = chosen.iter().map(|o| o.id.clone()).collect();

        paths.push(DecisionPath {
            id: choices.join("/"),
            weighted_score: weighted_total(criteria, &scores),
            choices,
            scores,
        });

        // Advance the odometer from the last node.
        let mut position = nodes.len();
        loop {
            if position == 0 {
                return paths;
            }
            position -= 1;
            cursor[position] += 1;
            if cursor[position] < nodes[position].options.len() {
                break;
            }
            cursor[position] = 0;
        }
    }
}
