//! Keyword-triggered risk identification.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::types::{RiskCategory, RiskFactor};

/// Probability added per keyword hit beyond the first.
const EXTRA_HIT_BONUS: f64 = 0.05;
const MAX_PROBABILITY: f64 = 0.95;

/// A heuristic that raises a factor when any keyword appears in the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRule {
    pub name: String,
    pub category: RiskCategory,
    pub keywords: Vec<String>,
    pub probability: f64,
    pub impact: f64,
}

impl RiskRule {
    pub fn new(
        name: impl Into<String>,
        category: RiskCategory,
        keywords: &[&str],
        probability: f64,
        impact: f64,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            probability,
            impact,
        }
    }
}

fn default_rules() -> Vec<RiskRule> {
    vec![
        RiskRule::new(
            "supply disruption",
            RiskCategory::Operational,
            &["supplier", "shortage", "shipment", "logistics", "inventory"],
            0.4,
            0.6,
        ),
        RiskRule::new(
            "budget overrun",
            RiskCategory::Financial,
            &["budget", "cost overrun", "expensive", "loan", "debt", "cash flow"],
            0.35,
            0.7,
        ),
        RiskRule::new(
            "system failure",
            RiskCategory::Technical,
            &["outage", "legacy", "migration", "downtime", "bug", "integration"],
            0.3,
            0.6,
        ),
        RiskRule::new(
            "schedule slip",
            RiskCategory::Schedule,
            &["deadline", "delay", "late", "tight timeline", "launch date"],
            0.45,
            0.5,
        ),
        RiskRule::new(
            "regulatory exposure",
            RiskCategory::Compliance,
            &["regulation", "gdpr", "audit", "license", "compliance", "lawsuit"],
            0.25,
            0.8,
        ),
        RiskRule::new(
            "security incident",
            RiskCategory::Security,
            &["breach", "vulnerability", "credential", "phishing", "unencrypted"],
            0.3,
            0.9,
        ),
        RiskRule::new(
            "market shift",
            RiskCategory::Market,
            &["competitor", "demand", "pricing pressure", "new market", "churn"],
            0.35,
            0.55,
        ),
    ]
}

fn tokenize(text: &str, out: &mut Vec<String>) {
    out.extend(
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase),
    );
}

/// Collect lower-cased words from every string in `value`, keys included.
fn collect_words(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => tokenize(s, out),
        Value::Array(items) => items.iter().for_each(|v| collect_words(v, out)),
        Value::Object(map) => {
            for (k, v) in map {
                tokenize(k, out);
                collect_words(v, out);
            }
        }
        _ => {}
    }
}

/// Whole-word match, tolerating a plural `s` on each word.
fn word_matches(word: &str, keyword: &str) -> bool {
    word == keyword || word.strip_suffix('s') == Some(keyword)
}

/// Whether `keyword` (possibly several words) occurs as a run of whole words.
fn contains_phrase(words: &[String], keyword: &str) -> bool {
    let mut phrase = Vec::new();
    tokenize(keyword, &mut phrase);
    if phrase.is_empty() {
        return false;
    }
    words
        .windows(phrase.len())
        .any(|run| run.iter().zip(&phrase).all(|(w, k)| word_matches(w, k)))
}

/// Extracts candidate risk factors from a decision or option context.
#[derive(Debug, Clone)]
pub struct RiskIdentifier {
    rules: Vec<RiskRule>,
}

impl Default for RiskIdentifier {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

impl RiskIdentifier {
    /// Identifier with custom rules only.
    pub fn with_rules(rules: Vec<RiskRule>) -> Self {
        Self { rules }
    }

    /// Add a rule after the existing ones.
    pub fn add_rule(&mut self, rule: RiskRule) {
        self.rules.push(rule);
    }

    /// One factor per rule with at least one keyword in `context`.
    ///
    /// Keywords match whole words only. Each additional keyword hit raises the
    /// probability slightly. A factor's id is derived from its rule, so the same
    /// context always yields the same ids. Never fails; an empty or non-textual
    /// context yields no factors.
    pub fn identify(&self, context: &Value) -> Vec<RiskFactor> {
        let mut words = Vec::new();
        collect_words(context, &mut words);
        if words.is_empty() {
            return Vec::new();
        }

        let factors: Vec<RiskFactor> = self
            .rules
            .iter()
            .filter_map(|rule| {
                let hits: Vec<&str> = rule
                    .keywords
                    .iter()
                    .filter(|k| contains_phrase(&words, k))
                    .map(String::as_str)
                    .collect();
                if hits.is_empty() {
                    return None;
                }
                let probability = (rule.probability + EXTRA_HIT_BONUS * (hits.len() - 1) as f64)
                    .min(MAX_PROBABILITY);
                Some(
                    RiskFactor::new(rule.name.clone(), rule.category, probability, rule.impact)
                        .with_id(format!("{}:{}", rule.category, rule.name))
                        .with_description(format!("Triggered by: {}", hits.join(", "))),
                )
            })
            .collect();

        debug!(factors = factors.len(), "Identified risk factors");
        factors
    }
}
