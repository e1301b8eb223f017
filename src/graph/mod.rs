//! Graph reasoning adapter.
//!
//! The engine only consumes a query contract ([`GraphStore`]); the storage
//! engine behind it is external. [`GraphReasoner`] layers entity, path and
//! question queries on top and bounds each call with a timeout.

mod http;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::error::{GraphError, GraphResult};

pub use http::HttpGraphStore;

/// Maximum traversal depth accepted by [`GraphReasoner::path_based_reasoning`].
pub const MAX_HOPS: usize = 10;

/// A parameterised query against the graph store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQuery {
    pub statement: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl GraphQuery {
    /// Create a query without parameters.
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            params: Map::new(),
        }
    }

    /// Bind a parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// A row returned by the graph store, keyed by column name.
pub type GraphRow = Map<String, Value>;

/// Query interface of an external graph store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Run one query and return its rows.
    async fn query(&self, query: &GraphQuery) -> GraphResult<Vec<GraphRow>>;
}

/// A relation between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRelation {
    pub source: String,
    pub relation: String,
    pub target: String,
}

impl EntityRelation {
    fn from_row(row: &GraphRow) -> Option<Self> {
        Some(Self {
            source: row.get("source")?.as_str()?.to_string(),
            relation: row.get("relation")?.as_str()?.to_string(),
            target: row.get("target")?.as_str()?.to_string(),
        })
    }

    /// Render as a short sentence.
    pub fn describe(&self) -> String {
        format!("{} {} {}", self.source, self.relation, self.target)
    }
}

/// A path between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphPath {
    pub nodes: Vec<String>,
    pub relations: Vec<String>,
}

impl GraphPath {
    /// Number of edges on the path.
    pub fn hops(&self) -> usize {
        self.relations.len()
    }

    fn from_row(row: &GraphRow) -> Option<Self> {
        let strings = |key: &str| -> Option<Vec<String>> {
            row.get(key)?
                .as_array()?
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect()
        };
        Some(Self {
            nodes: strings("nodes")?,
            relations: strings("relations")?,
        })
    }
}

/// Facts found for a natural-language question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphAnswer {
    pub question: String,
    pub terms: Vec<String>,
    pub facts: Vec<EntityRelation>,
    /// Share of query terms that matched at least one fact.
    pub coverage: f64,
}

const STOPWORDS: &[&str] = &[
    "about", "does", "from", "have", "that", "their", "there", "these", "this", "what", "when",
    "where", "which", "with", "would", "should", "could", "into", "they", "them", "than", "then",
];

/// Lower-cased content words of a question, deduplicated and ordered.
fn question_terms(question: &str) -> Vec<String> {
    question
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.len() > 3 && !STOPWORDS.contains(&w.as_str()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Graph-backed inference operations.
#[derive(Clone)]
pub struct GraphReasoner {
    store: Arc<dyn GraphStore>,
    timeout: Duration,
    limit: usize,
}

impl GraphReasoner {
    /// Create a reasoner; every store call is bounded by `timeout`.
    pub fn new(store: Arc<dyn GraphStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            limit: 25,
        }
    }

    /// Override the maximum number of rows requested per query.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    async fn run(&self, operation: &str, query: GraphQuery) -> GraphResult<Vec<GraphRow>> {
        let start = Instant::now();
        let rows = match tokio::time::timeout(self.timeout, self.store.query(&query)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    operation = operation,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Graph query timed out"
                );
                return Err(GraphError::Timeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
        };
        debug!(
            operation = operation,
            rows = rows.len(),
            latency_ms = start.elapsed().as_millis(),
            "Graph query completed"
        );
        Ok(rows)
    }

    /// Relations touching `entity`.
    pub async fn infer_entity_relations(&self, entity: &str) -> GraphResult<Vec<EntityRelation>> {
        if entity.trim().is_empty() {
            return Err(GraphError::InvalidQuery {
                message: "entity must not be empty".to_string(),
            });
        }
        let query = GraphQuery::new(
            "MATCH (e {name: $entity})-[r]-(o) \
             RETURN e.name AS source, type(r) AS relation, o.name AS target \
             LIMIT $limit",
        )
        .param("entity", entity)
        .param("limit", self.limit);

        let rows = self.run("infer_entity_relations", query).await?;
        let relations: Vec<_> = rows.iter().filter_map(EntityRelation::from_row).collect();
        info!(entity = %entity, relations = relations.len(), "Inferred entity relations");
        Ok(relations)
    }

    /// Paths of at most `max_hops` edges from `source` to `target`, shortest first.
    pub async fn path_based_reasoning(
        &self,
        source: &str,
        target: &str,
        max_hops: usize,
    ) -> GraphResult<Vec<GraphPath>> {
        if !(1..=MAX_HOPS).contains(&max_hops) {
            return Err(GraphError::InvalidQuery {
                message: format!("max_hops must be between 1 and {}, got {}", MAX_HOPS, max_hops),
            });
        }
        // Variable-length bounds cannot be parameterised in Cypher.
        let statement = format!(
            "MATCH p = (a {{name: $source}})-[*1..{}]-(b {{name: $target}}) \
             RETURN [n IN nodes(p) | n.name] AS nodes, \
                    [r IN relationships(p) | type(r)] AS relations \
             ORDER BY length(p) ASC LIMIT $limit",
            max_hops
        );
        let query = GraphQuery::new(statement)
            .param("source", source)
            .param("target", target)
            .param("limit", self.limit);

        let rows = self.run("path_based_reasoning", query).await?;
        let mut paths: Vec<_> = rows
            .iter()
            .filter_map(GraphPath::from_row)
            .filter(|p| p.hops() <= max_hops)
            .collect();
        paths.sort_by_key(GraphPath::hops);
        info!(source = %source, target = %target, paths = paths.len(), "Path reasoning complete");
        Ok(paths)
    }

    /// Facts about the content words of a natural-language question.
    pub async fn answer_question(&self, question: &str) -> GraphResult<GraphAnswer> {
        let terms = question_terms(question);
        if terms.is_empty() {
            return Ok(GraphAnswer {
                question: question.to_string(),
                terms,
                facts: Vec::new(),
                coverage: 0.0,
            });
        }

        let query = GraphQuery::new(
            "UNWIND $terms AS term \
             MATCH (e)-[r]-(o) WHERE toLower(e.name) CONTAINS term \
             RETURN DISTINCT e.name AS source, type(r) AS relation, o.name AS target \
             LIMIT $limit",
        )
        .param("terms", json!(terms))
        .param("limit", self.limit);

        let rows = self.run("answer_question", query).await?;
        let facts: Vec<_> = rows.iter().filter_map(EntityRelation::from_row).collect();
        let matched = terms
            .iter()
            .filter(|t| facts.iter().any(|f| f.source.to_lowercase().contains(t.as_str())))
            .count();
        let coverage = matched as f64 / terms.len() as f64;

        info!(terms = terms.len(), facts = facts.len(), coverage = coverage, "Answered graph question");
        Ok(GraphAnswer {
            question: question.to_string(),
            terms,
            facts,
            coverage,
        })
    }
}
