//! Storage layer for execution traces, decisions and alert history.
//!
//! This module provides SQLite-based persistence for reasoning chains, tool
//! chain runs, decision analyses and risk alerts.

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decision::DecisionAnalysis;
use crate::error::StorageResult;
use crate::reasoning::ReasoningChain;
use crate::risk::{AlertState, RiskAlert};
use crate::tools::ChainResult;

/// Persisted summary and full trace of a reasoning chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningTrace {
    /// Chain identifier.
    pub chain_id: String,
    /// The question the chain answered.
    pub question: String,
    /// Final state (`completed` / `failed`).
    pub state: String,
    /// Why the chain stopped.
    pub termination: Option<String>,
    /// Overall confidence at termination.
    pub confidence: f64,
    /// Number of recorded steps.
    pub step_count: usize,
    /// Full serialized chain.
    pub trace: serde_json::Value,
    /// When the chain was created.
    pub created_at: DateTime<Utc>,
    /// When the chain finished.
    pub completed_at: Option<DateTime<Utc>>,
}

impl ReasoningTrace {
    /// Snapshot a chain.
    pub fn from_chain(chain: &ReasoningChain) -> StorageResult<Self> {
        Ok(Self {
            chain_id: chain.id.clone(),
            question: chain.question.clone(),
            state: chain.state.as_str().to_string(),
            termination: chain.termination.map(|t| t.as_str().to_string()),
            confidence: chain.confidence(),
            step_count: chain.steps().len(),
            trace: serde_json::to_value(chain)?,
            created_at: chain.created_at,
            completed_at: chain.completed_at,
        })
    }

    /// Rebuild the chain from its stored trace.
    pub fn chain(&self) -> StorageResult<ReasoningChain> {
        Ok(serde_json::from_value(self.trace.clone())?)
    }
}

/// Persisted tool chain run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolChainTrace {
    /// Chain identifier.
    pub chain_id: String,
    /// `success`, `partial` or `failed`.
    pub status: String,
    /// Declared step count.
    pub steps_total: usize,
    /// Steps that succeeded.
    pub steps_succeeded: usize,
    /// Wall-clock duration.
    pub duration_ms: u64,
    /// Failure description, if any.
    pub error: Option<String>,
    /// Full serialized result.
    pub trace: serde_json::Value,
    /// When the trace was recorded.
    pub created_at: DateTime<Utc>,
}

impl ToolChainTrace {
    /// Snapshot a chain result.
    pub fn from_result(result: &ChainResult) -> StorageResult<Self> {
        Ok(Self {
            chain_id: result.chain_id.clone(),
            status: result.status.as_str().to_string(),
            steps_total: result.steps_total,
            steps_succeeded: result.steps_succeeded(),
            duration_ms: result.duration_ms,
            error: result.error.clone(),
            trace: serde_json::to_value(result)?,
            created_at: Utc::now(),
        })
    }
}

/// Persisted decision analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Analysis identifier.
    pub id: String,
    /// Recommended path id.
    pub recommendation: Option<String>,
    /// Size of the Pareto set.
    pub pareto_size: usize,
    /// Number of paths evaluated.
    pub paths_evaluated: usize,
    /// Full serialized analysis.
    pub analysis: serde_json::Value,
    /// When the analysis was recorded.
    pub created_at: DateTime<Utc>,
}

impl DecisionRecord {
    /// Snapshot an analysis.
    pub fn from_analysis(analysis: &DecisionAnalysis) -> StorageResult<Self> {
        Ok(Self {
            id: analysis.id.clone(),
            recommendation: analysis.recommendation.as_ref().map(|p| p.id.clone()),
            pareto_size: analysis.pareto_set.len(),
            paths_evaluated: analysis.paths_evaluated,
            analysis: serde_json::to_value(analysis)?,
            created_at: Utc::now(),
        })
    }
}

/// Storage trait for database operations.
#[async_trait]
pub trait Storage: Send + Sync {
    // Reasoning traces

    /// Insert or replace a reasoning trace.
    async fn save_reasoning_trace(&self, trace: &ReasoningTrace) -> StorageResult<()>;
    /// Get a reasoning trace by chain ID.
    async fn get_reasoning_trace(&self, chain_id: &str) -> StorageResult<Option<ReasoningTrace>>;
    /// Most recent reasoning traces, newest first.
    async fn list_reasoning_traces(&self, limit: u32) -> StorageResult<Vec<ReasoningTrace>>;

    // Tool chain traces

    /// Insert or replace a tool chain trace.
    async fn save_tool_chain_trace(&self, trace: &ToolChainTrace) -> StorageResult<()>;
    /// Get a tool chain trace by chain ID.
    async fn get_tool_chain_trace(&self, chain_id: &str) -> StorageResult<Option<ToolChainTrace>>;

    // Decisions

    /// Insert or replace a decision record.
    async fn save_decision(&self, record: &DecisionRecord) -> StorageResult<()>;
    /// Get a decision record by ID.
    async fn get_decision(&self, id: &str) -> StorageResult<Option<DecisionRecord>>;

    // Risk alerts

    /// Insert an alert or update its state.
    async fn save_alert(&self, alert: &RiskAlert) -> StorageResult<()>;
    /// Get an alert by ID.
    async fn get_alert(&self, id: &str) -> StorageResult<Option<RiskAlert>>;
    /// Alerts, optionally filtered by state, oldest first.
    async fn list_alerts(&self, state: Option<AlertState>) -> StorageResult<Vec<RiskAlert>>;
}
