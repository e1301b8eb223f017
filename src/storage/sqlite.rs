use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::{DecisionRecord, ReasoningTrace, Storage, ToolChainTrace};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::risk::{AlertState, RiskAlert};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// In-memory database, mainly for tests. A single connection keeps
    /// every query on the same database.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_reasoning_trace(&self, trace: &ReasoningTrace) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO reasoning_traces
                (chain_id, question, state, termination, confidence, step_count, trace, created_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trace.chain_id)
        .bind(&trace.question)
        .bind(&trace.state)
        .bind(&trace.termination)
        .bind(trace.confidence)
        .bind(trace.step_count as i64)
        .bind(serde_json::to_string(&trace.trace)?)
        .bind(trace.created_at.to_rfc3339())
        .bind(trace.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        debug!(chain_id = %trace.chain_id, "Saved reasoning trace");
        Ok(())
    }

    async fn get_reasoning_trace(&self, chain_id: &str) -> StorageResult<Option<ReasoningTrace>> {
        let row: Option<ReasoningTraceRow> = sqlx::query_as(
            r#"
            SELECT chain_id, question, state, termination, confidence, step_count, trace, created_at, completed_at
            FROM reasoning_traces
            WHERE chain_id = ?
            "#,
        )
        .bind(chain_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ReasoningTrace::try_from).transpose()
    }

    async fn list_reasoning_traces(&self, limit: u32) -> StorageResult<Vec<ReasoningTrace>> {
        let rows: Vec<ReasoningTraceRow> = sqlx::query_as(
            r#"
            SELECT chain_id, question, state, termination, confidence, step_count, trace, created_at, completed_at
            FROM reasoning_traces
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ReasoningTrace::try_from).collect()
    }

    async fn save_tool_chain_trace(&self, trace: &ToolChainTrace) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO tool_chain_traces
                (chain_id, status, steps_total, steps_succeeded, duration_ms, error, trace, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trace.chain_id)
        .bind(&trace.status)
        .bind(trace.steps_total as i64)
        .bind(trace.steps_succeeded as i64)
        .bind(trace.duration_ms as i64)
        .bind(&trace.error)
        .bind(serde_json::to_string(&trace.trace)?)
        .bind(trace.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_tool_chain_trace(&self, chain_id: &str) -> StorageResult<Option<ToolChainTrace>> {
        let row: Option<ToolChainTraceRow> = sqlx::query_as(
            r#"
            SELECT chain_id, status, steps_total, steps_succeeded, duration_ms, error, trace, created_at
            FROM tool_chain_traces
            WHERE chain_id = ?
            "#,
        )
        .bind(chain_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ToolChainTrace::try_from).transpose()
    }

    async fn save_decision(&self, record: &DecisionRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO decisions
                (id, recommendation, pareto_size, paths_evaluated, analysis, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.recommendation)
        .bind(record.pareto_size as i64)
        .bind(record.paths_evaluated as i64)
        .bind(serde_json::to_string(&record.analysis)?)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_decision(&self, id: &str) -> StorageResult<Option<DecisionRecord>> {
        let row: Option<DecisionRow> = sqlx::query_as(
            r#"
            SELECT id, recommendation, pareto_size, paths_evaluated, analysis, created_at
            FROM decisions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DecisionRecord::try_from).transpose()
    }

    async fn save_alert(&self, alert: &RiskAlert) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO risk_alerts
                (id, factor_ids, message, score, threshold, state, created_at, acknowledged_at, resolved_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                state = excluded.state,
                acknowledged_at = excluded.acknowledged_at,
                resolved_at = excluded.resolved_at
            "#,
        )
        .bind(&alert.id)
        .bind(serde_json::to_string(&alert.factor_ids)?)
        .bind(&alert.message)
        .bind(alert.score)
        .bind(alert.threshold)
        .bind(alert.state.as_str())
        .bind(alert.created_at.to_rfc3339())
        .bind(alert.acknowledged_at.map(|t| t.to_rfc3339()))
        .bind(alert.resolved_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        debug!(alert_id = %alert.id, state = %alert.state, "Saved risk alert");
        Ok(())
    }

    async fn get_alert(&self, id: &str) -> StorageResult<Option<RiskAlert>> {
        let row: Option<AlertRow> = sqlx::query_as(
            r#"
            SELECT id, factor_ids, message, score, threshold, state, created_at, acknowledged_at, resolved_at
            FROM risk_alerts
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RiskAlert::try_from).transpose()
    }

    async fn list_alerts(&self, state: Option<AlertState>) -> StorageResult<Vec<RiskAlert>> {
        let rows: Vec<AlertRow> = match state {
            Some(state) => {
                sqlx::query_as(
                    r#"
                    SELECT id, factor_ids, message, score, threshold, state, created_at, acknowledged_at, resolved_at
                    FROM risk_alerts
                    WHERE state = ?
                    ORDER BY created_at ASC
                    "#,
                )
                .bind(state.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT id, factor_ids, message, score, threshold, state, created_at, acknowledged_at, resolved_at
                    FROM risk_alerts
                    ORDER BY created_at ASC
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(RiskAlert::try_from).collect()
    }
}

// Internal row types for SQLx mapping

fn parse_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[derive(sqlx::FromRow)]
struct ReasoningTraceRow {
    chain_id: String,
    question: String,
    state: String,
    termination: Option<String>,
    confidence: f64,
    step_count: i64,
    trace: String,
    created_at: String,
    completed_at: Option<String>,
}

impl TryFrom<ReasoningTraceRow> for ReasoningTrace {
    type Error = StorageError;

    fn try_from(row: ReasoningTraceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            chain_id: row.chain_id,
            question: row.question,
            state: row.state,
            termination: row.termination,
            confidence: row.confidence,
            step_count: row.step_count.max(0) as usize,
            trace: serde_json::from_str(&row.trace)?,
            created_at: parse_time(&row.created_at),
            completed_at: row.completed_at.as_deref().map(parse_time),
        })
    }
}

#[derive(sqlx::FromRow)]
struct ToolChainTraceRow {
    chain_id: String,
    status: String,
    steps_total: i64,
    steps_succeeded: i64,
    duration_ms: i64,
    error: Option<String>,
    trace: String,
    created_at: String,
}

impl TryFrom<ToolChainTraceRow> for ToolChainTrace {
    type Error = StorageError;

    fn try_from(row: ToolChainTraceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            chain_id: row.chain_id,
            status: row.status,
            steps_total: row.steps_total.max(0) as usize,
            steps_succeeded: row.steps_succeeded.max(0) as usize,
            duration_ms: row.duration_ms.max(0) as u64,
            error: row.error,
            trace: serde_json::from_str(&row.trace)?,
            created_at: parse_time(&row.created_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct DecisionRow {
    id: String,
    recommendation: Option<String>,
    pareto_size: i64,
    paths_evaluated: i64,
    analysis: String,
    created_at: String,
}

impl TryFrom<DecisionRow> for DecisionRecord {
    type Error = StorageError;

    fn try_from(row: DecisionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            recommendation: row.recommendation,
            pareto_size: row.pareto_size.max(0) as usize,
            paths_evaluated: row.paths_evaluated.max(0) as usize,
            analysis: serde_json::from_str(&row.analysis)?,
            created_at: parse_time(&row.created_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct AlertRow {
    id: String,
    factor_ids: String,
    message: String,
    score: f64,
    threshold: f64,
    state: String,
    created_at: String,
    acknowledged_at: Option<String>,
    resolved_at: Option<String>,
}

impl TryFrom<AlertRow> for RiskAlert {
    type Error = StorageError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        let state = row
            .state
            .parse::<AlertState>()
            .map_err(|message| StorageError::Query { message })?;
        Ok(Self {
            id: row.id,
            factor_ids: serde_json::from_str(&row.factor_ids)?,
            message: row.message,
            score: row.score,
            threshold: row.threshold,
            state,
            created_at: parse_time(&row.created_at),
            acknowledged_at: row.acknowledged_at.as_deref().map(parse_time),
            resolved_at: row.resolved_at.as_deref().map(parse_time),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::{ChainState, ReasoningChain, StepKind, TerminationReason};
    use crate::risk::{RiskCategory, RiskFactor};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_reasoning_trace_round_trip() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let mut chain = ReasoningChain::new("Is the supplier late?", json!({"region": "eu"}));
        chain.add_hypothesis("supplier is late", 0.6);
        chain.push_step(StepKind::Hypothesize, json!({}), json!({}), vec!["h1".into()], None);
        chain.finish(ChainState::Failed, TerminationReason::LookupsExhausted);

        let trace = ReasoningTrace::from_chain(&chain).unwrap();
        storage.save_reasoning_trace(&trace).await.unwrap();

        let loaded = storage.get_reasoning_trace(&chain.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, "failed");
        assert_eq!(loaded.termination.as_deref(), Some("lookups_exhausted"));
        assert_eq!(loaded.step_count, 1);
        let restored = loaded.chain().unwrap();
        assert_eq!(restored.hypotheses(), chain.hypotheses());
        assert_eq!(restored.steps(), chain.steps());

        assert!(storage.get_reasoning_trace("missing").await.unwrap().is_none());
        assert_eq!(storage.list_reasoning_traces(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_alert_upsert_tracks_state() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let factor = RiskFactor::new("breach", RiskCategory::Security, 0.9, 0.9).with_id("f1");
        let mut alert = RiskAlert::for_factor(&factor, 0.7);
        storage.save_alert(&alert).await.unwrap();

        alert.acknowledge();
        storage.save_alert(&alert).await.unwrap();
        let loaded = storage.get_alert(&alert.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, AlertState::Acknowledged);
        assert_eq!(loaded.factor_ids, vec!["f1".to_string()]);
        assert!(loaded.acknowledged_at.is_some());

        alert.resolve();
        storage.save_alert(&alert).await.unwrap();
        assert!(storage.list_alerts(Some(AlertState::Open)).await.unwrap().is_empty());
        assert_eq!(storage.list_alerts(Some(AlertState::Resolved)).await.unwrap().len(), 1);
        assert_eq!(storage.list_alerts(None).await.unwrap().len(), 1);
    }
}
