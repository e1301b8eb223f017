//! # Agentic Reasoning Core
//!
//! Reasoning, decision and risk engine for an autonomous agent, built on a
//! shared performance substrate.
//!
//! ## Features
//!
//! - **Tool Framework**: typed tool schemas, selection, validated execution and chains
//! - **Reasoning Engine**: hypothesis-driven chains with checkpoints and backtracking
//! - **Graph Reasoning**: entity relations, bounded paths and question answering
//! - **Decision Analysis**: decision trees, Pareto frontiers, Monte Carlo and sensitivity
//! - **Risk Assessment**: identification, four scoring methods, mitigations and alerts
//! - **Performance**: caching, concurrent batches, service discovery and health
//!
//! ## Architecture
//!
//! ```text
//! JSON-RPC (stdio) → handlers → reasoning / decision / risk
//!                                  ↓            ↓
//!                             tools, graph   performance
//!                                  ↓
//!                            SQLite (traces)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use agentic_reasoning_core::{AppState, Config, RpcServer};
//! use agentic_reasoning_core::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let state = Arc::new(AppState::new(config, Some(Arc::new(storage)))?);
//!     RpcServer::new(state).run().await?;
//!     Ok(())
//! }
//! ```

/// Configuration loaded from the environment.
pub mod config;
/// Decision trees, multi-objective optimization and outcome prediction.
pub mod decision;
/// Error types and result aliases for the application.
pub mod error;
/// Graph store adapter and graph reasoning.
pub mod graph;
/// LLM completion client.
pub mod llm;
/// Cache, concurrent executor, service discovery and monitoring.
pub mod performance;
/// Hypothesis-driven reasoning chains.
pub mod reasoning;
/// Risk identification, scoring, mitigation and alerting.
pub mod risk;
/// Request routing and the JSON-RPC server.
pub mod server;
/// SQLite storage layer for persistence.
pub mod storage;
/// Tool schemas, registry, execution and chaining.
pub mod tools;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use server::{AppState, RpcServer, SharedState};
