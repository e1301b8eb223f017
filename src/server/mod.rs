//! Process context and request handling.
//!
//! This module provides:
//! - [`AppState`], the explicit context every handler receives
//! - Method routing for the request contract
//! - A JSON-RPC 2.0 server over stdio

mod handlers;
mod rpc;

pub use handlers::*;
pub use rpc::*;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::decision::DecisionAnalyzer;
use crate::error::AppResult;
use crate::graph::{GraphReasoner, HttpGraphStore};
use crate::performance::{
    CircuitBreakerConfig, ComponentHealth, ConcurrentExecutor, HealthChecker, HealthStatus,
    HttpHealthCheck, InMemoryCache, LoadBalancer, PerformanceMonitor, ServiceRegistry, SystemHealth,
};
use crate::reasoning::ReasoningEngine;
use crate::risk::{RiskEngine, RiskMonitor};
use crate::storage::Storage;
use crate::tools::{GraphQuestionTool, LlmTool, ToolExecutor, ToolRegistry};

/// Latency samples kept per operation.
const MONITOR_WINDOW: usize = 1024;

/// Application state shared across handlers.
///
/// Built once at startup; the tool registry is immutable afterwards.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Tool executor over the startup registry.
    pub tools: Arc<ToolExecutor>,
    /// Reasoning engine.
    pub reasoning: ReasoningEngine,
    /// Decision analyzer.
    pub decisions: DecisionAnalyzer,
    /// Risk engine; its monitor holds alert state.
    pub risk: RiskEngine,
    /// Persistence backend, if configured.
    pub storage: Option<Arc<dyn Storage>>,
    /// Latency monitor fed by tools and handlers.
    pub monitor: Arc<PerformanceMonitor>,
    /// Response cache for deterministic requests.
    pub cache: Arc<InMemoryCache<String, Value>>,
    /// Batch executor.
    pub executor: ConcurrentExecutor,
    /// Registered downstream service instances.
    pub services: Arc<ServiceRegistry>,
    /// Instance selection over `services`.
    pub balancer: LoadBalancer,
    shutdown_tx: watch::Sender<bool>,
    health_task: Mutex<Option<JoinHandle<()>>>,
    sweeper_task: Mutex<Option<JoinHandle<()>>>,
}

impl AppState {
    /// Build state from configuration.
    ///
    /// The LLM tool is registered when an LLM endpoint is configured, and the
    /// graph question tool when a graph store is.
    pub fn new(config: Config, storage: Option<Arc<dyn Storage>>) -> AppResult<Self> {
        let mut registry = ToolRegistry::new();

        let graph = match &config.graph {
            Some(graph_config) => {
                let store = HttpGraphStore::new(graph_config, config.request.timeout_ms)?;
                info!(commit_url = %store.commit_url(), "Graph store configured");
                let reasoner = Arc::new(GraphReasoner::new(
                    Arc::new(store),
                    Duration::from_millis(config.request.timeout_ms),
                ));
                registry.register(Arc::new(GraphQuestionTool::new(Arc::clone(&reasoner))))?;
                Some(reasoner)
            }
            None => None,
        };

        if let Some(llm_config) = &config.llm {
            let tool = LlmTool::from_config(llm_config, &config.request)?;
            info!(base_url = %llm_config.base_url, model = %llm_config.model, "LLM tool configured");
            registry.register(Arc::new(tool))?;
        }

        Ok(Self::with_registry(config, registry, graph, storage))
    }

    /// Build state around an already populated tool registry.
    pub fn with_registry(
        config: Config,
        registry: ToolRegistry,
        graph: Option<Arc<GraphReasoner>>,
        storage: Option<Arc<dyn Storage>>,
    ) -> Self {
        let monitor = Arc::new(PerformanceMonitor::new(MONITOR_WINDOW));
        let tools = Arc::new(
            ToolExecutor::new(Arc::new(registry), &config.request)
                .with_circuit_breaker(CircuitBreakerConfig::default())
                .with_monitor(Arc::clone(&monitor)),
        );

        let mut reasoning = ReasoningEngine::new(config.reasoning.clone()).with_tools(Arc::clone(&tools));
        if let Some(graph) = graph {
            reasoning = reasoning.with_graph(graph);
        }

        let mut cache = InMemoryCache::new(config.cache.capacity, config.cache.policy);
        if let Some(ttl_ms) = config.cache.ttl_ms {
            cache = cache.with_default_ttl(Duration::from_millis(ttl_ms));
        }

        let risk = RiskEngine::new(&config.risk, Arc::new(RiskMonitor::new()));
        let services = Arc::new(ServiceRegistry::new(&config.discovery));
        let balancer = LoadBalancer::new(Arc::clone(&services), rand::random());
        let (shutdown_tx, _) = watch::channel(false);

        info!(
            tools = tools.registry().count(),
            persistence = storage.is_some(),
            cache_policy = %config.cache.policy,
            "AppState initialized"
        );

        Self {
            decisions: DecisionAnalyzer::new(config.decision.clone()),
            executor: ConcurrentExecutor::new(&config.executor),
            services,
            balancer,
            cache: Arc::new(cache),
            reasoning,
            risk,
            tools,
            monitor,
            storage,
            config,
            shutdown_tx,
            health_task: Mutex::new(None),
            sweeper_task: Mutex::new(None),
        }
    }

    /// Risk alert monitor.
    pub fn risk_monitor(&self) -> &Arc<RiskMonitor> {
        self.risk.monitor()
    }

    /// Spawn the cache sweeper and the service health checker.
    ///
    /// Calling this twice has no effect.
    pub fn start_background(&self) -> AppResult<()> {
        let mut sweeper = self.sweeper_task.lock();
        if sweeper.is_none() {
            let interval = Duration::from_millis(self.config.cache.sweep_interval_ms.max(1));
            *sweeper = Some(self.cache.spawn_sweeper(interval));
        }

        let mut health = self.health_task.lock();
        if health.is_none() {
            let check = HttpHealthCheck::new("/health", Duration::from_millis(self.config.request.timeout_ms))
                .map_err(|e| crate::error::AppError::Internal {
                    message: format!("Failed to build health check: {}", e),
                })?;
            let checker = HealthChecker::new(Arc::clone(&self.services), Arc::new(check), &self.config.discovery);
            *health = Some(checker.spawn(self.shutdown_tx.subscribe()));
        }
        Ok(())
    }

    /// Stop background tasks and wait for the health checker to exit.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.sweeper_task.lock().take() {
            handle.abort();
        }
        let health = self.health_task.lock().take();
        if let Some(handle) = health {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Health checker ended abnormally");
                }
            }
        }
        info!("Background tasks stopped");
    }

    /// Aggregate health of tools, storage, cache, services and risk alerts.
    pub fn system_health(&self) -> SystemHealth {
        let open_circuits = self.tools.open_circuits();
        let mut components = vec![if open_circuits.is_empty() {
            ComponentHealth::new(
                "tools",
                HealthStatus::Healthy,
                Some(format!("{} registered", self.tools.registry().count())),
            )
        } else {
            ComponentHealth::new(
                "tools",
                HealthStatus::Degraded,
                Some(format!("circuit open: {}", open_circuits.join(", "))),
            )
        }];

        components.push(match &self.storage {
            Some(_) => ComponentHealth::healthy("storage"),
            None => ComponentHealth::new("storage", HealthStatus::Healthy, Some("persistence disabled".to_string())),
        });

        components.push(ComponentHealth::new(
            "cache",
            HealthStatus::Healthy,
            Some(format!("hit rate {:.2}", self.cache.hit_rate())),
        ));

        let registered = self.services.len();
        let eligible = self.services.eligible().len();
        components.push(if registered == 0 || eligible > 0 {
            ComponentHealth::new(
                "services",
                HealthStatus::Healthy,
                Some(format!("{} of {} selectable", eligible, registered)),
            )
        } else {
            ComponentHealth::new(
                "services",
                HealthStatus::Degraded,
                Some(format!("none of {} instances selectable", registered)),
            )
        });

        let open = self.risk_monitor().open_alerts().len();
        components.push(if open == 0 {
            ComponentHealth::healthy("risk")
        } else {
            ComponentHealth::new("risk", HealthStatus::Degraded, Some(format!("{} open alerts", open)))
        });

        self.monitor.system_health(components)
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::storage::SqliteStorage;

    #[tokio::test]
    async fn test_state_without_integrations_has_no_tools() {
        let state = AppState::new(Config::default(), None).unwrap();
        assert_eq!(state.tools.registry().count(), 0);
        assert!(state.storage.is_none());
        assert_eq!(state.system_health().status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_graph_config_registers_question_tool() {
        let mut config = Config::default();
        config.graph = Some(GraphConfig {
            url: "http://localhost:7474".to_string(),
            database: "neo4j".to_string(),
            user: None,
            password: None,
        });
        let state = AppState::new(config, None).unwrap();
        assert_eq!(state.tools.registry().count(), 1);
    }

    #[tokio::test]
    async fn test_state_with_storage() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let state = AppState::new(Config::default(), Some(Arc::new(storage))).unwrap();
        assert!(state.storage.is_some());
    }

    #[tokio::test]
    async fn test_background_tasks_stop_on_shutdown() {
        let state = AppState::new(Config::default(), None).unwrap();
        state.start_background().unwrap();
        state.start_background().unwrap();
        tokio::time::timeout(Duration::from_secs(5), state.shutdown())
            .await
            .unwrap();
        assert!(state.health_task.lock().is_none());
    }
}
