use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::SharedState;
use crate::decision::{Criterion, DecisionOption, DecisionPath};
use crate::error::{AppResult, ProtocolError};
use crate::performance::{ExecutionMode, InstanceHealth, LoadBalancingStrategy, ServiceInstance, Task};
use crate::reasoning::{ReasoningChain, ReasoningRequest};
use crate::risk::{AlertState, RiskAlert};
use crate::storage::{DecisionRecord, ReasoningTrace, ToolChainTrace};
use crate::tools::{ToolChain, ToolChainStep};

/// Methods accepted by [`handle_method`].
pub const METHODS: &[&str] = &[
    "reasoning/execute",
    "reasoning/batch",
    "tools/list",
    "tools/chain",
    "decisions/analyze",
    "decisions/simulate",
    "risk/assess",
    "risk/alerts",
    "risk/acknowledge",
    "risk/resolve",
    "services/register",
    "services/heartbeat",
    "services/deregister",
    "services/select",
    "system/health",
];

/// Route a request to its handler.
pub async fn handle_method(state: &SharedState, method: &str, params: Option<Value>) -> AppResult<Value> {
    info!(method = %method, "Routing request");
    let start = Instant::now();

    let result = match method {
        "reasoning/execute" => handle_reasoning_execute(state, params).await,
        "reasoning/batch" => handle_reasoning_batch(state, params).await,
        "tools/list" => handle_tools_list(state),
        "tools/chain" => handle_tool_chain(state, params).await,
        "decisions/analyze" => handle_decisions_analyze(state, params).await,
        "decisions/simulate" => handle_decisions_simulate(state, params).await,
        "risk/assess" => handle_risk_assess(state, params).await,
        "risk/alerts" => handle_risk_alerts(state, params),
        "risk/acknowledge" => handle_alert_transition(state, method, params, AlertState::Acknowledged).await,
        "risk/resolve" => handle_alert_transition(state, method, params, AlertState::Resolved).await,
        "services/register" => handle_services_register(state, params),
        "services/heartbeat" => handle_services_heartbeat(state, params),
        "services/deregister" => handle_services_deregister(state, params),
        "services/select" => handle_services_select(state, params),
        "system/health" => Ok(serde_json::to_value(state.system_health()).map_err(ProtocolError::Json)?),
        _ => {
            return Err(ProtocolError::UnknownMethod {
                method: method.to_string(),
            }
            .into())
        }
    };

    state.monitor.record(method, start.elapsed());
    result
}

fn parse_params<T: serde::de::DeserializeOwned>(method: &str, params: Option<Value>) -> AppResult<T> {
    match params {
        Some(value) => serde_json::from_value(value).map_err(|e| {
            ProtocolError::InvalidParams {
                method: method.to_string(),
                message: e.to_string(),
            }
            .into()
        }),
        None => Err(ProtocolError::InvalidParams {
            method: method.to_string(),
            message: "Missing params".to_string(),
        }
        .into()),
    }
}

fn to_value<T: Serialize>(value: &T) -> AppResult<Value> {
    Ok(serde_json::to_value(value).map_err(ProtocolError::Json)?)
}

// ============================================================================
// Reasoning
// ============================================================================

/// Response shape for `reasoning/execute`.
#[derive(Debug, Serialize)]
pub struct ReasoningSummary {
    pub chain_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination: Option<String>,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leading_hypothesis: Option<String>,
    pub steps: Value,
}

impl ReasoningSummary {
    fn from_chain(chain: &ReasoningChain) -> AppResult<Self> {
        Ok(Self {
            chain_id: chain.id.clone(),
            status: chain.state.as_str().to_string(),
            termination: chain.termination.map(|t| t.as_str().to_string()),
            confidence: chain.confidence(),
            leading_hypothesis: chain.leading_hypothesis().map(|h| h.statement().to_string()),
            steps: to_value(&chain.steps())?,
        })
    }
}

async fn persist_chain(state: &SharedState, chain: &ReasoningChain) {
    let Some(storage) = &state.storage else {
        return;
    };
    let saved = match ReasoningTrace::from_chain(chain) {
        Ok(trace) => storage.save_reasoning_trace(&trace).await,
        Err(e) => Err(e),
    };
    if let Err(e) = saved {
        warn!(chain_id = %chain.id, error = %e, "Failed to persist reasoning trace");
    }
}

async fn handle_reasoning_execute(state: &SharedState, params: Option<Value>) -> AppResult<Value> {
    let request: ReasoningRequest = parse_params("reasoning/execute", params)?;
    let chain = state.reasoning.execute_chain(request).await?;
    persist_chain(state, &chain).await;
    to_value(&ReasoningSummary::from_chain(&chain)?)
}

#[derive(Debug, Deserialize)]
struct BatchParams {
    requests: Vec<ReasoningRequest>,
    #[serde(default)]
    mode: ExecutionMode,
}

async fn handle_reasoning_batch(state: &SharedState, params: Option<Value>) -> AppResult<Value> {
    let params: BatchParams = parse_params("reasoning/batch", params)?;

    let tasks = params
        .requests
        .into_iter()
        .enumerate()
        .map(|(index, request)| {
            let state = Arc::clone(state);
            Task::new(format!("request-{}", index), async move {
                let chain = state.reasoning.execute_chain(request).await?;
                persist_chain(&state, &chain).await;
                ReasoningSummary::from_chain(&chain)
            })
        })
        .collect();

    let batch = state.executor.execute_async(tasks, params.mode).await;
    to_value(&batch)
}

// ============================================================================
// Tools
// ============================================================================

fn handle_tools_list(state: &SharedState) -> AppResult<Value> {
    Ok(json!({ "tools": to_value(&state.tools.registry().schemas())? }))
}

#[derive(Debug, Deserialize)]
struct ChainParams {
    steps: Vec<ToolChainStep>,
    #[serde(default)]
    input: Map<String, Value>,
}

async fn handle_tool_chain(state: &SharedState, params: Option<Value>) -> AppResult<Value> {
    let params: ChainParams = parse_params("tools/chain", params)?;
    let chain = params.steps.into_iter().fold(ToolChain::new(), ToolChain::step);
    let result = state.tools.execute_chain(&chain, params.input).await?;

    if let Some(storage) = &state.storage {
        let saved = match ToolChainTrace::from_result(&result) {
            Ok(trace) => storage.save_tool_chain_trace(&trace).await,
            Err(e) => Err(e),
        };
        if let Err(e) = saved {
            warn!(chain_id = %result.chain_id, error = %e, "Failed to persist tool chain trace");
        }
    }
    to_value(&result)
}

// ============================================================================
// Decisions
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct AnalyzeParams {
    options: Vec<DecisionOption>,
    criteria: Vec<Criterion>,
}

async fn handle_decisions_analyze(state: &SharedState, params: Option<Value>) -> AppResult<Value> {
    let params: AnalyzeParams = parse_params("decisions/analyze", params)?;

    // Analysis is deterministic in its inputs.
    let cache_key = format!("decisions/analyze:{}", serde_json::to_string(&params).map_err(ProtocolError::Json)?);
    if let Some(cached) = state.cache.get(&cache_key) {
        return Ok(cached);
    }

    let analysis = state.decisions.analyze(&params.options, &params.criteria)?;

    if let Some(storage) = &state.storage {
        let saved = match DecisionRecord::from_analysis(&analysis) {
            Ok(record) => storage.save_decision(&record).await,
            Err(e) => Err(e),
        };
        if let Err(e) = saved {
            warn!(analysis_id = %analysis.id, error = %e, "Failed to persist decision");
        }
    }

    let response = json!({
        "analysis_id": analysis.id,
        "paths_evaluated": analysis.paths_evaluated,
        "pareto_set": to_value(&analysis.pareto_set)?,
        "recommendation": to_value(&analysis.recommendation)?,
        "sensitivity": to_value(&analysis.sensitivity)?,
    });
    state.cache.put(cache_key, response.clone());
    Ok(response)
}

#[derive(Debug, Deserialize)]
struct SimulateParams {
    path: DecisionPath,
    criteria: Vec<Criterion>,
    #[serde(default = "default_iterations")]
    iterations: usize,
    #[serde(default)]
    seed: u64,
}

fn default_iterations() -> usize {
    1000
}

async fn handle_decisions_simulate(state: &SharedState, params: Option<Value>) -> AppResult<Value> {
    let params: SimulateParams = parse_params("decisions/simulate", params)?;
    let result = state
        .decisions
        .predict(&params.path, &params.criteria, params.iterations, params.seed)
        .await?;
    to_value(&result)
}

// ============================================================================
// Risk
// ============================================================================

#[derive(Debug, Deserialize)]
struct AssessParams {
    context: Value,
    #[serde(default = "default_method")]
    method: String,
}

fn default_method() -> String {
    "simple".to_string()
}

async fn persist_alert(state: &SharedState, alert: &RiskAlert) {
    if let Some(storage) = &state.storage {
        if let Err(e) = storage.save_alert(alert).await {
            warn!(alert_id = %alert.id, error = %e, "Failed to persist risk alert");
        }
    }
}

async fn handle_risk_assess(state: &SharedState, params: Option<Value>) -> AppResult<Value> {
    let params: AssessParams = parse_params("risk/assess", params)?;
    let assessment = state.risk.assess(&params.context, &params.method)?;
    for alert in &assessment.alerts {
        persist_alert(state, alert).await;
    }
    to_value(&assessment)
}

#[derive(Debug, Default, Deserialize)]
struct AlertsParams {
    #[serde(default)]
    state: Option<AlertState>,
}

fn handle_risk_alerts(state: &SharedState, params: Option<Value>) -> AppResult<Value> {
    let params: AlertsParams = match params {
        Some(value) => parse_params("risk/alerts", Some(value))?,
        None => AlertsParams::default(),
    };
    let alerts: Vec<RiskAlert> = state
        .risk_monitor()
        .alerts()
        .into_iter()
        .filter(|a| params.state.map_or(true, |s| a.state == s))
        .collect();
    Ok(json!({ "alerts": to_value(&alerts)? }))
}

#[derive(Debug, Deserialize)]
struct AlertParams {
    alert_id: String,
}

async fn handle_alert_transition(
    state: &SharedState,
    method: &str,
    params: Option<Value>,
    target: AlertState,
) -> AppResult<Value> {
    let params: AlertParams = parse_params(method, params)?;
    let monitor = state.risk_monitor();
    let alert = match target {
        AlertState::Resolved => monitor.resolve(&params.alert_id)?,
        _ => monitor.acknowledge(&params.alert_id)?,
    };
    persist_alert(state, &alert).await;
    to_value(&alert)
}

// ============================================================================
// Services
// ============================================================================

#[derive(Debug, Deserialize)]
struct RegisterParams {
    id: String,
    address: String,
    #[serde(default)]
    weight: Option<u32>,
    #[serde(default)]
    health: Option<InstanceHealth>,
}

fn handle_services_register(state: &SharedState, params: Option<Value>) -> AppResult<Value> {
    let params: RegisterParams = parse_params("services/register", params)?;
    let mut instance = ServiceInstance::new(params.id, params.address);
    if let Some(weight) = params.weight {
        instance = instance.with_weight(weight);
    }
    if let Some(health) = params.health {
        instance = instance.with_health(health);
    }
    state.services.register(instance.clone())?;
    to_value(&instance)
}

#[derive(Debug, Deserialize)]
struct InstanceParams {
    id: String,
}

fn handle_services_heartbeat(state: &SharedState, params: Option<Value>) -> AppResult<Value> {
    let params: InstanceParams = parse_params("services/heartbeat", params)?;
    state.services.heartbeat(&params.id)?;
    Ok(json!({ "id": params.id, "ok": true }))
}

fn handle_services_deregister(state: &SharedState, params: Option<Value>) -> AppResult<Value> {
    let params: InstanceParams = parse_params("services/deregister", params)?;
    let removed = state.services.deregister(&params.id)?;
    to_value(&removed)
}

#[derive(Debug, Default, Deserialize)]
struct SelectParams {
    #[serde(default)]
    strategy: Option<String>,
}

fn handle_services_select(state: &SharedState, params: Option<Value>) -> AppResult<Value> {
    let params: SelectParams = match params {
        Some(value) => parse_params("services/select", Some(value))?,
        None => SelectParams::default(),
    };
    let strategy: LoadBalancingStrategy = match params.strategy {
        Some(name) => name.parse()?,
        None => LoadBalancingStrategy::default(),
    };
    let instance = state.balancer.select_instance(strategy)?;
    to_value(&instance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::AppError;
    use crate::server::AppState;
    use crate::storage::{SqliteStorage, Storage};

    fn state() -> SharedState {
        Arc::new(AppState::new(Config::default(), None).unwrap())
    }

    fn analyze_params() -> Value {
        json!({
            "options": [
                {"id": "expand", "scores": {"revenue": 0.9, "cost": 0.5}},
                {"id": "hold", "scores": {"revenue": 0.4, "cost": 0.1}},
                {"id": "shrink", "scores": {"revenue": 0.3, "cost": 0.2}}
            ],
            "criteria": [
                {"name": "revenue", "weight": 0.6},
                {"name": "cost", "weight": 0.4, "direction": "minimize"}
            ]
        })
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let err = handle_method(&state(), "nope/nothing", None).await.unwrap_err();
        assert!(matches!(err, AppError::Protocol(ProtocolError::UnknownMethod { .. })));
    }

    #[tokio::test]
    async fn test_missing_params() {
        let err = handle_method(&state(), "risk/assess", None).await.unwrap_err();
        assert!(matches!(err, AppError::Protocol(ProtocolError::InvalidParams { .. })));
    }

    #[tokio::test]
    async fn test_decisions_analyze_is_cached() {
        let state = state();
        let first = handle_method(&state, "decisions/analyze", Some(analyze_params())).await.unwrap();
        let second = handle_method(&state, "decisions/analyze", Some(analyze_params())).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first["recommendation"]["id"], "expand");
        assert_eq!(state.cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_risk_assess_and_resolve_persists_alerts() {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
        let state = Arc::new(AppState::new(Config::default(), Some(Arc::clone(&storage))).unwrap());
        let params = json!({
            "context": {"factors": [
                {"id": "f1", "name": "breach", "category": "security", "probability": 0.9, "impact": 0.9}
            ]}
        });
        let assessed = handle_method(&state, "risk/assess", Some(params)).await.unwrap();
        let alert_id = assessed["alerts"][0]["id"].as_str().unwrap().to_string();

        handle_method(&state, "risk/resolve", Some(json!({"alert_id": alert_id})))
            .await
            .unwrap();
        let stored = storage.get_alert(&alert_id).await.unwrap().unwrap();
        assert_eq!(stored.state, AlertState::Resolved);

        let open = handle_method(&state, "risk/alerts", Some(json!({"state": "open"})))
            .await
            .unwrap();
        assert_eq!(open["alerts"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_system_health_reports_components() {
        let health = handle_method(&state(), "system/health", None).await.unwrap();
        assert_eq!(health["components"].as_array().unwrap().len(), 4);
    }
}
