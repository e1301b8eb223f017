//! End-to-end properties across components.
//!
//! These tests exercise the public API only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Map, Value};

use agentic_reasoning_core::config::{
    DiscoveryConfig, ExecutorConfig, ReasoningConfig, RequestConfig, RiskConfig,
};
use agentic_reasoning_core::decision::{
    Criterion, DecisionAnalyzer, DecisionOption, MultiObjectiveOptimizer,
};
use agentic_reasoning_core::error::ToolError;
use agentic_reasoning_core::performance::{
    ConcurrentExecutor, EvictionPolicy, ExecutionMode, InMemoryCache, InstanceHealth,
    LoadBalancer, LoadBalancingStrategy, ServiceInstance, ServiceRegistry, Task,
};
use agentic_reasoning_core::reasoning::{
    calculate_overall_confidence, hypothesis_confidence, ChainState, Evidence, EvidenceLookup,
    EvidenceStance, HypothesisSeed, ReasoningChain, ReasoningEngine, ReasoningRequest,
    TerminationReason,
};
use agentic_reasoning_core::risk::{
    AlertState, RiskCalculator, RiskCategory, RiskEngine, RiskFactor, RiskMonitor,
};
use agentic_reasoning_core::tools::{
    Capability, FnTool, OutcomeStatus, OutputSpec, ParamSpec, ToolChain, ToolChainStep,
    ToolExecutor, ToolRegistry, ToolSchema, ValueType,
};

fn request_config() -> RequestConfig {
    RequestConfig {
        timeout_ms: 1000,
        max_retries: 0,
        retry_delay_ms: 1,
    }
}

fn price_registry() -> ToolRegistry {
    let prices: HashMap<&'static str, f64> = [("A-1", 19.99), ("B-2", 5.25)].into_iter().collect();
    let mut registry = ToolRegistry::new();
    registry
        .register(Arc::new(FnTool::from_fn(
            ToolSchema::new("lookup_price", "Current unit price for a SKU")
                .with_param(ParamSpec::required("sku", ValueType::String))
                .with_capability(Capability::ReadOnly)
                .with_output(OutputSpec::of(ValueType::Number).with_range(None, 0.0, 10_000.0)),
            move |args| {
                let sku = args.get("sku").and_then(Value::as_str).unwrap_or_default();
                prices
                    .get(sku)
                    .map(|p| json!(p))
                    .ok_or_else(|| ToolError::Execution {
                        message: format!("unknown sku {}", sku),
                    })
            },
        )))
        .unwrap();
    registry
}

// ============================================================================
// Tools
// ============================================================================

#[tokio::test]
async fn test_lookup_price_single_step_chain_returns_exact_float() {
    let executor = ToolExecutor::new(Arc::new(price_registry()), &request_config());
    let chain = ToolChain::new().step(
        ToolChainStep::new("price", "lookup_price")
            .map_input("sku", "input.sku")
            .output("price"),
    );
    let mut inputs = Map::new();
    inputs.insert("sku".to_string(), json!("A-1"));

    let result = executor.execute_chain(&chain, inputs).await.unwrap();
    assert_eq!(result.status, OutcomeStatus::Success);
    assert_eq!(result.steps_succeeded(), 1);
    assert_eq!(result.output.unwrap().as_f64(), Some(19.99));
}

// ============================================================================
// Reasoning
// ============================================================================

#[tokio::test]
async fn test_reasoning_terminates_under_finite_budget() {
    let mut registry = price_registry();
    registry
        .register(Arc::new(FnTool::from_fn(
            ToolSchema::new("silence", "").with_capability(Capability::ReadOnly),
            |_| Ok(Value::Null),
        )))
        .unwrap();
    let tools = Arc::new(ToolExecutor::new(Arc::new(registry), &request_config()));
    let engine = ReasoningEngine::new(ReasoningConfig {
        confidence_target: 0.9,
        confidence_floor: 0.2,
        step_budget: 5,
        step_timeout_ms: 500,
    })
    .with_tools(tools);

    let mut request = ReasoningRequest::new("Is the price of A-1 rising?")
        .with_hypothesis(HypothesisSeed::new("price of A-1 is rising").with_prior(0.5));
    for _ in 0..50 {
        request = request.with_lookup(EvidenceLookup::Tool {
            tool: "silence".to_string(),
            args: Map::new(),
        });
    }

    let chain = engine.execute_chain(request).await.unwrap();
    assert!(chain.state.is_terminal());
    assert_eq!(chain.state, ChainState::Failed);
    assert_eq!(chain.termination, Some(TerminationReason::StepBudgetExhausted));
    // One hypothesize step plus the evidence budget.
    assert_eq!(chain.steps().len(), 6);
}

#[test]
fn test_confidence_is_pure_and_monotone_in_evidence() {
    let support = |w: f64| Evidence::new("observed", EvidenceStance::Supporting, w, "test");
    let against = |w: f64| Evidence::new("refuted", EvidenceStance::Contradicting, w, "test");

    let once = hypothesis_confidence(0.4, &[support(0.5)], &[]);
    assert_eq!(once, hypothesis_confidence(0.4, &[support(0.5)], &[]));

    let more = hypothesis_confidence(0.4, &[support(0.5), support(0.5)], &[]);
    assert!(more > once);
    let less = hypothesis_confidence(0.4, &[support(0.5)], &[against(0.5)]);
    assert!(less < once);

    let mut chain = ReasoningChain::new("q", json!({}));
    let id = chain.add_hypothesis("h", 0.4);
    chain.add_evidence(&id, support(0.5));
    assert_eq!(chain.confidence(), calculate_overall_confidence(chain.hypotheses()));
    assert_eq!(chain.confidence(), calculate_overall_confidence(chain.hypotheses()));
}

// ============================================================================
// Decisions
// ============================================================================

#[test]
fn test_pareto_frontier_is_non_dominated_over_random_sets() {
    let criteria = vec![
        Criterion::new("quality", 0.5),
        Criterion::new("cost", 0.3).minimize(),
        Criterion::new("speed", 0.2),
    ];
    let mut rng = StdRng::seed_from_u64(7);

    for round in 0..20 {
        let options: Vec<DecisionOption> = (0..12)
            .map(|i| {
                DecisionOption::new(format!("o{}-{}", round, i))
                    .score("quality", rng.gen_range(0.0..1.0))
                    .score("cost", rng.gen_range(0.0..1.0))
                    .score("speed", rng.gen_range(0.0..1.0))
            })
            .collect();

        let analysis = DecisionAnalyzer::default().analyze(&options, &criteria).unwrap();
        let optimizer = MultiObjectiveOptimizer::new(&criteria);
        let frontier = &analysis.pareto_set;
        assert!(!frontier.is_empty());
        assert_eq!(analysis.paths_evaluated, options.len());

        for member in frontier {
            assert!(frontier.iter().all(|other| !optimizer.dominates(other, member)));
        }
        let recommendation = analysis.recommendation.as_ref().unwrap();
        assert!(frontier.iter().any(|p| p.id == recommendation.id));
    }
}

// ============================================================================
// Risk
// ============================================================================

#[test]
fn test_simple_risk_equals_probability_times_impact() {
    let calculator = RiskCalculator::default();
    for (p, i) in [(0.0, 0.5), (0.3, 0.7), (0.5, 0.5), (0.9, 0.1), (1.0, 1.0)] {
        let factor = RiskFactor::new("f", RiskCategory::Financial, p, i);
        let score = calculator.score(&factor, "simple").unwrap();
        assert!((score.score - p * i).abs() < 1e-12, "p={} i={}", p, i);
    }
}

#[test]
fn test_risk_alert_lifecycle_with_idempotent_resolve() {
    let monitor = Arc::new(RiskMonitor::new());
    let engine = RiskEngine::new(&RiskConfig::default(), Arc::clone(&monitor));
    let context = json!({
        "factors": [
            {"id": "vendor-lock", "name": "vendor lock-in", "category": "technical", "probability": 0.95, "impact": 0.9}
        ]
    });

    let assessment = engine.assess(&context, "simple").unwrap();
    assert_eq!(assessment.alerts.len(), 1);
    let id = assessment.alerts[0].id.clone();
    assert_eq!(monitor.get(&id).unwrap().state, AlertState::Open);

    assert_eq!(monitor.acknowledge(&id).unwrap().state, AlertState::Acknowledged);
    let resolved = monitor.resolve(&id).unwrap();
    assert_eq!(resolved.state, AlertState::Resolved);
    let again = monitor.resolve(&id).unwrap();
    assert_eq!(again.resolved_at, resolved.resolved_at);

    let states: Vec<AlertState> = monitor.history().into_iter().map(|e| e.state).collect();
    assert_eq!(states, vec![AlertState::Open, AlertState::Acknowledged, AlertState::Resolved]);
}

// ============================================================================
// Performance
// ============================================================================

#[test]
fn test_lru_hit_rate_converges_on_small_working_set() {
    let cache: InMemoryCache<u32, u32> = InMemoryCache::new(10, EvictionPolicy::Lru);
    for i in 0..1000u32 {
        let key = i % 5;
        if cache.get(&key).is_none() {
            cache.put(key, key * 2);
        }
    }
    assert_eq!(cache.stats().misses, 5);
    assert!(cache.hit_rate() > 0.99);
}

#[tokio::test]
async fn test_parallel_batch_is_faster_than_sequential() {
    let executor = ConcurrentExecutor::new(&ExecutorConfig {
        max_parallelism: 8,
        task_timeout_ms: 5000,
    });
    let tasks = || {
        (0..4)
            .map(|i| {
                Task::new(format!("sleep-{}", i), async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(i)
                })
            })
            .collect::<Vec<_>>()
    };

    let sequential = executor.execute_async(tasks(), ExecutionMode::Sequential).await;
    let parallel = executor.execute_async(tasks(), ExecutionMode::Parallel).await;

    assert_eq!(sequential.completed(), 4);
    assert_eq!(parallel.completed(), 4);
    assert!(sequential.elapsed_ms >= 400);
    assert!(parallel.elapsed_ms < sequential.elapsed_ms);
    let ids: Vec<&str> = parallel.outcomes.iter().map(|o| o.task_id.as_str()).collect();
    assert_eq!(ids, vec!["sleep-0", "sleep-1", "sleep-2", "sleep-3"]);
}

#[test]
fn test_round_robin_is_fair_across_three_instances() {
    let registry = Arc::new(ServiceRegistry::new(&DiscoveryConfig::default()));
    for id in ["a", "b", "c"] {
        registry
            .register(ServiceInstance::new(id, format!("http://{}.local", id)).with_health(InstanceHealth::Healthy))
            .unwrap();
    }
    let balancer = LoadBalancer::new(Arc::clone(&registry), 1);

    let mut counts: HashMap<String, usize> = HashMap::new();
    for _ in 0..9 {
        let chosen = balancer.select_instance(LoadBalancingStrategy::RoundRobin).unwrap();
        *counts.entry(chosen.id).or_default() += 1;
    }
    assert_eq!(counts.len(), 3);
    assert!(counts.values().all(|&c| c == 3));
}
