//! Reasoning chain execution.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::evidence::EvidenceInterpreter;
use super::generator::{ContextHypothesisGenerator, HypothesisGenerator, HypothesisSeed};
use super::types::{ChainState, EvidenceStance, ReasoningChain, StepKind, TerminationReason};
use crate::config::ReasoningConfig;
use crate::error::{AppResult, ReasoningError, ToolError};
use crate::graph::GraphReasoner;
use crate::tools::{validate_arguments, Capability, OutcomeStatus, SelectionCriteria, ToolExecutor, ValueType};

/// Graph operation used as an evidence lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum GraphLookup {
    Relations { entity: String },
    Path { source: String, target: String, max_hops: usize },
    Question { question: String },
}

/// One evidence-gathering action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvidenceLookup {
    Tool {
        tool: String,
        #[serde(default)]
        args: Map<String, Value>,
    },
    Graph {
        #[serde(flatten)]
        lookup: GraphLookup,
    },
}

impl EvidenceLookup {
    fn kind(&self) -> StepKind {
        match self {
            EvidenceLookup::Tool { .. } => StepKind::ToolCall,
            EvidenceLookup::Graph { .. } => StepKind::GraphQuery,
        }
    }

    fn source(&self) -> String {
        match self {
            EvidenceLookup::Tool { tool, .. } => tool.clone(),
            EvidenceLookup::Graph { lookup } => match lookup {
                GraphLookup::Relations { .. } => "graph.relations".to_string(),
                GraphLookup::Path { .. } => "graph.path".to_string(),
                GraphLookup::Question { .. } => "graph.question".to_string(),
            },
        }
    }
}

/// Input to [`ReasoningEngine::execute_chain`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningRequest {
    pub question: String,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub hypotheses: Vec<HypothesisSeed>,
    /// Lookups run in order; defaults are derived from the question when empty.
    #[serde(default)]
    pub lookups: Vec<EvidenceLookup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_target: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_budget: Option<usize>,
}

impl ReasoningRequest {
    /// A request for `question` with no context.
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            context: json!({}),
            ..Default::default()
        }
    }

    /// Set the context object.
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    /// Add a seed hypothesis.
    pub fn with_hypothesis(mut self, seed: HypothesisSeed) -> Self {
        self.hypotheses.push(seed);
        self
    }

    /// Add an evidence lookup.
    pub fn with_lookup(mut self, lookup: EvidenceLookup) -> Self {
        self.lookups.push(lookup);
        self
    }
}

/// Drives reasoning chains through their state machine.
pub struct ReasoningEngine {
    config: ReasoningConfig,
    tools: Option<Arc<ToolExecutor>>,
    graph: Option<Arc<GraphReasoner>>,
    generator: Box<dyn HypothesisGenerator>,
    interpreter: EvidenceInterpreter,
}

impl ReasoningEngine {
    /// Create an engine with the default hypothesis generator.
    pub fn new(config: ReasoningConfig) -> Self {
        Self {
            config,
            tools: None,
            graph: None,
            generator: Box::new(ContextHypothesisGenerator::default()),
            interpreter: EvidenceInterpreter::default(),
        }
    }

    /// Gather evidence through tools.
    pub fn with_tools(mut self, tools: Arc<ToolExecutor>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Gather evidence through the graph adapter.
    pub fn with_graph(mut self, graph: Arc<GraphReasoner>) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Replace the hypothesis generator.
    pub fn with_generator(mut self, generator: Box<dyn HypothesisGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Run a chain to a terminal state.
    ///
    /// Exhausting the budget, the lookups or the checkpoints yields a `failed`
    /// chain, not an error.
    ///
    /// # Errors
    /// Invalid requests (empty question, out-of-range target, lookups naming
    /// unknown tools or carrying invalid arguments) are returned unmodified.
    pub async fn execute_chain(&self, request: ReasoningRequest) -> AppResult<ReasoningChain> {
        let target = request.confidence_target.unwrap_or(self.config.confidence_target);
        let budget = request.step_budget.unwrap_or(self.config.step_budget);
        self.validate(&request, target)?;

        let start = Instant::now();
        let mut lookups: VecDeque<EvidenceLookup> = if request.lookups.is_empty() {
            self.default_lookups(&request.question).into()
        } else {
            request.lookups.clone().into()
        };

        let mut chain = ReasoningChain::new(request.question.clone(), request.context.clone());
        chain.state = ChainState::Running;
        info!(
            chain_id = %chain.id,
            lookups = lookups.len(),
            step_budget = budget,
            target = target,
            "Starting reasoning chain"
        );

        let seeds = self
            .generator
            .generate(&request.question, &request.context, &request.hypotheses);
        let ids: Vec<String> = seeds
            .iter()
            .map(|s| chain.add_hypothesis(s.statement.clone(), s.prior))
            .collect();
        chain.push_step(
            StepKind::Hypothesize,
            json!({ "question": request.question }),
            json!({ "hypotheses": seeds }),
            ids,
            None,
        );
        chain.push_checkpoint();

        let mut evidence_steps = 0usize;
        loop {
            if chain.confidence() >= target {
                chain.finish(ChainState::Completed, TerminationReason::ConfidenceReached);
                break;
            }
            if chain.active_hypotheses().next().is_none() {
                chain.finish(ChainState::Failed, TerminationReason::HypothesesExhausted);
                break;
            }
            if evidence_steps >= budget {
                chain.finish(ChainState::Failed, TerminationReason::StepBudgetExhausted);
                break;
            }
            let Some(lookup) = lookups.pop_front() else {
                chain.finish(ChainState::Failed, TerminationReason::LookupsExhausted);
                break;
            };
            evidence_steps += 1;

            let input = serde_json::to_value(&lookup).unwrap_or(Value::Null);
            let step_timeout = Duration::from_millis(self.config.step_timeout_ms);
            let result = match tokio::time::timeout(step_timeout, self.run_lookup(&lookup)).await {
                Ok(result) => result,
                Err(_) => Err(format!("step timed out after {}ms", self.config.step_timeout_ms)),
            };

            match result {
                Err(error) => {
                    warn!(chain_id = %chain.id, source = %lookup.source(), error = %error, "Evidence step failed");
                    chain.push_step(lookup.kind(), input, Value::Null, Vec::new(), Some(error));
                    if !self.backtrack(&mut chain, None) {
                        break;
                    }
                }
                Ok(output) => {
                    let previous_leader = chain.leading_hypothesis().map(|h| h.id().to_string());
                    let scoped = self.interpreter.interpret(&lookup.source(), &output, chain.hypotheses());
                    let mut derived: Vec<String> = Vec::new();
                    let mut contradicted: Vec<String> = Vec::new();
                    for item in scoped {
                        if item.evidence.stance == EvidenceStance::Contradicting {
                            contradicted.push(item.hypothesis_id.clone());
                        }
                        if chain.add_evidence(&item.hypothesis_id, item.evidence)
                            && !derived.contains(&item.hypothesis_id)
                        {
                            derived.push(item.hypothesis_id);
                        }
                    }
                    chain.push_step(lookup.kind(), input, output, derived, None);

                    // The hypothesis that led before this step, if it was contradicted below the floor.
                    let collapsed = previous_leader.filter(|id| {
                        contradicted.contains(id)
                            && chain
                                .hypotheses()
                                .iter()
                                .any(|h| h.id() == id && h.confidence() < self.config.confidence_floor)
                    });

                    match collapsed {
                        Some(id) => {
                            debug!(chain_id = %chain.id, hypothesis = %id, "Leading hypothesis fell below floor");
                            if !self.backtrack(&mut chain, Some(&id)) {
                                break;
                            }
                        }
                        None => chain.push_checkpoint(),
                    }
                }
            }
        }

        info!(
            chain_id = %chain.id,
            state = %chain.state,
            termination = ?chain.termination,
            confidence = chain.confidence(),
            steps = chain.steps().len(),
            latency_ms = start.elapsed().as_millis(),
            "Reasoning chain finished"
        );
        Ok(chain)
    }

    /// Pop a checkpoint; on an empty stack the chain fails. Returns whether to continue.
    fn backtrack(&self, chain: &mut ReasoningChain, retract: Option<&str>) -> bool {
        chain.state = ChainState::Backtracking;
        match chain.backtrack(retract) {
            Some(step_index) => {
                chain.push_step(
                    StepKind::Backtrack,
                    json!({ "retract": retract }),
                    json!({ "restored_step": step_index, "confidence": chain.confidence() }),
                    retract.map(|id| vec![id.to_string()]).unwrap_or_default(),
                    None,
                );
                chain.state = ChainState::Running;
                info!(chain_id = %chain.id, restored_step = step_index, "Backtracked to checkpoint");
                true
            }
            None => {
                chain.finish(ChainState::Failed, TerminationReason::BacktrackExhausted);
                false
            }
        }
    }

    async fn run_lookup(&self, lookup: &EvidenceLookup) -> Result<Value, String> {
        match lookup {
            EvidenceLookup::Tool { tool, args } => {
                let executor = self
                    .tools
                    .as_ref()
                    .ok_or_else(|| "no tool executor configured".to_string())?;
                let outcome = executor.execute(tool, args).await.map_err(|e| e.to_string())?;
                match (outcome.status, outcome.value) {
                    (OutcomeStatus::Failed, _) | (_, None) => Err(outcome
                        .error
                        .unwrap_or_else(|| outcome.issues.join("; "))),
                    (_, Some(value)) => Ok(value),
                }
            }
            EvidenceLookup::Graph { lookup } => {
                let graph = self
                    .graph
                    .as_ref()
                    .ok_or_else(|| "no graph store configured".to_string())?;
                let value = match lookup {
                    GraphLookup::Relations { entity } => graph
                        .infer_entity_relations(entity)
                        .await
                        .map(|r| json!({ "relations": r })),
                    GraphLookup::Path { source, target, max_hops } => graph
                        .path_based_reasoning(source, target, *max_hops)
                        .await
                        .map(|p| json!({ "paths": p })),
                    GraphLookup::Question { question } => graph
                        .answer_question(question)
                        .await
                        .and_then(|a| {
                            serde_json::to_value(a).map_err(|e| crate::error::GraphError::InvalidQuery {
                                message: e.to_string(),
                            })
                        }),
                };
                value.map_err(|e| e.to_string())
            }
        }
    }

    /// Lookups used when a request names none: the graph question, then
    /// read-only tools that take the question as their only required text input.
    fn default_lookups(&self, question: &str) -> Vec<EvidenceLookup> {
        let mut lookups = Vec::new();
        if self.graph.is_some() {
            lookups.push(EvidenceLookup::Graph {
                lookup: GraphLookup::Question {
                    question: question.to_string(),
                },
            });
        }
        if let Some(executor) = &self.tools {
            let criteria = SelectionCriteria::new(question)
                .require(Capability::ReadOnly)
                .with_limit(3);
            for candidate in executor.registry().select(&criteria) {
                let schema = candidate.tool.schema();
                let required: Vec<_> = schema.params.iter().filter(|p| p.required).collect();
                if let [param] = required.as_slice() {
                    if param.value_type == ValueType::String {
                        let mut args = Map::new();
                        args.insert(param.name.clone(), json!(question));
                        lookups.push(EvidenceLookup::Tool {
                            tool: schema.name.clone(),
                            args,
                        });
                    }
                }
            }
        }
        lookups
    }

    fn validate(&self, request: &ReasoningRequest, target: f64) -> AppResult<()> {
        let invalid = |field: &str, reason: String| ReasoningError::InvalidRequest {
            field: field.to_string(),
            reason,
        };
        if request.question.trim().is_empty() {
            return Err(invalid("question", "must not be empty".to_string()).into());
        }
        if !(target > 0.0 && target <= 1.0) {
            return Err(invalid("confidence_target", format!("must be in (0, 1], got {}", target)).into());
        }
        for lookup in &request.lookups {
            match lookup {
                EvidenceLookup::Tool { tool, args } => {
                    let executor = self
                        .tools
                        .as_ref()
                        .ok_or_else(|| invalid("lookups", "tool lookups require a tool executor".to_string()))?;
                    let found = executor
                        .registry()
                        .get(tool)
                        .ok_or_else(|| ToolError::UnknownTool { name: tool.clone() })?;
                    validate_arguments(found.schema(), args)?;
                }
                EvidenceLookup::Graph { .. } if self.graph.is_none() => {
                    return Err(invalid("lookups", "graph lookups require a graph store".to_string()).into());
                }
                EvidenceLookup::Graph { .. } => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RequestConfig;
    use crate::error::AppError;
    use crate::reasoning::types::StepStatus;
    use crate::tools::{FnTool, ParamSpec, ToolRegistry, ToolSchema};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> ReasoningConfig {
        ReasoningConfig {
            confidence_target: 0.8,
            confidence_floor: 0.3,
            step_budget: 10,
            step_timeout_ms: 500,
        }
    }

    fn executor(registry: ToolRegistry) -> Arc<ToolExecutor> {
        Arc::new(ToolExecutor::new(
            Arc::new(registry),
            &RequestConfig {
                timeout_ms: 200,
                max_retries: 0,
                retry_delay_ms: 1,
            },
        ))
    }

    fn evidence_tool(name: &str, output: Value) -> Arc<FnTool> {
        Arc::new(FnTool::from_fn(
            ToolSchema::new(name, "").with_capability(Capability::ReadOnly),
            move |_| Ok(output.clone()),
        ))
    }

    fn tool_lookup(name: &str) -> EvidenceLookup {
        EvidenceLookup::Tool {
            tool: name.to_string(),
            args: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_completes_when_confidence_reached() {
        let mut registry = ToolRegistry::new();
        registry
            .register(evidence_tool(
                "inventory",
                json!({"evidence": [{"description": "stock low", "stance": "supporting", "weight": 1.0}]}),
            ))
            .unwrap();
        let engine = ReasoningEngine::new(config()).with_tools(executor(registry));

        let request = ReasoningRequest::new("Will we run out of stock?")
            .with_hypothesis(HypothesisSeed::new("stock will run out").with_prior(0.6))
            .with_lookup(tool_lookup("inventory"))
            .with_lookup(tool_lookup("inventory"));

        let chain = engine.execute_chain(request).await.unwrap();
        assert_eq!(chain.state, ChainState::Completed);
        assert_eq!(chain.termination, Some(TerminationReason::ConfidenceReached));
        assert!(chain.confidence() >= 0.8);
        // Hypothesize + one tool call was enough.
        assert_eq!(chain.steps().len(), 2);
        assert_eq!(chain.steps()[1].kind, StepKind::ToolCall);
    }

    #[tokio::test]
    async fn test_fails_when_lookups_exhausted() {
        let mut registry = ToolRegistry::new();
        registry
            .register(evidence_tool("weather", json!({"text": "sunny skies"})))
            .unwrap();
        let engine = ReasoningEngine::new(config()).with_tools(executor(registry));

        let request = ReasoningRequest::new("Is the supplier late?").with_lookup(tool_lookup("weather"));
        let chain = engine.execute_chain(request).await.unwrap();
        assert_eq!(chain.state, ChainState::Failed);
        assert_eq!(chain.termination, Some(TerminationReason::LookupsExhausted));
    }

    #[tokio::test]
    async fn test_budget_bounds_execution() {
        let mut registry = ToolRegistry::new();
        registry.register(evidence_tool("noop", json!(null))).unwrap();
        let engine = ReasoningEngine::new(config()).with_tools(executor(registry));

        let mut request = ReasoningRequest::new("anything at all");
        request.step_budget = Some(3);
        for _ in 0..20 {
            request = request.with_lookup(tool_lookup("noop"));
        }
        let chain = engine.execute_chain(request).await.unwrap();
        assert_eq!(chain.termination, Some(TerminationReason::StepBudgetExhausted));
        assert_eq!(chain.steps().len(), 4);
    }

    #[tokio::test]
    async fn test_failed_step_backtracks_then_fails_on_empty_stack() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(FnTool::from_fn(
                ToolSchema::new("broken", "").with_capability(Capability::ReadOnly),
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ToolError::Execution {
                        message: "service unavailable".to_string(),
                    })
                },
            )))
            .unwrap();
        let engine = ReasoningEngine::new(config()).with_tools(executor(registry));

        let request = ReasoningRequest::new("Is the supplier late?")
            .with_lookup(tool_lookup("broken"))
            .with_lookup(tool_lookup("broken"))
            .with_lookup(tool_lookup("broken"));
        let chain = engine.execute_chain(request).await.unwrap();

        assert_eq!(chain.state, ChainState::Failed);
        assert_eq!(chain.termination, Some(TerminationReason::BacktrackExhausted));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let kinds: Vec<_> = chain.steps().iter().map(|s| (s.kind, s.status)).collect();
        assert_eq!(
            kinds,
            vec![
                (StepKind::Hypothesize, StepStatus::Committed),
                (StepKind::ToolCall, StepStatus::Failed),
                (StepKind::Backtrack, StepStatus::Committed),
                (StepKind::ToolCall, StepStatus::Failed),
            ]
        );
    }

    #[tokio::test]
    async fn test_contradicted_leader_is_retracted() {
        let mut registry = ToolRegistry::new();
        registry
            .register(evidence_tool(
                "support_b",
                json!({"evidence": [{"description": "b ok", "stance": "supporting", "weight": 0.2, "hypothesis": "h2"}]}),
            ))
            .unwrap();
        registry
            .register(evidence_tool(
                "refute_a",
                json!({"evidence": [{"description": "a wrong", "stance": "contradicting", "weight": 1.0, "hypothesis": "h1"}]}),
            ))
            .unwrap();
        registry
            .register(evidence_tool(
                "confirm_b",
                json!({"evidence": [{"description": "b confirmed", "stance": "supporting", "weight": 1.0, "hypothesis": "h2"}]}),
            ))
            .unwrap();
        let engine = ReasoningEngine::new(config()).with_tools(executor(registry));

        let request = ReasoningRequest::new("Which explanation holds?")
            .with_hypothesis(HypothesisSeed::new("explanation a").with_prior(0.6))
            .with_hypothesis(HypothesisSeed::new("explanation b").with_prior(0.4))
            .with_lookup(tool_lookup("support_b"))
            .with_lookup(tool_lookup("refute_a"))
            .with_lookup(tool_lookup("confirm_b"));

        let chain = engine.execute_chain(request).await.unwrap();
        let a = &chain.hypotheses()[0];
        assert!(!a.is_active());
        assert!(chain.steps().iter().any(|s| s.kind == StepKind::Backtrack));
        assert_eq!(chain.state, ChainState::Completed);
        assert!(chain.confidence() >= 0.8);
    }

    #[tokio::test]
    async fn test_invalid_requests_are_errors() {
        let engine = ReasoningEngine::new(config());
        let err = engine.execute_chain(ReasoningRequest::new("  ")).await.unwrap_err();
        assert!(matches!(err, AppError::Reasoning(_)));

        let mut request = ReasoningRequest::new("q");
        request.confidence_target = Some(1.5);
        assert!(engine.execute_chain(request).await.is_err());

        let engine = ReasoningEngine::new(config()).with_tools(executor(ToolRegistry::new()));
        let err = engine
            .execute_chain(ReasoningRequest::new("q").with_lookup(tool_lookup("missing")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Tool(ToolError::UnknownTool { .. })));
    }

    #[tokio::test]
    async fn test_default_lookups_use_question_tools() {
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(FnTool::from_fn(
                ToolSchema::new("search", "")
                    .with_param(ParamSpec::required("query", ValueType::String))
                    .with_capability(Capability::ReadOnly),
                |args| {
                    let q = args.get("query").and_then(Value::as_str).unwrap_or_default();
                    Ok(json!({"text": format!("confirmed: {}", q)}))
                },
            )))
            .unwrap();
        let engine = ReasoningEngine::new(config()).with_tools(executor(registry));
        let chain = engine
            .execute_chain(ReasoningRequest::new("supplier shipment delayed"))
            .await
            .unwrap();
        assert_eq!(chain.steps()[1].kind, StepKind::ToolCall);
        assert_eq!(chain.steps()[1].input["tool"], "search");
        assert!(chain.hypotheses()[0].confidence() > 0.5);
    }
}
