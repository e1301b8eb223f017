//! Reasoning chain data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::confidence::{calculate_overall_confidence, hypothesis_confidence};

// ============================================================================
// Evidence and hypotheses
// ============================================================================

/// Whether evidence supports or contradicts a hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceStance {
    Supporting,
    Contradicting,
}

impl std::str::FromStr for EvidenceStance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "supporting" | "supports" | "support" => Ok(EvidenceStance::Supporting),
            "contradicting" | "contradicts" | "contradict" | "refutes" => {
                Ok(EvidenceStance::Contradicting)
            }
            _ => Err(format!("Unknown evidence stance: {}", s)),
        }
    }
}

/// One piece of evidence attached to a hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub description: String,
    pub stance: EvidenceStance,
    /// Strength in [0, 1].
    pub weight: f64,
    /// Tool or graph operation that produced it.
    pub source: String,
}

impl Evidence {
    /// Create evidence; the weight is clamped to [0, 1].
    pub fn new(
        description: impl Into<String>,
        stance: EvidenceStance,
        weight: f64,
        source: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            stance,
            weight: if weight.is_finite() { weight.clamp(0.0, 1.0) } else { 0.0 },
            source: source.into(),
        }
    }
}

/// A candidate explanation owned by one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    id: String,
    statement: String,
    prior: f64,
    supporting: Vec<Evidence>,
    contradicting: Vec<Evidence>,
    confidence: f64,
    active: bool,
}

impl Hypothesis {
    fn new(id: String, statement: String, prior: f64) -> Self {
        let prior = if prior.is_finite() { prior.clamp(0.0, 1.0) } else { 0.5 };
        Self {
            id,
            statement,
            prior,
            supporting: Vec::new(),
            contradicting: Vec::new(),
            confidence: hypothesis_confidence(prior, &[], &[]),
            active: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn prior(&self) -> f64 {
        self.prior
    }

    pub fn supporting(&self) -> &[Evidence] {
        &self.supporting
    }

    pub fn contradicting(&self) -> &[Evidence] {
        &self.contradicting
    }

    /// Confidence derived from the prior and all attached evidence.
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Whether the hypothesis still counts toward the chain confidence.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Sum of all evidence weights, used as aggregation weight.
    pub fn evidence_weight(&self) -> f64 {
        self.supporting
            .iter()
            .chain(self.contradicting.iter())
            .map(|e| e.weight)
            .sum()
    }

    /// Attach evidence and recompute confidence.
    pub fn add_evidence(&mut self, evidence: Evidence) {
        match evidence.stance {
            EvidenceStance::Supporting => self.supporting.push(evidence),
            EvidenceStance::Contradicting => self.contradicting.push(evidence),
        }
        self.confidence = hypothesis_confidence(self.prior, &self.supporting, &self.contradicting);
    }
}

// ============================================================================
// Steps
// ============================================================================

/// Kind of inference action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Hypothesize,
    ToolCall,
    GraphQuery,
    Verification,
    Backtrack,
}

/// Whether a step's action succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Committed,
    Failed,
}

/// One immutable inference record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub index: usize,
    pub kind: StepKind,
    pub input: Value,
    pub output: Value,
    #[serde(default)]
    pub derived_hypotheses: Vec<String>,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A restorable point: a step index plus the hypotheses as they were there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub step_index: usize,
    pub hypotheses: Vec<Hypothesis>,
}

// ============================================================================
// Chain
// ============================================================================

/// Lifecycle state of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    Pending,
    Running,
    Backtracking,
    Completed,
    Failed,
}

impl ChainState {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainState::Pending => "pending",
            ChainState::Running => "running",
            ChainState::Backtracking => "backtracking",
            ChainState::Completed => "completed",
            ChainState::Failed => "failed",
        }
    }

    /// Whether the chain has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChainState::Completed | ChainState::Failed)
    }
}

impl std::fmt::Display for ChainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a chain stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    ConfidenceReached,
    StepBudgetExhausted,
    LookupsExhausted,
    BacktrackExhausted,
    HypothesesExhausted,
}

impl TerminationReason {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::ConfidenceReached => "confidence_reached",
            TerminationReason::StepBudgetExhausted => "step_budget_exhausted",
            TerminationReason::LookupsExhausted => "lookups_exhausted",
            TerminationReason::BacktrackExhausted => "backtrack_exhausted",
            TerminationReason::HypothesesExhausted => "hypotheses_exhausted",
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An ordered, stateful sequence of inference steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningChain {
    pub id: String,
    pub question: String,
    pub context: Value,
    pub state: ChainState,
    steps: Vec<ReasoningStep>,
    hypotheses: Vec<Hypothesis>,
    confidence: f64,
    checkpoints: Vec<Checkpoint>,
    pub termination: Option<TerminationReason>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ReasoningChain {
    /// Create a pending chain.
    pub fn new(question: impl Into<String>, context: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            question: question.into(),
            context,
            state: ChainState::Pending,
            steps: Vec::new(),
            hypotheses: Vec::new(),
            confidence: 0.0,
            checkpoints: Vec::new(),
            termination: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn steps(&self) -> &[ReasoningStep] {
        &self.steps
    }

    pub fn hypotheses(&self) -> &[Hypothesis] {
        &self.hypotheses
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Overall confidence as of the last evidence change.
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Active hypotheses in creation order.
    pub fn active_hypotheses(&self) -> impl Iterator<Item = &Hypothesis> {
        self.hypotheses.iter().filter(|h| h.active)
    }

    /// Active hypothesis with the highest confidence; earliest wins ties.
    pub fn leading_hypothesis(&self) -> Option<&Hypothesis> {
        self.active_hypotheses().fold(None, |best: Option<&Hypothesis>, h| match best {
            Some(b) if b.confidence >= h.confidence => Some(b),
            _ => Some(h),
        })
    }

    /// Create a hypothesis owned by this chain and return its id.
    pub fn add_hypothesis(&mut self, statement: impl Into<String>, prior: f64) -> String {
        let id = format!("h{}", self.hypotheses.len() + 1);
        self.hypotheses
            .push(Hypothesis::new(id.clone(), statement.into(), prior));
        self.recompute_confidence();
        id
    }

    /// Attach evidence to an active hypothesis. Returns false if none matches.
    pub fn add_evidence(&mut self, hypothesis_id: &str, evidence: Evidence) -> bool {
        let Some(h) = self
            .hypotheses
            .iter_mut()
            .find(|h| h.id == hypothesis_id && h.active)
        else {
            return false;
        };
        h.add_evidence(evidence);
        self.recompute_confidence();
        true
    }

    /// Append a step and return its index. Steps are never modified afterwards.
    pub fn push_step(
        &mut self,
        kind: StepKind,
        input: Value,
        output: Value,
        derived_hypotheses: Vec<String>,
        error: Option<String>,
    ) -> usize {
        let index = self.steps.len();
        self.steps.push(ReasoningStep {
            index,
            kind,
            input,
            output,
            derived_hypotheses,
            status: if error.is_some() {
                StepStatus::Failed
            } else {
                StepStatus::Committed
            },
            error,
            timestamp: Utc::now(),
        });
        index
    }

    /// Save the current hypotheses as a checkpoint at the latest step.
    pub fn push_checkpoint(&mut self) {
        self.checkpoints.push(Checkpoint {
            step_index: self.steps.len().saturating_sub(1),
            hypotheses: self.hypotheses.clone(),
        });
    }

    /// Pop the most recent checkpoint and restore its hypotheses, then
    /// deactivate `retract` if given. Returns the restored checkpoint's step
    /// index, or `None` when the stack is empty.
    pub fn backtrack(&mut self, retract: Option<&str>) -> Option<usize> {
        let checkpoint = self.checkpoints.pop()?;
        self.hypotheses = checkpoint.hypotheses;
        if let Some(id) = retract {
            if let Some(h) = self.hypotheses.iter_mut().find(|h| h.id == id) {
                h.active = false;
            }
        }
        self.recompute_confidence();
        Some(checkpoint.step_index)
    }

    /// Move to a terminal state.
    pub fn finish(&mut self, state: ChainState, reason: TerminationReason) {
        self.state = state;
        self.termination = Some(reason);
        self.completed_at = Some(Utc::now());
    }

    fn recompute_confidence(&mut self) {
        self.confidence = calculate_overall_confidence(&self.hypotheses);
    }
}
