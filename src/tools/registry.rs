//! Tool registry and capability-based selection.
//!
//! The registry is populated once with `&mut self` and then shared behind an
//! `Arc`; lookups need no lock. Usage statistics are the only runtime state
//! and live in atomics.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::types::{Capability, Tool, ToolSchema};
use crate::error::{ToolError, ToolResult};

/// Prior weight, in pseudo-calls, of a tool's declared reliability.
const RELIABILITY_PRIOR_WEIGHT: f64 = 5.0;

#[derive(Default)]
struct ToolStats {
    attempts: AtomicU64,
    successes: AtomicU64,
    last_used: AtomicU64,
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    stats: ToolStats,
}

impl RegisteredTool {
    fn effective_reliability(&self) -> f64 {
        let declared = self.tool.schema().reliability;
        let attempts = self.stats.attempts.load(Ordering::Relaxed) as f64;
        let successes = self.stats.successes.load(Ordering::Relaxed) as f64;
        (declared * RELIABILITY_PRIOR_WEIGHT + successes) / (RELIABILITY_PRIOR_WEIGHT + attempts)
    }
}

/// What a caller needs from a tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionCriteria {
    /// Free-text task description, logged with the selection.
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub required: BTreeSet<Capability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl SelectionCriteria {
    /// Criteria for a task.
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Default::default()
        }
    }

    /// Require a capability.
    pub fn require(mut self, capability: Capability) -> Self {
        self.required.insert(capability);
        self
    }

    /// Cap the number of candidates returned.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A ranked selection candidate.
#[derive(Clone)]
pub struct ToolCandidate {
    pub tool: Arc<dyn Tool>,
    /// Capability set equals the required set.
    pub exact_match: bool,
    pub reliability: f64,
    /// Registry tick of the last call; 0 if never used.
    pub last_used: u64,
}

impl ToolCandidate {
    /// Candidate tool name.
    pub fn name(&self) -> &str {
        self.tool.name()
    }
}

impl std::fmt::Debug for ToolCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCandidate")
            .field("name", &self.name())
            .field("exact_match", &self.exact_match)
            .field("reliability", &self.reliability)
            .field("last_used", &self.last_used)
            .finish()
    }
}

/// Snapshot of a tool's usage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolUsage {
    pub name: String,
    pub attempts: u64,
    pub successes: u64,
    pub effective_reliability: f64,
}

/// Registry of tools, keyed by name in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, RegisteredTool>,
    clock: AtomicU64,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.
    ///
    /// # Errors
    /// Returns [`ToolError::DuplicateTool`] if the name is taken.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> ToolResult<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateTool { name });
        }
        info!(
            tool = %name,
            capabilities = ?tool.schema().capabilities,
            "Tool registered"
        );
        self.tools.insert(
            name,
            RegisteredTool {
                tool,
                stats: ToolStats::default(),
            },
        );
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|t| Arc::clone(&t.tool))
    }

    /// Whether a tool is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Schemas of all tools in registration order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|t| t.tool.schema().clone()).collect()
    }

    /// Get the number of registered tools.
    pub fn count(&self) -> usize {
        self.tools.len()
    }

    /// Rank tools for `criteria`.
    ///
    /// Tools lacking a required capability are excluded. Exact capability-set
    /// matches rank first, then effective reliability (descending), then the
    /// least recently used.
    pub fn select(&self, criteria: &SelectionCriteria) -> Vec<ToolCandidate> {
        let mut candidates: Vec<ToolCandidate> = self
            .tools
            .values()
            .filter(|t| criteria.required.is_subset(&t.tool.schema().capabilities))
            .map(|t| ToolCandidate {
                tool: Arc::clone(&t.tool),
                exact_match: t.tool.schema().capabilities == criteria.required,
                reliability: t.effective_reliability(),
                last_used: t.stats.last_used.load(Ordering::Relaxed),
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.exact_match
                .cmp(&a.exact_match)
                .then_with(|| {
                    b.reliability
                        .partial_cmp(&a.reliability)
                        .unwrap_or(CmpOrdering::Equal)
                })
                .then_with(|| a.last_used.cmp(&b.last_used))
        });

        if let Some(limit) = criteria.limit {
            candidates.truncate(limit);
        }

        debug!(
            task = %criteria.task,
            required = ?criteria.required,
            candidates = candidates.len(),
            "Selected tools"
        );
        candidates
    }

    /// Record one call of `name`.
    pub fn record_usage(&self, name: &str, success: bool) {
        if let Some(t) = self.tools.get(name) {
            let tick = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
            t.stats.attempts.fetch_add(1, Ordering::Relaxed);
            if success {
                t.stats.successes.fetch_add(1, Ordering::Relaxed);
            }
            t.stats.last_used.store(tick, Ordering::Relaxed);
        }
    }

    /// Usage snapshot for a tool.
    pub fn usage(&self, name: &str) -> Option<ToolUsage> {
        self.tools.get(name).map(|t| ToolUsage {
            name: name.to_string(),
            attempts: t.stats.attempts.load(Ordering::Relaxed),
            successes: t.stats.successes.load(Ordering::Relaxed),
            effective_reliability: t.effective_reliability(),
        })
    }
}
