//! Tool invocation with validation, timeouts, retries and circuit breaking.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::chain::{ChainResult, StepTrace, ToolChain, INPUT_SOURCE};
use super::registry::ToolRegistry;
use super::types::{OutcomeStatus, Tool, ToolOutcome};
use super::validator::{validate_arguments, ResultValidator};
use crate::config::{backoff_delay, RequestConfig};
use crate::error::{ToolError, ToolResult};
use crate::performance::{CircuitBreaker, CircuitBreakerConfig, CircuitState, PerformanceMonitor};

/// Runs tools from a shared registry.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    validator: ResultValidator,
    timeout: Duration,
    max_retries: u32,
    retry_delay_ms: u64,
    breaker_config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    monitor: Option<Arc<PerformanceMonitor>>,
}

impl ToolExecutor {
    /// Create an executor using the shared request timeout and retry policy.
    pub fn new(registry: Arc<ToolRegistry>, request: &RequestConfig) -> Self {
        Self {
            registry,
            validator: ResultValidator,
            timeout: Duration::from_millis(request.timeout_ms),
            max_retries: request.max_retries,
            retry_delay_ms: request.retry_delay_ms,
            breaker_config: CircuitBreakerConfig::default(),
            breakers: Mutex::new(HashMap::new()),
            monitor: None,
        }
    }

    /// Override the per-tool circuit breaker thresholds.
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    /// Record call latencies in `monitor`.
    pub fn with_monitor(mut self, monitor: Arc<PerformanceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// The registry tools are resolved from.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Execute one tool.
    ///
    /// # Errors
    /// [`ToolError::UnknownTool`] and [`ToolError::InvalidArguments`] are
    /// returned to the caller. Failures inside the tool never are; they
    /// produce a `failed` outcome.
    pub async fn execute(&self, tool_name: &str, args: &Map<String, Value>) -> ToolResult<ToolOutcome> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| ToolError::UnknownTool {
                name: tool_name.to_string(),
            })?;
        validate_arguments(tool.schema(), args)?;

        let start = Instant::now();
        let (result, attempts) = self.invoke_with_retry(tool.as_ref(), args).await;
        let duration = start.elapsed();
        if let Some(monitor) = &self.monitor {
            monitor.record(&format!("tool.{}", tool_name), duration);
        }

        let outcome = match result {
            Ok(value) => {
                let report = self.validator.validate(&tool.schema().output, &value);
                ToolOutcome {
                    tool: tool_name.to_string(),
                    status: report.status,
                    value: Some(value),
                    issues: report.issues,
                    attempts,
                    duration_ms: duration.as_millis() as u64,
                    error: None,
                }
            }
            Err(e) => ToolOutcome {
                tool: tool_name.to_string(),
                status: OutcomeStatus::Failed,
                value: None,
                issues: Vec::new(),
                attempts,
                duration_ms: duration.as_millis() as u64,
                error: Some(e.to_string()),
            },
        };

        self.registry.record_usage(tool_name, outcome.is_success());
        info!(
            tool = %tool_name,
            status = %outcome.status,
            attempts = attempts,
            latency_ms = outcome.duration_ms,
            "Tool executed"
        );
        Ok(outcome)
    }

    async fn invoke_with_retry(
        &self,
        tool: &dyn Tool,
        args: &Map<String, Value>,
    ) -> (ToolResult<Value>, u32) {
        let name = tool.name();
        let mut attempts = 0;

        loop {
            if let Err(remaining) = self.with_breaker(name, CircuitBreaker::try_acquire) {
                warn!(tool = %name, retry_in_ms = remaining.as_millis() as u64, "Circuit open, skipping call");
                return (
                    Err(ToolError::CircuitOpen {
                        tool: name.to_string(),
                    }),
                    attempts,
                );
            }

            if attempts > 0 {
                let delay = backoff_delay(self.retry_delay_ms, attempts);
                warn!(
                    tool = %name,
                    retry = attempts,
                    delay_ms = delay.as_millis(),
                    "Retrying tool call"
                );
                tokio::time::sleep(delay).await;
            }
            attempts += 1;

            let result = match tokio::time::timeout(self.timeout, tool.invoke(args)).await {
                Ok(result) => result,
                Err(_) => Err(ToolError::Timeout {
                    tool: name.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                }),
            };

            match result {
                Ok(value) => {
                    self.with_breaker(name, |b| b.record(true));
                    return (Ok(value), attempts);
                }
                Err(e) => {
                    self.with_breaker(name, |b| b.record(false));
                    debug!(tool = %name, attempt = attempts, error = %e, "Tool call failed");
                    if !e.is_retryable() || attempts > self.max_retries {
                        return (Err(e), attempts);
                    }
                }
            }
        }
    }

    fn with_breaker<T>(&self, name: &str, f: impl FnOnce(&mut CircuitBreaker) -> T) -> T {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreaker::new(name, self.breaker_config));
        f(breaker)
    }

    /// Tools whose breaker is currently open.
    pub fn open_circuits(&self) -> Vec<String> {
        let mut open: Vec<String> = self
            .breakers
            .lock()
            .values()
            .filter(|b| b.state() == CircuitState::Open)
            .map(|b| b.name().to_string())
            .collect();
        open.sort();
        open
    }

    /// Execute a chain of steps in order.
    ///
    /// A required step that does not succeed aborts the rest of the chain:
    /// the chain is `partial` if an earlier step succeeded and `failed`
    /// otherwise. Optional step failures are recorded and skipped.
    ///
    /// # Errors
    /// Returns [`ToolError::UnknownTool`] before running anything if a step
    /// names an unregistered tool.
    pub async fn execute_chain(
        &self,
        chain: &ToolChain,
        inputs: Map<String, Value>,
    ) -> ToolResult<ChainResult> {
        if let Some(step) = chain.steps.iter().find(|s| !self.registry.contains(&s.tool)) {
            return Err(ToolError::UnknownTool {
                name: step.tool.clone(),
            });
        }

        let start = Instant::now();
        let mut context: HashMap<String, Value> = HashMap::new();
        context.insert(INPUT_SOURCE.to_string(), Value::Object(inputs));
        let mut traces: Vec<StepTrace> = Vec::with_capacity(chain.steps.len());
        let mut output = None;
        let mut abort_error = None;

        info!(chain_id = %chain.id, steps = chain.steps.len(), "Starting tool chain");

        for (index, step) in chain.steps.iter().enumerate() {
            let arguments = step.build_arguments(&context);

            let outcome = match self.execute(&step.tool, &arguments).await {
                Ok(outcome) => outcome,
                Err(e) => ToolOutcome {
                    tool: step.tool.clone(),
                    status: OutcomeStatus::Failed,
                    value: None,
                    issues: Vec::new(),
                    attempts: 0,
                    duration_ms: 0,
                    error: Some(e.to_string()),
                },
            };

            if outcome.is_success() {
                if let Some(value) = &outcome.value {
                    context.insert(step.step_id.clone(), step.bind_outputs(value));
                    output = Some(value.clone());
                }
            } else if step.optional {
                warn!(
                    chain_id = %chain.id,
                    step_id = %step.step_id,
                    status = %outcome.status,
                    "Optional step did not succeed, continuing"
                );
            } else {
                warn!(
                    chain_id = %chain.id,
                    step_id = %step.step_id,
                    status = %outcome.status,
                    "Required step did not succeed, stopping chain"
                );
                abort_error = Some(format!(
                    "step '{}' {}: {}",
                    step.step_id,
                    outcome.status,
                    outcome
                        .error
                        .clone()
                        .unwrap_or_else(|| outcome.issues.join("; "))
                ));
            }

            traces.push(StepTrace {
                index,
                step_id: step.step_id.clone(),
                optional: step.optional,
                arguments,
                outcome,
            });

            if abort_error.is_some() {
                break;
            }
        }

        let any_success = traces.iter().any(|t| t.outcome.is_success());
        let status = match (&abort_error, any_success) {
            (None, _) => OutcomeStatus::Success,
            (Some(_), true) => OutcomeStatus::Partial,
            (Some(_), false) => OutcomeStatus::Failed,
        };

        let result = ChainResult {
            chain_id: chain.id.clone(),
            status,
            steps: traces,
            output,
            steps_total: chain.steps.len(),
            duration_ms: start.elapsed().as_millis() as u64,
            error: abort_error,
        };

        info!(
            chain_id = %result.chain_id,
            status = %result.status,
            steps_succeeded = result.steps_succeeded(),
            steps_total = result.steps_total,
            duration_ms = result.duration_ms,
            "Tool chain finished"
        );
        Ok(result)
    }
}
