//! Concrete tool variants registered at startup.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{json, Map, Value};

use super::types::{Capability, OutputSpec, ParamSpec, Tool, ToolSchema, ValueType};
use crate::config::{LlmConfig, RequestConfig};
use crate::error::{GraphError, LlmError, LlmResult, ToolError, ToolResult};
use crate::graph::GraphReasoner;
use crate::llm::{CompletionParams, LlmClient};

// ============================================================================
// Closure-backed tool
// ============================================================================

type AsyncHandler = dyn Fn(Map<String, Value>) -> BoxFuture<'static, ToolResult<Value>> + Send + Sync;
type SyncHandler = dyn Fn(&Map<String, Value>) -> ToolResult<Value> + Send + Sync;

enum Handler {
    Async(Box<AsyncHandler>),
    Sync(Box<SyncHandler>),
}

/// A tool backed by a closure.
pub struct FnTool {
    schema: ToolSchema,
    handler: Handler,
}

impl FnTool {
    /// Wrap an async closure. The closure receives an owned copy of the arguments.
    pub fn new<F>(schema: ToolSchema, f: F) -> Self
    where
        F: Fn(Map<String, Value>) -> BoxFuture<'static, ToolResult<Value>> + Send + Sync + 'static,
    {
        Self {
            schema,
            handler: Handler::Async(Box::new(f)),
        }
    }

    /// Wrap a synchronous closure.
    pub fn from_fn<F>(schema: ToolSchema, f: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> ToolResult<Value> + Send + Sync + 'static,
    {
        Self {
            schema,
            handler: Handler::Sync(Box::new(f)),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn invoke(&self, args: &Map<String, Value>) -> ToolResult<Value> {
        match &self.handler {
            Handler::Async(f) => f(args.clone()).await,
            Handler::Sync(f) => f(args),
        }
    }
}

// ============================================================================
// LLM completion tool
// ============================================================================

/// Completes a prompt through the configured LLM endpoint.
pub struct LlmTool {
    schema: ToolSchema,
    client: LlmClient,
}

impl LlmTool {
    /// Tool name used at registration.
    pub const NAME: &'static str = "llm_complete";

    /// Build the tool's client from configuration.
    ///
    /// The client makes a single attempt per call; retries belong to the
    /// [`ToolExecutor`](super::ToolExecutor) running the tool.
    pub fn from_config(config: &LlmConfig, request: &RequestConfig) -> LlmResult<Self> {
        let client = LlmClient::new(
            config,
            RequestConfig {
                max_retries: 0,
                ..request.clone()
            },
        )?;
        Ok(Self::new(client))
    }

    /// Wrap a client as is, keeping its own retry policy.
    pub fn new(client: LlmClient) -> Self {
        let schema = ToolSchema::new(Self::NAME, "Complete a prompt with a language model")
            .with_param(
                ParamSpec::required("prompt", ValueType::String).with_description("User prompt"),
            )
            .with_param(ParamSpec::optional("system", ValueType::String))
            .with_param(ParamSpec::optional("temperature", ValueType::Number))
            .with_param(ParamSpec::optional("max_tokens", ValueType::Integer))
            .with_capability(Capability::ReadOnly)
            .with_capability(Capability::ExternalCall)
            .with_reliability(0.85)
            .with_output(OutputSpec::of(ValueType::Object).with_required_fields(["text"]));
        Self { schema, client }
    }
}

#[async_trait]
impl Tool for LlmTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn invoke(&self, args: &Map<String, Value>) -> ToolResult<Value> {
        let prompt = args.get("prompt").and_then(Value::as_str).unwrap_or_default();
        let mut params = CompletionParams::default();
        if let Some(system) = args.get("system").and_then(Value::as_str) {
            params = params.with_system(system);
        }
        if let Some(temperature) = args.get("temperature").and_then(Value::as_f64) {
            params = params.with_temperature(temperature);
        }
        if let Some(max_tokens) = args.get("max_tokens").and_then(Value::as_u64) {
            params = params.with_max_tokens(max_tokens.min(u64::from(u32::MAX)) as u32);
        }

        let text = self.client.complete(prompt, &params).await.map_err(|e| match e {
            LlmError::Timeout { timeout_ms } => ToolError::Timeout {
                tool: Self::NAME.to_string(),
                timeout_ms,
            },
            other => ToolError::Execution {
                message: other.to_string(),
            },
        })?;

        Ok(json!({ "text": text, "model": self.client.model() }))
    }
}

// ============================================================================
// Graph question tool
// ============================================================================

/// Answers a question from the knowledge graph.
pub struct GraphQuestionTool {
    schema: ToolSchema,
    reasoner: Arc<GraphReasoner>,
}

impl GraphQuestionTool {
    /// Tool name used at registration.
    pub const NAME: &'static str = "graph_answer";

    /// Wrap a graph reasoner.
    pub fn new(reasoner: Arc<GraphReasoner>) -> Self {
        let schema = ToolSchema::new(Self::NAME, "Look up facts related to a question in the knowledge graph")
            .with_param(ParamSpec::required("question", ValueType::String))
            .with_capability(Capability::ReadOnly)
            .with_capability(Capability::ExternalCall)
            .with_reliability(0.9)
            .with_output(
                OutputSpec::of(ValueType::Object)
                    .with_required_fields(["facts", "coverage"])
                    .with_range(Some("coverage"), 0.0, 1.0),
            );
        Self { schema, reasoner }
    }
}

#[async_trait]
impl Tool for GraphQuestionTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn invoke(&self, args: &Map<String, Value>) -> ToolResult<Value> {
        let question = args.get("question").and_then(Value::as_str).unwrap_or_default();
        let answer = self
            .reasoner
            .answer_question(question)
            .await
            .map_err(|e| match e {
                GraphError::Timeout { timeout_ms } => ToolError::Timeout {
                    tool: Self::NAME.to_string(),
                    timeout_ms,
                },
                other => ToolError::Execution {
                    message: other.to_string(),
                },
            })?;
        serde_json::to_value(answer).map_err(|e| ToolError::Execution {
            message: format!("Failed to encode graph answer: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphQuery, GraphRow, GraphStore};
    use crate::error::GraphResult;
    use futures::FutureExt;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fn_tool_sync_and_async() {
        let sync = FnTool::from_fn(ToolSchema::new("double", ""), |args| {
            let x = args.get("x").and_then(Value::as_f64).unwrap_or(0.0);
            Ok(json!(x * 2.0))
        });
        let mut args = Map::new();
        args.insert("x".into(), json!(2.5));
        assert_eq!(sync.invoke(&args).await.unwrap(), json!(5.0));
        assert_eq!(sync.name(), "double");

        let asynchronous = FnTool::new(ToolSchema::new("echo", ""), |args| {
            async move { Ok(Value::Object(args)) }.boxed()
        });
        assert_eq!(asynchronous.invoke(&args).await.unwrap(), json!({"x": 2.5}));
    }

    struct DownStore;

    #[async_trait]
    impl GraphStore for DownStore {
        async fn query(&self, _query: &GraphQuery) -> GraphResult<Vec<GraphRow>> {
            Err(GraphError::Unavailable {
                message: "connection refused".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_graph_tool_maps_unavailable_to_execution_error() {
        let reasoner = Arc::new(GraphReasoner::new(Arc::new(DownStore), Duration::from_secs(1)));
        let tool = GraphQuestionTool::new(reasoner);
        let mut args = Map::new();
        args.insert("question".into(), json!("steel supplier risk"));
        let err = tool.invoke(&args).await.unwrap_err();
        assert!(matches!(err, ToolError::Execution { .. }));
        assert!(tool.schema().capabilities.contains(&Capability::ExternalCall));
    }
}
