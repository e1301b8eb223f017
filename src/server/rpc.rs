//! JSON-RPC 2.0 transport over line-delimited stdio.
//!
//! Each request is one line of JSON; each response is written as one line.
//! Notifications (requests without an `id`) never get a response.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

use super::{handle_method, SharedState};
use crate::error::{
    AppError, DecisionError, ProtocolError, ReasoningError, RiskError, ServiceError, ToolError,
};

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
/// Application failure that is not a contract violation.
pub const SERVER_ERROR: i32 = -32000;

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request identifier (None for notifications).
    pub id: Option<Value>,
    /// The method name to invoke.
    pub method: String,
    /// Optional parameters for the method.
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request identifier, null when it could not be read.
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// Map an application error onto a JSON-RPC error code.
pub fn error_code(err: &AppError) -> i32 {
    match err {
        AppError::Protocol(ProtocolError::UnknownMethod { .. }) => METHOD_NOT_FOUND,
        AppError::Protocol(ProtocolError::InvalidParams { .. })
        | AppError::Reasoning(ReasoningError::InvalidRequest { .. })
        | AppError::Tool(ToolError::UnknownTool { .. })
        | AppError::Tool(ToolError::InvalidArguments { .. })
        | AppError::Decision(DecisionError::InvalidCriteriaWeights { .. })
        | AppError::Decision(DecisionError::InsufficientSamples { .. })
        | AppError::Decision(DecisionError::Validation { .. })
        | AppError::Decision(DecisionError::TooManyPaths { .. })
        | AppError::Risk(RiskError::UnknownRiskMethod { .. })
        | AppError::Risk(RiskError::Validation { .. })
        | AppError::Service(ServiceError::DuplicateInstance { .. })
        | AppError::Service(ServiceError::UnknownStrategy { .. }) => INVALID_PARAMS,
        AppError::Protocol(ProtocolError::Json(_)) | AppError::Internal { .. } => INTERNAL_ERROR,
        _ => SERVER_ERROR,
    }
}

/// JSON-RPC server over the application state.
pub struct RpcServer {
    state: SharedState,
}

impl RpcServer {
    /// Create a new server
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Serve stdin/stdout until EOF.
    pub async fn run(&self) -> std::io::Result<()> {
        info!("JSON-RPC server listening on stdio");
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.serve(stdin, stdout).await
    }

    /// Serve any line-oriented reader/writer pair until EOF.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            // EOF reached
            if bytes_read == 0 {
                info!("EOF received, shutting down");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if let Some(response) = self.handle_line(trimmed).await {
                let response_json = serde_json::to_string(&response)?;
                debug!(response = %response_json, "Sending response");

                writer.write_all(response_json.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }

        Ok(())
    }

    /// Handle one raw request line. Returns `None` for notifications.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        debug!(request = %line, "Received request");
        match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => {
                error!(error = %e, "Failed to parse request");
                Some(JsonRpcResponse::error(None, PARSE_ERROR, format!("Parse error: {}", e)))
            }
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let is_notification = request.id.is_none();

        if request.jsonrpc != "2.0" {
            return (!is_notification).then(|| {
                JsonRpcResponse::error(
                    request.id.clone(),
                    INVALID_REQUEST,
                    format!("Unsupported jsonrpc version: {}", request.jsonrpc),
                )
            });
        }

        if request.method == "ping" {
            return (!is_notification)
                .then(|| JsonRpcResponse::success(request.id.clone(), Value::Object(Default::default())));
        }

        let result = handle_method(&self.state, &request.method, request.params).await;
        if is_notification {
            if let Err(e) = result {
                debug!(method = %request.method, error = %e, "Notification failed");
            }
            return None;
        }

        Some(match result {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(e) => {
                let code = error_code(&e);
                error!(method = %request.method, code, error = %e, "Request failed");
                JsonRpcResponse::error(request.id, code, e.to_string())
            }
        })
    }
}
