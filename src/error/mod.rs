use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Reasoning error: {0}")]
    Reasoning(#[from] ReasoningError),

    #[error("Decision error: {0}")]
    Decision(#[from] DecisionError),

    #[error("Risk error: {0}")]
    Risk(#[from] RiskError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Reasoning trace not found: {chain_id}")]
    TraceNotFound { chain_id: String },

    #[error("Risk alert not found: {alert_id}")]
    AlertNotFound { alert_id: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// LLM adapter errors
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Tool framework errors
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool already registered: {name}")]
    DuplicateTool { name: String },

    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid arguments for {tool}: {field} - {reason}")]
    InvalidArguments {
        tool: String,
        field: String,
        reason: String,
    },

    #[error("Tool execution failed: {message}")]
    Execution { message: String },

    #[error("Tool {tool} timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    #[error("Circuit open for tool {tool}")]
    CircuitOpen { tool: String },
}

impl ToolError {
    /// Whether the failure is worth retrying at the tool boundary.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ToolError::Execution { .. })
    }
}

/// Graph store errors
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Graph store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Graph query timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Invalid graph query: {message}")]
    InvalidQuery { message: String },
}

/// Reasoning engine errors
#[derive(Debug, Error)]
pub enum ReasoningError {
    #[error("Invalid reasoning request: {field} - {reason}")]
    InvalidRequest { field: String, reason: String },
}

/// Decision analyzer errors
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("Criteria weights must sum to 1.0 (got {sum:.6})")]
    InvalidCriteriaWeights { sum: f64 },

    #[error("Monte Carlo simulation needs at least {minimum} iterations (got {requested})")]
    InsufficientSamples { requested: usize, minimum: usize },

    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("Decision tree would expand to {paths} paths (limit {limit})")]
    TooManyPaths { paths: usize, limit: usize },

    #[error("Simulation timed out after {timeout_ms}ms")]
    SimulationTimeout { timeout_ms: u64 },

    #[error("Simulation task failed: {message}")]
    SimulationFailed { message: String },
}

/// Risk engine errors
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("Unknown risk method: {method}")]
    UnknownRiskMethod { method: String },

    #[error("Risk alert not found: {alert_id}")]
    AlertNotFound { alert_id: String },

    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },
}

/// Service discovery errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("No healthy instance available ({registered} registered)")]
    NoHealthyInstance { registered: usize },

    #[error("Service instance not found: {instance_id}")]
    InstanceNotFound { instance_id: String },

    #[error("Service instance already registered: {instance_id}")]
    DuplicateInstance { instance_id: String },

    #[error("Unknown load balancing strategy: {strategy}")]
    UnknownStrategy { strategy: String },
}

/// Concurrent executor errors
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("execute_sync cannot block inside a current-thread runtime")]
    BlockingInCurrentThreadRuntime,

    #[error("Failed to build runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Request contract errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unknown method: {method}")]
    UnknownMethod { method: String },

    #[error("Invalid parameters for {method}: {message}")]
    InvalidParams { method: String, message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Result type alias for tool operations
pub type ToolResult<T> = Result<T, ToolError>;

/// Result type alias for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Result type alias for decision analysis
pub type DecisionResult<T> = Result<T, DecisionError>;

/// Result type alias for risk operations
pub type RiskResult<T> = Result<T, RiskError>;

/// Result type alias for service discovery
pub type ServiceResult<T> = Result<T, ServiceError>;
