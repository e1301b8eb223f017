use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;
use crate::performance::EvictionPolicy;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub llm: Option<LlmConfig>,
    pub graph: Option<GraphConfig>,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub reasoning: ReasoningConfig,
    pub decision: DecisionConfig,
    pub risk: RiskConfig,
    pub cache: CacheConfig,
    pub executor: ExecutorConfig,
    pub discovery: DiscoveryConfig,
}

/// LLM completion endpoint configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

/// Graph store endpoint configuration
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub url: String,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Outbound request configuration shared by tools, the LLM client and the graph store
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Reasoning engine tuning
#[derive(Debug, Clone)]
pub struct ReasoningConfig {
    pub confidence_target: f64,
    pub confidence_floor: f64,
    pub step_budget: usize,
    pub step_timeout_ms: u64,
}

/// Decision analyzer tuning
#[derive(Debug, Clone)]
pub struct DecisionConfig {
    pub weight_epsilon: f64,
    pub max_paths: usize,
    pub sensitivity_threshold: f64,
    pub simulation_timeout_ms: u64,
}

/// Risk engine tuning
#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub alert_threshold: f64,
    pub monte_carlo_iterations: usize,
    pub seed: u64,
    pub prior_strength: f64,
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub capacity: usize,
    pub policy: EvictionPolicy,
    pub ttl_ms: Option<u64>,
    pub sweep_interval_ms: u64,
}

/// Concurrent executor configuration
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_parallelism: usize,
    pub task_timeout_ms: u64,
}

/// Service registry and health loop configuration
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub heartbeat_timeout_ms: u64,
    pub health_check_interval_ms: u64,
}

/// Longest delay between two retries.
pub const MAX_RETRY_DELAY_MS: u64 = 60_000;

/// Exponential backoff before retry number `retry` (1-based), capped at
/// [`MAX_RETRY_DELAY_MS`].
pub fn backoff_delay(base_ms: u64, retry: u32) -> Duration {
    let factor = 2_u64.checked_pow(retry.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor).min(MAX_RETRY_DELAY_MS))
}

/// Parse an environment variable, falling back to `default` when unset or malformed.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let llm = env::var("LLM_API_KEY").ok().map(|api_key| LlmConfig {
            api_key,
            base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
            model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        });

        let graph = env::var("GRAPH_URL").ok().map(|url| GraphConfig {
            url,
            database: env::var("GRAPH_DATABASE").unwrap_or_else(|_| "neo4j".to_string()),
            user: env::var("GRAPH_USER").ok(),
            password: env::var("GRAPH_PASSWORD").ok(),
        });

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/reasoning.db".to_string()),
            ),
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: env_or("REQUEST_TIMEOUT_MS", 30000),
            max_retries: env_or("MAX_RETRIES", 3),
            retry_delay_ms: env_or("RETRY_DELAY_MS", 1000),
        };

        let reasoning = ReasoningConfig {
            confidence_target: env_or("REASONING_CONFIDENCE_TARGET", 0.8),
            confidence_floor: env_or("REASONING_CONFIDENCE_FLOOR", 0.3),
            step_budget: env_or("REASONING_STEP_BUDGET", 32),
            step_timeout_ms: env_or("REASONING_STEP_TIMEOUT_MS", 10000),
        };
        if reasoning.confidence_floor >= reasoning.confidence_target {
            return Err(AppError::Config {
                message: format!(
                    "REASONING_CONFIDENCE_FLOOR ({}) must be below REASONING_CONFIDENCE_TARGET ({})",
                    reasoning.confidence_floor, reasoning.confidence_target
                ),
            });
        }

        let decision = DecisionConfig {
            weight_epsilon: env_or("DECISION_WEIGHT_EPSILON", 1e-6),
            max_paths: env_or("DECISION_MAX_PATHS", 10_000),
            sensitivity_threshold: env_or("DECISION_SENSITIVITY_THRESHOLD", 0.1),
            simulation_timeout_ms: env_or("SIMULATION_TIMEOUT_MS", 5000),
        };

        let risk = RiskConfig {
            alert_threshold: env_or("RISK_ALERT_THRESHOLD", 0.7),
            monte_carlo_iterations: env_or("RISK_MONTE_CARLO_ITERATIONS", 1000),
            seed: env_or("RISK_SEED", 42),
            prior_strength: env_or("RISK_PRIOR_STRENGTH", 10.0),
        };

        let cache = CacheConfig {
            capacity: env_or("CACHE_CAPACITY", 1024),
            policy: match env::var("CACHE_POLICY") {
                Ok(raw) => raw.parse().map_err(|message| AppError::Config { message })?,
                Err(_) => EvictionPolicy::Lru,
            },
            ttl_ms: env::var("CACHE_TTL_MS").ok().and_then(|s| s.parse().ok()),
            sweep_interval_ms: env_or("CACHE_SWEEP_INTERVAL_MS", 60_000),
        };

        let executor = ExecutorConfig {
            max_parallelism: env_or("EXECUTOR_MAX_PARALLELISM", 16),
            task_timeout_ms: env_or("EXECUTOR_TASK_TIMEOUT_MS", 30000),
        };

        let discovery = DiscoveryConfig {
            heartbeat_timeout_ms: env_or("HEARTBEAT_TIMEOUT_MS", 30000),
            health_check_interval_ms: env_or("HEALTH_CHECK_INTERVAL_MS", 10000),
        };

        Ok(Config {
            llm,
            graph,
            database,
            logging,
            request,
            reasoning,
            decision,
            risk,
            cache,
            executor,
            discovery,
        })
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/reasoning.db"),
            max_connections: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            confidence_target: 0.8,
            confidence_floor: 0.3,
            step_budget: 32,
            step_timeout_ms: 10000,
        }
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            weight_epsilon: 1e-6,
            max_paths: 10_000,
            sensitivity_threshold: 0.1,
            simulation_timeout_ms: 5000,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            alert_threshold: 0.7,
            monte_carlo_iterations: 1000,
            seed: 42,
            prior_strength: 10.0,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            policy: EvictionPolicy::Lru,
            ttl_ms: None,
            sweep_interval_ms: 60_000,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallelism: 16,
            task_timeout_ms: 30000,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 30000,
            health_check_interval_ms: 10000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        let config = Config::default();
        assert!(config.llm.is_none());
        assert!(config.graph.is_none());
        assert!(config.reasoning.confidence_floor < config.reasoning.confidence_target);
        assert_eq!(config.cache.policy, EvictionPolicy::Lru);
        assert_eq!(config.risk.alert_threshold, 0.7);
        assert_eq!(config.request.max_retries, 3);
    }

    #[test]
    fn test_backoff_doubles_and_saturates() {
        assert_eq!(backoff_delay(100, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(100, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(1000, 64), Duration::from_millis(MAX_RETRY_DELAY_MS));
        assert_eq!(backoff_delay(u64::MAX, 200), Duration::from_millis(MAX_RETRY_DELAY_MS));
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        env::set_var("ARC_TEST_ENV_OR_GARBAGE", "not-a-number");
        let value: u64 = env_or("ARC_TEST_ENV_OR_GARBAGE", 7);
        assert_eq!(value, 7);
        env::remove_var("ARC_TEST_ENV_OR_GARBAGE");
    }
}
