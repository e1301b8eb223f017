use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error};

use super::{GraphQuery, GraphRow, GraphStore};
use crate::config::GraphConfig;
use crate::error::{GraphError, GraphResult};

/// Graph store speaking the Neo4j transactional HTTP API.
#[derive(Clone)]
pub struct HttpGraphStore {
    client: Client,
    commit_url: String,
    user: Option<String>,
    password: Option<String>,
    timeout_ms: u64,
}

#[derive(Serialize)]
struct CommitRequest<'a> {
    statements: [Statement<'a>; 1],
}

#[derive(Serialize)]
struct Statement<'a> {
    statement: &'a str,
    parameters: &'a Map<String, Value>,
}

#[derive(Deserialize)]
struct CommitResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<StatementError>,
}

#[derive(Deserialize)]
struct StatementResult {
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<RowData>,
}

#[derive(Deserialize)]
struct RowData {
    row: Vec<Value>,
}

#[derive(Deserialize)]
struct StatementError {
    code: String,
    message: String,
}

impl HttpGraphStore {
    /// Create a store client for `config`.
    pub fn new(config: &GraphConfig, timeout_ms: u64) -> GraphResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| GraphError::Unavailable {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            commit_url: format!(
                "{}/db/{}/tx/commit",
                config.url.trim_end_matches('/'),
                config.database
            ),
            user: config.user.clone(),
            password: config.password.clone(),
            timeout_ms,
        })
    }

    /// Endpoint used for auto-commit transactions.
    pub fn commit_url(&self) -> &str {
        &self.commit_url
    }
}

#[async_trait]
impl GraphStore for HttpGraphStore {
    async fn query(&self, query: &GraphQuery) -> GraphResult<Vec<GraphRow>> {
        let body = CommitRequest {
            statements: [Statement {
                statement: &query.statement,
                parameters: &query.params,
            }],
        };

        let mut request = self.client.post(&self.commit_url).json(&body);
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_deref());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GraphError::Timeout {
                    timeout_ms: self.timeout_ms,
                }
            } else {
                GraphError::Unavailable {
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %text, "Graph store returned error status");
            return Err(GraphError::Unavailable {
                message: format!("HTTP {}: {}", status.as_u16(), text),
            });
        }

        let parsed: CommitResponse = response.json().await.map_err(|e| GraphError::Unavailable {
            message: format!("Failed to parse graph response: {}", e),
        })?;

        if let Some(err) = parsed.errors.first() {
            return Err(GraphError::InvalidQuery {
                message: format!("{}: {}", err.code, err.message),
            });
        }

        let rows: Vec<GraphRow> = parsed
            .results
            .into_iter()
            .flat_map(|result| {
                let columns = result.columns;
                result.data.into_iter().map(move |data| {
                    columns
                        .iter()
                        .cloned()
                        .zip(data.row)
                        .collect::<Map<String, Value>>()
                })
            })
            .collect();

        debug!(rows = rows.len(), "Graph query returned rows");
        Ok(rows)
    }
}
