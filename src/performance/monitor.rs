//! Latency tracking and system health aggregation.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

// ============================================================================
// Latency
// ============================================================================

/// Latency percentiles for one operation, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub operation: String,
    pub count: usize,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl LatencyStats {
    /// Compute stats from raw samples using nearest-rank percentiles.
    pub fn from_samples(operation: impl Into<String>, samples: &[f64]) -> Self {
        let operation = operation.into();
        if samples.is_empty() {
            return Self {
                operation,
                ..Default::default()
            };
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
        Self {
            operation,
            count: sorted.len(),
            mean_ms: mean,
            p50_ms: percentile(&sorted, 0.50),
            p95_ms: percentile(&sorted, 0.95),
            p99_ms: percentile(&sorted, 0.99),
            max_ms: sorted[sorted.len() - 1],
        }
    }
}

/// Nearest-rank percentile over an ascending, non-empty slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let rank = (sorted.len() as f64 * q).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

// ============================================================================
// Health
// ============================================================================

/// Health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Health of one component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl ComponentHealth {
    /// A healthy component.
    pub fn healthy(component: impl Into<String>) -> Self {
        Self::new(component, HealthStatus::Healthy, None)
    }

    /// A component with an explicit status and message.
    pub fn new(component: impl Into<String>, status: HealthStatus, message: Option<String>) -> Self {
        Self {
            component: component.into(),
            status,
            message,
            checked_at: Utc::now(),
        }
    }
}

/// Aggregated health of the whole process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
    pub latency: Vec<LatencyStats>,
    pub checked_at: DateTime<Utc>,
}

impl SystemHealth {
    /// Aggregate components: all healthy is healthy, all unhealthy is
    /// unhealthy, anything else is degraded. No components counts as healthy.
    pub fn aggregate(components: Vec<ComponentHealth>, latency: Vec<LatencyStats>) -> Self {
        let status = if components.iter().all(|c| c.status == HealthStatus::Healthy) {
            HealthStatus::Healthy
        } else if components.iter().all(|c| c.status == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };
        Self {
            status,
            components,
            latency,
            checked_at: Utc::now(),
        }
    }
}

// ============================================================================
// Monitor
// ============================================================================

/// Records per-operation latency samples in bounded windows.
pub struct PerformanceMonitor {
    samples: Mutex<HashMap<String, VecDeque<f64>>>,
    window: usize,
}

impl PerformanceMonitor {
    /// Keep at most `window` samples per operation.
    pub fn new(window: usize) -> Self {
        Self {
            samples: Mutex::new(HashMap::new()),
            window: window.max(1),
        }
    }

    /// Record one observation.
    pub fn record(&self, operation: &str, latency: Duration) {
        let ms = latency.as_secs_f64() * 1000.0;
        let mut samples = self.samples.lock();
        let window = samples.entry(operation.to_string()).or_default();
        if window.len() == self.window {
            window.pop_front();
        }
        window.push_back(ms);
        debug!(operation = %operation, latency_ms = ms, "Recorded latency");
    }

    /// Stats for one operation, if any sample exists.
    pub fn latency_stats(&self, operation: &str) -> Option<LatencyStats> {
        let samples = self.samples.lock();
        samples.get(operation).map(|window| {
            let values: Vec<f64> = window.iter().copied().collect();
            LatencyStats::from_samples(operation, &values)
        })
    }

    /// Stats for every operation, sorted by name.
    pub fn all_stats(&self) -> Vec<LatencyStats> {
        let samples = self.samples.lock();
        let mut stats: Vec<_> = samples
            .iter()
            .map(|(op, window)| {
                let values: Vec<f64> = window.iter().copied().collect();
                LatencyStats::from_samples(op.clone(), &values)
            })
            .collect();
        stats.sort_by(|a, b| a.operation.cmp(&b.operation));
        stats
    }

    /// Aggregate component health together with the current latency stats.
    pub fn system_health(&self, components: Vec<ComponentHealth>) -> SystemHealth {
        SystemHealth::aggregate(components, self.all_stats())
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(1024)
    }
}
