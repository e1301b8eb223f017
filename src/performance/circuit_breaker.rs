//! Per-dependency circuit breaking.
//!
//! A breaker trips after `failure_threshold` consecutive failures and
//! rejects calls until its cool-down deadline passes. The first call after
//! the deadline starts a trial: `success_threshold` consecutive trial successes
//! close the breaker, any trial failure trips it again.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Trip and recovery thresholds.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    /// Cool-down after tripping.
    pub recovery_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout_ms: 30_000,
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed { failures: u32 },
    Open { until: Instant },
    Trial { successes: u32 },
}

/// Breaker guarding one named dependency.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    phase: Phase,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// A closed breaker for `name`.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            phase: Phase::Closed { failures: 0 },
            config,
        }
    }

    /// Ask to make a call. `Err` carries the remaining cool-down.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        if let Phase::Open { until } = self.phase {
            let now = Instant::now();
            if now < until {
                return Err(until - now);
            }
            info!(dependency = %self.name, "Circuit cool-down elapsed, trial calls allowed");
            self.phase = Phase::Trial { successes: 0 };
        }
        Ok(())
    }

    /// Feed back the result of an acquired call.
    pub fn record(&mut self, success: bool) {
        self.phase = match (self.phase, success) {
            (Phase::Closed { .. }, true) => Phase::Closed { failures: 0 },
            (Phase::Closed { failures }, false) if failures + 1 >= self.config.failure_threshold => {
                warn!(dependency = %self.name, failures = failures + 1, "Circuit tripped");
                self.trip()
            }
            (Phase::Closed { failures }, false) => Phase::Closed { failures: failures + 1 },
            (Phase::Trial { successes }, true) if successes + 1 >= self.config.success_threshold => {
                info!(dependency = %self.name, "Circuit closed");
                Phase::Closed { failures: 0 }
            }
            (Phase::Trial { successes }, true) => Phase::Trial { successes: successes + 1 },
            (Phase::Trial { .. }, false) => {
                warn!(dependency = %self.name, "Trial call failed, circuit reopened");
                self.trip()
            }
            // Late results from calls started before the trip.
            (open @ Phase::Open { .. }, _) => open,
        };
    }

    fn trip(&self) -> Phase {
        Phase::Open {
            until: Instant::now() + Duration::from_millis(self.config.recovery_timeout_ms),
        }
    }

    pub fn state(&self) -> CircuitState {
        match self.phase {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::Trial { .. } => CircuitState::HalfOpen,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(recovery_timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "lookup",
            CircuitBreakerConfig {
                failure_threshold: 3,
                success_threshold: 2,
                recovery_timeout_ms,
            },
        )
    }

    #[test]
    fn test_trips_on_consecutive_failures_only() {
        let mut cb = breaker(60_000);
        cb.record(false);
        cb.record(false);
        cb.record(true);
        cb.record(false);
        cb.record(false);
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record(false);
        assert_eq!(cb.state(), CircuitState::Open);
        let remaining = cb.try_acquire().unwrap_err();
        assert!(remaining > Duration::from_secs(59));
    }

    #[test]
    fn test_trial_successes_close() {
        let mut cb = breaker(0);
        for _ in 0..3 {
            cb.record(false);
        }
        assert!(cb.try_acquire().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record(true);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record(true);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_trial_failure_reopens() {
        let mut cb = breaker(0);
        for _ in 0..3 {
            cb.record(false);
        }
        cb.try_acquire().unwrap();
        cb.record(false);
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
