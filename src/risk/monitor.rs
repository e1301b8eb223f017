//! Threshold monitoring and alert lifecycle.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::types::{AlertState, RiskAlert, RiskCategory, RiskFactor};
use crate::error::{RiskError, RiskResult};

/// Receives newly opened alerts.
///
/// Handlers run synchronously inside [`RiskMonitor::evaluate`]. Errors and
/// panics are logged and never reach the caller.
pub trait AlertHandler: Send + Sync {
    fn handle(&self, alert: &RiskAlert) -> anyhow::Result<()>;
}

impl<F> AlertHandler for F
where
    F: Fn(&RiskAlert) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, alert: &RiskAlert) -> anyhow::Result<()> {
        self(alert)
    }
}

/// Alert thresholds, optionally per category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub default: f64,
    #[serde(default)]
    pub per_category: HashMap<RiskCategory, f64>,
}

impl RiskThresholds {
    pub fn new(default: f64) -> Self {
        Self {
            default,
            per_category: HashMap::new(),
        }
    }

    pub fn with_category(mut self, category: RiskCategory, threshold: f64) -> Self {
        self.per_category.insert(category, threshold);
        self
    }

    pub fn threshold_for(&self, category: RiskCategory) -> f64 {
        self.per_category.get(&category).copied().unwrap_or(self.default)
    }
}

/// One state change in the alert history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub alert_id: String,
    pub state: AlertState,
    pub at: DateTime<Utc>,
}

/// How long resolved alerts are kept by default.
const DEFAULT_RESOLVED_RETENTION_HOURS: i64 = 24;

/// Tracks alerts raised by threshold crossings.
///
/// Resolved alerts older than the retention window are dropped, together
/// with their history, on the next [`RiskMonitor::evaluate`].
pub struct RiskMonitor {
    handlers: RwLock<Vec<Arc<dyn AlertHandler>>>,
    alerts: RwLock<IndexMap<String, RiskAlert>>,
    history: Mutex<Vec<AlertEvent>>,
    retention: chrono::Duration,
}

impl Default for RiskMonitor {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            alerts: RwLock::new(IndexMap::new()),
            history: Mutex::new(Vec::new()),
            retention: chrono::Duration::hours(DEFAULT_RESOLVED_RETENTION_HOURS),
        }
    }
}

impl RiskMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep resolved alerts for `retention` after resolution.
    pub fn with_retention(mut self, retention: chrono::Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Register a handler for alerts opened from now on.
    pub fn add_handler(&self, handler: Arc<dyn AlertHandler>) {
        self.handlers.write().push(handler);
    }

    /// Open an alert for every factor whose score reaches its threshold.
    ///
    /// A factor that already has an unresolved alert does not get a second
    /// one. Returns the alerts opened by this call.
    pub fn evaluate(&self, factors: &[RiskFactor], thresholds: &RiskThresholds) -> Vec<RiskAlert> {
        self.prune_resolved(self.retention);
        let mut opened = Vec::new();
        {
            let mut alerts = self.alerts.write();
            for factor in factors {
                let threshold = thresholds.threshold_for(factor.category);
                if factor.score < threshold {
                    continue;
                }
                let already_open = alerts
                    .values()
                    .any(|a| !a.is_resolved() && a.factor_ids.contains(&factor.id));
                if already_open {
                    continue;
                }
                let alert = RiskAlert::for_factor(factor, threshold);
                info!(
                    alert_id = %alert.id,
                    factor = %factor.name,
                    score = factor.score,
                    threshold = threshold,
                    "Risk alert opened"
                );
                alerts.insert(alert.id.clone(), alert.clone());
                opened.push(alert);
            }
        }

        for alert in &opened {
            self.record(&alert.id, AlertState::Open);
            self.dispatch(alert);
        }
        opened
    }

    fn dispatch(&self, alert: &RiskAlert) {
        let handlers = self.handlers.read().clone();
        for (index, handler) in handlers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(alert))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(alert_id = %alert.id, handler = index, error = %e, "Alert handler failed"),
                Err(_) => error!(alert_id = %alert.id, handler = index, "Alert handler panicked"),
            }
        }
    }

    fn record(&self, alert_id: &str, state: AlertState) {
        self.history.lock().push(AlertEvent {
            alert_id: alert_id.to_string(),
            state,
            at: Utc::now(),
        });
    }

    fn transition(&self, alert_id: &str, apply: impl FnOnce(&mut RiskAlert) -> bool) -> RiskResult<RiskAlert> {
        let (alert, changed) = {
            let mut alerts = self.alerts.write();
            let alert = alerts.get_mut(alert_id).ok_or_else(|| RiskError::AlertNotFound {
                alert_id: alert_id.to_string(),
            })?;
            let changed = apply(alert);
            (alert.clone(), changed)
        };
        if changed {
            info!(alert_id = %alert_id, state = %alert.state, "Risk alert updated");
            self.record(alert_id, alert.state);
        } else {
            warn!(alert_id = %alert_id, state = %alert.state, "Risk alert transition ignored");
        }
        Ok(alert)
    }

    /// Acknowledge an open alert. Repeated calls have no effect.
    ///
    /// # Errors
    /// [`RiskError::AlertNotFound`] for an unknown id.
    pub fn acknowledge(&self, alert_id: &str) -> RiskResult<RiskAlert> {
        self.transition(alert_id, RiskAlert::acknowledge)
    }

    /// Resolve an alert. Repeated calls have no effect.
    ///
    /// # Errors
    /// [`RiskError::AlertNotFound`] for an unknown id.
    pub fn resolve(&self, alert_id: &str) -> RiskResult<RiskAlert> {
        self.transition(alert_id, RiskAlert::resolve)
    }

    pub fn get(&self, alert_id: &str) -> Option<RiskAlert> {
        self.alerts.read().get(alert_id).cloned()
    }

    /// All alerts in creation order.
    pub fn alerts(&self) -> Vec<RiskAlert> {
        self.alerts.read().values().cloned().collect()
    }

    /// Alerts that are not resolved.
    pub fn open_alerts(&self) -> Vec<RiskAlert> {
        self.alerts
            .read()
            .values()
            .filter(|a| !a.is_resolved())
            .cloned()
            .collect()
    }

    /// Drop alerts resolved more than `older_than` ago, and their history.
    /// Returns how many were dropped.
    pub fn prune_resolved(&self, older_than: chrono::Duration) -> usize {
        let cutoff = Utc::now() - older_than;
        let pruned: Vec<String> = {
            let mut alerts = self.alerts.write();
            let expired: Vec<String> = alerts
                .values()
                .filter(|a| a.resolved_at.is_some_and(|at| at <= cutoff))
                .map(|a| a.id.clone())
                .collect();
            for id in &expired {
                alerts.shift_remove(id);
            }
            expired
        };
        if !pruned.is_empty() {
            self.history.lock().retain(|e| !pruned.contains(&e.alert_id));
            debug!(pruned = pruned.len(), "Pruned resolved risk alerts");
        }
        pruned.len()
    }

    /// Every recorded state change, oldest first.
    pub fn history(&self) -> Vec<AlertEvent> {
        self.history.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn factor(id: &str, p: f64, i: f64) -> RiskFactor {
        RiskFactor::new(id, RiskCategory::Operational, p, i).with_id(id)
    }

    #[test]
    fn test_alert_lifecycle() {
        let monitor = RiskMonitor::new();
        let crossing = RiskFactor::new("outage", RiskCategory::Technical, 1.0, 0.8).with_id("f1");
        let opened = monitor.evaluate(&[crossing, factor("f2", 0.5, 0.5)], &RiskThresholds::new(0.7));
        assert_eq!(opened.len(), 1);
        let id = opened[0].id.clone();
        assert_eq!(opened[0].state, AlertState::Open);
        assert_eq!(opened[0].factor_ids, vec!["f1".to_string()]);

        assert_eq!(monitor.acknowledge(&id).unwrap().state, AlertState::Acknowledged);
        assert_eq!(monitor.resolve(&id).unwrap().state, AlertState::Resolved);
        let again = monitor.resolve(&id).unwrap();
        assert_eq!(again.state, AlertState::Resolved);

        let states: Vec<_> = monitor.history().into_iter().map(|e| e.state).collect();
        assert_eq!(states, vec![AlertState::Open, AlertState::Acknowledged, AlertState::Resolved]);
        assert!(monitor.open_alerts().is_empty());
    }

    #[test]
    fn test_one_unresolved_alert_per_factor() {
        let monitor = RiskMonitor::new();
        let thresholds = RiskThresholds::new(0.5);
        let f = factor("f1", 0.9, 0.9);
        assert_eq!(monitor.evaluate(&[f.clone()], &thresholds).len(), 1);
        assert!(monitor.evaluate(&[f.clone()], &thresholds).is_empty());

        let id = monitor.alerts()[0].id.clone();
        monitor.resolve(&id).unwrap();
        assert_eq!(monitor.evaluate(&[f], &thresholds).len(), 1);
        assert_eq!(monitor.alerts().len(), 2);
    }

    #[test]
    fn test_resolved_alerts_are_pruned() {
        let monitor = RiskMonitor::new();
        let thresholds = RiskThresholds::new(0.5);
        monitor.evaluate(&[factor("f1", 0.9, 0.9), factor("f2", 0.9, 0.9)], &thresholds);
        let resolved = monitor.alerts()[0].id.clone();
        monitor.resolve(&resolved).unwrap();

        // Inside the retention window nothing goes.
        assert_eq!(monitor.prune_resolved(chrono::Duration::hours(1)), 0);
        assert_eq!(monitor.prune_resolved(chrono::Duration::zero()), 1);
        assert!(monitor.get(&resolved).is_none());
        assert_eq!(monitor.alerts().len(), 1);
        assert!(monitor.history().iter().all(|e| e.alert_id != resolved));
    }

    #[test]
    fn test_evaluate_applies_retention() {
        let monitor = RiskMonitor::new().with_retention(chrono::Duration::zero());
        let thresholds = RiskThresholds::new(0.5);
        monitor.evaluate(&[factor("f1", 0.9, 0.9)], &thresholds);
        let id = monitor.alerts()[0].id.clone();
        monitor.resolve(&id).unwrap();

        let reopened = monitor.evaluate(&[factor("f1", 0.9, 0.9)], &thresholds);
        assert_eq!(reopened.len(), 1);
        assert_eq!(monitor.alerts().len(), 1);
        assert_eq!(monitor.alerts()[0].id, reopened[0].id);
    }

    #[test]
    fn test_category_thresholds() {
        let monitor = RiskMonitor::new();
        let thresholds = RiskThresholds::new(0.9).with_category(RiskCategory::Operational, 0.2);
        assert_eq!(monitor.evaluate(&[factor("f1", 0.5, 0.5)], &thresholds).len(), 1);
    }

    #[test]
    fn test_handler_failures_are_contained() {
        let monitor = RiskMonitor::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        monitor.add_handler(Arc::new(|_: &RiskAlert| -> anyhow::Result<()> { anyhow::bail!("pager down") }));
        monitor.add_handler(Arc::new(|_: &RiskAlert| -> anyhow::Result<()> { panic!("handler bug") }));
        monitor.add_handler(Arc::new(move |_: &RiskAlert| -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let opened = monitor.evaluate(&[factor("f1", 1.0, 1.0)], &RiskThresholds::new(0.7));
        assert_eq!(opened.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_alert() {
        let err = RiskMonitor::new().acknowledge("missing").unwrap_err();
        assert!(matches!(err, RiskError::AlertNotFound { .. }));
    }
}
