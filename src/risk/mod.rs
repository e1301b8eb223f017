//! Risk assessment engine.
//!
//! Identifies risk factors from a decision context, scores them with one of
//! four methods, suggests mitigations and raises alerts when a score crosses
//! its threshold.

mod calculator;
mod engine;
mod identifier;
mod mitigation;
mod monitor;
mod types;

pub use calculator::{RiskCalculator, RiskMethod, RiskScore};
pub use engine::{RiskAssessment, RiskEngine};
pub use identifier::{RiskIdentifier, RiskRule};
pub use mitigation::{MitigationAction, MitigationAdvisor};
pub use monitor::{AlertEvent, AlertHandler, RiskMonitor, RiskThresholds};
pub use types::{AlertState, Observations, RiskAlert, RiskCategory, RiskFactor};
