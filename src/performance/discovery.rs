//! Service registry, load balancing and health checking.
//!
//! Only instances known to be healthy are selectable. Instances whose last
//! heartbeat is older than the configured timeout are never returned by
//! [`LoadBalancer::select_instance`], whatever the strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::error::{ServiceError, ServiceResult};

/// Health of a registered instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceHealth {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

/// A registered backend instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub address: String,
    pub health: InstanceHealth,
    pub last_heartbeat: DateTime<Utc>,
    /// In-flight requests currently routed to this instance.
    pub load: u64,
    /// Relative share for the weighted strategy.
    pub weight: u32,
}

impl ServiceInstance {
    /// Create an instance with unknown health and weight 1.
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            health: InstanceHealth::Unknown,
            last_heartbeat: Utc::now(),
            load: 0,
            weight: 1,
        }
    }

    /// Set the weight.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Set the initial health.
    pub fn with_health(mut self, health: InstanceHealth) -> Self {
        self.health = health;
        self
    }

    fn is_stale(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        now - self.last_heartbeat > timeout
    }
}

/// Load balancing strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    #[default]
    RoundRobin,
    Random,
    LeastConnections,
    Weighted,
}

impl std::str::FromStr for LoadBalancingStrategy {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "round_robin" => Ok(LoadBalancingStrategy::RoundRobin),
            "random" => Ok(LoadBalancingStrategy::Random),
            "least_connections" => Ok(LoadBalancingStrategy::LeastConnections),
            "weighted" => Ok(LoadBalancingStrategy::Weighted),
            _ => Err(ServiceError::UnknownStrategy {
                strategy: s.to_string(),
            }),
        }
    }
}

/// Registry of service instances keyed by id, in registration order.
pub struct ServiceRegistry {
    instances: RwLock<IndexMap<String, ServiceInstance>>,
    heartbeat_timeout: chrono::Duration,
}

impl ServiceRegistry {
    /// Create an empty registry.
    pub fn new(config: &DiscoveryConfig) -> Self {
        Self {
            instances: RwLock::new(IndexMap::new()),
            heartbeat_timeout: chrono::Duration::milliseconds(config.heartbeat_timeout_ms as i64),
        }
    }

    /// Register an instance; its heartbeat starts now.
    pub fn register(&self, mut instance: ServiceInstance) -> ServiceResult<()> {
        let mut instances = self.instances.write();
        if instances.contains_key(&instance.id) {
            return Err(ServiceError::DuplicateInstance {
                instance_id: instance.id,
            });
        }
        instance.last_heartbeat = Utc::now();
        info!(instance_id = %instance.id, address = %instance.address, "Service instance registered");
        instances.insert(instance.id.clone(), instance);
        Ok(())
    }

    /// Remove an instance.
    pub fn deregister(&self, id: &str) -> ServiceResult<ServiceInstance> {
        let removed = self.instances.write().shift_remove(id);
        match removed {
            Some(instance) => {
                info!(instance_id = %id, "Service instance deregistered");
                Ok(instance)
            }
            None => Err(ServiceError::InstanceNotFound {
                instance_id: id.to_string(),
            }),
        }
    }

    /// Refresh an instance's heartbeat timestamp.
    pub fn heartbeat(&self, id: &str) -> ServiceResult<()> {
        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| ServiceError::InstanceNotFound {
                instance_id: id.to_string(),
            })?;
        instance.last_heartbeat = Utc::now();
        Ok(())
    }

    /// Set an instance's health status.
    pub fn set_health(&self, id: &str, health: InstanceHealth) -> ServiceResult<()> {
        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| ServiceError::InstanceNotFound {
                instance_id: id.to_string(),
            })?;
        if instance.health != health {
            debug!(instance_id = %id, from = ?instance.health, to = ?health, "Instance health changed");
        }
        instance.health = health;
        Ok(())
    }

    /// Note the start of a request routed to `id`.
    pub fn begin_request(&self, id: &str) -> ServiceResult<()> {
        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| ServiceError::InstanceNotFound {
                instance_id: id.to_string(),
            })?;
        instance.load += 1;
        Ok(())
    }

    /// Note the end of a request routed to `id`.
    pub fn end_request(&self, id: &str) -> ServiceResult<()> {
        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| ServiceError::InstanceNotFound {
                instance_id: id.to_string(),
            })?;
        instance.load = instance.load.saturating_sub(1);
        Ok(())
    }

    /// Snapshot of one instance.
    pub fn get(&self, id: &str) -> Option<ServiceInstance> {
        self.instances.read().get(id).cloned()
    }

    /// Snapshot of all instances in registration order.
    pub fn instances(&self) -> Vec<ServiceInstance> {
        self.instances.read().values().cloned().collect()
    }

    /// Number of registered instances.
    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    /// Whether no instance is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Healthy instances with a fresh heartbeat.
    pub fn eligible(&self) -> Vec<ServiceInstance> {
        let now = Utc::now();
        self.instances
            .read()
            .values()
            .filter(|i| i.health == InstanceHealth::Healthy)
            .filter(|i| !i.is_stale(now, self.heartbeat_timeout))
            .cloned()
            .collect()
    }

    /// Remove instances whose heartbeat is older than `horizon`; returns their ids.
    pub fn evict_stale(&self, horizon: chrono::Duration) -> Vec<String> {
        let now = Utc::now();
        let mut instances = self.instances.write();
        let stale: Vec<String> = instances
            .values()
            .filter(|i| i.is_stale(now, horizon))
            .map(|i| i.id.clone())
            .collect();
        for id in &stale {
            instances.shift_remove(id);
            warn!(instance_id = %id, "Evicted stale service instance");
        }
        stale
    }

    /// Configured heartbeat timeout.
    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        self.heartbeat_timeout
    }
}

/// Chooses an instance from a registry.
pub struct LoadBalancer {
    registry: Arc<ServiceRegistry>,
    cursor: AtomicUsize,
    rng: Mutex<StdRng>,
}

impl LoadBalancer {
    /// Create a balancer over `registry` with a seeded RNG for the random strategies.
    pub fn new(registry: Arc<ServiceRegistry>, seed: u64) -> Self {
        Self {
            registry,
            cursor: AtomicUsize::new(0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Pick an eligible instance using `strategy`.
    pub fn select_instance(&self, strategy: LoadBalancingStrategy) -> ServiceResult<ServiceInstance> {
        let mut eligible = self.registry.eligible();
        if eligible.is_empty() {
            return Err(ServiceError::NoHealthyInstance {
                registered: self.registry.len(),
            });
        }

        let index = match strategy {
            LoadBalancingStrategy::RoundRobin => {
                self.cursor.fetch_add(1, Ordering::Relaxed) % eligible.len()
            }
            LoadBalancingStrategy::Random => self.rng.lock().gen_range(0..eligible.len()),
            LoadBalancingStrategy::LeastConnections => eligible
                .iter()
                .enumerate()
                .min_by_key(|(_, i)| i.load)
                .map(|(idx, _)| idx)
                .unwrap_or(0),
            LoadBalancingStrategy::Weighted => {
                let total: u64 = eligible.iter().map(|i| u64::from(i.weight)).sum();
                if total == 0 {
                    self.rng.lock().gen_range(0..eligible.len())
                } else {
                    let mut point = self.rng.lock().gen_range(0..total);
                    eligible
                        .iter()
                        .position(|i| {
                            let w = u64::from(i.weight);
                            if point < w {
                                true
                            } else {
                                point -= w;
                                false
                            }
                        })
                        .unwrap_or(eligible.len() - 1)
                }
            }
        };

        let chosen = eligible.swap_remove(index);
        debug!(instance_id = %chosen.id, strategy = ?strategy, "Selected service instance");
        Ok(chosen)
    }
}

/// Checks a single instance.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Return `true` if the instance answered healthily.
    async fn check(&self, instance: &ServiceInstance) -> bool;
}

/// Checks `GET {address}{path}` and treats any 2xx as healthy.
pub struct HttpHealthCheck {
    client: reqwest::Client,
    path: String,
}

impl HttpHealthCheck {
    /// Create a check with a per-request timeout.
    pub fn new(path: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            path: path.into(),
        })
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    async fn check(&self, instance: &ServiceInstance) -> bool {
        let url = format!("{}{}", instance.address.trim_end_matches('/'), self.path);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(instance_id = %instance.id, error = %e, "Health check failed");
                false
            }
        }
    }
}

/// Periodically checks registered instances and updates their health.
pub struct HealthChecker {
    registry: Arc<ServiceRegistry>,
    check: Arc<dyn HealthCheck>,
    interval: Duration,
    eviction_horizon: chrono::Duration,
}

impl HealthChecker {
    /// Create a checker; stale instances are evicted after three heartbeat timeouts.
    pub fn new(
        registry: Arc<ServiceRegistry>,
        check: Arc<dyn HealthCheck>,
        config: &DiscoveryConfig,
    ) -> Self {
        let eviction_horizon = registry.heartbeat_timeout() * 3;
        Self {
            registry,
            check,
            interval: Duration::from_millis(config.health_check_interval_ms),
            eviction_horizon,
        }
    }

    /// Check every instance once, then evict long-stale ones.
    pub async fn check_once(&self) -> HealthCheckReport {
        let mut report = HealthCheckReport::default();
        for instance in self.registry.instances() {
            let healthy = self.check.check(&instance).await;
            let health = if healthy {
                report.healthy += 1;
                InstanceHealth::Healthy
            } else {
                report.unhealthy += 1;
                InstanceHealth::Unhealthy
            };
            // The instance may have been deregistered while probing.
            if self.registry.set_health(&instance.id, health).is_ok() && healthy {
                let _ = self.registry.heartbeat(&instance.id);
            }
        }
        report.evicted = self.registry.evict_stale(self.eviction_horizon);
        debug!(
            healthy = report.healthy,
            unhealthy = report.unhealthy,
            evicted = report.evicted.len(),
            "Health check pass complete"
        );
        report
    }

    /// Run `check_once` on an interval until `shutdown` flips to `true`.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.check_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Health checker stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

/// Summary of one health-check pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthCheckReport {
    pub healthy: usize,
    pub unhealthy: usize,
    pub evicted: Vec<String>,
}
