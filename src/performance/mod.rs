//! Performance substrate shared by every other component.
//!
//! - [`InMemoryCache`]: bounded cache with LRU/LFU/TTL/FIFO eviction
//! - [`ConcurrentExecutor`]: sequential or parallel task batches with timeouts
//! - [`ServiceRegistry`], [`LoadBalancer`], [`HealthChecker`]: service discovery
//! - [`PerformanceMonitor`]: latency percentiles and system health
//! - [`CircuitBreaker`]: short-circuits repeatedly failing dependencies

mod cache;
mod circuit_breaker;
mod discovery;
mod executor;
mod monitor;

pub use cache::{CacheEntry, CacheStats, EvictionPolicy, InMemoryCache};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use discovery::{
    HealthCheck, HealthCheckReport, HealthChecker, HttpHealthCheck, InstanceHealth,
    LoadBalancer, LoadBalancingStrategy, ServiceInstance, ServiceRegistry,
};
pub use executor::{BatchResult, ConcurrentExecutor, ExecutionMode, Task, TaskOutcome, TaskStatus};
pub use monitor::{ComponentHealth, HealthStatus, LatencyStats, PerformanceMonitor, SystemHealth};
