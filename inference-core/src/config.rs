//! # Engine Configuration
//!
//! Grounded on `ultrafast-gateway/src/config.rs`'s `Config::load` pattern
//! (TOML file + environment overrides + a `validate()` pass with concrete
//! bounds), narrowed to the sections §6 names: orchestrator, circuit,
//! async job manager, health polling, router strategy.

use crate::router::RoutingStrategy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

fn duration_ms<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    Ok(Duration::from_millis(u64::deserialize(d)?))
}

fn serialize_duration_ms<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

mod duration_ms_serde {
    pub use super::duration_ms as deserialize;
    pub use super::serialize_duration_ms as serialize;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_attempts: u32,
    #[serde(with = "duration_ms_serde")]
    pub first_byte_timeout: Duration,
    #[serde(with = "duration_ms_serde")]
    pub backoff_initial: Duration,
    #[serde(with = "duration_ms_serde")]
    pub backoff_max: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            first_byte_timeout: Duration::from_millis(10_000),
            backoff_initial: Duration::from_millis(100),
            backoff_max: Duration::from_millis(30_000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    #[serde(with = "duration_ms_serde")]
    pub half_open_after: Duration,
    pub half_open_concurrency: u32,
    pub reset_on_success: bool,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            half_open_after: Duration::from_millis(30_000),
            half_open_concurrency: 1,
            reset_on_success: true,
        }
    }
}

impl From<&CircuitConfig> for crate::circuit_breaker::CircuitBreakerConfig {
    fn from(c: &CircuitConfig) -> Self {
        Self {
            failure_threshold: c.failure_threshold,
            half_open_after: c.half_open_after,
            half_open_concurrency: c.half_open_concurrency,
            reset_on_success: c.reset_on_success,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncConfig {
    pub queue_capacity: usize,
    /// `None` means `min(num_cpus, 4)`, the spec's `auto`.
    pub workers: Option<usize>,
    pub job_ttl_hours: i64,
}

impl Default for AsyncConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            workers: None,
            job_ttl_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    #[serde(with = "duration_ms_serde")]
    pub interval: Duration,
    #[serde(with = "duration_ms_serde")]
    pub probe_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(15_000),
            probe_timeout: Duration::from_millis(5_000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub strategy: RoutingStrategy,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::Failover,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub orchestrator: OrchestratorConfig,
    pub circuit: CircuitConfig,
    pub r#async: AsyncConfig,
    pub health: HealthConfig,
    pub router: RouterConfig,
}

impl EngineConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: EngineConfig = toml::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// `ENGINE_*`-prefixed overrides, following the teacher's
    /// `GATEWAY_*`-prefixed `apply_env_overrides`.
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(v) = env::var("ENGINE_MAX_ATTEMPTS") {
            self.orchestrator.max_attempts = v
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid ENGINE_MAX_ATTEMPTS: {v}"))?;
        }
        if let Ok(v) = env::var("ENGINE_CIRCUIT_FAILURE_THRESHOLD") {
            self.circuit.failure_threshold = v
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid ENGINE_CIRCUIT_FAILURE_THRESHOLD: {v}"))?;
        }
        if let Ok(v) = env::var("ENGINE_ASYNC_QUEUE_CAPACITY") {
            self.r#async.queue_capacity = v
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid ENGINE_ASYNC_QUEUE_CAPACITY: {v}"))?;
        }
        if let Ok(v) = env::var("ENGINE_HEALTH_INTERVAL_MS") {
            let ms: u64 = v
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid ENGINE_HEALTH_INTERVAL_MS: {v}"))?;
            self.health.interval = Duration::from_millis(ms);
        }
        if let Ok(v) = env::var("ENGINE_ROUTER_STRATEGY") {
            self.router.strategy = match v.to_uppercase().as_str() {
                "ROUND_ROBIN" => RoutingStrategy::RoundRobin,
                "WEIGHTED_RANDOM" => RoutingStrategy::WeightedRandom,
                "LEAST_LOADED" => RoutingStrategy::LeastLoaded,
                "FAILOVER" => RoutingStrategy::Failover,
                other => return Err(anyhow::anyhow!("invalid ENGINE_ROUTER_STRATEGY: {other}")),
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.orchestrator.max_attempts == 0 {
            return Err(anyhow::anyhow!("orchestrator.max_attempts must be >= 1"));
        }
        if self.circuit.failure_threshold == 0 {
            return Err(anyhow::anyhow!("circuit.failure_threshold must be >= 1"));
        }
        if self.circuit.half_open_concurrency == 0 {
            return Err(anyhow::anyhow!("circuit.half_open_concurrency must be >= 1"));
        }
        if self.r#async.queue_capacity == 0 {
            return Err(anyhow::anyhow!("async.queue_capacity must be >= 1"));
        }
        if let Some(workers) = self.r#async.workers {
            if workers == 0 {
                return Err(anyhow::anyhow!("async.workers must be >= 1 when set"));
            }
        }
        if self.r#async.job_ttl_hours <= 0 {
            return Err(anyhow::anyhow!("async.job_ttl_hours must be > 0"));
        }
        if self.health.interval.is_zero() {
            return Err(anyhow::anyhow!("health.interval must be > 0"));
        }
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.r#async.workers.unwrap_or_else(|| num_cpus::get().min(4).max(1))
    }
}
