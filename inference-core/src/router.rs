//! # Model Router
//!
//! Picks a primary provider and an ordered fallback chain for a request.
//! The router never calls `Provider::health` or owns circuit breaker state —
//! it reads snapshots the caller (the orchestrator) hands it, keeping it
//! cheap to unit test in isolation.

use crate::model::{CircuitStateKind, HealthStatus, Pool, TenantContext};
use crate::provider::Provider;
use crate::registry::ProviderRegistry;
use crate::error::{EngineError, ErrorKind};
use rand::distributions::{Distribution, WeightedIndex};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutingStrategy {
    RoundRobin,
    WeightedRandom,
    LeastLoaded,
    Failover,
}

/// Everything the router needs to make a decision, gathered by the caller.
pub struct RoutingContext {
    pub model_id: String,
    pub tenant: TenantContext,
    pub preferred_provider: Option<String>,
    pub preferred_device: Option<String>,
    pub cost_sensitive: bool,
    pub pool_hint: Option<Pool>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RoutingDecision {
    pub request_id: String,
    pub primary: String,
    pub fallbacks: Vec<String>,
    pub score: i32,
    pub pool: Option<Pool>,
    pub decided_at: chrono::DateTime<chrono::Utc>,
}

const DECISION_RING_CAPACITY: usize = 1024;

pub struct Router {
    strategy: RoutingStrategy,
    round_robin_counters: DashMap<String, AtomicUsize>,
    decisions: Mutex<VecDeque<RoutingDecision>>,
}

impl Router {
    pub fn new(strategy: RoutingStrategy) -> Self {
        Self {
            strategy,
            round_robin_counters: DashMap::new(),
            decisions: Mutex::new(VecDeque::with_capacity(DECISION_RING_CAPACITY)),
        }
    }

    /// Runs the six-step selection algorithm and records the outcome in the
    /// bounded decision ring buffer.
    pub fn route(
        &self,
        request_id: &str,
        ctx: &RoutingContext,
        registry: &ProviderRegistry,
        circuit_states: &HashMap<String, CircuitStateKind>,
        consecutive_failures: &HashMap<String, u32>,
        in_flight: &HashMap<String, i64>,
    ) -> Result<RoutingDecision, EngineError> {
        // Step 1: candidate set.
        let supporting = registry.for_model(&ctx.model_id, &ctx.tenant);
        let mut live: Vec<Arc<dyn Provider>> = Vec::new();
        let mut tail: Vec<Arc<dyn Provider>> = Vec::new();
        for p in supporting {
            let health = registry.health_snapshot(p.id());
            if !matches!(health.status, HealthStatus::Healthy | HealthStatus::Degraded) {
                continue;
            }
            let open = matches!(
                circuit_states.get(p.id()),
                Some(CircuitStateKind::Open)
            );
            if open {
                tail.push(p);
            } else {
                live.push(p);
            }
        }
        tail.sort_by(|a, b| a.id().cmp(b.id()));

        // Step 2: pool filter.
        if let Some(pool) = ctx.pool_hint {
            live.retain(|p| p.descriptor().pool == Some(pool));
            tail.retain(|p| p.descriptor().pool == Some(pool));
        }

        if live.is_empty() && tail.is_empty() {
            return Err(EngineError::AllProvidersUnavailable {
                model: ctx.model_id.clone(),
            });
        }

        // Step 3: preference pin.
        let (primary, mut fallback_candidates) =
            if let Some(pref) = ctx.preferred_provider.as_deref() {
                if let Some(pos) = live.iter().position(|p| p.id() == pref) {
                    let primary = live.remove(pos);
                    (primary, live)
                } else {
                    tracing::warn!(
                        preferred_provider = pref,
                        "preferred provider not in candidate set, falling back to selector"
                    );
                    self.select_primary(&mut live, in_flight)?
                }
            } else {
                self.select_primary(&mut live, in_flight)?
            };

        fallback_candidates.sort_by(|a, b| a.id().cmp(b.id()));
        let mut fallbacks: Vec<String> = fallback_candidates.iter().map(|p| p.id().to_string()).collect();
        fallbacks.extend(tail.iter().map(|p| p.id().to_string()));

        // Step 5: scoring (primary only; informational).
        let failures = consecutive_failures.get(primary.id()).copied().unwrap_or(0);
        let mut score: i32 = 100 - 20 * failures as i32;
        let descriptor = primary.descriptor();
        if let Some(device) = ctx.preferred_device.as_deref() {
            if descriptor.capabilities.supported_devices.iter().any(|d| d == device) {
                score += 10;
            }
        }
        if ctx.cost_sensitive && descriptor.pool == Some(Pool::Local) {
            score += 5;
        }

        let decision = RoutingDecision {
            request_id: request_id.to_string(),
            primary: primary.id().to_string(),
            fallbacks,
            score,
            pool: descriptor.pool,
            decided_at: chrono::Utc::now(),
        };
        self.record_decision(decision.clone());
        Ok(decision)
    }

    fn select_primary(
        &self,
        live: &mut Vec<Arc<dyn Provider>>,
        in_flight: &HashMap<String, i64>,
    ) -> Result<(Arc<dyn Provider>, Vec<Arc<dyn Provider>>), EngineError> {
        if live.is_empty() {
            return Err(EngineError::Internal {
                message: "select_primary called with an empty live set".to_string(),
            });
        }
        let idx = match self.strategy {
            RoutingStrategy::RoundRobin => {
                let pool_key = live[0]
                    .descriptor()
                    .pool
                    .map(|p| format!("{p:?}"))
                    .unwrap_or_else(|| "default".to_string());
                let counter = self
                    .round_robin_counters
                    .entry(pool_key)
                    .or_insert_with(|| AtomicUsize::new(0));
                counter.fetch_add(1, Ordering::SeqCst) % live.len()
            }
            RoutingStrategy::WeightedRandom => self.weighted_random_index(live),
            RoutingStrategy::LeastLoaded => {
                let mut best = 0;
                let mut best_load = i64::MAX;
                for (i, p) in live.iter().enumerate() {
                    let load = in_flight.get(p.id()).copied().unwrap_or(0);
                    if load < best_load || (load == best_load && p.id() < live[best].id()) {
                        best = i;
                        best_load = load;
                    }
                }
                best
            }
            RoutingStrategy::Failover => 0,
        };
        let primary = live.remove(idx);
        Ok((primary, std::mem::take(live)))
    }

    fn weighted_random_index(&self, live: &[Arc<dyn Provider>]) -> usize {
        let weights: Vec<f64> = live
            .iter()
            .map(|p| {
                let caps = p.capabilities();
                let mut w = 1.0;
                if caps.embeddings {
                    w += 0.1;
                }
                if caps.multimodal {
                    w += 0.1;
                }
                w
            })
            .collect();
        if weights.iter().all(|w| (*w - weights[0]).abs() < f64::EPSILON) {
            // all weights tied: stable tie-break by id
            let mut indices: Vec<usize> = (0..live.len()).collect();
            indices.sort_by(|&a, &b| live[a].id().cmp(live[b].id()));
            return indices[0];
        }
        let dist = WeightedIndex::new(&weights).expect("non-empty, non-negative weights");
        dist.sample(&mut rand::thread_rng())
    }

    fn record_decision(&self, decision: RoutingDecision) {
        let mut decisions = self.decisions.lock().unwrap();
        if decisions.len() == DECISION_RING_CAPACITY {
            decisions.pop_front();
        }
        decisions.push_back(decision);
    }

    pub fn decision_for(&self, request_id: &str) -> Option<RoutingDecision> {
        self.decisions
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|d| d.request_id == request_id)
            .cloned()
    }
}

impl From<&EngineError> for ErrorKind {
    fn from(e: &EngineError) -> Self {
        e.kind()
    }
}
