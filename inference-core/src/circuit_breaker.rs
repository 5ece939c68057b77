//! # Circuit Breaker
//!
//! One canonical per-provider state machine. `CLOSED → OPEN` after
//! `failure_threshold` consecutive *retryable* failures; `OPEN → HALF_OPEN`
//! after `half_open_after` elapses; `HALF_OPEN` admits at most
//! `half_open_concurrency` probes before deciding `CLOSED` or back to `OPEN`.
//!
//! Deterministic client errors (validation, auth, quota) never move the
//! counter — only `ErrorKind::retryable() == true` failures count.

use crate::error::EngineError;
use crate::model::CircuitStateKind;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub half_open_after: Duration,
    pub half_open_concurrency: u32,
    pub reset_on_success: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            half_open_after: Duration::from_secs(30),
            half_open_concurrency: 1,
            reset_on_success: true,
        }
    }
}

struct Inner {
    state: CircuitStateKind,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    last_failure_at: Option<Instant>,
}

/// A guard returned while a half-open probe is in flight; dropping it
/// releases the probe slot even if the caller never reports an outcome
/// (e.g. on panic unwind).
pub struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    reported: bool,
}

impl<'a> ProbeGuard<'a> {
    pub async fn success(mut self) {
        self.breaker.record_success().await;
        self.reported = true;
    }

    pub async fn failure(mut self, retryable: bool) {
        self.breaker.record_failure(retryable).await;
        self.reported = true;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if !self.reported {
            self.breaker.half_open_in_flight.store(0, Ordering::SeqCst);
        }
    }
}

pub struct CircuitBreaker {
    provider_id: String,
    config: CircuitBreakerConfig,
    inner: RwLock<Inner>,
    half_open_in_flight: AtomicU32,
}

impl CircuitBreaker {
    pub fn new(provider_id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            provider_id: provider_id.into(),
            config,
            inner: RwLock::new(Inner {
                state: CircuitStateKind::Closed,
                consecutive_failures: 0,
                opened_at: None,
                last_failure_at: None,
            }),
            half_open_in_flight: AtomicU32::new(0),
        }
    }

    /// Called before an attempt. Returns `Ok(None)` if the circuit is closed,
    /// `Ok(Some(guard))` if a half-open probe was admitted, or
    /// `Err(CircuitOpen)` if the call must fail fast.
    pub async fn try_acquire(&self) -> Result<Option<ProbeGuard<'_>>, EngineError> {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitStateKind::Closed => Ok(None),
            CircuitStateKind::Open => {
                let opened_at = inner.opened_at.expect("OPEN implies opened_at set");
                let elapsed = opened_at.elapsed();
                if elapsed >= self.config.half_open_after {
                    inner.state = CircuitStateKind::HalfOpen;
                    drop(inner);
                    self.admit_half_open_probe()
                } else {
                    let retry_after = self.config.half_open_after - elapsed;
                    Err(EngineError::CircuitOpen {
                        provider_id: self.provider_id.clone(),
                        retry_after_ms: retry_after.as_millis() as u64,
                    })
                }
            }
            CircuitStateKind::HalfOpen => {
                drop(inner);
                self.admit_half_open_probe()
            }
        }
    }

    fn admit_half_open_probe(&self) -> Result<Option<ProbeGuard<'_>>, EngineError> {
        let prev = self.half_open_in_flight.fetch_add(1, Ordering::SeqCst);
        if prev < self.config.half_open_concurrency {
            Ok(Some(ProbeGuard {
                breaker: self,
                reported: false,
            }))
        } else {
            self.half_open_in_flight.fetch_sub(1, Ordering::SeqCst);
            Err(EngineError::CircuitOpen {
                provider_id: self.provider_id.clone(),
                retry_after_ms: 0,
            })
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitStateKind::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitStateKind::HalfOpen => {
                if self.config.reset_on_success {
                    inner.state = CircuitStateKind::Closed;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                }
                self.half_open_in_flight.store(0, Ordering::SeqCst);
            }
            CircuitStateKind::Open => {}
        }
    }

    /// Only `retryable` failures advance the counter; deterministic client
    /// errors (validation/auth/quota) leave the breaker untouched.
    pub async fn record_failure(&self, retryable: bool) {
        if !retryable {
            return;
        }
        let mut inner = self.inner.write().await;
        inner.last_failure_at = Some(Instant::now());
        match inner.state {
            CircuitStateKind::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitStateKind::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitStateKind::HalfOpen => {
                inner.state = CircuitStateKind::Open;
                inner.opened_at = Some(Instant::now());
                self.half_open_in_flight.store(0, Ordering::SeqCst);
            }
            CircuitStateKind::Open => {}
        }
    }

    pub async fn state(&self) -> CircuitStateKind {
        self.inner.read().await.state
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.inner.read().await.consecutive_failures
    }

    /// Elapsed time since the last recorded failure, if any.
    pub async fn time_since_last_failure(&self) -> Option<Duration> {
        self.inner.read().await.last_failure_at.map(|t| t.elapsed())
    }

    /// Administrative reset (`resetCircuit(providerId)` in the orchestrator
    /// boundary).
    pub async fn force_closed(&self) {
        let mut inner = self.inner.write().await;
        inner.state = CircuitStateKind::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        self.half_open_in_flight.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            half_open_after: Duration::from_millis(20),
            half_open_concurrency: 1,
            reset_on_success: true,
        }
    }

    #[tokio::test]
    async fn closed_allows_calls_and_ignores_non_retryable_failures() {
        let cb = CircuitBreaker::new("p1", fast_config());
        for _ in 0..10 {
            assert!(cb.try_acquire().await.unwrap().is_none());
            cb.record_failure(false).await;
        }
        assert_eq!(cb.state().await, CircuitStateKind::Closed);
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_retryable_failures() {
        let cb = CircuitBreaker::new("p1", fast_config());
        for _ in 0..3 {
            assert!(cb.try_acquire().await.unwrap().is_none());
            cb.record_failure(true).await;
        }
        assert_eq!(cb.state().await, CircuitStateKind::Open);
        // fourth call fails fast without a provider invocation
        let err = cb.try_acquire().await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CircuitOpen);
    }

    #[tokio::test]
    async fn half_open_admits_one_probe_then_closes_on_success() {
        let cb = CircuitBreaker::new("p1", fast_config());
        for _ in 0..3 {
            cb.record_failure(true).await;
        }
        assert_eq!(cb.state().await, CircuitStateKind::Open);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let guard = cb.try_acquire().await.unwrap();
        assert!(guard.is_some());
        // a concurrent second probe is rejected while the first is in flight
        assert!(cb.try_acquire().await.is_err());
        guard.unwrap().success().await;
        assert_eq!(cb.state().await, CircuitStateKind::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_circuit() {
        let cb = CircuitBreaker::new("p1", fast_config());
        for _ in 0..3 {
            cb.record_failure(true).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        let guard = cb.try_acquire().await.unwrap().unwrap();
        guard.failure(true).await;
        assert_eq!(cb.state().await, CircuitStateKind::Open);
    }

    #[tokio::test]
    async fn force_closed_resets_administratively() {
        let cb = CircuitBreaker::new("p1", fast_config());
        for _ in 0..3 {
            cb.record_failure(true).await;
        }
        assert_eq!(cb.state().await, CircuitStateKind::Open);
        cb.force_closed().await;
        assert_eq!(cb.state().await, CircuitStateKind::Closed);
        assert!(cb.try_acquire().await.unwrap().is_none());
    }
}
