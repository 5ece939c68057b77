//! # Metrics Sink
//!
//! Boundary observer narrowed from `ultrafast-gateway/src/metrics.rs`'s
//! `MetricsCollector` (request counters, latency histograms behind a lock)
//! down to a sink interface the `Engine` calls into — concrete exporters
//! (Prometheus, Kafka) are out of scope per §1; this crate ships only the
//! trait and an in-memory reference collector for tests/introspection.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn incr_counter(&self, name: &str, labels: &[(&str, &str)]);
    async fn record_timer(&self, name: &str, millis: u64, labels: &[(&str, &str)]);
    async fn set_gauge(&self, name: &str, value: i64, labels: &[(&str, &str)]);
}

#[derive(Debug, Default, Clone)]
struct TimerStats {
    count: u64,
    total_ms: u64,
    max_ms: u64,
}

/// In-memory counters/timers/gauges, keyed by `name|label=value,...`. Good
/// enough for tests and for an embedding app with no external metrics store.
#[derive(Default)]
pub struct InMemoryMetricsSink {
    counters: Mutex<HashMap<String, u64>>,
    timers: Mutex<HashMap<String, TimerStats>>,
    gauges: Mutex<HashMap<String, i64>>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(name: &str, labels: &[(&str, &str)]) -> String {
        if labels.is_empty() {
            return name.to_string();
        }
        let mut sorted: Vec<(&str, &str)> = labels.to_vec();
        sorted.sort_by_key(|(k, _)| *k);
        let joined = sorted
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        format!("{name}|{joined}")
    }

    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .lock()
            .unwrap()
            .get(&Self::key(name, labels))
            .copied()
            .unwrap_or(0)
    }

    pub fn gauge(&self, name: &str, labels: &[(&str, &str)]) -> i64 {
        self.gauges
            .lock()
            .unwrap()
            .get(&Self::key(name, labels))
            .copied()
            .unwrap_or(0)
    }

    pub fn timer_count(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.timers
            .lock()
            .unwrap()
            .get(&Self::key(name, labels))
            .map(|t| t.count)
            .unwrap_or(0)
    }
}

#[async_trait]
impl MetricsSink for InMemoryMetricsSink {
    async fn incr_counter(&self, name: &str, labels: &[(&str, &str)]) {
        *self
            .counters
            .lock()
            .unwrap()
            .entry(Self::key(name, labels))
            .or_insert(0) += 1;
    }

    async fn record_timer(&self, name: &str, millis: u64, labels: &[(&str, &str)]) {
        let mut timers = self.timers.lock().unwrap();
        let stats = timers.entry(Self::key(name, labels)).or_default();
        stats.count += 1;
        stats.total_ms += millis;
        stats.max_ms = stats.max_ms.max(millis);
    }

    async fn set_gauge(&self, name: &str, value: i64, labels: &[(&str, &str)]) {
        self.gauges
            .lock()
            .unwrap()
            .insert(Self::key(name, labels), value);
    }
}
