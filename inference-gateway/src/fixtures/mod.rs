//! Categorized test fixtures shared across this crate's `#[cfg(test)]` unit
//! tests and the crate-level `tests/` HTTP-surface scenarios, following the
//! dual placement convention `inference_core::tests` uses: colocated unit
//! tests next to the code they exercise, plus this directory for the
//! `GatewayConfig`/`Engine` builders both layers need. Not `cfg(test)`-gated
//! so the external `tests/` crate can see it.

use std::sync::Arc;

use inference_core::provider::tests_support::MockProvider;
use inference_core::tests::fixtures::StreamingProvider;
use inference_core::{Engine, InMemoryAuditSink, InMemoryJobStore, InMemoryMetricsSink, InMemoryQuotaStore};

use crate::config::{ApiKeyConfig, GatewayConfig};

/// A `GatewayConfig` safe for tests: auth disabled (dev-mode tenant header),
/// single async worker so job execution order is deterministic.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.auth.require_api_key = false;
    config.engine.r#async.workers = Some(1);
    config
}

/// Like [`test_config`] but with a configured API key, for auth-path tests.
pub fn test_config_with_api_key(key: &str, tenant_id: &str) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.auth.require_api_key = true;
    config.auth.api_keys.push(ApiKeyConfig {
        key: key.to_string(),
        tenant_id: tenant_id.to_string(),
    });
    config.engine.r#async.workers = Some(1);
    config
}

/// An `Engine` with a single healthy [`MockProvider`] registered and async
/// jobs started, suitable for driving the HTTP surface end-to-end.
pub async fn engine_with_mock_provider(config: &GatewayConfig) -> Arc<Engine> {
    let audit = Arc::new(InMemoryAuditSink::default());
    let metrics = Arc::new(InMemoryMetricsSink::default());
    let quota = Arc::new(InMemoryQuotaStore::default());
    let engine = Engine::new(config.engine.clone(), audit, metrics, quota);

    let provider = Arc::new(MockProvider::new("mock", "1.0.0").with_models(vec!["gpt-4"]));
    engine.registry.register(provider).await.unwrap();
    engine.registry.set_health_for_test(
        "mock",
        inference_core::ProviderHealth {
            status: inference_core::HealthStatus::Healthy,
            message: None,
            details: Default::default(),
            timestamp: chrono::Utc::now(),
        },
    );

    engine.start_async_jobs(Arc::new(InMemoryJobStore::default()));
    engine
}

/// An `Engine` with a single healthy streaming-capable provider registered,
/// for driving `/v1/inference/completions/stream` end-to-end — `MockProvider`
/// doesn't implement `stream`, so the unary fixture above can't be reused
/// here.
pub async fn engine_with_streaming_provider(config: &GatewayConfig) -> Arc<Engine> {
    let audit = Arc::new(InMemoryAuditSink::default());
    let metrics = Arc::new(InMemoryMetricsSink::default());
    let quota = Arc::new(InMemoryQuotaStore::default());
    let engine = Engine::new(config.engine.clone(), audit, metrics, quota);

    let provider = Arc::new(StreamingProvider::new("mock-stream", "gpt-4", 3));
    engine.registry.register(provider).await.unwrap();
    engine.registry.set_health_for_test(
        "mock-stream",
        inference_core::ProviderHealth {
            status: inference_core::HealthStatus::Healthy,
            message: None,
            details: Default::default(),
            timestamp: chrono::Utc::now(),
        },
    );

    engine.start_async_jobs(Arc::new(InMemoryJobStore::default()));
    engine
}
