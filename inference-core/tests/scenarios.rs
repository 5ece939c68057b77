//! Crate-level integration tests against the public `Engine` API, one per
//! testable-property scenario named in SPEC_FULL §8. Unlike `src/`'s
//! `#[cfg(test)]` unit tests, these only see `pub` surface — they exercise
//! `inference_core::orchestrator::Engine` exactly as an embedding gateway
//! would, using the fixtures in `inference_core::tests::fixtures`.

use inference_core::tests::fixtures::{
    request, tenant, AlwaysFailsProvider, FlakyProvider, SlowProvider, StreamingProvider,
};
use inference_core::{
    CircuitConfig, EngineConfig, Engine, ErrorKind, HealthStatus, InMemoryAuditSink,
    InMemoryJobStore, InMemoryMetricsSink, ProviderHealth, UnlimitedQuotaStore,
};
use std::sync::Arc;
use std::time::Duration;

fn healthy() -> ProviderHealth {
    ProviderHealth {
        status: HealthStatus::Healthy,
        message: None,
        details: Default::default(),
        timestamp: chrono::Utc::now(),
    }
}

async fn engine_with(config: EngineConfig) -> Arc<Engine> {
    Engine::new(
        config,
        Arc::new(InMemoryAuditSink::new()),
        Arc::new(InMemoryMetricsSink::new()),
        Arc::new(UnlimitedQuotaStore),
    )
}

/// Scenario 1: a single healthy provider answers a well-formed request.
#[tokio::test]
async fn simple_request_succeeds_against_a_single_provider() {
    let engine = engine_with(EngineConfig::default()).await;
    let provider = Arc::new(FlakyProvider::new("only", "m", 0));
    engine.registry.register(provider.clone()).await.unwrap();
    engine.registry.set_health_for_test("only", healthy());

    let response = engine
        .infer(request("m"), tenant("t1"))
        .await
        .expect("a single healthy provider should answer");

    assert_eq!(response.model, "m");
    assert_eq!(provider.call_count(), 1);
}

/// Scenario 2: the primary provider fails with a retryable error; the
/// request falls over to the next candidate and still succeeds.
#[tokio::test]
async fn request_falls_over_to_a_fallback_after_a_retryable_failure() {
    let engine = engine_with(EngineConfig::default()).await;
    let primary = Arc::new(AlwaysFailsProvider::new("primary", "m"));
    let fallback = Arc::new(FlakyProvider::new("fallback", "m", 0));
    engine.registry.register(primary.clone()).await.unwrap();
    engine.registry.register(fallback.clone()).await.unwrap();
    engine.registry.set_health_for_test("primary", healthy());
    engine.registry.set_health_for_test("fallback", healthy());

    let response = engine
        .infer(request("m"), tenant("t1"))
        .await
        .expect("a failing primary should fail over to the fallback");

    assert_eq!(response.model, "m");
    assert_eq!(primary.call_count(), 1);
    assert_eq!(fallback.call_count(), 1);
}

/// Scenario 3: once consecutive failures cross `failure_threshold`, the
/// breaker opens and further attempts are rejected without reaching the
/// provider.
#[tokio::test]
async fn circuit_opens_after_consecutive_failures_and_stops_calling_the_provider() {
    let config = EngineConfig {
        circuit: CircuitConfig {
            failure_threshold: 2,
            ..Default::default()
        },
        ..Default::default()
    };
    let engine = engine_with(config).await;
    let provider = Arc::new(AlwaysFailsProvider::new("only", "m"));
    engine.registry.register(provider.clone()).await.unwrap();
    engine.registry.set_health_for_test("only", healthy());

    for _ in 0..2 {
        let err = engine
            .infer(request("m"), tenant("t1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
    }
    assert_eq!(provider.call_count(), 2);

    let err = engine
        .infer(request("m"), tenant("t1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    assert_eq!(
        provider.call_count(),
        2,
        "an open breaker must short-circuit before reaching the provider"
    );
}

/// Scenario 4: cancelling a request mid-stream ends the stream with a
/// `Cancelled` error and no further chunks are observed.
#[tokio::test]
async fn cancelling_an_in_flight_stream_ends_it_with_a_cancelled_error() {
    let engine = engine_with(EngineConfig::default()).await;
    let provider = Arc::new(StreamingProvider::new("only", "m", 10_000));
    engine.registry.register(provider).await.unwrap();
    engine.registry.set_health_for_test("only", healthy());

    let mut req = request("m");
    req.streaming = true;
    let request_id = req.request_id.clone();

    let mut stream = engine
        .stream(req, tenant("t1"))
        .await
        .expect("a streaming-capable provider should start a stream");

    use futures::StreamExt;
    for i in 0..3 {
        let chunk = stream.next().await.expect("stream ended early").unwrap();
        assert_eq!(chunk.index, i as u64);
    }

    assert!(engine.cancel(&request_id));

    let mut saw_cancelled = false;
    while let Some(item) = stream.next().await {
        if let Err(e) = item {
            assert_eq!(e.kind(), ErrorKind::Cancelled);
            saw_cancelled = true;
            break;
        }
    }
    assert!(
        saw_cancelled,
        "the stream must surface a Cancelled error after Engine::cancel"
    );
}

/// Scenario 5: queued async jobs execute in descending priority order.
#[tokio::test]
async fn async_jobs_execute_in_descending_priority_order() {
    let engine = engine_with(EngineConfig::default()).await;
    let provider = Arc::new(FlakyProvider::new("only", "m", 0));
    engine.registry.register(provider).await.unwrap();
    engine.registry.set_health_for_test("only", healthy());
    engine.start_async_jobs(Arc::new(InMemoryJobStore::new()));

    let mut low = request("m");
    low.priority = 1;
    let mut high = request("m");
    high.priority = 9;

    let low_id = engine.submit_async(low, "t1").await.unwrap();
    let high_id = engine.submit_async(high, "t1").await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let high_completed_at = loop {
        let high_job = engine.get_job(&high_id).await.unwrap();
        if let Some(completed_at) = high_job.completed_at.filter(|_| high_job.is_terminal()) {
            break completed_at;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "high-priority job did not complete in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    let low_job = engine.get_job(&low_id).await.unwrap();
    let low_finished_before_high = matches!(low_job.completed_at, Some(t) if t < high_completed_at);
    assert!(
        !low_finished_before_high,
        "the high-priority job must not finish after the low-priority one"
    );
}

/// Scenario 6: a provider slower than the request's timeout surfaces a
/// `Timeout` error.
#[tokio::test]
async fn a_request_that_outlasts_its_timeout_fails_with_timeout() {
    let engine = engine_with(EngineConfig::default()).await;
    let provider = Arc::new(SlowProvider::new("only", "m", Duration::from_millis(300)));
    engine.registry.register(provider).await.unwrap();
    engine.registry.set_health_for_test("only", healthy());

    let mut req = request("m");
    req.timeout = Duration::from_millis(50);

    let err = engine
        .infer(req, tenant("t1"))
        .await
        .expect_err("a provider slower than the request timeout must fail");
    assert_eq!(err.kind(), ErrorKind::Timeout);
}
