//! # Execution Orchestrator
//!
//! `Engine` is the single owning struct (§9's anti-DI-container design note):
//! it holds the provider registry, plugin registry, router, one circuit
//! breaker per provider id, an in-flight counter per provider id, the
//! injected `AuditSink`/`MetricsSink`/`QuotaStore`, and — once started — the
//! async job manager. Every other module in this crate is a collaborator
//! `Engine` composes; nothing here is a process-wide singleton, so tests
//! build a fresh `Engine` per case.
//!
//! Grounded on `ultrafast-models-sdk/src/client.rs`'s `UltrafastClient`
//! (retry-with-backoff loop, per-provider metrics, routing integration): the
//! retry/backoff/metrics shape is kept, the chat-specific request/response
//! types are replaced with the generic `InferenceRequest`/`InferenceResponse`,
//! and the six-phase pipeline (absent from the teacher's client, present in
//! `ultrafast-gateway`'s middleware/plugin stack) is added on top.

use crate::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::cancellation::CallContext;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::job_manager::{AsyncJobManager, JobExecutor, JobStore};
use crate::metrics::MetricsSink;
use crate::model::{
    AsyncJob, CircuitStateKind, InferenceRequest, InferenceResponse, Phase, PluginMetadata,
    StreamChunk, TenantContext,
};
use crate::plugin::{ExecutionContext, PluginRegistry};
use crate::provider::ChunkStream;
use crate::quota::QuotaStore;
use crate::registry::ProviderRegistry;
use crate::router::Router;
use crate::router::RoutingContext;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// A summary row for `listProviders()`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProviderSummary {
    pub id: String,
    pub version: String,
    pub health: crate::model::HealthStatus,
    pub circuit: CircuitStateKind,
    pub in_flight: i64,
}

pub struct Engine {
    pub registry: Arc<ProviderRegistry>,
    pub plugins: Arc<PluginRegistry>,
    router: Router,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    in_flight: DashMap<String, Arc<AtomicI64>>,
    active_calls: Arc<DashMap<String, CancellationToken>>,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<dyn MetricsSink>,
    quota: Arc<dyn QuotaStore>,
    config: EngineConfig,
    job_manager: OnceLock<Arc<AsyncJobManager>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<dyn MetricsSink>,
        quota: Arc<dyn QuotaStore>,
    ) -> Arc<Self> {
        let registry = Arc::new(ProviderRegistry::new(
            config.health.interval,
            config.health.probe_timeout,
        ));
        registry.spawn_health_loop();
        let router = Router::new(config.router.strategy);
        Arc::new(Self {
            registry,
            plugins: Arc::new(PluginRegistry::new()),
            router,
            breakers: DashMap::new(),
            in_flight: DashMap::new(),
            active_calls: Arc::new(DashMap::new()),
            audit,
            metrics,
            quota,
            config,
            job_manager: OnceLock::new(),
        })
    }

    /// Starts the async job manager bound to `store`. Only meaningful once
    /// per engine instance — the manager owns its own worker pool for the
    /// lifetime of the engine, so a second call is a no-op (logged).
    pub fn start_async_jobs(self: &Arc<Self>, store: Arc<dyn JobStore>) {
        let executor: Arc<dyn JobExecutor> = self.clone();
        let manager = AsyncJobManager::new(
            self.config.r#async.queue_capacity,
            self.config.worker_count(),
            store,
            executor,
        );
        manager.spawn_ttl_sweeper(Duration::from_secs(3600), self.config.r#async.job_ttl_hours);
        if self.job_manager.set(manager).is_err() {
            tracing::warn!("start_async_jobs called more than once; ignoring");
        }
    }

    pub fn quota(&self) -> Arc<dyn QuotaStore> {
        self.quota.clone()
    }

    pub fn metrics(&self) -> Arc<dyn MetricsSink> {
        self.metrics.clone()
    }

    pub fn audit(&self) -> Arc<dyn AuditSink> {
        self.audit.clone()
    }

    fn breaker_for(&self, provider_id: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(provider_id.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    provider_id,
                    CircuitBreakerConfig::from(&self.config.circuit),
                ))
            })
            .clone()
    }

    fn in_flight_counter(&self, provider_id: &str) -> Arc<AtomicI64> {
        self.in_flight
            .entry(provider_id.to_string())
            .or_insert_with(|| Arc::new(AtomicI64::new(0)))
            .clone()
    }

    /// Administrative reset: `resetCircuit(providerId)` in §6.
    pub async fn reset_circuit(&self, provider_id: &str) {
        self.breaker_for(provider_id).force_closed().await;
    }

    pub fn routing_decision(&self, request_id: &str) -> Option<crate::router::RoutingDecision> {
        self.router.decision_for(request_id)
    }

    pub async fn list_providers(&self) -> Vec<ProviderSummary> {
        let mut out = Vec::new();
        for p in self.registry.all_latest() {
            let health = self.registry.health_snapshot(p.id());
            let circuit = self.breaker_for(p.id()).state().await;
            let in_flight = self.in_flight_counter(p.id()).load(Ordering::SeqCst);
            out.push(ProviderSummary {
                id: p.id().to_string(),
                version: p.version().to_string(),
                health: health.status,
                circuit,
                in_flight,
            });
        }
        out
    }

    pub async fn list_plugins(&self) -> Vec<PluginMetadata> {
        self.plugins
            .list()
            .await
            .into_iter()
            .map(|(id, state, phase, order)| PluginMetadata {
                id,
                version: "1.0.0".to_string(),
                phase,
                order,
                state,
                config: serde_json::Value::Null,
            })
            .collect()
    }

    pub async fn reload_plugin(&self, id: &str) -> Result<(), EngineError> {
        self.plugins.reload(id).await
    }

    /// Consumer-side cancel: signals the in-flight call for `request_id`, if
    /// any (unary or streaming).
    pub fn cancel(&self, request_id: &str) -> bool {
        match self.active_calls.get(request_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn submit_async(
        &self,
        request: InferenceRequest,
        tenant_id: impl Into<String>,
    ) -> Result<String, EngineError> {
        let manager = self
            .job_manager
            .get()
            .ok_or_else(|| EngineError::internal("async job manager not started"))?;
        manager.submit(request, tenant_id).await
    }

    pub async fn get_job(&self, job_id: &str) -> Option<AsyncJob> {
        self.job_manager.get()?.get(job_id).await
    }

    pub async fn cancel_job(&self, job_id: &str) -> bool {
        match self.job_manager.get() {
            Some(manager) => manager.cancel(job_id).await,
            None => false,
        }
    }

    pub async fn queue_stats(&self) -> Option<crate::job_manager::QueueStats> {
        Some(self.job_manager.get()?.stats().await)
    }

    pub async fn shutdown(&self) {
        self.registry.shutdown();
        self.plugins.shutdown_all().await;
        if let Some(manager) = self.job_manager.get() {
            manager.shutdown();
        }
        for entry in self.active_calls.iter() {
            entry.cancel();
        }
    }

    async fn circuit_state_snapshot(&self) -> HashMap<String, CircuitStateKind> {
        let mut out = HashMap::new();
        for entry in self.breakers.iter() {
            out.insert(entry.key().clone(), entry.value().state().await);
        }
        out
    }

    async fn consecutive_failure_snapshot(&self) -> HashMap<String, u32> {
        let mut out = HashMap::new();
        for entry in self.breakers.iter() {
            out.insert(entry.key().clone(), entry.value().consecutive_failures().await);
        }
        out
    }

    fn in_flight_snapshot(&self) -> HashMap<String, i64> {
        self.in_flight
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::SeqCst)))
            .collect()
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let initial = self.config.orchestrator.backoff_initial;
        let max = self.config.orchestrator.backoff_max;
        let scaled = initial.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        let base = scaled.min(max);
        let jitter_frac = rand::random::<f64>() * 0.5 - 0.25; // +/- 25%
        let jittered_nanos = (base.as_nanos() as f64 * (1.0 + jitter_frac)).max(0.0);
        Duration::from_nanos(jittered_nanos as u64)
    }

    /// Runs `VALIDATE → ROUTE → PRE_INFER`. Always returns the context — a
    /// failure at any step is recorded on `ctx.error` rather than losing the
    /// request, so callers can still emit an audit event keyed on the
    /// original `request_id`/`tenant_id`.
    async fn pre_infer(&self, request: InferenceRequest, tenant: TenantContext) -> ExecutionContext {
        let mut ctx = ExecutionContext::new(request, tenant);

        if self.plugins.run_phase(Phase::Validate, &mut ctx).await.is_err() {
            return ctx;
        }
        if let Err(message) = ctx.request.validate_shape() {
            ctx.error = Some(EngineError::Validation { message });
            return ctx;
        }

        let routing_ctx = RoutingContext {
            model_id: ctx.request.model.clone(),
            tenant: ctx.tenant.clone(),
            preferred_provider: ctx.request.preferred_provider.clone(),
            preferred_device: ctx.tenant.preferred_device.clone(),
            cost_sensitive: ctx.tenant.cost_sensitive,
            pool_hint: None,
        };
        let circuit_states = self.circuit_state_snapshot().await;
        let consecutive_failures = self.consecutive_failure_snapshot().await;
        let in_flight = self.in_flight_snapshot();
        match self.router.route(
            &ctx.request.request_id,
            &routing_ctx,
            &self.registry,
            &circuit_states,
            &consecutive_failures,
            &in_flight,
        ) {
            Ok(decision) => ctx.routing = Some(decision),
            Err(e) => {
                ctx.error = Some(e);
                return ctx;
            }
        }
        if self.plugins.run_phase(Phase::Route, &mut ctx).await.is_err() {
            return ctx;
        }
        let _ = self.plugins.run_phase(Phase::PreInfer, &mut ctx).await;
        ctx
    }

    async fn emit_audit(
        &self,
        kind: AuditEventKind,
        ctx: &ExecutionContext,
        provider_id: Option<String>,
        started: Instant,
    ) {
        emit(&self.audit, kind, ctx, provider_id, started).await;
    }

    /// Unary inference: `infer(req, tenant) -> Response | Error` in §6.
    pub async fn infer(
        &self,
        request: InferenceRequest,
        tenant: TenantContext,
    ) -> Result<InferenceResponse, EngineError> {
        let started = Instant::now();
        let request_id = request.request_id.clone();
        let call = CallContext::new(request.timeout);
        self.active_calls.insert(request_id.clone(), call.root());

        self.metrics
            .incr_counter("inference_started", &[("model", &request.model)])
            .await;
        self.audit
            .record(AuditEvent {
                kind: AuditEventKind::InferenceStarted,
                run_id: request.request_id.clone(),
                tenant_id: tenant.tenant_id.clone(),
                model: request.model.clone(),
                provider_id: None,
                duration_ms: 0,
                tokens_used: None,
                error_kind: None,
                timestamp: chrono::Utc::now(),
            })
            .await;

        let mut ctx = self.pre_infer(request, tenant).await;
        let result = if ctx.short_circuited() {
            let error = ctx.error.clone().expect("short_circuited implies error is set");
            let kind = if matches!(error, EngineError::Cancelled { .. }) {
                AuditEventKind::InferenceCancelled
            } else {
                AuditEventKind::InferenceFailed
            };
            self.emit_audit(kind, &ctx, None, started).await;
            Err(error)
        } else {
            self.run_attempts(&mut ctx, &call, started).await
        };

        self.active_calls.remove(&request_id);
        result
    }

    /// Runs `INFER` (with retries/fallback/backoff) followed by
    /// `POST_INFER → AUDIT`, given a context that already cleared
    /// `VALIDATE/ROUTE/PRE_INFER`.
    async fn run_attempts(
        &self,
        ctx: &mut ExecutionContext,
        call: &CallContext,
        started: Instant,
    ) -> Result<InferenceResponse, EngineError> {
        let decision = ctx
            .routing
            .clone()
            .expect("pre_infer only returns a non-short-circuited context with routing set");
        let max_attempts = (1 + decision.fallbacks.len())
            .min(ctx.tenant.max_attempts.max(1) as usize)
            .max(1);

        let mut last_err: Option<EngineError> = None;
        let mut succeeded_provider: Option<String> = None;

        for attempt in 0..max_attempts {
            if call.is_cancelled() {
                last_err = Some(EngineError::Cancelled {
                    reason: "cancelled during retry loop".to_string(),
                });
                break;
            }
            let provider_id = if attempt == 0 {
                Some(decision.primary.clone())
            } else {
                decision.fallbacks.get(attempt - 1).cloned()
            };
            let Some(provider_id) = provider_id else {
                break;
            };
            let Some(provider) = self.registry.get(&provider_id) else {
                continue;
            };

            if attempt > 0 {
                let skip_backoff = matches!(last_err, Some(EngineError::CircuitOpen { .. }));
                if !skip_backoff {
                    let delay = self.backoff_delay(attempt as u32);
                    if call.run(sleep_ok(delay)).await.is_err() {
                        last_err = Some(EngineError::Timeout {
                            elapsed_ms: started.elapsed().as_millis() as u64,
                        });
                        break;
                    }
                }
            }

            let breaker = self.breaker_for(&provider_id);
            let guard = match breaker.try_acquire().await {
                Ok(guard) => guard,
                Err(e) => {
                    self.metrics
                        .incr_counter("circuit_open", &[("provider", &provider_id)])
                        .await;
                    last_err = Some(e);
                    continue;
                }
            };

            if let Err(e) = self.plugins.run_phase(Phase::Infer, ctx).await {
                match guard {
                    Some(g) => g.failure(false).await,
                    None => breaker.record_failure(false).await,
                }
                last_err = Some(e);
                break;
            }

            let counter = self.in_flight_counter(&provider_id);
            counter.fetch_add(1, Ordering::SeqCst);
            let attempt_result = call.run(provider.infer(&ctx.request, &ctx.tenant)).await;
            counter.fetch_sub(1, Ordering::SeqCst);

            match attempt_result {
                Ok(response) => {
                    match guard {
                        Some(g) => g.success().await,
                        None => breaker.record_success().await,
                    }
                    succeeded_provider = Some(provider_id.clone());
                    ctx.response = Some(response);
                    last_err = None;
                    break;
                }
                Err(e) => {
                    let retryable = e.retryable();
                    match guard {
                        Some(g) => g.failure(retryable).await,
                        None => breaker.record_failure(retryable).await,
                    }
                    self.metrics
                        .incr_counter("provider_failure", &[("provider", &provider_id)])
                        .await;
                    last_err = Some(e.clone());
                    if !retryable {
                        break;
                    }
                }
            }
        }

        if ctx.response.is_none() {
            ctx.error = Some(last_err.unwrap_or(EngineError::AllProvidersUnavailable {
                model: ctx.request.model.clone(),
            }));
        }

        let _ = self.plugins.run_phase(Phase::PostInfer, ctx).await;
        let _ = self.plugins.run_phase(Phase::Audit, ctx).await;

        match ctx.response.clone() {
            Some(response) => {
                self.emit_audit(
                    AuditEventKind::InferenceCompleted,
                    ctx,
                    succeeded_provider,
                    started,
                )
                .await;
                Ok(response)
            }
            None => {
                let error = ctx
                    .error
                    .clone()
                    .unwrap_or_else(|| EngineError::internal("no response and no error recorded"));
                let kind = if matches!(error, EngineError::Cancelled { .. }) {
                    AuditEventKind::InferenceCancelled
                } else {
                    AuditEventKind::InferenceFailed
                };
                self.emit_audit(kind, ctx, succeeded_provider, started).await;
                Err(error)
            }
        }
    }

    /// Streaming inference: `stream(req, tenant) -> lazy sequence of Chunk |
    /// Error` in §6. `VALIDATE/ROUTE/PRE_INFER` run eagerly (a failure there
    /// is returned before the stream begins); everything from the first
    /// provider call onward is lazy. If the first chunk doesn't arrive within
    /// `orchestrator.firstByteTimeoutMs`, the call fails over to the next
    /// candidate exactly like a unary retry. No fallback once streaming has
    /// actually started — a mid-stream provider error ends the stream.
    pub async fn stream(
        &self,
        request: InferenceRequest,
        tenant: TenantContext,
    ) -> Result<ChunkStream, EngineError> {
        let started = Instant::now();
        let request_id = request.request_id.clone();
        let call = CallContext::new(request.timeout);
        self.active_calls.insert(request_id.clone(), call.root());

        let mut ctx = self.pre_infer(request, tenant).await;
        if ctx.short_circuited() {
            self.active_calls.remove(&request_id);
            return Err(ctx.error.expect("short_circuited implies error is set"));
        }

        let decision = ctx
            .routing
            .clone()
            .expect("pre_infer only returns a non-short-circuited context with routing set");
        let first_byte_timeout = self.config.orchestrator.first_byte_timeout;

        let mut candidates: Vec<String> = vec![decision.primary.clone()];
        candidates.extend(decision.fallbacks.clone());

        let mut inner_stream: Option<(ChunkStream, String)> = None;
        let mut last_err: Option<EngineError> = None;

        for provider_id in &candidates {
            let Some(provider) = self.registry.get(provider_id) else {
                continue;
            };
            let breaker = self.breaker_for(provider_id);
            let guard = match breaker.try_acquire().await {
                Ok(g) => g,
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            };
            match provider.stream(&ctx.request, &ctx.tenant).await {
                Ok(mut s) => match tokio::time::timeout(first_byte_timeout, s.next()).await {
                    Ok(Some(Ok(first_chunk))) => {
                        match guard {
                            Some(g) => g.success().await,
                            None => breaker.record_success().await,
                        }
                        let rehydrated: ChunkStream =
                            Box::pin(futures::stream::once(async move { Ok(first_chunk) }).chain(s));
                        inner_stream = Some((rehydrated, provider_id.clone()));
                        break;
                    }
                    Ok(Some(Err(e))) => {
                        let retryable = e.retryable();
                        match guard {
                            Some(g) => g.failure(retryable).await,
                            None => breaker.record_failure(retryable).await,
                        }
                        last_err = Some(e);
                    }
                    Ok(None) => {
                        match guard {
                            Some(g) => g.success().await,
                            None => breaker.record_success().await,
                        }
                        last_err = Some(EngineError::internal("provider stream ended with no chunks"));
                    }
                    Err(_) => {
                        match guard {
                            Some(g) => g.failure(true).await,
                            None => breaker.record_failure(true).await,
                        }
                        last_err = Some(EngineError::Timeout {
                            elapsed_ms: first_byte_timeout.as_millis() as u64,
                        });
                    }
                },
                Err(e) => {
                    let retryable = e.retryable();
                    match guard {
                        Some(g) => g.failure(retryable).await,
                        None => breaker.record_failure(retryable).await,
                    }
                    last_err = Some(e);
                }
            }
        }

        let Some((provider_stream, provider_id)) = inner_stream else {
            let error = last_err.unwrap_or(EngineError::AllProvidersUnavailable {
                model: ctx.request.model.clone(),
            });
            ctx.error = Some(error.clone());
            self.emit_audit(AuditEventKind::StreamFailed, &ctx, None, started).await;
            self.active_calls.remove(&request_id);
            return Err(error);
        };

        self.emit_audit(
            AuditEventKind::StreamStarted,
            &ctx,
            Some(provider_id.clone()),
            started,
        )
        .await;

        let plugins = self.plugins.clone();
        let audit = self.audit.clone();
        let cancel = call.root();
        let active_calls = self.active_calls.clone();

        let out = async_stream::stream! {
            let mut provider_stream = provider_stream;
            let mut ctx = ctx;
            let mut saw_final = false;
            loop {
                if cancel.is_cancelled() {
                    let error = EngineError::Cancelled { reason: "consumer cancelled stream".to_string() };
                    ctx.error = Some(error.clone());
                    emit(&audit, AuditEventKind::StreamFailed, &ctx, Some(provider_id.clone()), started).await;
                    yield Err(error);
                    break;
                }
                match provider_stream.next().await {
                    Some(Ok(mut chunk)) => {
                        ctx.response = Some(partial_response(&ctx.request, &chunk));
                        if plugins.run_phase(Phase::PostInfer, &mut ctx).await.is_err() {
                            emit(&audit, AuditEventKind::StreamFailed, &ctx, Some(provider_id.clone()), started).await;
                            yield Err(ctx.error.clone().unwrap_or_else(|| EngineError::internal("post_infer plugin failed")));
                            break;
                        }
                        if let Some(r) = &ctx.response {
                            chunk.delta = r.content.clone();
                            chunk.metadata = r.metadata.clone();
                        }
                        let is_final = chunk.is_final;
                        yield Ok(chunk);
                        if is_final {
                            saw_final = true;
                            emit(&audit, AuditEventKind::StreamCompleted, &ctx, Some(provider_id.clone()), started).await;
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        ctx.error = Some(e.clone());
                        emit(&audit, AuditEventKind::StreamFailed, &ctx, Some(provider_id.clone()), started).await;
                        yield Err(e);
                        break;
                    }
                    None => {
                        if !saw_final {
                            let e = EngineError::internal("stream ended without a final chunk");
                            ctx.error = Some(e.clone());
                            emit(&audit, AuditEventKind::StreamFailed, &ctx, Some(provider_id.clone()), started).await;
                            yield Err(e);
                        }
                        break;
                    }
                }
            }
            active_calls.remove(&ctx.request.request_id);
        };

        Ok(Box::pin(out))
    }
}

/// A synthesized, partial [`InferenceResponse`] representing one chunk's
/// delta, stashed onto [`ExecutionContext::response`] so `POST_INFER`
/// plugins — which only know how to mutate a whole response — can also see
/// and rewrite streamed content. Token counts are left at zero; only
/// `content`/`metadata` round-trip back into the chunk.
fn partial_response(request: &InferenceRequest, chunk: &StreamChunk) -> InferenceResponse {
    InferenceResponse {
        request_id: request.request_id.clone(),
        model: request.model.clone(),
        content: chunk.delta.clone(),
        input_tokens: 0,
        output_tokens: 0,
        tokens_used: 0,
        duration_ms: 0,
        timestamp: chrono::Utc::now(),
        metadata: chunk.metadata.clone(),
        stop_reason: if chunk.is_final { "stop".to_string() } else { String::new() },
    }
}

async fn emit(
    audit: &Arc<dyn AuditSink>,
    kind: AuditEventKind,
    ctx: &ExecutionContext,
    provider_id: Option<String>,
    started: Instant,
) {
    let error_kind = ctx.error.as_ref().map(|e| e.kind());
    audit
        .record(AuditEvent {
            kind,
            run_id: ctx.request.request_id.clone(),
            tenant_id: ctx.tenant.tenant_id.clone(),
            model: ctx.request.model.clone(),
            provider_id,
            duration_ms: started.elapsed().as_millis() as u64,
            tokens_used: ctx.response.as_ref().map(|r| r.tokens_used),
            error_kind,
            timestamp: chrono::Utc::now(),
        })
        .await;
}

async fn sleep_ok(d: Duration) -> Result<(), EngineError> {
    tokio::time::sleep(d).await;
    Ok(())
}

#[async_trait]
impl JobExecutor for Engine {
    async fn execute(
        &self,
        request: &InferenceRequest,
        tenant: &TenantContext,
        cancel: CancellationToken,
    ) -> Result<InferenceResponse, EngineError> {
        let started = Instant::now();
        let call = CallContext::with_cancel(request.timeout, cancel);
        let mut ctx = self.pre_infer(request.clone(), tenant.clone()).await;
        if ctx.short_circuited() {
            let error = ctx.error.expect("short_circuited implies error is set");
            self.emit_audit(AuditEventKind::InferenceFailed, &ExecutionContext::new(request.clone(), tenant.clone()), None, started)
                .await;
            return Err(error);
        }
        self.run_attempts(&mut ctx, &call, started).await
    }
}
