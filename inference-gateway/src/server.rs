//! # HTTP Server
//!
//! Builds the axum [`Router`] that fronts an [`inference_core::Engine`].
//! Grounded on `ultrafast-gateway/src/server.rs`'s `create_server` shape —
//! build collaborators, assemble `AppState`, wire a `ServiceBuilder`
//! middleware stack, register routes — narrowed to the routes SPEC_FULL.md
//! §6 names, which map 1:1 onto `Engine`'s public operations.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Extension, Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use inference_core::{
    Engine, EngineConfig, InMemoryAuditSink, InMemoryJobStore, InMemoryMetricsSink,
    InMemoryQuotaStore, InferenceRequest, Message, TenantContext,
};

use crate::auth::{auth_middleware, AuthContext};
use crate::config::GatewayConfig;
use crate::gateway_error::GatewayError;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub config: Arc<GatewayConfig>,
    idempotency: Arc<IdempotencyCache>,
}

const IDEMPOTENCY_HEADER: &str = "idempotency-key";
const IDEMPOTENCY_TTL_HOURS: i64 = 24;

/// Dedupes `POST /v1/inference/async` submissions carrying the same
/// `Idempotency-Key` for 24h, per SPEC_FULL §6. A second submission under
/// the same key within the window returns the original `job_id` instead of
/// enqueuing a duplicate job.
///
/// `locks` serializes the check-submit-record sequence per key so two
/// concurrent requests under the same key can't both observe a cache miss
/// and each enqueue their own job.
#[derive(Default)]
struct IdempotencyCache {
    entries: DashMap<String, (String, chrono::DateTime<chrono::Utc>)>,
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl IdempotencyCache {
    fn get(&self, key: &str) -> Option<String> {
        let entry = self.entries.get(key)?;
        let (job_id, recorded_at) = entry.value();
        if (chrono::Utc::now() - *recorded_at).num_hours() < IDEMPOTENCY_TTL_HOURS {
            Some(job_id.clone())
        } else {
            None
        }
    }

    fn put(&self, key: String, job_id: String) {
        self.entries.insert(key, (job_id, chrono::Utc::now()));
    }

    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .value(),
        )
    }
}

/// Assembles the engine, its in-memory sinks/stores, and the axum app. A
/// production deployment would inject persistent `AuditSink`/`MetricsSink`/
/// `QuotaStore` implementations here instead of the in-memory defaults.
pub async fn create_server(config: GatewayConfig) -> anyhow::Result<Router> {
    let engine = build_engine(config.engine.clone());
    create_server_with_engine(config, engine).await
}

/// Like [`create_server`] but wired to a caller-supplied, already-started
/// `Engine` rather than one `build_engine` assembles from config. Lets
/// integration tests stand up the real HTTP surface against an `Engine` with
/// test providers registered.
pub async fn create_server_with_engine(
    config: GatewayConfig,
    engine: Arc<Engine>,
) -> anyhow::Result<Router> {
    let state = AppState {
        engine,
        config: Arc::new(config.clone()),
        idempotency: Arc::new(IdempotencyCache::default()),
    };

    if config.auth.api_keys.is_empty() && config.auth.require_api_key {
        tracing::warn!(
            "auth.require_api_key is true but no api_keys are configured; every request will be rejected"
        );
    }

    let cors = build_cors(&config.server.cors_allowed_origins);

    let app = Router::new()
        .route("/v1/inference/completions", post(infer_completions))
        .route(
            "/v1/inference/completions/stream",
            post(stream_completions),
        )
        .route("/v1/inference/async", post(submit_async_job))
        .route("/v1/inference/async/{job_id}", get(get_async_job))
        .route("/v1/inference/async/{job_id}", delete(cancel_async_job))
        .route("/v1/providers", get(list_providers))
        .route("/v1/providers/{id}", get(get_provider))
        .route(
            "/v1/providers/{id}/circuit-breaker/reset",
            post(reset_circuit_breaker),
        )
        .route("/v1/plugins", get(list_plugins))
        .route("/v1/plugins/{id}/reload", post(reload_plugin))
        .route("/health", get(health_check))
        .layer(
            ServiceBuilder::new()
                .layer(cors) // 1. CORS (first)
                .layer(axum::middleware::from_fn_with_state(
                    Arc::new(config.auth.clone()),
                    auth_middleware,
                )) // 2. Auth
                .layer(TraceLayer::new_for_http()) // 3. Request tracing
                .layer(TimeoutLayer::new(config.server.request_timeout)), // 4. Timeout (last)
        )
        .with_state(state);

    Ok(app)
}

fn build_engine(engine_config: EngineConfig) -> Arc<Engine> {
    let audit = Arc::new(InMemoryAuditSink::default());
    let metrics = Arc::new(InMemoryMetricsSink::default());
    let quota = Arc::new(InMemoryQuotaStore::default());
    let engine = Engine::new(engine_config, audit, metrics, quota);

    let store = Arc::new(InMemoryJobStore::default());
    engine.start_async_jobs(store);
    engine
}

fn build_cors(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

fn tenant_context(ctx: &AuthContext, request: &CompletionRequest) -> TenantContext {
    let mut tenant = ctx.to_tenant_context();
    if let Some(timeout_ms) = request.timeout_ms {
        tenant.timeout = Duration::from_millis(timeout_ms);
    }
    tenant
}

#[derive(Debug, Deserialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(default)]
    parameters: std::collections::HashMap<String, serde_json::Value>,
    #[serde(default)]
    priority: Option<i32>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

impl CompletionRequest {
    fn into_inference_request(self, request_id: String) -> InferenceRequest {
        InferenceRequest {
            request_id,
            model: self.model,
            messages: self.messages,
            parameters: self.parameters,
            tools: vec![],
            tool_choice: Default::default(),
            streaming: false,
            preferred_provider: None,
            timeout: self
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| Duration::from_secs(60)),
            priority: self.priority.unwrap_or(5),
        }
    }
}

async fn infer_completions(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<CompletionRequest>,
) -> Result<Json<inference_core::InferenceResponse>, GatewayError> {
    let request_id = uuid::Uuid::new_v4().to_string();
    let tenant = tenant_context(&ctx, &body);
    let request = body.into_inference_request(request_id);
    request
        .validate_shape()
        .map_err(GatewayError::InvalidRequest)?;
    let response = state.engine.infer(request, tenant).await?;
    Ok(Json(response))
}

async fn stream_completions(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<CompletionRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<Event, Infallible>>>, GatewayError> {
    let request_id = uuid::Uuid::new_v4().to_string();
    let tenant = tenant_context(&ctx, &body);
    let mut request = body.into_inference_request(request_id);
    request.streaming = true;
    request
        .validate_shape()
        .map_err(GatewayError::InvalidRequest)?;

    let mut chunks = state.engine.stream(request, tenant).await?;
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Event, Infallible>>(32);

    tokio::spawn(async move {
        while let Some(chunk_result) = chunks.next().await {
            let event = match chunk_result {
                Ok(chunk) => {
                    let data = serde_json::to_string(&chunk).unwrap_or_default();
                    Event::default().data(data)
                }
                Err(e) => Event::default().data(format!("{{\"error\": \"{e}\"}}")),
            };
            if tx.send(Ok(event)).await.is_err() {
                return;
            }
        }
        let _ = tx.send(Ok(Event::default().data("[DONE]"))).await;
    });

    Ok(Sse::new(tokio_stream::wrappers::ReceiverStream::new(rx)))
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
struct SubmitAsyncResponse {
    job_id: String,
}

async fn submit_async_job(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Json(body): Json<CompletionRequest>,
) -> Result<Json<SubmitAsyncResponse>, GatewayError> {
    let idempotency_key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());

    let _idempotency_guard = if let Some(key) = &idempotency_key {
        if let Some(job_id) = state.idempotency.get(key) {
            return Ok(Json(SubmitAsyncResponse { job_id }));
        }
        let lock = state.idempotency.lock_for(key);
        let guard = lock.lock_owned().await;
        // Re-check now that we hold the per-key lock: a concurrent request
        // may have finished submitting and recorded the job while we waited.
        if let Some(job_id) = state.idempotency.get(key) {
            return Ok(Json(SubmitAsyncResponse { job_id }));
        }
        Some(guard)
    } else {
        None
    };

    let request_id = uuid::Uuid::new_v4().to_string();
    let request = body.into_inference_request(request_id);
    request
        .validate_shape()
        .map_err(GatewayError::InvalidRequest)?;
    let job_id = state
        .engine
        .submit_async(request, ctx.tenant_id.clone())
        .await?;

    if let Some(key) = idempotency_key {
        state.idempotency.put(key, job_id.clone());
    }

    Ok(Json(SubmitAsyncResponse { job_id }))
}

async fn get_async_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<inference_core::AsyncJob>, GatewayError> {
    state
        .engine
        .get_job(&job_id)
        .await
        .map(Json)
        .ok_or_else(|| GatewayError::NotFound(format!("job {job_id} not found")))
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    cancelled: bool,
}

async fn cancel_async_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Json<CancelResponse> {
    let cancelled = state.engine.cancel_job(&job_id).await;
    Json(CancelResponse { cancelled })
}

async fn list_providers(
    State(state): State<AppState>,
) -> Json<Vec<inference_core::ProviderSummary>> {
    Json(state.engine.list_providers().await)
}

async fn get_provider(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<inference_core::ProviderSummary>, GatewayError> {
    state
        .engine
        .list_providers()
        .await
        .into_iter()
        .find(|p| p.id == id)
        .map(Json)
        .ok_or_else(|| GatewayError::NotFound(format!("provider {id} not found")))
}

async fn reset_circuit_breaker(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    state.engine.reset_circuit(&id).await;
    axum::http::StatusCode::NO_CONTENT.into_response()
}

async fn list_plugins(
    State(state): State<AppState>,
) -> Json<Vec<inference_core::PluginMetadata>> {
    Json(state.engine.list_plugins().await)
}

async fn reload_plugin(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<axum::http::StatusCode, GatewayError> {
    state.engine.reload_plugin(&id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
