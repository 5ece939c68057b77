//! Provider doubles and request/tenant builders reused by orchestrator,
//! router, and circuit-breaker tests (unit and integration alike). Each
//! fixture isolates exactly one failure/latency behavior named in SPEC_FULL
//! §8's testable properties and scenarios, rather than one do-everything
//! mock.

use crate::error::EngineError;
use crate::model::{
    HealthStatus, InferenceRequest, InferenceResponse, Message, Pool, ProviderCapabilities,
    ProviderDescriptor, ProviderHealth, Role, StreamChunk, TenantContext, ToolChoice,
};
use crate::provider::{ChunkStream, Provider, ProviderConfig};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn request(model: &str) -> InferenceRequest {
    InferenceRequest {
        request_id: uuid::Uuid::new_v4().to_string(),
        model: model.to_string(),
        messages: vec![Message {
            role: Role::User,
            content: "hi".into(),
            name: None,
            tool_call_id: None,
        }],
        parameters: Default::default(),
        tools: vec![],
        tool_choice: ToolChoice::Auto,
        streaming: false,
        preferred_provider: None,
        timeout: Duration::from_secs(5),
        priority: 5,
    }
}

pub fn tenant(id: &str) -> TenantContext {
    TenantContext::new(id)
}

fn response_for(req: &InferenceRequest) -> InferenceResponse {
    InferenceResponse {
        request_id: req.request_id.clone(),
        model: req.model.clone(),
        content: "mock response".to_string(),
        input_tokens: 1,
        output_tokens: 1,
        tokens_used: 2,
        duration_ms: 1,
        timestamp: chrono::Utc::now(),
        metadata: Default::default(),
        stop_reason: "stop".to_string(),
    }
}

fn descriptor_for(id: &str, capabilities: ProviderCapabilities) -> ProviderDescriptor {
    ProviderDescriptor {
        id: id.to_string(),
        version: "1.0.0".to_string(),
        display_name: id.to_string(),
        capabilities,
        vendor: "fixture".to_string(),
        homepage: None,
        pool: Some(Pool::Local),
    }
}

/// Fails its first `fail_times` calls with [`EngineError::ProviderUnavailable`]
/// (retryable), then succeeds. Grounded on SPEC_FULL §8 scenario 2
/// (fallback on retryable failure).
pub struct FlakyProvider {
    id: String,
    model: String,
    fail_times: usize,
    calls: AtomicUsize,
}

impl FlakyProvider {
    pub fn new(id: &str, model: &str, fail_times: usize) -> Self {
        Self {
            id: id.to_string(),
            model: model.to_string(),
            fail_times,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for FlakyProvider {
    fn id(&self) -> &str {
        &self.id
    }
    fn version(&self) -> &str {
        "1.0.0"
    }
    fn descriptor(&self) -> ProviderDescriptor {
        descriptor_for(&self.id, self.capabilities())
    }
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supported_models: Some(vec![self.model.clone()]),
            ..Default::default()
        }
    }
    async fn initialize(&self, _config: ProviderConfig) -> Result<(), EngineError> {
        Ok(())
    }
    fn supports(&self, model_id: &str, _tenant: &TenantContext) -> bool {
        model_id == self.model
    }
    async fn infer(
        &self,
        req: &InferenceRequest,
        _tenant: &TenantContext,
    ) -> Result<InferenceResponse, EngineError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_times {
            Err(EngineError::ProviderUnavailable {
                provider_id: self.id.clone(),
                message: "simulated outage".to_string(),
            })
        } else {
            Ok(response_for(req))
        }
    }
    async fn health(&self) -> Result<ProviderHealth, EngineError> {
        Ok(ProviderHealth {
            status: HealthStatus::Healthy,
            message: None,
            details: Default::default(),
            timestamp: chrono::Utc::now(),
        })
    }
}

/// Always fails every `infer` call with [`EngineError::ProviderUnavailable`].
/// Grounded on SPEC_FULL §8 scenario 3 (circuit opens after consecutive
/// retryable failures).
pub struct AlwaysFailsProvider {
    id: String,
    model: String,
    calls: AtomicUsize,
}

impl AlwaysFailsProvider {
    pub fn new(id: &str, model: &str) -> Self {
        Self {
            id: id.to_string(),
            model: model.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for AlwaysFailsProvider {
    fn id(&self) -> &str {
        &self.id
    }
    fn version(&self) -> &str {
        "1.0.0"
    }
    fn descriptor(&self) -> ProviderDescriptor {
        descriptor_for(&self.id, self.capabilities())
    }
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supported_models: Some(vec![self.model.clone()]),
            ..Default::default()
        }
    }
    async fn initialize(&self, _config: ProviderConfig) -> Result<(), EngineError> {
        Ok(())
    }
    fn supports(&self, model_id: &str, _tenant: &TenantContext) -> bool {
        model_id == self.model
    }
    async fn infer(
        &self,
        _req: &InferenceRequest,
        _tenant: &TenantContext,
    ) -> Result<InferenceResponse, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(EngineError::ProviderUnavailable {
            provider_id: self.id.clone(),
            message: "simulated permanent outage".to_string(),
        })
    }
    async fn health(&self) -> Result<ProviderHealth, EngineError> {
        Ok(ProviderHealth {
            status: HealthStatus::Healthy,
            message: None,
            details: Default::default(),
            timestamp: chrono::Utc::now(),
        })
    }
}

/// Sleeps `delay` before returning a success response. Grounded on
/// SPEC_FULL §8 scenario 6 (timeout) and the cancellation scenario — pair
/// with a request `timeout`/`Engine::cancel` shorter than `delay`.
pub struct SlowProvider {
    id: String,
    model: String,
    delay: Duration,
}

impl SlowProvider {
    pub fn new(id: &str, model: &str, delay: Duration) -> Self {
        Self {
            id: id.to_string(),
            model: model.to_string(),
            delay,
        }
    }
}

#[async_trait]
impl Provider for SlowProvider {
    fn id(&self) -> &str {
        &self.id
    }
    fn version(&self) -> &str {
        "1.0.0"
    }
    fn descriptor(&self) -> ProviderDescriptor {
        descriptor_for(&self.id, self.capabilities())
    }
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supported_models: Some(vec![self.model.clone()]),
            ..Default::default()
        }
    }
    async fn initialize(&self, _config: ProviderConfig) -> Result<(), EngineError> {
        Ok(())
    }
    fn supports(&self, model_id: &str, _tenant: &TenantContext) -> bool {
        model_id == self.model
    }
    async fn infer(
        &self,
        req: &InferenceRequest,
        _tenant: &TenantContext,
    ) -> Result<InferenceResponse, EngineError> {
        tokio::time::sleep(self.delay).await;
        Ok(response_for(req))
    }
    async fn health(&self) -> Result<ProviderHealth, EngineError> {
        Ok(ProviderHealth {
            status: HealthStatus::Healthy,
            message: None,
            details: Default::default(),
            timestamp: chrono::Utc::now(),
        })
    }
}

/// Emits `total` chunks with strictly monotonic indices, the last one
/// `is_final`. No artificial delay between chunks, so a consumer driving the
/// outer `Engine::stream` controls exactly how many chunks are pulled before
/// cancelling. Grounded on SPEC_FULL §8 scenario 4 (streaming cancellation).
pub struct StreamingProvider {
    id: String,
    model: String,
    total: usize,
}

impl StreamingProvider {
    pub fn new(id: &str, model: &str, total: usize) -> Self {
        Self {
            id: id.to_string(),
            model: model.to_string(),
            total,
        }
    }
}

#[async_trait]
impl Provider for StreamingProvider {
    fn id(&self) -> &str {
        &self.id
    }
    fn version(&self) -> &str {
        "1.0.0"
    }
    fn descriptor(&self) -> ProviderDescriptor {
        descriptor_for(&self.id, self.capabilities())
    }
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: true,
            supported_models: Some(vec![self.model.clone()]),
            ..Default::default()
        }
    }
    async fn initialize(&self, _config: ProviderConfig) -> Result<(), EngineError> {
        Ok(())
    }
    fn supports(&self, model_id: &str, _tenant: &TenantContext) -> bool {
        model_id == self.model
    }
    async fn infer(
        &self,
        req: &InferenceRequest,
        _tenant: &TenantContext,
    ) -> Result<InferenceResponse, EngineError> {
        Ok(response_for(req))
    }
    async fn stream(
        &self,
        req: &InferenceRequest,
        _tenant: &TenantContext,
    ) -> Result<ChunkStream, EngineError> {
        let request_id = req.request_id.clone();
        let total = self.total;
        let stream = async_stream::stream! {
            for index in 0..total {
                yield Ok(StreamChunk {
                    request_id: request_id.clone(),
                    index: index as u64,
                    delta: format!("chunk-{index}"),
                    is_final: index + 1 == total,
                    metadata: Default::default(),
                });
            }
        };
        Ok(Box::pin(stream))
    }
    async fn health(&self) -> Result<ProviderHealth, EngineError> {
        Ok(ProviderHealth {
            status: HealthStatus::Healthy,
            message: None,
            details: Default::default(),
            timestamp: chrono::Utc::now(),
        })
    }
}
