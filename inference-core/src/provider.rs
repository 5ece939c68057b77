//! # Provider Contract
//!
//! The interface every inference backend implements. Concrete adapters
//! (Ollama, Anthropic, a local runtime, ...) are external collaborators;
//! this crate only specifies the contract and ships a mock implementation
//! for tests.

use crate::error::EngineError;
use crate::model::{
    InferenceRequest, InferenceResponse, ProviderCapabilities, ProviderDescriptor, ProviderHealth,
    StreamChunk,
};
use crate::model::TenantContext;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, EngineError>> + Send>>;

/// Configuration handed to a provider at `initialize`. Deliberately opaque
/// (a JSON blob) since adapters vary widely in what they need.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ProviderConfig {
    pub settings: serde_json::Value,
}

/// Every provider exposes this contract. `supports` must be pure and
/// side-effect-free — the router calls it to filter candidates on the hot
/// path. `infer`/`stream` must honor `tenant.timeout`/`req.timeout` and raise
/// [`EngineError::Timeout`] on expiry. Concurrent calls on the same instance
/// must be safe; adapters serialize internally if their backend requires it.
/// A provider must not mutate `req`.
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> &str;
    fn version(&self) -> &str;
    fn descriptor(&self) -> ProviderDescriptor;
    fn capabilities(&self) -> ProviderCapabilities;

    async fn initialize(&self, config: ProviderConfig) -> Result<(), EngineError>;

    /// Pure; used by the router to filter candidates. Must not perform I/O.
    fn supports(&self, model_id: &str, tenant: &TenantContext) -> bool;

    async fn infer(
        &self,
        req: &InferenceRequest,
        tenant: &TenantContext,
    ) -> Result<InferenceResponse, EngineError>;

    /// Lazy, cancellable sequence of chunks. Not restartable: a consumer
    /// that drops the stream must not expect to resume it.
    async fn stream(
        &self,
        req: &InferenceRequest,
        tenant: &TenantContext,
    ) -> Result<ChunkStream, EngineError> {
        let _ = (req, tenant);
        Err(EngineError::Validation {
            message: format!("provider {} does not support streaming", self.id()),
        })
    }

    async fn health(&self) -> Result<ProviderHealth, EngineError>;

    async fn shutdown(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// A minimal [`Provider`] double shared by this crate's unit tests and by
/// the `src/tests`/`tests` fixtures. Not `cfg(test)`-gated — like
/// [`crate::audit::InMemoryAuditSink`] and [`crate::quota::UnlimitedQuotaStore`],
/// it's a reusable reference implementation, not test-only plumbing, so
/// integration tests outside this crate's `cfg(test)` boundary can build on
/// it too.
pub mod tests_support {
    use super::*;
    use crate::model::{HealthStatus, Pool};
    use std::sync::atomic::{AtomicBool, Ordering};

    pub struct MockProvider {
        id: String,
        version: String,
        models: Vec<String>,
        shutdown_called: AtomicBool,
    }

    impl MockProvider {
        pub fn new(id: &str, version: &str) -> Self {
            Self {
                id: id.to_string(),
                version: version.to_string(),
                models: vec!["m".to_string()],
                shutdown_called: AtomicBool::new(false),
            }
        }

        pub fn with_models(mut self, models: Vec<&str>) -> Self {
            self.models = models.into_iter().map(String::from).collect();
            self
        }

        pub fn was_shutdown(&self) -> bool {
            self.shutdown_called.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn id(&self) -> &str {
            &self.id
        }

        fn version(&self) -> &str {
            &self.version
        }

        fn descriptor(&self) -> ProviderDescriptor {
            ProviderDescriptor {
                id: self.id.clone(),
                version: self.version.clone(),
                display_name: self.id.clone(),
                capabilities: self.capabilities(),
                vendor: "mock".to_string(),
                homepage: None,
                pool: Some(Pool::Local),
            }
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities {
                supported_models: Some(self.models.clone()),
                ..Default::default()
            }
        }

        async fn initialize(&self, _config: ProviderConfig) -> Result<(), EngineError> {
            Ok(())
        }

        fn supports(&self, model_id: &str, _tenant: &TenantContext) -> bool {
            self.models.iter().any(|m| m == model_id)
        }

        async fn infer(
            &self,
            req: &InferenceRequest,
            _tenant: &TenantContext,
        ) -> Result<InferenceResponse, EngineError> {
            Ok(InferenceResponse {
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

        async fn shutdown(&self) -> Result<(), EngineError> {
            self.shutdown_called.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
}
