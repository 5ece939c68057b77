//! # Provider Registry
//!
//! Versioned catalogue of provider instances, keyed by identifier, with a
//! health cache a background task keeps fresh. Routing and the orchestrator
//! consult `HEALTH_CACHE` exclusively — `Provider::health` is never called on
//! the hot path.
//!
//! This registry is a field of [`crate::orchestrator::Engine`], not a
//! process-wide singleton: the teacher this repo is grounded on kept its
//! health checker behind a `static OnceLock`, which this repo deliberately
//! does not reproduce (see DESIGN.md).

use crate::error::EngineError;
use crate::model::{ProviderHealth, TenantContext};
use crate::provider::Provider;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One-shot scan of an external source to seed the registry at startup.
/// Concrete sources (file, service discovery, ...) are injected by the
/// embedding application; this crate only specifies the interface.
#[async_trait::async_trait]
pub trait ProviderSource: Send + Sync {
    async fn discover(&self) -> Result<Vec<Arc<dyn Provider>>, EngineError>;
}

pub struct ProviderRegistry {
    providers: DashMap<String, BTreeMap<String, Arc<dyn Provider>>>,
    health_cache: DashMap<String, ProviderHealth>,
    health_interval: Duration,
    probe_timeout: Duration,
    health_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
    changed: Arc<Notify>,
}

impl ProviderRegistry {
    pub fn new(health_interval: Duration, probe_timeout: Duration) -> Self {
        Self {
            providers: DashMap::new(),
            health_cache: DashMap::new(),
            health_interval,
            probe_timeout,
            health_task: std::sync::Mutex::new(None),
            shutdown: CancellationToken::new(),
            changed: Arc::new(Notify::new()),
        }
    }

    /// Inserts `p`; if `(id, version)` already exists, replaces it and shuts
    /// down the predecessor.
    pub async fn register(&self, provider: Arc<dyn Provider>) -> Result<(), EngineError> {
        let id = provider.id().to_string();
        let version = provider.version().to_string();

        let predecessor = {
            let mut entry = self.providers.entry(id.clone()).or_insert_with(BTreeMap::new);
            entry.insert(version, provider)
        };
        if let Some(old) = predecessor {
            old.shutdown().await?;
        }
        self.health_cache
            .entry(id)
            .or_insert_with(ProviderHealth::unknown);
        self.changed.notify_waiters();
        Ok(())
    }

    /// Removes and shuts down. If `version` is `None`, all versions of `id`.
    pub async fn unregister(&self, id: &str, version: Option<&str>) -> Result<(), EngineError> {
        let removed: Vec<Arc<dyn Provider>> = match version {
            Some(v) => {
                let mut removed = Vec::new();
                if let Some(mut entry) = self.providers.get_mut(id) {
                    if let Some(p) = entry.remove(v) {
                        removed.push(p);
                    }
                }
                removed
            }
            None => {
                if let Some((_, versions)) = self.providers.remove(id) {
                    versions.into_values().collect()
                } else {
                    Vec::new()
                }
            }
        };
        for p in removed {
            p.shutdown().await?;
        }
        if !self.providers.contains_key(id) {
            self.health_cache.remove(id);
        }
        self.changed.notify_waiters();
        Ok(())
    }

    /// Latest version of `id`.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Provider>> {
        self.providers
            .get(id)
            .and_then(|versions| versions.values().next_back().cloned())
    }

    pub fn get_version(&self, id: &str, version: &str) -> Option<Arc<dyn Provider>> {
        self.providers
            .get(id)
            .and_then(|versions| versions.get(version).cloned())
    }

    pub fn all_latest(&self) -> Vec<Arc<dyn Provider>> {
        self.providers
            .iter()
            .filter_map(|e| e.value().values().next_back().cloned())
            .collect()
    }

    /// Linear filter by `Provider::supports`.
    pub fn for_model(&self, model_id: &str, tenant: &TenantContext) -> Vec<Arc<dyn Provider>> {
        self.all_latest()
            .into_iter()
            .filter(|p| p.supports(model_id, tenant))
            .collect()
    }

    pub fn streaming_providers(&self) -> Vec<Arc<dyn Provider>> {
        self.all_latest()
            .into_iter()
            .filter(|p| p.capabilities().streaming)
            .collect()
    }

    pub async fn discover(&self, source: &dyn ProviderSource) -> Result<usize, EngineError> {
        let providers = source.discover().await?;
        let count = providers.len();
        for p in providers {
            self.register(p).await?;
        }
        Ok(count)
    }

    /// The sole snapshot the router/orchestrator consult. Never triggers I/O.
    pub fn health_snapshot(&self, provider_id: &str) -> ProviderHealth {
        self.health_cache
            .get(provider_id)
            .map(|e| e.clone())
            .unwrap_or_else(ProviderHealth::unknown)
    }

    /// Spawns the background poller. Idempotent: calling it twice replaces
    /// the previous task.
    pub fn spawn_health_loop(self: &Arc<Self>) {
        let registry = Arc::clone(self);
        let mut guard = self.health_task.lock().unwrap();
        if let Some(old) = guard.take() {
            old.abort();
        }
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(registry.health_interval);
            loop {
                tokio::select! {
                    _ = registry.shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        registry.poll_once().await;
                    }
                }
            }
        });
        *guard = Some(handle);
    }

    async fn poll_once(&self) {
        for provider in self.all_latest() {
            let id = provider.id().to_string();
            let health = match tokio::time::timeout(self.probe_timeout, provider.health()).await {
                Ok(Ok(h)) => h,
                Ok(Err(e)) => {
                    tracing::warn!(provider_id = %id, error = %e, "health probe failed");
                    ProviderHealth {
                        status: crate::model::HealthStatus::Unhealthy,
                        message: Some(e.to_string()),
                        details: Default::default(),
                        timestamp: chrono::Utc::now(),
                    }
                }
                Err(_) => {
                    tracing::warn!(provider_id = %id, "health probe timed out");
                    ProviderHealth {
                        status: crate::model::HealthStatus::Unknown,
                        message: Some("probe timeout".into()),
                        details: Default::default(),
                        timestamp: chrono::Utc::now(),
                    }
                }
            };
            self.health_cache.insert(id, health);
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.health_task.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl Drop for ProviderRegistry {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
impl ProviderRegistry {
    /// Bypasses the background poller to seed a health snapshot directly.
    pub fn set_health_for_test(&self, id: &str, health: ProviderHealth) {
        self.health_cache.insert(id.to_string(), health);
    }
}
