//! # Plugin Registry & Lifecycle
//!
//! Generalizes the teacher's two-hook (`before_request`/`after_response`)
//! middleware model into the six-phase pipeline the orchestrator runs:
//! `VALIDATE → ROUTE → PRE_INFER → INFER → POST_INFER → AUDIT`. A plugin
//! declares exactly one phase and an `order`; plugins in the same phase run
//! strictly sequentially in ascending order for a given request.
//!
//! Plugins mutate a shared, per-request [`ExecutionContext`] or short-circuit
//! the pipeline by returning an error — they never see an `Engine`
//! back-reference, only this context, passed by value.

use crate::error::EngineError;
use crate::model::{InferenceRequest, InferenceResponse, Phase, PluginState, TenantContext};
use crate::router::RoutingDecision;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Read-only-by-convention, per-request scratch space plugins mutate.
/// Never shared across requests.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub request: InferenceRequest,
    pub tenant: TenantContext,
    pub routing: Option<RoutingDecision>,
    pub response: Option<InferenceResponse>,
    pub error: Option<EngineError>,
    pub attributes: HashMap<String, serde_json::Value>,
}

impl ExecutionContext {
    pub fn new(request: InferenceRequest, tenant: TenantContext) -> Self {
        Self {
            request,
            tenant,
            routing: None,
            response: None,
            error: None,
            attributes: HashMap::new(),
        }
    }

    pub fn short_circuited(&self) -> bool {
        self.error.is_some()
    }
}

/// A single extension point. Implementors declare their phase/order via
/// [`Plugin::phase`]/[`Plugin::order`] and mutate the context in `run`;
/// returning `Err` short-circuits the pipeline to `AUDIT`.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn id(&self) -> &str;
    fn version(&self) -> &str;
    fn phase(&self) -> Phase;
    /// Ascending; default convention is 100 for plugins with no preference.
    fn order(&self) -> i32 {
        100
    }

    async fn initialize(&self) -> Result<(), EngineError> {
        Ok(())
    }
    async fn activate(&self) -> Result<(), EngineError> {
        Ok(())
    }
    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), EngineError>;
    async fn shutdown(&self) -> Result<(), EngineError> {
        Ok(())
    }
    /// `registry.is_healthy()` is true only when every active plugin reports
    /// healthy here.
    async fn health_check(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

struct Entry {
    plugin: Arc<dyn Plugin>,
    state: RwLock<PluginState>,
}

/// Ordered, phase-bound extension registry. One instance lives on `Engine`;
/// never a process-wide singleton.
pub struct PluginRegistry {
    entries: DashMap<String, Entry>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Registers and drives `REGISTERED → INITIALIZED → ACTIVE`. On failure
    /// the plugin is left `FAILED` (terminal until `reload`), but remains
    /// registered so `list` can surface the failure.
    pub async fn register(&self, plugin: Arc<dyn Plugin>) -> Result<(), EngineError> {
        let id = plugin.id().to_string();
        let entry = Entry {
            plugin: plugin.clone(),
            state: RwLock::new(PluginState::Registered),
        };
        self.entries.insert(id.clone(), entry);
        self.bring_up(&id).await
    }

    async fn bring_up(&self, id: &str) -> Result<(), EngineError> {
        let Some(entry) = self.entries.get(id) else {
            return Err(EngineError::internal(format!("plugin {id} not registered")));
        };
        match entry.plugin.initialize().await {
            Ok(()) => {}
            Err(e) => {
                *entry.state.write().await = PluginState::Failed;
                return Err(e);
            }
        }
        *entry.state.write().await = PluginState::Initialized;
        match entry.plugin.activate().await {
            Ok(()) => {}
            Err(e) => {
                *entry.state.write().await = PluginState::Failed;
                return Err(e);
            }
        }
        *entry.state.write().await = PluginState::Active;
        Ok(())
    }

    pub async fn unregister(&self, id: &str) -> Result<(), EngineError> {
        if let Some((_, entry)) = self.entries.remove(id) {
            entry.plugin.shutdown().await?;
        }
        Ok(())
    }

    /// `shutdown → initialize → activate`, atomic in the sense that any
    /// failure leaves the plugin `FAILED` rather than partially up; the
    /// orchestrator then skips it.
    pub async fn reload(&self, id: &str) -> Result<(), EngineError> {
        {
            let Some(entry) = self.entries.get(id) else {
                return Err(EngineError::internal(format!("plugin {id} not registered")));
            };
            entry.plugin.shutdown().await?;
            *entry.state.write().await = PluginState::Stopped;
        }
        self.bring_up(id).await
    }

    pub async fn state_of(&self, id: &str) -> Option<PluginState> {
        match self.entries.get(id) {
            Some(entry) => Some(*entry.state.read().await),
            None => None,
        }
    }

    /// All active plugins for `phase`, sorted by ascending `order`, `id` as a
    /// stable tie-break.
    pub async fn active_in_phase(&self, phase: Phase) -> Vec<Arc<dyn Plugin>> {
        let mut out = Vec::new();
        for entry in self.entries.iter() {
            if entry.plugin.phase() != phase {
                continue;
            }
            if *entry.state.read().await == PluginState::Active {
                out.push(entry.plugin.clone());
            }
        }
        out.sort_by(|a, b| a.order().cmp(&b.order()).then_with(|| a.id().cmp(b.id())));
        out
    }

    /// Runs every active plugin bound to `phase`, in order, against `ctx`.
    /// Stops at the first error, which is recorded on `ctx.error`.
    pub async fn run_phase(&self, phase: Phase, ctx: &mut ExecutionContext) -> Result<(), EngineError> {
        for plugin in self.active_in_phase(phase).await {
            if let Err(e) = plugin.run(ctx).await {
                ctx.error = Some(e.clone());
                return Err(e);
            }
        }
        Ok(())
    }

    pub async fn list(&self) -> Vec<(String, PluginState, Phase, i32)> {
        let mut out = Vec::new();
        for entry in self.entries.iter() {
            let state = *entry.state.read().await;
            out.push((entry.plugin.id().to_string(), state, entry.plugin.phase(), entry.plugin.order()));
        }
        out
    }

    /// Shuts down every registered plugin, best effort. Used by
    /// `Engine::shutdown`; failures are logged, not propagated.
    pub async fn shutdown_all(&self) {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Err(e) = self.unregister(&id).await {
                tracing::warn!(plugin_id = %id, error = %e, "plugin shutdown failed");
            }
        }
    }

    /// `registry.is_healthy() ⇔ every active plugin reports healthy`.
    pub async fn is_healthy(&self) -> bool {
        for entry in self.entries.iter() {
            if *entry.state.read().await != PluginState::Active {
                continue;
            }
            if entry.plugin.health_check().await.is_err() {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Message, Role};
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::time::Duration;

    fn req() -> InferenceRequest {
        InferenceRequest {
            request_id: "r1".into(),
            model: "m".into(),
            messages: vec![Message { role: Role::User, content: "hi".into(), name: None, tool_call_id: None }],
            parameters: Default::default(),
            tools: vec![],
            tool_choice: Default::default(),
            streaming: false,
            preferred_provider: None,
            timeout: Duration::from_secs(60),
            priority: 5,
        }
    }

    struct OrderRecorder {
        id: String,
        order: i32,
        phase: Phase,
        trace: Arc<std::sync::Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Plugin for OrderRecorder {
        fn id(&self) -> &str {
            &self.id
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        fn phase(&self) -> Phase {
            self.phase
        }
        fn order(&self) -> i32 {
            self.order
        }
        async fn run(&self, _ctx: &mut ExecutionContext) -> Result<(), EngineError> {
            self.trace.lock().unwrap().push(self.id.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn plugins_in_a_phase_run_in_ascending_order() {
        let trace = Arc::new(std::sync::Mutex::new(Vec::new()));
        let registry = PluginRegistry::new();
        registry
            .register(Arc::new(OrderRecorder {
                id: "b".into(),
                order: 20,
                phase: Phase::Validate,
                trace: trace.clone(),
            }))
            .await
            .unwrap();
        registry
            .register(Arc::new(OrderRecorder {
                id: "a".into(),
                order: 10,
                phase: Phase::Validate,
                trace: trace.clone(),
            }))
            .await
            .unwrap();

        let mut ctx = ExecutionContext::new(req(), TenantContext::new("t1"));
        registry.run_phase(Phase::Validate, &mut ctx).await.unwrap();
        assert_eq!(*trace.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    struct FailingPlugin;

    #[async_trait]
    impl Plugin for FailingPlugin {
        fn id(&self) -> &str {
            "failing"
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        fn phase(&self) -> Phase {
            Phase::Validate
        }
        async fn run(&self, _ctx: &mut ExecutionContext) -> Result<(), EngineError> {
            Err(EngineError::Validation {
                message: "bad request".into(),
            })
        }
    }

    #[tokio::test]
    async fn failing_plugin_short_circuits_and_records_error() {
        let registry = PluginRegistry::new();
        registry.register(Arc::new(FailingPlugin)).await.unwrap();
        let mut ctx = ExecutionContext::new(req(), TenantContext::new("t1"));
        let result = registry.run_phase(Phase::Validate, &mut ctx).await;
        assert!(result.is_err());
        assert!(ctx.short_circuited());
    }

    struct FailingInit;

    #[async_trait]
    impl Plugin for FailingInit {
        fn id(&self) -> &str {
            "bad-init"
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        fn phase(&self) -> Phase {
            Phase::Audit
        }
        async fn initialize(&self) -> Result<(), EngineError> {
            Err(EngineError::internal("boom"))
        }
        async fn run(&self, _ctx: &mut ExecutionContext) -> Result<(), EngineError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_initialize_leaves_plugin_in_failed_state_and_excluded_from_phase() {
        let registry = PluginRegistry::new();
        assert!(registry.register(Arc::new(FailingInit)).await.is_err());
        assert_eq!(registry.state_of("bad-init").await, Some(PluginState::Failed));
        assert!(registry.active_in_phase(Phase::Audit).await.is_empty());
    }

    #[tokio::test]
    async fn reload_resets_a_failed_plugin_to_active() {
        let registry = PluginRegistry::new();
        let counter = Arc::new(AtomicI32::new(0));

        struct FlakyInit {
            counter: Arc<AtomicI32>,
        }
        #[async_trait]
        impl Plugin for FlakyInit {
            fn id(&self) -> &str {
                "flaky"
            }
            fn version(&self) -> &str {
                "1.0.0"
            }
            fn phase(&self) -> Phase {
                Phase::Audit
            }
            async fn initialize(&self) -> Result<(), EngineError> {
                if self.counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(EngineError::internal("first attempt fails"))
                } else {
                    Ok(())
                }
            }
            async fn run(&self, _ctx: &mut ExecutionContext) -> Result<(), EngineError> {
                Ok(())
            }
        }

        assert!(registry
            .register(Arc::new(FlakyInit { counter: counter.clone() }))
            .await
            .is_err());
        assert_eq!(registry.state_of("flaky").await, Some(PluginState::Failed));

        registry.reload("flaky").await.unwrap();
        assert_eq!(registry.state_of("flaky").await, Some(PluginState::Active));
    }
}
