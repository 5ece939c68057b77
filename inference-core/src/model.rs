//! # Data Model
//!
//! Immutable value types shared by every component: requests, responses,
//! stream chunks, provider/tenant descriptors, and the lifecycle records
//! (`CircuitState`, `AsyncJob`, `Plugin`) other modules expose read-only
//! snapshots of.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// One message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            name: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            name: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            name: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    #[default]
    None,
    Auto,
    Specific(String),
}

/// A normalized inference request. Immutable once constructed; providers
/// must not mutate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub request_id: String,
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub tools: Vec<ToolSchema>,
    #[serde(default)]
    pub tool_choice: ToolChoice,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub preferred_provider: Option<String>,
    #[serde(with = "duration_millis", default = "default_timeout")]
    pub timeout: Duration,
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_priority() -> i32 {
    5
}

impl InferenceRequest {
    /// Checks the invariant: exactly one `user`/`assistant` message is last;
    /// `system` messages appear only in leading positions.
    pub fn validate_shape(&self) -> std::result::Result<(), String> {
        if self.messages.is_empty() {
            return Err("messages must not be empty".to_string());
        }
        let last = self.messages.last().unwrap();
        if !matches!(last.role, Role::User | Role::Assistant) {
            return Err("last message must be user or assistant".to_string());
        }
        let mut seen_non_system = false;
        for msg in &self.messages {
            if matches!(msg.role, Role::System) {
                if seen_non_system {
                    return Err("system messages must appear only in leading positions".into());
                }
            } else {
                seen_non_system = true;
            }
        }
        Ok(())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub request_id: String,
    pub model: String,
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub tokens_used: u32,
    pub duration_ms: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub stop_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub request_id: String,
    /// Monotonically increasing from 0; the chunk with `is_final=true` is the
    /// last one and carries usage totals in `metadata`.
    pub index: u64,
    pub delta: String,
    pub is_final: bool,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ArtifactFormat {
    Gguf,
    Safetensors,
    Onnx,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactLocation {
    pub uri: String,
    pub checksum: String,
    pub size_bytes: u64,
    pub mime: String,
}

/// Metadata describing a loadable model artifact. Consumed read-only by the
/// router; the orchestrator does not fetch or probe hardware for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    pub id: String,
    pub supported_formats: Vec<ArtifactFormat>,
    pub artifacts: HashMap<ArtifactFormat, ArtifactLocation>,
    pub supported_devices: Vec<String>,
    pub resource_requirements: HashMap<String, serde_json::Value>,
    pub tenant_binding: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Per-request identity/policy envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub trace_id: String,
    pub attempt: u32,
    pub max_attempts: u32,
    pub preferred_device: Option<String>,
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    pub cost_sensitive: bool,
}

impl TenantContext {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: None,
            session_id: None,
            trace_id: uuid::Uuid::new_v4().to_string(),
            attempt: 0,
            max_attempts: 3,
            preferred_device: None,
            timeout: Duration::from_secs(60),
            cost_sensitive: false,
        }
    }
}

/// Named subset of providers sharing policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Pool {
    Cloud,
    Local,
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// `namespace/name`.
    pub id: String,
    /// Semver.
    pub version: String,
    pub display_name: String,
    pub capabilities: ProviderCapabilities,
    pub vendor: String,
    pub homepage: Option<String>,
    pub pool: Option<Pool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderCapabilities {
    pub streaming: bool,
    pub embeddings: bool,
    pub multimodal: bool,
    pub function_calling: bool,
    pub tool_calling: bool,
    pub structured_outputs: bool,
    pub supported_formats: Vec<ArtifactFormat>,
    pub supported_devices: Vec<String>,
    pub max_context_tokens: Option<u32>,
    pub max_output_tokens: Option<u32>,
    /// `None` means open-universe: the provider accepts any model id its
    /// `supports` predicate approves.
    pub supported_models: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub status: HealthStatus,
    pub message: Option<String>,
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ProviderHealth {
    pub fn unknown() -> Self {
        Self {
            status: HealthStatus::Unknown,
            message: None,
            details: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Read-only snapshot of a circuit's state, as exposed to callers. The live
/// state machine lives in [`crate::circuit_breaker::CircuitBreaker`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum CircuitStateKind {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitStateSnapshot {
    pub state: CircuitStateKind,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<chrono::DateTime<chrono::Utc>>,
    pub opened_at: Option<chrono::DateTime<chrono::Utc>>,
    pub half_open_probe_in_flight: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncJob {
    pub job_id: String,
    pub request: InferenceRequest,
    pub tenant_id: String,
    pub priority: i32,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
    pub state: JobState,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub response: Option<InferenceResponse>,
    pub error: Option<String>,
}

impl AsyncJob {
    /// Default TTL = 24h after entering a terminal state; configurable via
    /// `async.jobTtlH` (see [`expired_after`]).
    pub fn expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.expired_after(now, 24)
    }

    /// TTL-parameterized variant the sweep uses, so `async.jobTtlH` isn't
    /// dead config.
    pub fn expired_after(&self, now: chrono::DateTime<chrono::Utc>, ttl_hours: i64) -> bool {
        match self.completed_at {
            Some(completed_at) => (now - completed_at).num_hours() >= ttl_hours,
            None => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

/// Phases a plugin may bind to, in pipeline order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Validate,
    Route,
    PreInfer,
    Infer,
    PostInfer,
    Audit,
}

impl Phase {
    pub const ORDER: [Phase; 6] = [
        Phase::Validate,
        Phase::Route,
        Phase::PreInfer,
        Phase::Infer,
        Phase::PostInfer,
        Phase::Audit,
    ];
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PluginState {
    Registered,
    Initialized,
    Active,
    Failed,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub id: String,
    pub version: String,
    pub phase: Phase,
    pub order: i32,
    pub state: PluginState,
    pub config: serde_json::Value,
}
