//! # Gateway Configuration
//!
//! Grounded on `inference-core/src/config.rs`'s `EngineConfig::load` pattern
//! (TOML file + environment overrides + a `validate()` pass), extended one
//! level up with the sections only the HTTP boundary cares about: bind
//! address, CORS, request timeout, and API key auth.

use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use inference_core::EngineConfig;

fn duration_ms<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    Ok(Duration::from_millis(u64::deserialize(d)?))
}

fn serialize_duration_ms<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

mod duration_ms_serde {
    pub use super::duration_ms as deserialize;
    pub use super::serialize_duration_ms as serialize;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "duration_ms_serde")]
    pub request_timeout: Duration,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout: Duration::from_millis(60_000),
            cors_allowed_origins: vec!["*".to_string()],
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid server.host/port: {e}"))
    }
}

/// A single tenant's bearer API key. Quota/rate-limiting live behind
/// `inference_core::QuotaStore`; this is identity only — which tenant a key
/// belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    pub key: String,
    pub tenant_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// When `false`, every request is accepted under the `X-Tenant-ID`
    /// header (or `default` if absent). Used for local development.
    pub require_api_key: bool,
    pub api_keys: Vec<ApiKeyConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            require_api_key: true,
            api_keys: Vec::new(),
        }
    }
}

impl AuthConfig {
    /// Returns the tenant id bound to `key`, if `key` is a configured key.
    pub fn tenant_for_key(&self, key: &str) -> Option<&str> {
        self.api_keys
            .iter()
            .find(|k| k.key == key)
            .map(|k| k.tenant_id.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub engine: EngineConfig,
}

impl GatewayConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: GatewayConfig = toml::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// `GATEWAY_*`-prefixed overrides, following the teacher's
    /// `GATEWAY_*`-prefixed `apply_env_overrides`. Engine-level overrides are
    /// delegated to `EngineConfig::apply_env_overrides`.
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(v) = env::var("GATEWAY_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = env::var("GATEWAY_PORT") {
            self.server.port = v
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid GATEWAY_PORT: {v}"))?;
        }
        if let Ok(v) = env::var("GATEWAY_REQUEST_TIMEOUT_MS") {
            let ms: u64 = v
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid GATEWAY_REQUEST_TIMEOUT_MS: {v}"))?;
            self.server.request_timeout = Duration::from_millis(ms);
        }
        if let Ok(v) = env::var("GATEWAY_REQUIRE_API_KEY") {
            self.auth.require_api_key = v
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid GATEWAY_REQUIRE_API_KEY: {v}"))?;
        }
        self.engine.apply_env_overrides()?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("server.host must not be empty"));
        }
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server.port must be nonzero"));
        }
        if self.auth.require_api_key && self.auth.api_keys.is_empty() {
            return Err(anyhow::anyhow!(
                "auth.require_api_key is true but auth.api_keys is empty"
            ));
        }
        self.engine.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_permissive_for_local_dev() {
        let config = GatewayConfig::default();
        assert_eq!(config.server.port, 8080);
        assert!(config.auth.require_api_key);
    }

    #[test]
    fn validate_rejects_required_auth_with_no_keys() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_configured_key() {
        let mut config = GatewayConfig::default();
        config.auth.api_keys.push(ApiKeyConfig {
            key: "sk-test".to_string(),
            tenant_id: "tenant-a".to_string(),
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn tenant_for_key_looks_up_configured_key() {
        let mut config = GatewayConfig::default();
        config.auth.api_keys.push(ApiKeyConfig {
            key: "sk-test".to_string(),
            tenant_id: "tenant-a".to_string(),
        });
        assert_eq!(config.auth.tenant_for_key("sk-test"), Some("tenant-a"));
        assert_eq!(config.auth.tenant_for_key("sk-missing"), None);
    }
}
