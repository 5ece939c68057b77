//! # Authentication Middleware
//!
//! Grounded on `caliber-api/src/middleware/auth.rs`'s `axum::middleware::from_fn_with_state`
//! shape (extract headers, validate, inject an `AuthContext` into request
//! extensions, 401 on failure) but narrowed to this gateway's model: a
//! bearer API key identifies a tenant, nothing more. Session management,
//! JWT claims, and sliding-window rate limiting are out of scope here —
//! quota and rate limiting are the orchestrator's `QuotaStore`'s job.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

use inference_core::TenantContext;

use crate::config::AuthConfig;
use crate::gateway_error::GatewayError;

const TENANT_HEADER: &str = "x-tenant-id";
const DEFAULT_TENANT: &str = "default";

/// The tenant identity attached to a request once `auth_middleware` accepts
/// it. Handlers read this from request extensions to build a
/// [`TenantContext`] for the call into `Engine`.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub tenant_id: String,
}

impl AuthContext {
    pub fn to_tenant_context(&self) -> TenantContext {
        TenantContext::new(self.tenant_id.clone())
    }
}

fn extract_bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn extract_tenant_header(request: &Request) -> Option<String> {
    request
        .headers()
        .get(TENANT_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
}

/// Axum middleware: validates the bearer token against `AuthConfig`'s
/// configured keys and injects an [`AuthContext`] into request extensions.
///
/// When `auth_config.require_api_key` is `false`, any request is accepted
/// under the `X-Tenant-ID` header (or `default` if absent) — this is the
/// local-development escape hatch, not a production posture.
pub async fn auth_middleware(
    State(auth_config): State<Arc<AuthConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let tenant_id = if auth_config.require_api_key {
        let token = extract_bearer_token(&request)
            .ok_or_else(|| GatewayError::Auth("missing bearer token".to_string()))?;
        auth_config
            .tenant_for_key(token)
            .map(|s| s.to_string())
            .ok_or_else(|| GatewayError::Auth("invalid API key".to_string()))?
    } else {
        extract_tenant_header(&request).unwrap_or_else(|| DEFAULT_TENANT.to_string())
    };

    request
        .extensions_mut()
        .insert(AuthContext { tenant_id });

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiKeyConfig;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn config_with_key() -> AuthConfig {
        let mut config = AuthConfig {
            require_api_key: true,
            api_keys: vec![],
        };
        config.api_keys.push(ApiKeyConfig {
            key: "sk-test".to_string(),
            tenant_id: "tenant-a".to_string(),
        });
        config
    }

    async fn handler(
        axum::extract::Extension(ctx): axum::extract::Extension<AuthContext>,
    ) -> String {
        ctx.tenant_id
    }

    fn app(config: AuthConfig) -> Router {
        Router::new()
            .route("/probe", get(handler))
            .layer(axum::middleware::from_fn_with_state(
                Arc::new(config),
                auth_middleware,
            ))
    }

    #[tokio::test]
    async fn rejects_missing_bearer_token() {
        let response = app(config_with_key())
            .oneshot(HttpRequest::builder().uri("/probe").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn rejects_unknown_key() {
        let response = app(config_with_key())
            .oneshot(
                HttpRequest::builder()
                    .uri("/probe")
                    .header(AUTHORIZATION, "Bearer sk-wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn accepts_configured_key_and_injects_tenant() {
        let response = app(config_with_key())
            .oneshot(
                HttpRequest::builder()
                    .uri("/probe")
                    .header(AUTHORIZATION, "Bearer sk-test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn dev_mode_falls_back_to_default_tenant() {
        let config = AuthConfig {
            require_api_key: false,
            api_keys: vec![],
        };
        let response = app(config)
            .oneshot(HttpRequest::builder().uri("/probe").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
