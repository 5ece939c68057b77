//! # Inference Gateway
//!
//! The HTTP surface for [`inference_core::Engine`]: request auth, route
//! registration, and the JSON/SSE wire shapes a caller actually sends over
//! the network. Everything provider-agnostic — routing, circuit breaking,
//! the plugin pipeline, the async job queue — lives in `inference-core`;
//! this crate only translates between HTTP and that engine's API.
//!
//! ## Modules
//!
//! - [`config`]: `GatewayConfig`, loaded from TOML plus `GATEWAY_*` env
//!   overrides, wrapping the embedded `EngineConfig`.
//! - [`auth`]: bearer API-key authentication, tenant extraction.
//! - [`gateway_error`]: `GatewayError`, the HTTP-facing error type wrapping
//!   `inference_core::EngineError`.
//! - [`server`]: route registration and `AppState`.
//!
//! ## Quick start
//!
//! ```no_run
//! use inference_gateway::{config::GatewayConfig, server::create_server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = GatewayConfig::load("config.toml")?;
//!     let app = create_server(config).await?;
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod fixtures;
pub mod gateway_error;
pub mod server;

pub use config::GatewayConfig;
pub use gateway_error::GatewayError;
pub use server::{create_server, create_server_with_engine};
