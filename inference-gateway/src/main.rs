//! # Inference Gateway Binary
//!
//! Entry point: parse CLI args, load config, build the engine-backed axum
//! app, and serve it.
//!
//! ## Usage
//!
//! ```bash
//! inference-gateway --config gateway.toml
//! inference-gateway --host 0.0.0.0 --port 8080
//! inference-gateway --log-level debug
//! ```

use clap::Parser;
use inference_gateway::{config::GatewayConfig, server::create_server};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the gateway's TOML configuration file.
    #[arg(short, long, default_value = "gateway.toml")]
    config: String,

    /// Overrides `server.port` from the config file.
    #[arg(short, long)]
    port: Option<u16>,

    /// Overrides `server.host` from the config file.
    #[arg(long)]
    host: Option<String>,

    /// Tracing filter directive, e.g. `info` or `inference_core=debug`.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    let mut config = GatewayConfig::load(&args.config)?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    config.validate()?;

    let addr = config.server.bind_addr()?;
    let app = create_server(config).await?;

    tracing::info!("starting inference gateway on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
