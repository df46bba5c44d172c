//! Device management gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http server ──▶ admission (rate limiter) ──▶ handler
//!                                                                   │
//!                          ┌────────────────────────────────────────┤
//!                          ▼                                        ▼
//!                   task manager ──▶ queue ──▶ workers ──▶  resilient executor
//!                          │                       │          cache │ circuit │ retry
//!                          ▼                       ▼                ▼
//!                      task store ◀────────────────┘        device management API
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use device_gateway::config::load_config;
use device_gateway::lifecycle::{spawn_signal_listener, Gateway, Shutdown};
use device_gateway::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "device-gateway")]
#[command(about = "Resilient gateway in front of a device management API", long_about = None)]
struct Args {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "device-gateway starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        downstream = %config.downstream.base_url,
        request_timeout_secs = config.listener.request_timeout_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone());

    let gateway = Gateway::build(config).await?;
    gateway.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
