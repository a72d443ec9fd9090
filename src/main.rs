//! HAProxy endpoint sync controller.
//!
//! # Architecture Overview
//!
//! ```text
//!   Kubernetes API                                                HAProxy
//!  ┌──────────────┐   ┌─────────┐   ┌────────────┐   ┌────────┐   ┌──────────────┐
//!  │EndpointSlices│──▶│         │   │            │   │        │   │              │
//!  │Endpoints     │──▶│ mirror  │──▶│ controller │──▶│  sync  │──▶│ Data Plane   │
//!  │Nodes         │──▶│         │   │ queue +    │   │ engine │   │ API (tx)     │
//!  └──────────────┘   └─────────┘   │ workers    │   └────────┘   └──────────────┘
//!                                   └────────────┘
//!  Cross-cutting: config, lifecycle, observability, probes
//! ```

use clap::Parser;
use std::path::PathBuf;

use haproxy_endpoint_sync::config::load_config;
use haproxy_endpoint_sync::lifecycle::startup;
use haproxy_endpoint_sync::observability::logging::{self, LogFormat};

#[derive(Parser, Debug)]
#[command(name = "haproxy-endpoint-sync", version, about = "Sync Kubernetes service endpoints into an HAProxy backend")]
struct Cli {
    /// Optional TOML configuration file; environment variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    logging::init(
        &config.observability.log_level,
        LogFormat::parse(&config.observability.log_format),
    );

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "haproxy-endpoint-sync starting");
    tracing::debug!(config = ?config, "Configuration loaded");

    startup::run(config).await?;
    Ok(())
}
