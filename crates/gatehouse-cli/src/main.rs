//! `gatehouse` binary.

mod simulate;

use anyhow::{Context, Result};
use clap::Parser;
use gatehouse_engine::{Gateway, GatewayConfig, GatewayParts};
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "gatehouse")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Access-control gateway for Wiegand card readers", long_about = None)]
struct Cli {
    /// TOML configuration file; `GATEHOUSE__SECTION__KEY` variables override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run against mock devices, reading `<channel> <card>` lines from stdin
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = GatewayConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.log_level);

    info!(version = gatehouse_core::VERSION, simulate = cli.simulate, "Starting gatehouse");

    if cli.simulate {
        return simulate::run(config).await;
    }

    // No GPIO driver is linked in; readers and relays come up disabled.
    let parts = GatewayParts::from_config(&config);
    let gateway = Gateway::start(config, parts)
        .await
        .context("Failed to start gateway")?;

    let status = gateway.status().await;
    for component in status.degraded() {
        warn!(%component, "Running degraded");
    }

    shutdown_signal().await;
    gateway.shutdown().await;
    Ok(())
}

fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
