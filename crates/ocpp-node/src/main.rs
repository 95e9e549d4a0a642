//! OCPP node entry point.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration from the environment
//! 2. Install the tracing subscriber
//! 3. Build the engines and link the demo network
//! 4. Send demo requests until Ctrl+C

use anyhow::{Context, Result};
use ocpp_node::{init_tracing, NodeConfig, NodeRuntime};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = NodeConfig::from_env().context("Failed to load configuration")?;
    init_tracing(&config.telemetry).context("Failed to initialize logging")?;

    info!(
        node = %config.exchange.node_id,
        default_timeout_ms = config.exchange.default_timeout.as_millis(),
        demo_interval_ms = config.demo_interval.as_millis(),
        "Starting OCPP node"
    );

    let runtime = NodeRuntime::start(&config).await?;
    let stop = CancellationToken::new();

    let stopper = stop.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }
        stopper.cancel();
    });

    info!("Node is running. Press Ctrl+C to stop.");
    let answered = runtime.run_demo(config.demo_interval, stop).await;
    info!(answered, "Demo stopped");

    runtime.shutdown().await;
    Ok(())
}
