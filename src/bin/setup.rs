//! One-shot topology bootstrap.
//!
//! Connects to the broker with retries, declares the exchange and both
//! queue bindings, and exits. Intended to run as an init container or a
//! deploy step so that consumers and producers find the topology in place.
//!
//! Exit codes: 0 = topology ensured, 1 = connection exhausted,
//! 2 = topology declaration failed.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fluxbridge::{ensure_topology, BridgeConfig, BridgeError, Connector, TopologyDescriptor};

#[derive(Parser, Debug)]
#[command(name = "fluxbridge-setup")]
#[command(about = "Declare the bridge's broker topology and exit")]
struct Args {
    /// Path to a TOML config file (environment variables still apply)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = match BridgeConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::from(1);
        }
    };

    info!(
        host = %config.amqp.host,
        port = config.amqp.port,
        exchange = %config.topology.exchange,
        "starting topology setup"
    );

    let connection = match Connector::connect(&config.amqp, &config.retry.policy()).await {
        Ok(connection) => connection,
        Err(e) => {
            error!(error = %e, "could not connect to broker");
            return ExitCode::from(1);
        }
    };

    let descriptor = TopologyDescriptor::from_config(&config.topology);
    let result = async {
        let channel = connection
            .create_channel()
            .await
            .map_err(|source| BridgeError::Topology {
                queue: descriptor.exchange.clone(),
                source,
            })?;
        ensure_topology(&channel, &descriptor).await
    }
    .await;

    if let Err(e) = result {
        error!(error = %e, "topology declaration failed");
        let _ = connection.close(0, "setup failed").await;
        return ExitCode::from(2);
    }

    let _ = connection.close(0, "setup complete").await;
    info!("topology setup completed successfully");
    ExitCode::SUCCESS
}
