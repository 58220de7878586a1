//! The long-running bridge daemon.
//!
//! Startup order: health-gate the store, then loop forever over
//! connect → ensure topology → dispatch. Connection exhaustion or loss
//! restarts the whole session after a fixed delay; ctrl-c exits cleanly.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fluxbridge::dispatch::{Dispatcher, MapperKind, QueueHandler};
use fluxbridge::{
    ensure_topology, wait_until_ready, BridgeConfig, Connector, InfluxWriter, TopologyDescriptor,
};

#[derive(Parser, Debug)]
#[command(name = "fluxbridge")]
#[command(about = "Resilient AMQP-to-InfluxDB telemetry bridge")]
struct Args {
    /// Path to a TOML config file (environment variables still apply)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds to wait before rebuilding a lost broker session
    #[arg(long, default_value = "5")]
    reconnect_delay: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config =
        BridgeConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    let writer = InfluxWriter::new(&config.influx);

    // Fail fast if the store is not ready; consuming against a dead store
    // would silently drop every message.
    wait_until_ready(
        &writer,
        config.influx.health_max_attempts,
        config.influx.health_poll_interval(),
    )
    .await
    .context("store never became healthy")?;

    let descriptor = TopologyDescriptor::from_config(&config.topology);
    let handlers = vec![
        QueueHandler {
            queue: config.topology.data_queue.clone(),
            measurement: config.influx.reading_measurement.clone(),
            kind: MapperKind::Reading,
        },
        QueueHandler {
            queue: config.topology.health_queue.clone(),
            measurement: config.influx.health_measurement.clone(),
            kind: MapperKind::Health,
        },
    ];
    let dispatcher = Dispatcher::new(writer);
    let policy = config.retry.policy();
    let reconnect_delay = Duration::from_secs(args.reconnect_delay);

    loop {
        match run_session(&config, &policy, &descriptor, &dispatcher, &handlers).await {
            // Ok means the interrupt fired and the connection was closed.
            Ok(()) => return Ok(()),
            Err(e) if e.is_recoverable() => {
                error!(error = %e, "bridge session failed, will reconnect");
            }
            // Topology failure is misconfiguration; restarting would fail
            // the same way forever.
            Err(e) => {
                error!(error = %e, "unrecoverable bridge error");
                return Err(e.into());
            }
        }

        info!(delay_secs = reconnect_delay.as_secs(), "waiting before session restart");
        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                return Ok(());
            }
        }
    }
}

/// One full connect → declare → consume session.
///
/// Returns `Ok(())` only on interrupt, after closing the connection; any
/// other exit is an error for the restart loop to classify.
async fn run_session(
    config: &BridgeConfig,
    policy: &fluxbridge::RetryPolicy,
    descriptor: &TopologyDescriptor,
    dispatcher: &Dispatcher<InfluxWriter>,
    handlers: &[QueueHandler],
) -> Result<(), fluxbridge::BridgeError> {
    // No connection exists yet during the retry loop, so the interrupt can
    // simply abandon it.
    let connection = tokio::select! {
        result = Connector::connect(&config.amqp, policy) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            return Ok(());
        }
    };

    let channel = connection
        .create_channel()
        .await
        .map_err(|source| fluxbridge::BridgeError::Topology {
            queue: descriptor.exchange.clone(),
            source,
        })?;
    ensure_topology(&channel, descriptor).await?;

    info!("topology ensured, consuming");
    tokio::select! {
        result = dispatcher.run(&connection, handlers.to_vec()) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, closing connection");
            if let Err(e) = connection.close(0, "shutdown").await {
                error!(error = %e, "connection close failed");
            }
            Ok(())
        }
    }
}
