//! Broker connector: DNS probe, fallback host, retry with backoff.
//!
//! The connector owns the connection lifecycle for one bridge session. A
//! fallback-host substitution is held in a local variable for the duration
//! of the retry loop; the shared [`AmqpConfig`] is never mutated, so
//! repeated or concurrent connect calls stay independent.

use lapin::{Connection, ConnectionProperties};
use tokio::net::lookup_host;
use tracing::{info, warn};

use crate::config::AmqpConfig;
use crate::error::BridgeError;
use crate::retry::RetryPolicy;

/// Establishes authenticated broker connections with retries.
pub struct Connector;

impl Connector {
    /// Connect to the broker, retrying with exponential backoff.
    ///
    /// Each attempt first resolves the current host; on DNS failure the
    /// fallback host (if configured and not already in use) takes over for
    /// subsequent attempts. Resolution success is followed by the AMQP
    /// handshake. After `policy.max_attempts` failures the last error and
    /// host are surfaced in [`BridgeError::ConnectExhausted`].
    pub async fn connect(
        config: &AmqpConfig,
        policy: &RetryPolicy,
    ) -> Result<Connection, BridgeError> {
        // Scoped to this call; never written back to the config.
        let mut host = config.host.clone();
        let mut last_error = String::from("no attempts made");

        for attempt in 1..=policy.max_attempts {
            info!(
                attempt,
                max_attempts = policy.max_attempts,
                host = %host,
                port = config.port,
                "resolving broker host"
            );

            match Self::attempt(config, &host).await {
                Ok(connection) => {
                    info!(host = %host, port = config.port, "connected to broker");
                    return Ok(connection);
                }
                Err(failure) => {
                    let error = failure.to_error(&host);
                    warn!(attempt, host = %host, error = %error, "connection attempt failed");
                    last_error = error.to_string();
                    if matches!(failure, AttemptFailure::Resolution(_)) {
                        if let Some(fallback) =
                            fallback_after_dns_failure(&host, config.fallback_host.as_deref())
                        {
                            info!(fallback = %fallback, "switching to fallback host");
                            host = fallback;
                        }
                    }
                }
            }

            if !policy.exhausted(attempt) {
                let delay = policy.delay_with_jitter(attempt);
                info!(attempt, delay_ms = delay.as_millis() as u64, "waiting before retry");
                tokio::time::sleep(delay).await;
            }
        }

        Err(BridgeError::ConnectExhausted {
            host,
            attempts: policy.max_attempts,
            last_error,
        })
    }

    /// One resolution + handshake attempt against a single host.
    async fn attempt(config: &AmqpConfig, host: &str) -> Result<Connection, AttemptFailure> {
        lookup_host((host, config.port))
            .await
            .map_err(|e| AttemptFailure::Resolution(e.to_string()))?;

        Connection::connect(&config.uri_for_host(host), connection_properties())
            .await
            .map_err(|e| AttemptFailure::Handshake(e.to_string()))
    }
}

/// Why a single connection attempt failed. Resolution failures are the
/// trigger for switching to the fallback host.
enum AttemptFailure {
    Resolution(String),
    Handshake(String),
}

impl AttemptFailure {
    fn to_error(&self, host: &str) -> BridgeError {
        let reason = match self {
            AttemptFailure::Resolution(e) => format!("DNS lookup failed: {e}"),
            AttemptFailure::Handshake(e) => format!("AMQP handshake failed: {e}"),
        };
        BridgeError::Connect {
            host: host.to_string(),
            reason,
        }
    }
}

fn connection_properties() -> ConnectionProperties {
    ConnectionProperties::default()
        .with_executor(tokio_executor_trait::Tokio::current())
        .with_reactor(tokio_reactor_trait::Tokio)
}

/// Decide whether a DNS failure on `current` should move the retry loop to
/// the fallback host. Returns the new host, or `None` to keep retrying the
/// current one.
fn fallback_after_dns_failure(current: &str, fallback: Option<&str>) -> Option<String> {
    match fallback {
        Some(fallback) if fallback != current => Some(fallback.to_string()),
        _ => None,
    }
}
