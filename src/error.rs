//! Error types for the bridge.

use thiserror::Error;

/// Errors that can occur while bridging messages from the broker to the store.
///
/// The variants split into three escalation classes:
///
/// - **Session-fatal**: [`ConnectExhausted`](BridgeError::ConnectExhausted),
///   [`Topology`](BridgeError::Topology), [`ConsumerLost`](BridgeError::ConsumerLost)
///   — the whole connect/declare/consume session is restarted.
/// - **Startup-fatal**: [`HealthCheckExhausted`](BridgeError::HealthCheckExhausted),
///   [`Config`](BridgeError::Config) — the process must not begin consuming.
/// - **Per-message**: [`Decode`](BridgeError::Decode),
///   [`Mapping`](BridgeError::Mapping), [`Write`](BridgeError::Write)
///   — logged, and the message is acknowledged anyway.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A single connection attempt failed (DNS or AMQP handshake). Transient.
    #[error("connection attempt to {host} failed: {reason}")]
    Connect {
        /// Host the attempt targeted.
        host: String,
        /// What went wrong (resolution failure, handshake error, ...).
        reason: String,
    },

    /// All connection attempts were used up.
    #[error("could not connect to {host} after {attempts} attempts: {last_error}")]
    ConnectExhausted {
        /// Last host tried (primary or fallback).
        host: String,
        /// Number of attempts made.
        attempts: u32,
        /// The final attempt's error.
        last_error: String,
    },

    /// Declaring or binding part of the topology failed.
    #[error("topology declaration failed for '{queue}': {source}")]
    Topology {
        /// Queue (or exchange, for the exchange-declare step) that failed.
        queue: String,
        #[source]
        source: lapin::Error,
    },

    /// The consumer stream ended or errored; the session must be restarted.
    #[error("consumer on queue '{queue}' lost: {reason}")]
    ConsumerLost {
        /// Queue whose consumer failed.
        queue: String,
        reason: String,
    },

    /// A message payload could not be parsed as a JSON object.
    #[error("failed to decode payload: {0}")]
    Decode(String),

    /// A decoded payload could not be mapped to a data point.
    #[error("failed to map field '{field}': {reason}")]
    Mapping {
        /// Payload field that failed coercion.
        field: String,
        reason: String,
    },

    /// A data point could not be written to the store.
    #[error("store write failed: {0}")]
    Write(String),

    /// The store never reported a passing health status.
    #[error("store not healthy after {attempts} health checks")]
    HealthCheckExhausted {
        /// Number of polls made before giving up.
        attempts: u32,
    },

    /// Configuration could not be loaded or deserialized.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BridgeError::Write("request timed out".to_string())
        } else if err.is_connect() {
            BridgeError::Write(format!("connection failed: {err}"))
        } else {
            BridgeError::Write(err.to_string())
        }
    }
}

impl BridgeError {
    /// Whether the outer loop should rebuild the session after this error.
    ///
    /// Connection-level failures are transient: the bridge reconnects after
    /// a delay. Topology failures indicate misconfiguration and terminate
    /// the process, as does health-check exhaustion at startup. Per-message
    /// failures never reach the restart loop at all; the dispatcher logs
    /// them and acknowledges the message regardless.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BridgeError::Connect { .. }
                | BridgeError::ConnectExhausted { .. }
                | BridgeError::ConsumerLost { .. }
        )
    }
}
