//! InfluxDB v2 store writer and startup health gate.
//!
//! The writer talks to the v2 HTTP API: `POST /api/v2/write` with Line
//! Protocol bodies and `GET /health` for readiness. Writes are
//! fire-and-forget from the dispatcher's point of view; a failed write is
//! logged and never blocks message acknowledgment.

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::InfluxConfig;
use crate::error::BridgeError;
use crate::point::DataPoint;

/// Store readiness as reported by the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Pass,
    Fail,
}

/// Submits data points to the time-series store.
pub trait RecordWriter {
    fn write(&self, point: &DataPoint) -> impl Future<Output = Result<(), BridgeError>> + Send;
}

/// Reports whether the store is ready to accept writes.
pub trait HealthCheck {
    fn health(&self) -> impl Future<Output = Result<HealthStatus, BridgeError>> + Send;
}

/// InfluxDB v2 client for writes and health checks.
#[derive(Debug, Clone)]
pub struct InfluxWriter {
    client: Client,
    url: String,
    token: String,
    org: String,
    bucket: String,
}

impl InfluxWriter {
    pub fn new(config: &InfluxConfig) -> Self {
        Self {
            client: Client::new(),
            url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
        }
    }
}

impl RecordWriter for InfluxWriter {
    /// Write one point with nanosecond precision.
    ///
    /// Points without fields are skipped (the store rejects them anyway).
    async fn write(&self, point: &DataPoint) -> Result<(), BridgeError> {
        let Some(line) = point.to_line_protocol() else {
            warn!(measurement = %point.measurement, "skipping point with no fields");
            return Ok(());
        };

        let url = format!("{}/api/v2/write", self.url);
        let response = self
            .client
            .post(&url)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(line)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::Write(format!(
                "store returned {status}: {body}"
            )));
        }

        debug!(measurement = %point.measurement, "stored point");
        Ok(())
    }
}

impl HealthCheck for InfluxWriter {
    async fn health(&self) -> Result<HealthStatus, BridgeError> {
        #[derive(Deserialize)]
        struct HealthResponse {
            status: String,
        }

        let url = format!("{}/health", self.url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Ok(HealthStatus::Fail);
        }

        let body: HealthResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::Write(format!("bad health response: {e}")))?;
        if body.status == "pass" {
            Ok(HealthStatus::Pass)
        } else {
            Ok(HealthStatus::Fail)
        }
    }
}

/// Block until the store reports a passing health status.
///
/// Any transport error or non-pass status counts as "not ready". Runs once
/// at process start so that early messages are not silently dropped by
/// write failures while the store is still coming up.
pub async fn wait_until_ready<H: HealthCheck>(
    store: &H,
    max_attempts: u32,
    interval: Duration,
) -> Result<(), BridgeError> {
    for attempt in 1..=max_attempts {
        info!(attempt, max_attempts, "checking store health");
        match store.health().await {
            Ok(HealthStatus::Pass) => {
                info!("store is ready");
                return Ok(());
            }
            Ok(HealthStatus::Fail) => {
                warn!(attempt, "store reported non-passing health");
            }
            Err(e) => {
                warn!(attempt, error = %e, "store health check failed");
            }
        }
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Err(BridgeError::HealthCheckExhausted {
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Health check that fails a fixed number of times, then passes.
    struct FlakyStore {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    impl HealthCheck for FlakyStore {
        async fn health(&self) -> Result<HealthStatus, BridgeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Ok(HealthStatus::Fail)
            } else {
                Ok(HealthStatus::Pass)
            }
        }
    }

    /// Health check whose transport always errors.
    struct UnreachableStore;

    impl HealthCheck for UnreachableStore {
        async fn health(&self) -> Result<HealthStatus, BridgeError> {
            Err(BridgeError::Write("connection refused".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn gate_passes_after_three_failures() {
        let store = FlakyStore::new(3);
        wait_until_ready(&store, 10, Duration::from_secs(3))
            .await
            .unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn gate_exhausts_against_unreachable_store() {
        let err = wait_until_ready(&UnreachableStore, 5, Duration::from_millis(100))
            .await
            .unwrap_err();
        match err {
            BridgeError::HealthCheckExhausted { attempts } => assert_eq!(attempts, 5),
            other => panic!("expected HealthCheckExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn gate_returns_immediately_when_healthy() {
        let store = FlakyStore::new(0);
        wait_until_ready(&store, 1, Duration::from_secs(3))
            .await
            .unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }
}
