//! Dispatcher: per-queue consumers feeding record mappers and the store.
//!
//! One consumer per queue, each on its own task with its own channel over
//! the shared connection. Messages on a queue are processed strictly in
//! delivery order. Every delivery is acknowledged exactly once after its
//! handler completes; decode, mapping, and write failures are logged and
//! never withheld an ack — a bad message must not stall the queue, and the
//! bridge deliberately trades write durability for liveness.

use futures_util::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicConsumeOptions};
use lapin::types::FieldTable;
use lapin::Connection;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::error::BridgeError;
use crate::mapping::{map_health, map_reading};
use crate::point::{now_timestamp_ns, DataPoint};
use crate::store::RecordWriter;

/// Which record mapper a queue's messages go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapperKind {
    Reading,
    Health,
}

/// Consumption settings for one queue.
#[derive(Debug, Clone)]
pub struct QueueHandler {
    pub queue: String,
    /// Measurement name the mapped points carry.
    pub measurement: String,
    pub kind: MapperKind,
}

/// Terminal state of one message's trip through the pipeline.
///
/// All variants are acknowledged; the distinction only drives logging.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Decoded, mapped, and written.
    Stored,
    /// Payload was not a JSON object; permanently unprocessable.
    DecodeFailed(BridgeError),
    /// Decoded but could not be mapped to a point.
    MappingFailed(BridgeError),
    /// Mapped but the store rejected the write; logged and dropped. Carries
    /// the point so the log names the measurement and tag values of what
    /// was lost.
    WriteFailed {
        point: DataPoint,
        error: BridgeError,
    },
}

/// Runs the consumption loops until the connection is lost.
pub struct Dispatcher<W> {
    writer: W,
}

impl<W> Dispatcher<W>
where
    W: RecordWriter + Clone + Send + Sync + 'static,
{
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Consume from every queue until a consumer fails.
    ///
    /// Blocks indefinitely in the happy path. Returns the first
    /// session-fatal error (consumer stream loss, channel failure), which
    /// the caller treats as a signal to rebuild the whole session.
    pub async fn run(
        &self,
        connection: &Connection,
        handlers: Vec<QueueHandler>,
    ) -> Result<(), BridgeError> {
        let mut tasks: JoinSet<BridgeError> = JoinSet::new();

        for handler in handlers {
            let channel =
                connection
                    .create_channel()
                    .await
                    .map_err(|e| BridgeError::ConsumerLost {
                        queue: handler.queue.clone(),
                        reason: format!("channel open failed: {e}"),
                    })?;
            let consumer = channel
                .basic_consume(
                    &handler.queue,
                    &format!("fluxbridge-{}", handler.queue),
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BridgeError::ConsumerLost {
                    queue: handler.queue.clone(),
                    reason: format!("consume registration failed: {e}"),
                })?;

            let writer = self.writer.clone();
            tasks.spawn(consume_queue(consumer, handler, writer));
        }

        // The first queue loop to exit means the connection is unusable;
        // surface its error and let the session restart tear down the rest.
        match tasks.join_next().await {
            Some(Ok(err)) => Err(err),
            Some(Err(join_err)) => Err(BridgeError::ConsumerLost {
                queue: "<unknown>".into(),
                reason: format!("consumer task panicked: {join_err}"),
            }),
            None => Err(BridgeError::ConsumerLost {
                queue: "<none>".into(),
                reason: "no queues configured".into(),
            }),
        }
    }
}

/// Sequentially process deliveries from one queue until the stream ends.
async fn consume_queue<W: RecordWriter>(
    mut consumer: lapin::Consumer,
    handler: QueueHandler,
    writer: W,
) -> BridgeError {
    debug!(queue = %handler.queue, "consumer started");

    while let Some(delivery) = consumer.next().await {
        let delivery: Delivery = match delivery {
            Ok(delivery) => delivery,
            Err(e) => {
                return BridgeError::ConsumerLost {
                    queue: handler.queue.clone(),
                    reason: format!("delivery stream error: {e}"),
                };
            }
        };

        let outcome = process_message(&delivery.data, &handler, &writer).await;
        match &outcome {
            DispatchOutcome::Stored => {
                debug!(queue = %handler.queue, measurement = %handler.measurement, "stored message");
            }
            DispatchOutcome::DecodeFailed(e) => {
                warn!(queue = %handler.queue, error = %e, "dropping undecodable message");
            }
            DispatchOutcome::MappingFailed(e) => {
                warn!(queue = %handler.queue, error = %e, "dropping unmappable message");
            }
            DispatchOutcome::WriteFailed { point, error } => {
                error!(
                    queue = %handler.queue,
                    measurement = %point.measurement,
                    tags = %format_tags(&point.tags),
                    error = %error,
                    "store write failed, message dropped"
                );
            }
        }

        // The one and only ack, regardless of outcome.
        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
            return BridgeError::ConsumerLost {
                queue: handler.queue.clone(),
                reason: format!("ack failed: {e}"),
            };
        }
    }

    BridgeError::ConsumerLost {
        queue: handler.queue.clone(),
        reason: "delivery stream closed".into(),
    }
}

/// Decode, map, and write one message payload.
///
/// Infallible by construction: every failure collapses into a
/// [`DispatchOutcome`] so the caller's ack step runs unconditionally.
pub async fn process_message<W: RecordWriter>(
    payload: &[u8],
    handler: &QueueHandler,
    writer: &W,
) -> DispatchOutcome {
    let decoded: serde_json::Value = match serde_json::from_slice(payload) {
        Ok(serde_json::Value::Object(map)) => serde_json::Value::Object(map),
        Ok(other) => {
            return DispatchOutcome::DecodeFailed(BridgeError::Decode(format!(
                "expected a JSON object, got {other}"
            )));
        }
        Err(e) => {
            return DispatchOutcome::DecodeFailed(BridgeError::Decode(e.to_string()));
        }
    };

    let timestamp_ns = now_timestamp_ns();
    let mapped = match handler.kind {
        MapperKind::Reading => map_reading(&handler.measurement, &decoded, timestamp_ns),
        MapperKind::Health => map_health(&handler.measurement, &decoded, timestamp_ns),
    };
    let point = match mapped {
        Ok(point) => point,
        Err(e) => return DispatchOutcome::MappingFailed(e),
    };

    match writer.write(&point).await {
        Ok(()) => DispatchOutcome::Stored,
        Err(error) => DispatchOutcome::WriteFailed { point, error },
    }
}

/// Render tag pairs as `key=value,key=value` for log fields.
fn format_tags(tags: &[(String, String)]) -> String {
    tags.iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::{DataPoint, FieldValue};
    use std::sync::{Arc, Mutex};

    /// Records written points; optionally fails every write.
    #[derive(Clone, Default)]
    struct FakeWriter {
        written: Arc<Mutex<Vec<DataPoint>>>,
        fail: bool,
    }

    impl RecordWriter for FakeWriter {
        async fn write(&self, point: &DataPoint) -> Result<(), BridgeError> {
            if self.fail {
                return Err(BridgeError::Write("store unavailable".into()));
            }
            self.written.lock().unwrap().push(point.clone());
            Ok(())
        }
    }

    fn reading_handler() -> QueueHandler {
        QueueHandler {
            queue: "data.queue".into(),
            measurement: "reading".into(),
            kind: MapperKind::Reading,
        }
    }

    fn health_handler() -> QueueHandler {
        QueueHandler {
            queue: "health.queue".into(),
            measurement: "health".into(),
            kind: MapperKind::Health,
        }
    }

    #[tokio::test]
    async fn valid_reading_is_stored() {
        let writer = FakeWriter::default();
        let payload = br#"{"sensor_id":"s1","value":21.5,"unit":"C"}"#;

        let outcome = process_message(payload, &reading_handler(), &writer).await;

        assert!(matches!(outcome, DispatchOutcome::Stored));
        let written = writer.written.lock().unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].measurement, "reading");
        assert_eq!(written[0].tags[0], ("sensor_id".to_string(), "s1".to_string()));
    }

    #[tokio::test]
    async fn valid_health_message_is_stored() {
        let writer = FakeWriter::default();
        let payload = br#"{"sensor_id":"s2","success_request":9,"total_request":10}"#;

        let outcome = process_message(payload, &health_handler(), &writer).await;

        assert!(matches!(outcome, DispatchOutcome::Stored));
        let written = writer.written.lock().unwrap();
        assert_eq!(written[0].measurement, "health");
        assert_eq!(
            written[0].fields[0],
            ("success_request".to_string(), FieldValue::Float(9.0))
        );
    }

    #[tokio::test]
    async fn malformed_payload_yields_decode_outcome_and_no_write() {
        let writer = FakeWriter::default();

        let outcome = process_message(b"not json", &reading_handler(), &writer).await;

        assert!(matches!(outcome, DispatchOutcome::DecodeFailed(_)));
        assert!(writer.written.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_object_json_is_a_decode_failure() {
        let writer = FakeWriter::default();

        let outcome = process_message(b"[1,2,3]", &reading_handler(), &writer).await;

        assert!(matches!(outcome, DispatchOutcome::DecodeFailed(_)));
        assert!(writer.written.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_numeric_value_yields_mapping_outcome_and_no_write() {
        let writer = FakeWriter::default();
        let payload = br#"{"sensor_id":"s1","value":"abc","unit":"C"}"#;

        let outcome = process_message(payload, &reading_handler(), &writer).await;

        assert!(matches!(outcome, DispatchOutcome::MappingFailed(_)));
        assert!(writer.written.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_failure_is_contained_in_the_outcome() {
        let writer = FakeWriter {
            fail: true,
            ..Default::default()
        };
        let payload = br#"{"sensor_id":"s1","value":1.0,"unit":"C"}"#;

        // The outcome carries the error; nothing propagates to the caller,
        // so the ack step always runs.
        let outcome = process_message(payload, &reading_handler(), &writer).await;

        assert!(matches!(outcome, DispatchOutcome::WriteFailed { .. }));
    }

    #[tokio::test]
    async fn write_failure_outcome_names_measurement_and_tags() {
        // The dropped point's identity must survive into the outcome so the
        // log can say which sensor's data was lost.
        let writer = FakeWriter {
            fail: true,
            ..Default::default()
        };
        let payload = br#"{"sensor_id":"s7","value":3.0,"unit":"C"}"#;

        let outcome = process_message(payload, &reading_handler(), &writer).await;

        match outcome {
            DispatchOutcome::WriteFailed { point, error } => {
                assert_eq!(point.measurement, "reading");
                assert_eq!(point.tags, vec![("sensor_id".to_string(), "s7".to_string())]);
                assert_eq!(format_tags(&point.tags), "sensor_id=s7");
                assert!(matches!(error, BridgeError::Write(_)));
            }
            other => panic!("expected WriteFailed, got {other:?}"),
        }
    }

    #[test]
    fn tags_render_as_comma_separated_pairs() {
        let tags = vec![
            ("sensor_id".to_string(), "s1".to_string()),
            ("site".to_string(), "north".to_string()),
        ];
        assert_eq!(format_tags(&tags), "sensor_id=s1,site=north");
        assert_eq!(format_tags(&[]), "");
    }

    #[tokio::test]
    async fn every_outcome_reaches_the_ack_step_exactly_once() {
        // Model of the consume loop: process, then ack, with no early exit
        // between them. Each payload must produce exactly one ack.
        let writer = FakeWriter::default();
        let payloads: Vec<&[u8]> = vec![
            br#"{"sensor_id":"s1","value":1.0,"unit":"C"}"#,
            b"garbage",
            br#"{"sensor_id":"s1","value":"abc"}"#,
        ];

        let mut acks = 0u32;
        for payload in payloads {
            let _outcome = process_message(payload, &reading_handler(), &writer).await;
            acks += 1;
        }

        assert_eq!(acks, 3);
        // Only the valid payload was written.
        assert_eq!(writer.written.lock().unwrap().len(), 1);
    }
}
