//! # fluxbridge
//!
//! A resilient bridge that moves telemetry messages from a RabbitMQ topic
//! exchange into InfluxDB v2, split across two logical channels: raw
//! sensor readings and health/liveness metrics.
//!
//! ## Architecture
//!
//! ```text
//! Health Gate ──▶ Connector ──▶ Topology ──▶ Dispatcher (loops forever)
//!                                                 │  per message
//!                                                 ▼
//!                                          Record Mapper ──▶ Store Writer
//! ```
//!
//! - **[`store`]**: InfluxDB v2 writer ([`InfluxWriter`]) and the startup
//!   health gate ([`wait_until_ready`]) that refuses to consume against an
//!   unready store
//! - **[`connect`]**: broker connection lifecycle — DNS probe, optional
//!   fallback host, exponential backoff with jitter
//! - **[`topology`]**: declarative exchange/queue/binding descriptor,
//!   applied idempotently
//! - **[`dispatch`]**: one manual-ack consumer per queue; every delivery is
//!   acknowledged exactly once, whatever its decode/map/write outcome
//! - **[`mapping`]**: pure payload → [`DataPoint`] transforms for the two
//!   measurement kinds
//! - **[`retry`]**: the single backoff policy shared by the connector and
//!   the health gate
//!
//! ## Delivery contract
//!
//! At-least-once consumption with explicit acknowledgment. Malformed
//! payloads, mapping failures, and store write failures are logged and the
//! message is acknowledged anyway: a poison message must never stall a
//! queue, and a store outage must never grow the broker's backlog without
//! bound. Connection loss triggers a coarse restart of the whole
//! connect/declare/consume session.
//!
//! ## Configuration
//!
//! ```toml
//! [amqp]
//! host = "rabbitmq"
//! port = 5672
//! username = "guest"
//! password = "guest"
//! fallback_host = "rabbitmq-fallback"
//!
//! [topology]
//! exchange = "telemetry.exchange"
//! data_queue = "data.queue"
//! data_routing_key = "data.routing"
//! health_queue = "health.queue"
//! health_routing_key = "health.routing"
//!
//! [influx]
//! url = "http://influxdb:8086"
//! token = "..."
//! org = "myorg"
//! bucket = "telemetry"
//! ```
//!
//! Any key can also come from the environment with the `FLUXBRIDGE_`
//! prefix, e.g. `FLUXBRIDGE_AMQP__HOST=rabbitmq`.

pub mod config;
pub mod connect;
pub mod dispatch;
pub mod error;
pub mod mapping;
pub mod point;
pub mod retry;
pub mod store;
pub mod topology;

// Re-export main types for convenience
pub use config::BridgeConfig;
pub use connect::Connector;
pub use dispatch::{DispatchOutcome, Dispatcher, MapperKind, QueueHandler};
pub use error::BridgeError;
pub use point::{DataPoint, FieldValue};
pub use retry::RetryPolicy;
pub use store::{wait_until_ready, HealthStatus, InfluxWriter};
pub use topology::{ensure_topology, QueueBinding, TopologyDescriptor};
