//! Broker topology: topic exchange, durable queues, routing-key bindings.
//!
//! The topology is declared as data ([`TopologyDescriptor`]) and applied
//! idempotently; re-running [`ensure_topology`] against an existing broker
//! state neither fails nor duplicates bindings, because AMQP declare and
//! bind operations are no-ops when the entity already exists with the same
//! properties.

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Channel, ExchangeKind};
use tracing::info;

use crate::config::TopologyConfig;
use crate::error::BridgeError;

/// One queue bound to the exchange by a routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue: String,
    pub routing_key: String,
}

/// Declarative description of the exchange and its queue bindings.
#[derive(Debug, Clone)]
pub struct TopologyDescriptor {
    /// Topic exchange name. Routing keys may use wildcard patterns, though
    /// the bridge only binds exact keys.
    pub exchange: String,
    pub bindings: Vec<QueueBinding>,
}

impl TopologyDescriptor {
    /// Build the two-queue bridge topology (data + health) from config.
    pub fn from_config(config: &TopologyConfig) -> Self {
        Self {
            exchange: config.exchange.clone(),
            bindings: vec![
                QueueBinding {
                    queue: config.data_queue.clone(),
                    routing_key: config.data_routing_key.clone(),
                },
                QueueBinding {
                    queue: config.health_queue.clone(),
                    routing_key: config.health_routing_key.clone(),
                },
            ],
        }
    }
}

/// Declare the exchange and all queue bindings on the given channel.
///
/// The first failing declare or bind aborts the sequence with a
/// [`BridgeError::Topology`] naming the failing queue (the exchange name is
/// used for the exchange-declare step).
pub async fn ensure_topology(
    channel: &Channel,
    descriptor: &TopologyDescriptor,
) -> Result<(), BridgeError> {
    channel
        .exchange_declare(
            &descriptor.exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|source| BridgeError::Topology {
            queue: descriptor.exchange.clone(),
            source,
        })?;
    info!(exchange = %descriptor.exchange, "declared topic exchange");

    for binding in &descriptor.bindings {
        channel
            .queue_declare(
                &binding.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|source| BridgeError::Topology {
                queue: binding.queue.clone(),
                source,
            })?;

        channel
            .queue_bind(
                &binding.queue,
                &descriptor.exchange,
                &binding.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|source| BridgeError::Topology {
                queue: binding.queue.clone(),
                source,
            })?;
        info!(
            queue = %binding.queue,
            exchange = %descriptor.exchange,
            routing_key = %binding.routing_key,
            "declared and bound queue"
        );
    }

    Ok(())
}
