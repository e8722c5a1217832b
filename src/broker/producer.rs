//! Producer trait for writing records to a broker endpoint.

use std::sync::Arc;

use super::TransportError;
use crate::envelope::{Headers, OutboundMessage, Position};

/// Trait for producing records to a partitioned broker.
///
/// Implementations might include:
/// - `InMemoryBroker` - For testing and single-process scenarios
/// - `KafkaProducer` - For Apache Kafka
/// - `AmqpProducer` - For AMQP brokers
pub trait Producer: Send + Sync {
    /// Write one record and return the position the broker assigned to it.
    fn produce(
        &self,
        endpoint: &str,
        key: Option<&str>,
        body: &[u8],
        headers: &Headers,
    ) -> Result<Position, TransportError>;

    /// Produce an `OutboundMessage`.
    fn produce_message(&self, message: &OutboundMessage) -> Result<Position, TransportError> {
        self.produce(
            &message.endpoint,
            message.key.as_deref(),
            &message.body,
            &message.headers,
        )
    }
}

impl<P: Producer + ?Sized> Producer for Arc<P> {
    fn produce(
        &self,
        endpoint: &str,
        key: Option<&str>,
        body: &[u8],
        headers: &Headers,
    ) -> Result<Position, TransportError> {
        (**self).produce(endpoint, key, body, headers)
    }
}
