//! Contexts passed down the consumer and producer pipelines.
//!
//! Contexts are values. A behavior that needs to change something (attach a
//! deserialized body, open a transaction) builds a new context and hands it
//! to `next`; its own copy stays as it was.

use serde::de::DeserializeOwned;

use super::error::HandlerError;
use crate::envelope::{Envelope, OutboundMessage};
use crate::inbound::EndpointKey;
use crate::store::TransactionId;

/// Context for one consumer pipeline invocation.
#[derive(Clone, Debug)]
pub struct ConsumerContext {
    envelope: Envelope,
    group: String,
    transaction: Option<TransactionId>,
}

impl ConsumerContext {
    pub fn new(envelope: Envelope, group: impl Into<String>) -> Self {
        Self {
            envelope,
            group: group.into(),
            transaction: None,
        }
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Consumer group the envelope was read for.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// The ambient transaction, if a behavior upstream opened one.
    pub fn transaction(&self) -> Option<TransactionId> {
        self.transaction
    }

    /// The `(endpoint, partition, group)` the envelope's offset belongs to.
    pub fn endpoint_key(&self) -> EndpointKey {
        EndpointKey::new(
            self.envelope.endpoint.clone(),
            self.envelope.position.partition,
            self.group.clone(),
        )
    }

    /// Deserialize the message into a typed struct.
    pub fn message<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        Ok(self.envelope.json()?)
    }

    pub fn with_envelope(self, envelope: Envelope) -> Self {
        Self { envelope, ..self }
    }

    pub fn with_transaction(self, tx: TransactionId) -> Self {
        Self {
            transaction: Some(tx),
            ..self
        }
    }

    pub fn into_envelope(self) -> Envelope {
        self.envelope
    }
}

/// Context for one producer pipeline invocation.
#[derive(Clone, Debug)]
pub struct ProducerContext {
    message: OutboundMessage,
    transaction: Option<TransactionId>,
}

impl ProducerContext {
    pub fn new(message: OutboundMessage, transaction: Option<TransactionId>) -> Self {
        Self {
            message,
            transaction,
        }
    }

    pub fn message(&self) -> &OutboundMessage {
        &self.message
    }

    pub fn transaction(&self) -> Option<TransactionId> {
        self.transaction
    }

    pub fn with_message(self, message: OutboundMessage) -> Self {
        Self { message, ..self }
    }

    pub fn into_message(self) -> OutboundMessage {
        self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Headers, Position};

    #[test]
    fn with_transaction_leaves_the_original_untouched() {
        let envelope = Envelope::new("orders", Position::new(2, 9), Vec::new(), Headers::new());
        let ctx = ConsumerContext::new(envelope, "billing");
        let scoped = ctx.clone().with_transaction(TransactionId(4));

        assert_eq!(ctx.transaction(), None);
        assert_eq!(scoped.transaction(), Some(TransactionId(4)));
        assert_eq!(scoped.endpoint_key(), EndpointKey::new("orders", 2, "billing"));
    }
}
