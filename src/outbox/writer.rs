use std::sync::Arc;

use tracing::trace;

use super::{NewOutboxRow, OutboxStore};
use crate::clock::{system_clock, Clock};
use crate::envelope::OutboundMessage;
use crate::store::{StoreError, TransactionId};

/// Stages an outbound message in a transaction.
///
/// Object-safe so a `ProducerRoute` can hold any writer.
pub trait OutboxAppender: Send + Sync {
    fn append(&self, tx: TransactionId, message: &OutboundMessage) -> Result<(), StoreError>;
}

/// Writes outbound messages to the outbox table of an `OutboxStore`.
///
/// The row only exists once `tx` commits; a rollback discards it along with
/// the business writes it was staged next to.
#[derive(Clone)]
pub struct OutboxWriter<S> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: OutboxStore> OutboxWriter<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn append(&self, tx: TransactionId, message: &OutboundMessage) -> Result<(), StoreError> {
        trace!(%tx, endpoint = %message.endpoint, "appending outbox row");
        self.store
            .insert_outbox_row(tx, NewOutboxRow::from_message(message, self.clock.now()))
    }
}

impl<S: OutboxStore> OutboxAppender for OutboxWriter<S> {
    fn append(&self, tx: TransactionId, message: &OutboundMessage) -> Result<(), StoreError> {
        OutboxWriter::append(self, tx, message)
    }
}
