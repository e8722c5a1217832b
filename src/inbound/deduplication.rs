use tracing::{debug, trace};

use super::{OffsetStore, StoredOffset};
use crate::pipeline::{ConsumerBehavior, ConsumerContext, ConsumerNext, Outcome, PipelineError};

/// Message ids remembered per `(endpoint, partition, group)` by default.
pub const DEFAULT_MESSAGE_ID_WINDOW: usize = 100;

/// Drops envelopes a consumer group already processed.
///
/// An envelope is a duplicate when its offset is not past the stored offset
/// for its `(endpoint, partition, group)`, or when its message id is among
/// the last `message_id_window` ids processed there. An outbox redispatch
/// after a crash lands at a new offset with an old id, possibly after other
/// records.
///
/// After the rest of the chain succeeds the new offset is staged in the
/// ambient transaction, so it commits together with the handler's writes.
/// Without an ambient transaction the offset is stored in its own.
pub struct DeduplicationBehavior<S> {
    store: S,
    message_id_window: usize,
}

impl<S: OffsetStore> DeduplicationBehavior<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            message_id_window: DEFAULT_MESSAGE_ID_WINDOW,
        }
    }

    /// Number of recent message ids to remember. At least the last one is kept.
    pub fn with_message_id_window(mut self, window: usize) -> Self {
        self.message_id_window = window.max(1);
        self
    }

    fn is_duplicate(&self, ctx: &ConsumerContext, stored: &StoredOffset) -> bool {
        let envelope = ctx.envelope();
        if !envelope.position.is_newer_than(stored.committed_offset) {
            return true;
        }
        envelope
            .message_id()
            .is_some_and(|message_id| stored.has_seen(message_id))
    }

    fn advance(&self, ctx: &ConsumerContext, previous: Option<StoredOffset>) -> StoredOffset {
        let envelope = ctx.envelope();
        let mut offset = StoredOffset::new(ctx.endpoint_key(), envelope.position.offset);
        offset.recent_message_ids = previous
            .map(|stored| stored.recent_message_ids)
            .unwrap_or_default();
        if let Some(message_id) = envelope.message_id() {
            offset.last_message_id = Some(message_id.to_string());
            offset.recent_message_ids.push(message_id.to_string());
            let excess = offset
                .recent_message_ids
                .len()
                .saturating_sub(self.message_id_window);
            offset.recent_message_ids.drain(..excess);
        }
        offset
    }
}

impl<S: OffsetStore> ConsumerBehavior for DeduplicationBehavior<S> {
    fn invoke(&self, ctx: ConsumerContext, next: ConsumerNext<'_>) -> Result<Outcome, PipelineError> {
        let key = ctx.endpoint_key();
        let stored = self.store.stored_offset(&key)?;
        if let Some(stored) = &stored {
            if self.is_duplicate(&ctx, stored) {
                debug!(
                    %key,
                    position = %ctx.envelope().position,
                    committed = stored.committed_offset,
                    "duplicate envelope dropped"
                );
                return Ok(Outcome::Duplicate);
            }
        }

        let outcome = next.run(ctx.clone())?;

        let offset = self.advance(&ctx, stored);
        trace!(key = %offset.key, offset = offset.committed_offset, "storing offset");
        match ctx.transaction() {
            Some(tx) => self.store.store_offset(tx, offset)?,
            None => {
                let tx = self.store.begin()?;
                if let Err(err) = self.store.store_offset(tx, offset) {
                    let _ = self.store.rollback(tx);
                    return Err(err.into());
                }
                self.store.commit(tx)?;
            }
        }
        Ok(outcome)
    }
}
