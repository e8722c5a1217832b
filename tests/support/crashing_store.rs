//! A store that can be told to crash right before an outbox row is marked sent.
//!
//! Everything else is delegated to an `InMemoryStore`, so the crash leaves
//! the world exactly as a process dying between produce and the sent marker
//! would: the record is on the broker, the row is still pending.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use reliable_rust::lock::{Lock, LockStore};
use reliable_rust::outbox::{NewOutboxRow, OutboxRow, OutboxStore};
use reliable_rust::store::{InMemoryStore, StoreError, TransactionId, TransactionalStore};

#[derive(Clone, Default)]
pub struct CrashingStore {
    inner: InMemoryStore,
    crash_on_mark_sent: Arc<AtomicBool>,
}

impl CrashingStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            crash_on_mark_sent: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Fail the next `mark_outbox_row_sent`.
    pub fn crash_before_next_mark_sent(&self) {
        self.crash_on_mark_sent.store(true, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }
}

impl TransactionalStore for CrashingStore {
    fn begin(&self) -> Result<TransactionId, StoreError> {
        self.inner.begin()
    }

    fn commit(&self, tx: TransactionId) -> Result<(), StoreError> {
        self.inner.commit(tx)
    }

    fn rollback(&self, tx: TransactionId) -> Result<(), StoreError> {
        self.inner.rollback(tx)
    }
}

impl OutboxStore for CrashingStore {
    fn insert_outbox_row(&self, tx: TransactionId, row: NewOutboxRow) -> Result<(), StoreError> {
        self.inner.insert_outbox_row(tx, row)
    }

    fn pending_outbox_rows(&self, limit: usize) -> Result<Vec<OutboxRow>, StoreError> {
        self.inner.pending_outbox_rows(limit)
    }

    fn count_pending_outbox_rows(&self) -> Result<usize, StoreError> {
        self.inner.count_pending_outbox_rows()
    }

    fn mark_outbox_row_sent(
        &self,
        tx: TransactionId,
        id: u64,
        sent_at: SystemTime,
    ) -> Result<(), StoreError> {
        if self.crash_on_mark_sent.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Poisoned("simulated crash"));
        }
        self.inner.mark_outbox_row_sent(tx, id, sent_at)
    }

    fn outbox_rows(&self) -> Result<Vec<OutboxRow>, StoreError> {
        self.inner.outbox_rows()
    }
}

impl LockStore for CrashingStore {
    fn try_claim(
        &self,
        name: &str,
        holder_id: &str,
        now: SystemTime,
        expires_at: SystemTime,
    ) -> Result<Option<Lock>, StoreError> {
        self.inner.try_claim(name, holder_id, now, expires_at)
    }

    fn extend(
        &self,
        name: &str,
        holder_id: &str,
        now: SystemTime,
        expires_at: SystemTime,
    ) -> Result<Option<Lock>, StoreError> {
        self.inner.extend(name, holder_id, now, expires_at)
    }

    fn delete(&self, name: &str, holder_id: &str) -> Result<bool, StoreError> {
        self.inner.delete(name, holder_id)
    }

    fn get(&self, name: &str) -> Result<Option<Lock>, StoreError> {
        self.inner.get(name)
    }
}
