use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use super::{StoreError, TransactionId, TransactionalStore};
use crate::inbound::{EndpointKey, OffsetStore, StoredOffset};
use crate::lock::{InMemoryLockStore, Lock, LockStore};
use crate::outbox::{NewOutboxRow, OutboxRow, OutboxStore};

enum StagedWrite {
    Put { key: String, value: Vec<u8> },
    Outbox(NewOutboxRow),
    MarkSent { id: u64, sent_at: SystemTime },
    Offset(StoredOffset),
}

struct StoreState {
    next_tx: u64,
    staged: HashMap<TransactionId, Vec<StagedWrite>>,
    values: HashMap<String, Vec<u8>>,
    outbox: Vec<OutboxRow>,
    outbox_seq: u64,
    offsets: HashMap<EndpointKey, StoredOffset>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            next_tx: 1,
            staged: HashMap::new(),
            values: HashMap::new(),
            outbox: Vec::new(),
            outbox_seq: 1,
            offsets: HashMap::new(),
        }
    }
}

impl StoreState {
    fn stage(&mut self, tx: TransactionId, write: StagedWrite) -> Result<(), StoreError> {
        self.staged
            .get_mut(&tx)
            .ok_or(StoreError::UnknownTransaction(tx))?
            .push(write);
        Ok(())
    }

    /// Check every compare-and-set precondition before touching anything.
    fn validate(&self, writes: &[StagedWrite]) -> Result<(), StoreError> {
        let mut advanced: HashMap<&EndpointKey, u64> = HashMap::new();
        for write in writes {
            match write {
                StagedWrite::Offset(offset) => {
                    let current = advanced
                        .get(&offset.key)
                        .copied()
                        .or_else(|| self.offsets.get(&offset.key).map(|s| s.committed_offset));
                    if let Some(current) = current {
                        if offset.committed_offset <= current {
                            return Err(StoreError::ConcurrencyConflict(format!(
                                "offset for {} would move from {} to {}",
                                offset.key, current, offset.committed_offset
                            )));
                        }
                    }
                    advanced.insert(&offset.key, offset.committed_offset);
                }
                StagedWrite::MarkSent { id, .. } => {
                    if !self.outbox.iter().any(|row| row.id == *id) {
                        return Err(StoreError::NotFound(format!("outbox row {}", id)));
                    }
                }
                StagedWrite::Put { .. } | StagedWrite::Outbox(_) => {}
            }
        }
        Ok(())
    }

    fn apply(&mut self, writes: Vec<StagedWrite>) {
        for write in writes {
            match write {
                StagedWrite::Put { key, value } => {
                    self.values.insert(key, value);
                }
                StagedWrite::Outbox(row) => {
                    let id = self.outbox_seq;
                    self.outbox_seq += 1;
                    self.outbox.push(OutboxRow {
                        id,
                        body: row.body,
                        headers: row.headers,
                        target_endpoint: row.target_endpoint,
                        key: row.key,
                        created_at: row.created_at,
                        sent_at: None,
                    });
                }
                StagedWrite::MarkSent { id, sent_at } => {
                    if let Some(row) = self.outbox.iter_mut().find(|row| row.id == id) {
                        row.sent_at = Some(sent_at);
                    }
                }
                StagedWrite::Offset(offset) => {
                    self.offsets.insert(offset.key.clone(), offset);
                }
            }
        }
    }
}

/// In-memory transactional store.
///
/// Cloning creates another handle to the same storage, so a clone can be
/// handed to a background thread. Lock rows live outside transactions and
/// are claimed through single-row compare-and-set.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
    locks: InMemoryLockStore,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self, operation: &'static str) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Poisoned(operation))
    }

    /// Stage a business value write in `tx`.
    pub fn put(
        &self,
        tx: TransactionId,
        key: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Result<(), StoreError> {
        self.state("put")?.stage(
            tx,
            StagedWrite::Put {
                key: key.into(),
                value: value.into(),
            },
        )
    }

    /// Read a committed business value.
    pub fn value(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.state("value")?.values.get(key).cloned())
    }

    /// Number of transactions begun and not yet committed or rolled back.
    pub fn open_transactions(&self) -> usize {
        self.state("open_transactions")
            .map(|state| state.staged.len())
            .unwrap_or(0)
    }
}

impl TransactionalStore for InMemoryStore {
    fn begin(&self) -> Result<TransactionId, StoreError> {
        let mut state = self.state("begin")?;
        let tx = TransactionId(state.next_tx);
        state.next_tx += 1;
        state.staged.insert(tx, Vec::new());
        Ok(tx)
    }

    fn commit(&self, tx: TransactionId) -> Result<(), StoreError> {
        let mut state = self.state("commit")?;
        let writes = state
            .staged
            .remove(&tx)
            .ok_or(StoreError::UnknownTransaction(tx))?;
        state.validate(&writes)?;
        state.apply(writes);
        Ok(())
    }

    fn rollback(&self, tx: TransactionId) -> Result<(), StoreError> {
        self.state("rollback")?
            .staged
            .remove(&tx)
            .map(|_| ())
            .ok_or(StoreError::UnknownTransaction(tx))
    }
}

impl OutboxStore for InMemoryStore {
    fn insert_outbox_row(&self, tx: TransactionId, row: NewOutboxRow) -> Result<(), StoreError> {
        self.state("insert_outbox_row")?
            .stage(tx, StagedWrite::Outbox(row))
    }

    fn pending_outbox_rows(&self, limit: usize) -> Result<Vec<OutboxRow>, StoreError> {
        let state = self.state("pending_outbox_rows")?;
        let mut pending: Vec<OutboxRow> = state
            .outbox
            .iter()
            .filter(|row| row.sent_at.is_none())
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pending.truncate(limit);
        Ok(pending)
    }

    fn count_pending_outbox_rows(&self) -> Result<usize, StoreError> {
        let state = self.state("count_pending_outbox_rows")?;
        Ok(state.outbox.iter().filter(|row| row.sent_at.is_none()).count())
    }

    fn mark_outbox_row_sent(
        &self,
        tx: TransactionId,
        id: u64,
        sent_at: SystemTime,
    ) -> Result<(), StoreError> {
        self.state("mark_outbox_row_sent")?
            .stage(tx, StagedWrite::MarkSent { id, sent_at })
    }

    fn outbox_rows(&self) -> Result<Vec<OutboxRow>, StoreError> {
        Ok(self.state("outbox_rows")?.outbox.clone())
    }
}

impl OffsetStore for InMemoryStore {
    fn stored_offset(&self, key: &EndpointKey) -> Result<Option<StoredOffset>, StoreError> {
        Ok(self.state("stored_offset")?.offsets.get(key).cloned())
    }

    fn store_offset(&self, tx: TransactionId, offset: StoredOffset) -> Result<(), StoreError> {
        self.state("store_offset")?
            .stage(tx, StagedWrite::Offset(offset))
    }
}

impl LockStore for InMemoryStore {
    fn try_claim(
        &self,
        name: &str,
        holder_id: &str,
        now: SystemTime,
        expires_at: SystemTime,
    ) -> Result<Option<Lock>, StoreError> {
        self.locks.try_claim(name, holder_id, now, expires_at)
    }

    fn extend(
        &self,
        name: &str,
        holder_id: &str,
        now: SystemTime,
        expires_at: SystemTime,
    ) -> Result<Option<Lock>, StoreError> {
        self.locks.extend(name, holder_id, now, expires_at)
    }

    fn delete(&self, name: &str, holder_id: &str) -> Result<bool, StoreError> {
        self.locks.delete(name, holder_id)
    }

    fn get(&self, name: &str) -> Result<Option<Lock>, StoreError> {
        self.locks.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offset(committed: u64) -> StoredOffset {
        StoredOffset::new(EndpointKey::new("orders", 0, "billing"), committed)
    }

    #[test]
    fn staged_writes_are_invisible_until_commit() {
        let store = InMemoryStore::new();
        let tx = store.begin().unwrap();
        store.put(tx, "order-1", "created").unwrap();
        assert_eq!(store.value("order-1").unwrap(), None);

        store.commit(tx).unwrap();
        assert_eq!(store.value("order-1").unwrap(), Some(b"created".to_vec()));
        assert_eq!(store.open_transactions(), 0);
    }

    #[test]
    fn rollback_discards_writes() {
        let store = InMemoryStore::new();
        let tx = store.begin().unwrap();
        store.put(tx, "order-1", "created").unwrap();
        store.rollback(tx).unwrap();

        assert_eq!(store.value("order-1").unwrap(), None);
        assert_eq!(
            store.commit(tx),
            Err(StoreError::UnknownTransaction(tx))
        );
    }

    #[test]
    fn offset_must_advance_at_commit() {
        let store = InMemoryStore::new();
        let tx = store.begin().unwrap();
        store.store_offset(tx, offset(5)).unwrap();
        store.commit(tx).unwrap();

        let tx = store.begin().unwrap();
        store.put(tx, "side-effect", "x").unwrap();
        store.store_offset(tx, offset(5)).unwrap();
        assert!(matches!(
            store.commit(tx),
            Err(StoreError::ConcurrencyConflict(_))
        ));
        // The whole transaction is discarded, including the value write.
        assert_eq!(store.value("side-effect").unwrap(), None);
    }
}
