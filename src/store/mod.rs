//! Store - the transactional unit-of-work the engine persists through.
//!
//! `TransactionalStore` is the scoped unit of work: writes staged against a
//! `TransactionId` become visible together on `commit` and vanish on
//! `rollback`. The table capabilities live next to the data they hold:
//! `OutboxStore` (outbox rows), `OffsetStore` (stored offsets) and
//! `LockStore` (lease rows). `InMemoryStore` implements all of them.

mod error;
mod in_memory;

use std::fmt;

pub use error::StoreError;
pub use in_memory::InMemoryStore;

/// Handle to an open transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Scoped transactional unit of work with multi-row atomic commit.
///
/// Implementations must offer at least read-committed isolation: staged
/// writes are invisible to readers until `commit` returns.
pub trait TransactionalStore: Send + Sync {
    fn begin(&self) -> Result<TransactionId, StoreError>;

    /// Apply every write staged in `tx` atomically. On error nothing is applied
    /// and the transaction is finished.
    fn commit(&self, tx: TransactionId) -> Result<(), StoreError>;

    fn rollback(&self, tx: TransactionId) -> Result<(), StoreError>;
}
