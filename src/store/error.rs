use thiserror::Error;

use super::TransactionId;

/// Failure in the persistence collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A compare-and-set lost a race (offset did not advance, row changed underneath)
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// The transaction handle was never opened or was already finished
    #[error("unknown transaction {0}")]
    UnknownTransaction(TransactionId),

    /// A lock guarding the store state was poisoned
    #[error("store lock poisoned during {0}")]
    Poisoned(&'static str),

    /// Row referenced by a write does not exist
    #[error("row not found: {0}")]
    NotFound(String),
}
