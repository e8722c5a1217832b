use thiserror::Error;

use crate::store::StoreError;

/// Error type for lock operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Another holder owns an unexpired lease (also returned when acquisition times out).
    #[error("lock '{0}' is held by another instance")]
    Contention(String),

    /// The lease expired or was taken over before the operation.
    #[error("lock '{name}' is no longer held by '{holder_id}'")]
    NotHeld { name: String, holder_id: String },

    /// The lease settings cannot keep a lock alive.
    #[error("invalid lock settings: {0}")]
    InvalidSettings(String),

    /// The backing store failed.
    #[error("lock store error: {0}")]
    Store(#[from] StoreError),
}

impl LockError {
    /// Contention is expected and should lead to a back-off, not a failure report.
    pub fn is_contention(&self) -> bool {
        matches!(self, LockError::Contention(_))
    }
}
