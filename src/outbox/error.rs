use thiserror::Error;

use crate::lock::LockError;
use crate::store::StoreError;

/// Failure while draining the outbox.
///
/// Broker failures are not errors here: the drain stops its batch, counts
/// the failure in `DrainResult` and leaves the row pending.
#[derive(Error, Debug)]
pub enum OutboxError {
    #[error("outbox store error: {0}")]
    Store(#[from] StoreError),

    #[error("outbox lock error: {0}")]
    Lock(#[from] LockError),
}
