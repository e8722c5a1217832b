use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// A lease on a named operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub name: String,
    pub holder_id: String,
    pub acquired_at: SystemTime,
    pub expires_at: SystemTime,
    /// Length of the lease granted by the last claim or extension.
    #[serde(default)]
    pub lease: Duration,
}

impl Lock {
    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }

    pub fn is_held_by(&self, holder_id: &str) -> bool {
        self.holder_id == holder_id
    }
}

/// Backend capability behind `DistributedLockManager`.
///
/// Each method is a single-row compare-and-set on the lock row. Any storage
/// with atomic conditional writes (a SQL row, a coordination service key)
/// can implement the same lease protocol.
pub trait LockStore: Send + Sync {
    /// Insert or take over `name` when it is absent, expired at `now`, or
    /// already held by `holder_id` (re-entrant renewal). Returns `None` when
    /// another holder owns an unexpired lease.
    fn try_claim(
        &self,
        name: &str,
        holder_id: &str,
        now: SystemTime,
        expires_at: SystemTime,
    ) -> Result<Option<Lock>, StoreError>;

    /// Push `expires_at` forward only if `holder_id` still holds an unexpired lease.
    fn extend(
        &self,
        name: &str,
        holder_id: &str,
        now: SystemTime,
        expires_at: SystemTime,
    ) -> Result<Option<Lock>, StoreError>;

    /// Delete the row if it belongs to `holder_id`. Returns whether it did.
    fn delete(&self, name: &str, holder_id: &str) -> Result<bool, StoreError>;

    fn get(&self, name: &str) -> Result<Option<Lock>, StoreError>;
}
