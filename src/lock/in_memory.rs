use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use super::{Lock, LockStore};
use crate::store::StoreError;

/// In-memory lock table backed by a `HashMap<String, Lock>`.
///
/// Every operation takes the table mutex, so each claim or extension is an
/// atomic compare-and-set on one row. Clones share the same table.
#[derive(Clone, Default)]
pub struct InMemoryLockStore {
    locks: Arc<Mutex<HashMap<String, Lock>>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locks(&self) -> Result<MutexGuard<'_, HashMap<String, Lock>>, StoreError> {
        self.locks
            .lock()
            .map_err(|_| StoreError::Poisoned("lock table"))
    }
}

impl LockStore for InMemoryLockStore {
    fn try_claim(
        &self,
        name: &str,
        holder_id: &str,
        now: SystemTime,
        expires_at: SystemTime,
    ) -> Result<Option<Lock>, StoreError> {
        let mut locks = self.locks()?;
        let acquired_at = match locks.get(name) {
            Some(existing) if existing.is_expired(now) => now,
            Some(existing) if existing.is_held_by(holder_id) => existing.acquired_at,
            Some(_) => return Ok(None),
            None => now,
        };
        let lock = Lock {
            name: name.to_string(),
            holder_id: holder_id.to_string(),
            acquired_at,
            expires_at,
            lease: expires_at.duration_since(now).unwrap_or_default(),
        };
        locks.insert(name.to_string(), lock.clone());
        Ok(Some(lock))
    }

    fn extend(
        &self,
        name: &str,
        holder_id: &str,
        now: SystemTime,
        expires_at: SystemTime,
    ) -> Result<Option<Lock>, StoreError> {
        let mut locks = self.locks()?;
        match locks.get_mut(name) {
            Some(existing) if existing.is_held_by(holder_id) && !existing.is_expired(now) => {
                existing.expires_at = expires_at;
                existing.lease = expires_at.duration_since(now).unwrap_or_default();
                Ok(Some(existing.clone()))
            }
            _ => Ok(None),
        }
    }

    fn delete(&self, name: &str, holder_id: &str) -> Result<bool, StoreError> {
        let mut locks = self.locks()?;
        let held = matches!(locks.get(name), Some(existing) if existing.is_held_by(holder_id));
        if held {
            locks.remove(name);
        }
        Ok(held)
    }

    fn get(&self, name: &str) -> Result<Option<Lock>, StoreError> {
        Ok(self.locks()?.get(name).cloned())
    }
}
