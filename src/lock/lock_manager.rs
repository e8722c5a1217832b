use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{Lock, LockError, LockStore};
use crate::clock::{system_clock, Clock};

/// Lease timings for `DistributedLockManager`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// How long a lease lasts without renewal.
    #[serde(with = "crate::config::millis")]
    pub lease: Duration,
    /// Renewal cadence; must be strictly shorter than `lease`.
    #[serde(with = "crate::config::millis")]
    pub heartbeat: Duration,
    /// How long `acquire` keeps retrying before reporting contention.
    #[serde(with = "crate::config::millis")]
    pub acquire_timeout: Duration,
    /// Pause between acquisition attempts.
    #[serde(with = "crate::config::millis")]
    pub retry_interval: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(30),
            heartbeat: Duration::from_secs(10),
            acquire_timeout: Duration::ZERO,
            retry_interval: Duration::from_millis(100),
        }
    }
}

impl LockSettings {
    pub fn validate(&self) -> Result<(), LockError> {
        if self.lease.is_zero() {
            return Err(LockError::InvalidSettings("lease must be positive".into()));
        }
        if self.heartbeat >= self.lease {
            return Err(LockError::InvalidSettings(format!(
                "heartbeat ({:?}) must be shorter than the lease ({:?})",
                self.heartbeat, self.lease
            )));
        }
        Ok(())
    }
}

/// Lease-based mutual exclusion over a `LockStore`.
///
/// Holders that stop renewing lose the lock silently once `expires_at`
/// passes, so callers must check `is_held` (or `ensure_held`) before every
/// externally visible side effect performed under the lock.
pub struct DistributedLockManager<S> {
    store: S,
    clock: Arc<dyn Clock>,
    settings: LockSettings,
}

impl<S: LockStore> DistributedLockManager<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            clock: system_clock(),
            settings: LockSettings::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the lease timings. Fails when the heartbeat is not shorter than the lease.
    pub fn with_settings(mut self, settings: LockSettings) -> Result<Self, LockError> {
        settings.validate()?;
        self.settings = settings;
        Ok(self)
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Single acquisition attempt. `Ok(None)` means another holder owns the lease.
    pub fn try_acquire(
        &self,
        name: &str,
        holder_id: &str,
        lease: Duration,
    ) -> Result<Option<Lock>, LockError> {
        let now = self.clock.now();
        Ok(self.store.try_claim(name, holder_id, now, now + lease)?)
    }

    /// Acquire `name` for `holder_id`, retrying until `acquire_timeout`.
    ///
    /// Succeeds when no unexpired lease exists or `holder_id` already holds it
    /// (the lease is then renewed). A timed-out attempt is `LockError::Contention`.
    pub fn acquire(&self, name: &str, holder_id: &str, lease: Duration) -> Result<Lock, LockError> {
        let deadline = Instant::now() + self.settings.acquire_timeout;

        loop {
            if let Some(lock) = self.try_acquire(name, holder_id, lease)? {
                debug!(lock = name, holder = holder_id, "lock acquired");
                return Ok(lock);
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(lock = name, holder = holder_id, "lock contended");
                return Err(LockError::Contention(name.to_string()));
            }
            std::thread::sleep(self.settings.retry_interval.min(deadline - now));
        }
    }

    /// Extend the lease by the duration it was granted with.
    pub fn renew(&self, lock: &mut Lock) -> Result<(), LockError> {
        let lease = self.lease_of(lock);
        self.renew_for(lock, lease)
    }

    /// Extend the lease so it expires `lease` from now, if still held.
    pub fn renew_for(&self, lock: &mut Lock, lease: Duration) -> Result<(), LockError> {
        let now = self.clock.now();
        match self
            .store
            .extend(&lock.name, &lock.holder_id, now, now + lease)?
        {
            Some(renewed) => {
                *lock = renewed;
                Ok(())
            }
            None => {
                warn!(lock = %lock.name, holder = %lock.holder_id, "lease lost before renewal");
                Err(not_held(lock))
            }
        }
    }

    /// True when the heartbeat interval has elapsed since the lease was last extended.
    ///
    /// The interval is the configured heartbeat, shortened to half the lease
    /// for locks taken with a shorter lease than the configured one.
    pub fn heartbeat_due(&self, lock: &Lock) -> bool {
        let lease = self.lease_of(lock);
        let renewed_at = lock
            .expires_at
            .checked_sub(lease)
            .unwrap_or(lock.acquired_at);
        self.clock.now() >= renewed_at + self.settings.heartbeat.min(lease / 2)
    }

    fn lease_of(&self, lock: &Lock) -> Duration {
        if lock.lease.is_zero() {
            self.settings.lease
        } else {
            lock.lease
        }
    }

    /// Re-check ownership against the store.
    pub fn is_held(&self, lock: &Lock) -> Result<bool, LockError> {
        let now = self.clock.now();
        Ok(self
            .store
            .get(&lock.name)?
            .map(|current| current.is_held_by(&lock.holder_id) && !current.is_expired(now))
            .unwrap_or(false))
    }

    pub fn ensure_held(&self, lock: &Lock) -> Result<(), LockError> {
        if self.is_held(lock)? {
            Ok(())
        } else {
            Err(not_held(lock))
        }
    }

    /// Release the lease. Releasing a lease that was already lost is not an error.
    pub fn release(&self, lock: Lock) -> Result<(), LockError> {
        if self.store.delete(&lock.name, &lock.holder_id)? {
            info!(lock = %lock.name, holder = %lock.holder_id, "lock released");
        } else {
            debug!(lock = %lock.name, holder = %lock.holder_id, "lock was no longer held at release");
        }
        Ok(())
    }
}

fn not_held(lock: &Lock) -> LockError {
    LockError::NotHeld {
        name: lock.name.clone(),
        holder_id: lock.holder_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::lock::InMemoryLockStore;
    use std::sync::Barrier;
    use std::thread;

    const LEASE: Duration = Duration::from_secs(30);

    fn manager(clock: &ManualClock) -> DistributedLockManager<InMemoryLockStore> {
        DistributedLockManager::new(InMemoryLockStore::new()).with_clock(Arc::new(clock.clone()))
    }

    #[test]
    fn second_holder_is_contended() {
        let clock = ManualClock::default();
        let locks = manager(&clock);

        locks.acquire("outbox", "a", LEASE).unwrap();
        let err = locks.acquire("outbox", "b", LEASE).unwrap_err();
        assert!(err.is_contention());
    }

    #[test]
    fn acquire_is_reentrant_for_the_holder() {
        let clock = ManualClock::default();
        let locks = manager(&clock);

        let first = locks.acquire("outbox", "a", LEASE).unwrap();
        clock.advance(Duration::from_secs(5));
        let second = locks.acquire("outbox", "a", LEASE).unwrap();

        assert_eq!(second.acquired_at, first.acquired_at);
        assert!(second.expires_at > first.expires_at);
    }

    #[test]
    fn renewed_lock_is_not_acquirable_before_expiry() {
        let clock = ManualClock::default();
        let locks = manager(&clock);

        let mut lock = locks.acquire("outbox", "a", LEASE).unwrap();
        clock.advance(Duration::from_secs(20));
        locks.renew(&mut lock).unwrap();
        clock.advance(Duration::from_secs(20));

        // 40s after acquisition, past the original lease but within the renewed one.
        assert!(locks.acquire("outbox", "b", LEASE).unwrap_err().is_contention());
        assert!(locks.is_held(&lock).unwrap());
    }

    #[test]
    fn expired_lock_is_lost_silently() {
        let clock = ManualClock::default();
        let locks = manager(&clock);

        let mut lock = locks.acquire("outbox", "a", LEASE).unwrap();
        clock.advance(LEASE);

        let taken = locks.acquire("outbox", "b", LEASE).unwrap();
        assert_eq!(taken.holder_id, "b");
        assert!(!locks.is_held(&lock).unwrap());
        assert!(matches!(
            locks.renew(&mut lock),
            Err(LockError::NotHeld { .. })
        ));
        assert!(locks.ensure_held(&lock).is_err());
    }

    #[test]
    fn release_lets_others_in() {
        let clock = ManualClock::default();
        let locks = manager(&clock);

        let lock = locks.acquire("outbox", "a", LEASE).unwrap();
        locks.release(lock).unwrap();
        assert!(locks.acquire("outbox", "b", LEASE).is_ok());
    }

    #[test]
    fn heartbeat_due_after_interval() {
        let clock = ManualClock::default();
        let locks = manager(&clock);

        let mut lock = locks.acquire("outbox", "a", LEASE).unwrap();
        assert!(!locks.heartbeat_due(&lock));
        clock.advance(Duration::from_secs(10));
        assert!(locks.heartbeat_due(&lock));
        locks.renew(&mut lock).unwrap();
        assert!(!locks.heartbeat_due(&lock));
    }

    #[test]
    fn renewal_keeps_the_lease_the_lock_was_taken_with() {
        let clock = ManualClock::default();
        let locks = manager(&clock);
        let short = Duration::from_secs(5);

        let mut lock = locks.acquire("outbox", "a", short).unwrap();
        assert_eq!(lock.lease, short);
        assert!(!locks.heartbeat_due(&lock));

        clock.advance(Duration::from_secs(3));
        assert!(locks.heartbeat_due(&lock));
        locks.renew(&mut lock).unwrap();
        assert_eq!(lock.lease, short);
        assert_eq!(lock.expires_at, clock.now() + short);
        assert!(!locks.heartbeat_due(&lock));

        // Past the short lease another holder may take over.
        clock.advance(short);
        assert!(!locks.is_held(&lock).unwrap());
        assert!(locks.try_acquire("outbox", "b", LEASE).unwrap().is_some());
    }

    #[test]
    fn heartbeat_must_be_shorter_than_lease() {
        let settings = LockSettings {
            lease: Duration::from_secs(5),
            heartbeat: Duration::from_secs(5),
            ..LockSettings::default()
        };
        let result = DistributedLockManager::new(InMemoryLockStore::new()).with_settings(settings);
        assert!(matches!(result, Err(LockError::InvalidSettings(_))));
    }

    #[test]
    fn acquire_waits_until_timeout() {
        let clock = ManualClock::default();
        let locks = manager(&clock)
            .with_settings(LockSettings {
                acquire_timeout: Duration::from_millis(30),
                retry_interval: Duration::from_millis(5),
                ..LockSettings::default()
            })
            .unwrap();

        locks.acquire("outbox", "a", LEASE).unwrap();
        let started = Instant::now();
        assert!(locks.acquire("outbox", "b", LEASE).unwrap_err().is_contention());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn concurrent_acquire_has_a_single_winner() {
        let locks = Arc::new(DistributedLockManager::new(InMemoryLockStore::new()));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let locks = Arc::clone(&locks);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    locks.acquire("outbox", &format!("holder-{}", i), LEASE).is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
