use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{OutboxError, OutboxRow, OutboxStore};
use crate::broker::Producer;
use crate::clock::{system_clock, Clock};
use crate::lock::{DistributedLockManager, Lock, LockError, LockSettings, LockStore};

/// Settings for an `OutboxProcessor` and the thread driving it.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OutboxSettings {
    /// Name of the lock that makes a single processor active at a time.
    pub lock_name: String,
    /// Identity of this instance in the lock table. Generated when absent.
    pub holder_id: Option<String>,
    /// Maximum rows dispatched per drain.
    pub batch_size: usize,
    /// Pause between drains that found nothing to send.
    #[serde(with = "crate::config::millis")]
    pub poll_interval: Duration,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            lock_name: "outbox-processor".to_string(),
            holder_id: None,
            batch_size: 100,
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Result of a single drain pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainResult {
    /// Rows produced and marked sent.
    pub sent: usize,
    /// Rows the broker refused; the batch stopped at the first one.
    pub failed: usize,
    /// Another holder owned the lock; nothing was attempted.
    pub contended: bool,
    /// The lease was lost mid-batch; the batch stopped.
    pub lost_lock: bool,
    /// A stop was requested; the rows after the last sent one were left pending.
    pub cancelled: bool,
}

/// Dispatches committed outbox rows to the broker, one active instance at a time.
///
/// Every drain first takes (or re-takes) the processor lock, then walks the
/// pending rows in `(created_at, id)` order. For each row it renews the lease
/// when the heartbeat is due, confirms it still holds the lock, produces the
/// record, confirms ownership again and marks the row sent in its own
/// transaction. A crash between produce and the sent marker leaves the row
/// pending, so it is dispatched again: delivery is at-least-once.
pub struct OutboxProcessor<S, P> {
    store: S,
    locks: DistributedLockManager<S>,
    producer: P,
    clock: Arc<dyn Clock>,
    settings: OutboxSettings,
    holder_id: String,
    lock: Option<Lock>,
}

impl<S, P> OutboxProcessor<S, P>
where
    S: OutboxStore + LockStore + Clone,
    P: Producer,
{
    pub fn new(store: S, producer: P) -> Self {
        Self {
            locks: DistributedLockManager::new(store.clone()),
            store,
            producer,
            clock: system_clock(),
            settings: OutboxSettings::default(),
            holder_id: format!("outbox-{}", uuid::Uuid::new_v4()),
            lock: None,
        }
    }

    /// Set the lock holder identity.
    pub fn with_holder_id(mut self, holder_id: impl Into<String>) -> Self {
        self.holder_id = holder_id.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.settings.batch_size = batch_size.max(1);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.locks = self.locks.with_clock(Arc::clone(&clock));
        self.clock = clock;
        self
    }

    pub fn with_settings(mut self, settings: OutboxSettings) -> Self {
        if let Some(holder_id) = &settings.holder_id {
            self.holder_id = holder_id.clone();
        }
        self.settings = settings;
        self.settings.batch_size = self.settings.batch_size.max(1);
        self
    }

    /// Replace the lease timings of the processor lock.
    pub fn with_lock_settings(mut self, settings: LockSettings) -> Result<Self, LockError> {
        self.locks = self.locks.with_settings(settings)?;
        Ok(self)
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    pub fn settings(&self) -> &OutboxSettings {
        &self.settings
    }

    pub fn producer(&self) -> &P {
        &self.producer
    }

    /// True when the last drain ended holding the processor lock.
    pub fn holds_lock(&self) -> bool {
        self.lock.is_some()
    }

    /// Number of committed rows not yet marked sent.
    pub fn pending_count(&self) -> Result<usize, OutboxError> {
        Ok(self.store.count_pending_outbox_rows()?)
    }

    /// Run one drain pass.
    pub fn drain_once(&mut self) -> Result<DrainResult, OutboxError> {
        self.drain_until(&|| false)
    }

    /// Run one drain pass, checking `cancelled` before each row.
    ///
    /// A row already handed to the producer is finished and marked sent;
    /// once `cancelled` returns true no further row is started.
    pub fn drain_until(&mut self, cancelled: &dyn Fn() -> bool) -> Result<DrainResult, OutboxError> {
        let mut result = DrainResult::default();

        let lease = self.locks.settings().lease;
        let mut lock = match self
            .locks
            .acquire(&self.settings.lock_name, &self.holder_id, lease)
        {
            Ok(lock) => lock,
            Err(err) if err.is_contention() => {
                if self.lock.take().is_some() {
                    info!(holder = %self.holder_id, "outbox lock taken over by another instance");
                }
                debug!(holder = %self.holder_id, "outbox lock contended");
                result.contended = true;
                return Ok(result);
            }
            Err(err) => return Err(err.into()),
        };
        if self.lock.is_none() {
            info!(holder = %self.holder_id, lock = %lock.name, "outbox lock acquired");
        }

        let rows = self.store.pending_outbox_rows(self.settings.batch_size)?;
        for row in rows {
            if cancelled() {
                debug!(holder = %self.holder_id, sent = result.sent, "outbox drain cancelled");
                result.cancelled = true;
                break;
            }
            if !self.still_held(&mut lock)? {
                result.lost_lock = true;
                break;
            }

            if let Err(err) = self.producer.produce(
                &row.target_endpoint,
                row.key.as_deref(),
                &row.body,
                &row.headers,
            ) {
                warn!(
                    row_id = row.id,
                    endpoint = %row.target_endpoint,
                    error = %err,
                    "outbox dispatch failed, stopping batch"
                );
                result.failed += 1;
                break;
            }

            if !self.locks.is_held(&lock)? {
                warn!(
                    row_id = row.id,
                    "outbox lease lost after produce, leaving row for the next holder"
                );
                result.lost_lock = true;
                break;
            }

            self.mark_sent(&row)?;
            result.sent += 1;
        }

        if result.sent > 0 {
            debug!(sent = result.sent, failed = result.failed, "outbox batch drained");
        }
        self.lock = if result.lost_lock { None } else { Some(lock) };
        Ok(result)
    }

    /// Release the processor lock if this instance holds it.
    pub fn release(&mut self) -> Result<(), OutboxError> {
        if let Some(lock) = self.lock.take() {
            self.locks.release(lock)?;
        }
        Ok(())
    }

    /// Renew when the heartbeat is due, then confirm ownership.
    fn still_held(&self, lock: &mut Lock) -> Result<bool, OutboxError> {
        if self.locks.heartbeat_due(lock) {
            match self.locks.renew(lock) {
                Ok(()) => {}
                Err(LockError::NotHeld { .. }) => return Ok(false),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(self.locks.is_held(lock)?)
    }

    fn mark_sent(&self, row: &OutboxRow) -> Result<(), OutboxError> {
        let tx = self.store.begin()?;
        let marked = self
            .store
            .mark_outbox_row_sent(tx, row.id, self.clock.now())
            .and_then(|()| self.store.commit(tx));
        if let Err(err) = marked {
            let _ = self.store.rollback(tx);
            return Err(err.into());
        }
        debug!(row_id = row.id, endpoint = %row.target_endpoint, "outbox row sent");
        Ok(())
    }
}
