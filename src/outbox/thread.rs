//! Background thread driving an `OutboxProcessor`.

use std::cell::Cell;
use std::sync::mpsc::{channel, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use super::{OutboxProcessor, OutboxStore};
use crate::broker::Producer;
use crate::lock::LockStore;

/// Statistics from the outbox processor thread.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OutboxStats {
    pub rows_sent: usize,
    pub rows_failed: usize,
    pub polls: usize,
    pub contended_polls: usize,
    pub lost_leases: usize,
    pub errors: usize,
}

/// A background thread that drains the outbox until stopped.
///
/// Stopping is cooperative: the row being produced finishes and is marked
/// sent, the rest stay pending, the processor lock is released and the thread
/// returns its statistics.
///
/// ## Example
///
/// ```
/// use reliable_rust::broker::InMemoryBroker;
/// use reliable_rust::outbox::{OutboxProcessor, OutboxProcessorThread};
/// use reliable_rust::store::InMemoryStore;
/// use std::time::Duration;
///
/// let store = InMemoryStore::new();
/// let broker = InMemoryBroker::new();
///
/// let processor = OutboxProcessor::new(store.clone(), broker.clone());
/// let thread = OutboxProcessorThread::spawn(processor, Duration::from_millis(10));
///
/// // ... commit transactions that append outbox rows ...
///
/// let stats = thread.stop();
/// assert_eq!(stats.rows_failed, 0);
/// ```
pub struct OutboxProcessorThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<OutboxStats>>,
}

impl OutboxProcessorThread {
    /// Spawn the processor on its own thread.
    ///
    /// The thread drains back to back while rows keep coming and waits
    /// `poll_interval` after a drain that sent nothing.
    pub fn spawn<S, P>(mut processor: OutboxProcessor<S, P>, poll_interval: Duration) -> Self
    where
        S: OutboxStore + LockStore + Clone + 'static,
        P: Producer + 'static,
    {
        let (stop_tx, stop_rx) = channel();

        let handle = thread::spawn(move || {
            let mut stats = OutboxStats::default();
            info!(holder = %processor.holder_id(), "outbox processor started");

            let stopping = Cell::new(false);
            let cancelled = || {
                if !stopping.get() {
                    match stop_rx.try_recv() {
                        Ok(()) | Err(TryRecvError::Disconnected) => stopping.set(true),
                        Err(TryRecvError::Empty) => {}
                    }
                }
                stopping.get()
            };

            loop {
                stats.polls += 1;

                let idle = match processor.drain_until(&cancelled) {
                    Ok(result) => {
                        stats.rows_sent += result.sent;
                        stats.rows_failed += result.failed;
                        if result.contended {
                            stats.contended_polls += 1;
                        }
                        if result.lost_lock {
                            stats.lost_leases += 1;
                        }
                        result.sent == 0 || result.failed > 0 || result.lost_lock
                    }
                    Err(err) => {
                        warn!(error = %err, "outbox drain failed");
                        stats.errors += 1;
                        true
                    }
                };

                if stopping.get() {
                    break;
                }
                let wait = if idle { poll_interval } else { Duration::ZERO };
                match stop_rx.recv_timeout(wait) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }

            if let Err(err) = processor.release() {
                warn!(error = %err, "failed to release outbox lock on shutdown");
            }
            info!(
                holder = %processor.holder_id(),
                sent = stats.rows_sent,
                "outbox processor stopped"
            );
            stats
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signal the thread to stop and wait for it to finish.
    /// Returns the processor statistics.
    pub fn stop(mut self) -> OutboxStats {
        let _ = self.stop_tx.send(());
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_default(),
            None => OutboxStats::default(),
        }
    }

    /// Signal the thread to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for OutboxProcessorThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}
