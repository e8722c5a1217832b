//! Background thread driving a `ConsumerLoop`.

use std::sync::mpsc::{channel, Sender};
use std::thread::{self, JoinHandle};

use tracing::{error, info, warn};

use super::{ConsumerLoop, Disposition, Processed};
use crate::broker::Consumer;

/// Statistics from a consumer thread.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsumerStats {
    pub polls: usize,
    pub handled: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub moved: usize,
    pub retries: usize,
    /// Envelopes left unacknowledged because a stop arrived mid-retry.
    pub cancelled: usize,
    pub errors: usize,
    /// Why the loop halted, when a stop policy or an exhausted chain ended it.
    pub halted: Option<String>,
}

impl ConsumerStats {
    fn record(&mut self, processed: &Processed) {
        self.retries += processed.retries as usize;
        match processed.disposition {
            Disposition::Handled => self.handled += 1,
            Disposition::Duplicate => self.duplicates += 1,
            Disposition::Skipped => self.skipped += 1,
            Disposition::Moved { .. } => self.moved += 1,
            Disposition::Cancelled => self.cancelled += 1,
        }
    }
}

/// A background thread that runs a consumer loop until stopped or halted.
///
/// Stopping is cooperative: the stop signal is checked between envelopes and
/// while waiting to retry, so the envelope in the handler finishes first.
///
/// ## Example
///
/// ```
/// use reliable_rust::broker::InMemoryBroker;
/// use reliable_rust::consumer::{ConsumerLoop, ConsumerThread};
/// use reliable_rust::pipeline::{ConsumerContext, ConsumerPipeline, HandlerError};
/// use std::sync::Arc;
///
/// let broker = InMemoryBroker::new();
/// let pipeline = ConsumerPipeline::builder()
///     .build(|_: &ConsumerContext| -> Result<(), HandlerError> { Ok(()) });
///
/// let consumer_loop = ConsumerLoop::new(
///     broker.consumer(),
///     "orders",
///     "billing",
///     pipeline,
///     Arc::new(broker.clone()),
/// )
/// .unwrap();
///
/// let thread = ConsumerThread::spawn(consumer_loop);
/// let stats = thread.stop();
/// assert!(stats.halted.is_none());
/// ```
pub struct ConsumerThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<ConsumerStats>>,
}

impl ConsumerThread {
    pub fn spawn<C>(mut consumer_loop: ConsumerLoop<C>) -> Self
    where
        C: Consumer + 'static,
    {
        let (stop_tx, stop_rx) = channel();
        consumer_loop.set_stop_signal(stop_rx);

        let handle = thread::spawn(move || {
            let mut stats = ConsumerStats::default();
            info!(
                endpoint = %consumer_loop.endpoint(),
                group = %consumer_loop.group(),
                "consumer started"
            );

            while !consumer_loop.stop_requested() {
                stats.polls += 1;
                match consumer_loop.process_next() {
                    Ok(Some(processed)) => stats.record(&processed),
                    Ok(None) => {}
                    Err(err) if err.is_fatal() => {
                        error!(
                            endpoint = %consumer_loop.endpoint(),
                            group = %consumer_loop.group(),
                            error = %err,
                            "consumer loop halted"
                        );
                        stats.halted = Some(err.to_string());
                        break;
                    }
                    Err(err) => {
                        warn!(endpoint = %consumer_loop.endpoint(), error = %err, "consumer error");
                        stats.errors += 1;
                        let backoff = consumer_loop.settings().error_backoff;
                        if consumer_loop.wait(backoff) {
                            break;
                        }
                    }
                }
            }

            info!(
                endpoint = %consumer_loop.endpoint(),
                group = %consumer_loop.group(),
                handled = stats.handled,
                "consumer stopped"
            );
            stats
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// True once the thread has exited, either stopped or halted.
    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map(JoinHandle::is_finished)
            .unwrap_or(true)
    }

    /// Signal the thread to stop and wait for it to finish.
    /// Returns the consumer statistics.
    pub fn stop(mut self) -> ConsumerStats {
        let _ = self.stop_tx.send(());
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_default(),
            None => ConsumerStats::default(),
        }
    }

    /// Signal the thread to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for ConsumerThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{InMemoryBroker, Producer};
    use crate::envelope::{Headers, Position};
    use crate::error_policy::{ErrorPolicy, ErrorPolicyChain};
    use crate::pipeline::{ConsumerContext, ConsumerPipeline, HandlerError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn wait_for(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[test]
    fn stop_during_retry_leaves_the_envelope_for_redelivery() {
        let broker = InMemoryBroker::new();
        broker.produce("orders", None, b"1", &Headers::new()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let pipeline = ConsumerPipeline::builder().build(
            move |_: &ConsumerContext| -> Result<(), HandlerError> {
                counted.fetch_add(1, Ordering::SeqCst);
                Err(HandlerError::Transient("downstream unavailable".into()))
            },
        );
        let consumer_loop = ConsumerLoop::new(
            broker.consumer(),
            "orders",
            "billing",
            pipeline,
            Arc::new(broker.clone()),
        )
        .unwrap()
        .with_policies(ErrorPolicyChain::new(vec![ErrorPolicy::retry()
            .with_delay(Duration::from_secs(10), Duration::ZERO)]));

        let worker = ConsumerThread::spawn(consumer_loop);
        assert!(wait_for(Duration::from_secs(2), || calls.load(Ordering::SeqCst) == 1));

        let started = Instant::now();
        let stats = worker.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.retries, 1);
        assert_eq!(stats.handled, 0);
        assert!(stats.halted.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(broker.committed("orders", "billing", 0), None);

        // A fresh subscription in the same group sees the envelope again.
        let pipeline = ConsumerPipeline::builder()
            .build(|_: &ConsumerContext| -> Result<(), HandlerError> { Ok(()) });
        let mut consumer_loop = ConsumerLoop::new(
            broker.consumer(),
            "orders",
            "billing",
            pipeline,
            Arc::new(broker.clone()),
        )
        .unwrap();
        let processed = consumer_loop.process_next().unwrap().unwrap();
        assert_eq!(processed.position, Position::new(0, 0));
        assert_eq!(processed.disposition, Disposition::Handled);
        assert_eq!(broker.committed("orders", "billing", 0), Some(1));
    }

    #[test]
    fn stop_policy_halts_the_thread() {
        let broker = InMemoryBroker::new();
        broker.produce("orders", None, b"bad", &Headers::new()).unwrap();
        broker.produce("orders", None, b"good", &Headers::new()).unwrap();
        let pipeline = ConsumerPipeline::builder().build(
            |ctx: &ConsumerContext| -> Result<(), HandlerError> {
                match ctx.envelope().body_str() {
                    Some("bad") => Err(HandlerError::Rejected("negative total".into())),
                    _ => Ok(()),
                }
            },
        );
        let consumer_loop = ConsumerLoop::new(
            broker.consumer(),
            "orders",
            "billing",
            pipeline,
            Arc::new(broker.clone()),
        )
        .unwrap();

        let worker = ConsumerThread::spawn(consumer_loop);
        assert!(wait_for(Duration::from_secs(2), || worker.is_finished()));
        let stats = worker.stop();

        assert!(stats.halted.is_some());
        assert_eq!(stats.handled, 0);
        assert_eq!(broker.committed("orders", "billing", 0), None);
    }
}
