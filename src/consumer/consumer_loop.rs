use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use super::ConsumerError;
use crate::broker::{Consumer, Producer};
use crate::envelope::{Envelope, Headers, Position};
use crate::error_policy::{ErrorKind, ErrorPolicyChain, PolicyError, PolicyOutcome};
use crate::pipeline::{ConsumerContext, ConsumerPipeline, Outcome};

/// Settings for a `ConsumerLoop`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    /// How long a single poll waits for a record.
    #[serde(with = "crate::config::millis")]
    pub poll_timeout: Duration,
    /// Pause after a transport error before polling again.
    #[serde(with = "crate::config::millis")]
    pub error_backoff: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(100),
            error_backoff: Duration::from_millis(100),
        }
    }
}

/// How an envelope left the loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    Handled,
    Duplicate,
    Skipped,
    Moved { endpoint: String },
    /// A stop was requested while waiting to retry; the envelope was not acknowledged.
    Cancelled,
}

/// Result of processing one envelope, retries included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Processed {
    pub position: Position,
    pub disposition: Disposition,
    pub retries: u32,
}

/// A failure whose policy action could not be carried out.
///
/// Kept across the rewind so the redelivered envelope resumes with the
/// failed-attempts count it had reached instead of the broker's copy.
#[derive(Debug)]
struct PendingFailure {
    position: Position,
    headers: Headers,
    kind: ErrorKind,
    reason: String,
}

/// Sequential processing of one subscription.
///
/// Each polled envelope runs through the pipeline; failures go to the error
/// policy chain. Retries re-run the same envelope before anything else is
/// polled, so ordering within a partition is preserved. The envelope is
/// acknowledged after success, duplicates, skips and moves, and never after
/// a stop or when no policy applies.
///
/// A stop or an exhausted chain rewinds to the failing envelope and halts
/// the loop: `process_next` keeps returning `ConsumerError::Stopped` until
/// `resume` is called.
pub struct ConsumerLoop<C> {
    consumer: C,
    endpoint: String,
    group: String,
    pipeline: ConsumerPipeline,
    policies: ErrorPolicyChain,
    producer: Arc<dyn Producer>,
    settings: ConsumerSettings,
    stop_rx: Option<Receiver<()>>,
    stop_requested: bool,
    pending_failure: Option<PendingFailure>,
    halted: Option<Position>,
}

impl<C: Consumer> ConsumerLoop<C> {
    /// Subscribe `consumer` to `endpoint` for `group`.
    ///
    /// `producer` is used by move policies and policy side effects.
    pub fn new(
        mut consumer: C,
        endpoint: impl Into<String>,
        group: impl Into<String>,
        pipeline: ConsumerPipeline,
        producer: Arc<dyn Producer>,
    ) -> Result<Self, ConsumerError> {
        let endpoint = endpoint.into();
        let group = group.into();
        consumer.subscribe(&endpoint, &group)?;
        debug!(%endpoint, %group, "consumer subscribed");

        Ok(Self {
            consumer,
            endpoint,
            group,
            pipeline,
            policies: ErrorPolicyChain::default(),
            producer,
            settings: ConsumerSettings::default(),
            stop_rx: None,
            stop_requested: false,
            pending_failure: None,
            halted: None,
        })
    }

    pub fn with_policies(mut self, policies: ErrorPolicyChain) -> Self {
        self.policies = policies;
        self
    }

    pub fn with_settings(mut self, settings: ConsumerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    pub fn into_consumer(self) -> C {
        self.consumer
    }

    /// Position of the envelope that halted the loop, if it is halted.
    pub fn halted_at(&self) -> Option<Position> {
        self.halted
    }

    /// Clear a halt and continue from `position`.
    ///
    /// Passing the halted position redelivers the failing envelope; any
    /// later position skips it without acknowledging it.
    pub fn resume(&mut self, position: Position) -> Result<(), ConsumerError> {
        self.consumer.seek(&position)?;
        if let Some(halted) = self.halted.take() {
            info!(
                endpoint = %self.endpoint,
                group = %self.group,
                %halted,
                from = %position,
                "consumer resumed"
            );
        }
        self.pending_failure = None;
        Ok(())
    }

    /// Poll once and process what arrives. `Ok(None)` means the poll timed out.
    pub fn process_next(&mut self) -> Result<Option<Processed>, ConsumerError> {
        if let Some(position) = self.halted {
            return Err(ConsumerError::Stopped { position });
        }
        match self.consumer.poll(self.settings.poll_timeout)? {
            Some(envelope) => self.process(envelope).map(Some),
            None => Ok(None),
        }
    }

    /// Process one envelope to completion.
    fn process(&mut self, mut envelope: Envelope) -> Result<Processed, ConsumerError> {
        let position = envelope.position;
        let mut retries = 0;
        let mut carried = self.take_pending_failure(&mut envelope);

        loop {
            let (kind, reason) = match carried.take() {
                Some(failure) => failure,
                None => {
                    let ctx = ConsumerContext::new(envelope.clone(), self.group.clone());
                    match self.pipeline.execute(ctx) {
                        Ok(outcome) => {
                            self.consumer.ack(&position)?;
                            let disposition = match outcome {
                                Outcome::Handled => Disposition::Handled,
                                Outcome::Duplicate => Disposition::Duplicate,
                            };
                            return Ok(Processed {
                                position,
                                disposition,
                                retries,
                            });
                        }
                        Err(err) => (err.kind(), err.to_string()),
                    }
                }
            };

            let decision =
                self.policies
                    .handle(&mut envelope, kind, &reason, self.producer.as_ref());
            let outcome = match decision {
                Ok(outcome) => outcome,
                Err(PolicyError::Exhausted { kind, attempts, .. }) => {
                    self.halt(position);
                    return Err(ConsumerError::PolicyExhausted {
                        position,
                        kind,
                        attempts,
                    });
                }
                Err(err) => {
                    warn!(%position, error = %err, "error policy action failed, rewinding");
                    self.pending_failure = Some(PendingFailure {
                        position,
                        headers: envelope.headers.clone(),
                        kind,
                        reason,
                    });
                    self.rewind(position);
                    return Err(err.into());
                }
            };

            let disposition = match outcome {
                PolicyOutcome::Retry { delay } => {
                    retries += 1;
                    if self.wait(delay) {
                        debug!(%position, "stop requested while retrying, rewinding");
                        self.rewind(position);
                        return Ok(Processed {
                            position,
                            disposition: Disposition::Cancelled,
                            retries,
                        });
                    }
                    continue;
                }
                PolicyOutcome::Skipped => Disposition::Skipped,
                PolicyOutcome::Moved { endpoint } => Disposition::Moved { endpoint },
                PolicyOutcome::Stopped => {
                    error!(
                        endpoint = %self.endpoint,
                        group = %self.group,
                        %position,
                        %kind,
                        reason = %reason,
                        "consumer stopped by error policy"
                    );
                    self.halt(position);
                    return Err(ConsumerError::Stopped { position });
                }
            };

            self.consumer.ack(&position)?;
            return Ok(Processed {
                position,
                disposition,
                retries,
            });
        }
    }

    /// Resume a failure left behind by a rewind, if `envelope` is its redelivery.
    fn take_pending_failure(&mut self, envelope: &mut Envelope) -> Option<(ErrorKind, String)> {
        let pending = self.pending_failure.take()?;
        if pending.position != envelope.position {
            // Another partition may be polled before the rewound one comes back.
            if pending.position.partition != envelope.position.partition {
                self.pending_failure = Some(pending);
            }
            return None;
        }
        debug!(
            position = %envelope.position,
            attempts = pending.headers.failed_attempts(),
            "re-applying error policy to redelivered envelope"
        );
        envelope.headers = pending.headers;
        Some((pending.kind, pending.reason))
    }

    /// Wire the stop signal of a `ConsumerThread`.
    pub(crate) fn set_stop_signal(&mut self, stop_rx: Receiver<()>) {
        self.stop_rx = Some(stop_rx);
    }

    /// True once a stop was signalled (or the signalling side went away).
    pub(crate) fn stop_requested(&mut self) -> bool {
        if self.stop_requested {
            return true;
        }
        if let Some(stop_rx) = &self.stop_rx {
            match stop_rx.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => self.stop_requested = true,
                Err(TryRecvError::Empty) => {}
            }
        }
        self.stop_requested
    }

    /// Sleep for `delay`, waking early on a stop signal. Returns true when stopping.
    pub(crate) fn wait(&mut self, delay: Duration) -> bool {
        if self.stop_requested() {
            return true;
        }
        match &self.stop_rx {
            Some(stop_rx) => match stop_rx.recv_timeout(delay) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    self.stop_requested = true;
                }
                Err(RecvTimeoutError::Timeout) => {}
            },
            None => {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
            }
        }
        self.stop_requested
    }

    fn halt(&mut self, position: Position) {
        self.rewind(position);
        self.pending_failure = None;
        self.halted = Some(position);
    }

    fn rewind(&mut self, position: Position) {
        if let Err(err) = self.consumer.seek(&position) {
            warn!(%position, error = %err, "failed to rewind consumer");
        }
    }
}
