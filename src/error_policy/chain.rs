use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{ErrorKind, ErrorPolicy, PolicyAction};
use crate::broker::{Producer, TransportError};
use crate::envelope::{Envelope, FAILURE_REASON, SOURCE_ENDPOINT};

/// Decision handed back to the consumer loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyOutcome {
    /// Redeliver the same envelope after `delay`; do not acknowledge.
    Retry { delay: Duration },
    /// Acknowledge; the envelope is dropped.
    Skipped,
    /// The envelope was produced to `endpoint`; acknowledge.
    Moved { endpoint: String },
    /// Halt the loop; do not acknowledge.
    Stopped,
}

#[derive(Error, Debug)]
pub enum PolicyError {
    /// No policy in the chain applies.
    #[error("no error policy applies to {kind} failure after {attempts} attempts: {reason}")]
    Exhausted {
        kind: ErrorKind,
        attempts: u32,
        reason: String,
    },

    #[error("failed to move envelope to {endpoint}: {source}")]
    Move {
        endpoint: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to publish policy side effect: {0}")]
    SideEffect(#[source] TransportError),
}

/// Ordered list of error policies; the first one that can handle a failure wins.
///
/// The default chain is a single unfiltered stop policy.
#[derive(Clone, Debug)]
pub struct ErrorPolicyChain {
    policies: Vec<ErrorPolicy>,
}

impl Default for ErrorPolicyChain {
    fn default() -> Self {
        Self::new(vec![ErrorPolicy::stop()])
    }
}

impl ErrorPolicyChain {
    pub fn new(policies: Vec<ErrorPolicy>) -> Self {
        Self { policies }
    }

    /// Append a policy after the existing ones.
    pub fn then(mut self, policy: ErrorPolicy) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn policies(&self) -> &[ErrorPolicy] {
        &self.policies
    }

    /// Largest finite `max_failed_attempts` in the chain, if any policy sets one.
    pub fn max_failed_attempts(&self) -> Option<u32> {
        self.policies
            .iter()
            .filter_map(ErrorPolicy::max_attempts)
            .max()
    }

    /// First policy that can handle `kind` for this envelope.
    pub fn select(&self, envelope: &Envelope, kind: ErrorKind) -> Option<&ErrorPolicy> {
        self.policies
            .iter()
            .find(|policy| policy.can_handle(envelope, kind))
    }

    /// Handle one failed processing attempt.
    ///
    /// Increments the failed-attempts header on `envelope`, selects a policy
    /// and carries out its action. Moves and side-effect messages are
    /// produced through `producer`.
    pub fn handle(
        &self,
        envelope: &mut Envelope,
        kind: ErrorKind,
        reason: &str,
        producer: &dyn Producer,
    ) -> Result<PolicyOutcome, PolicyError> {
        let attempts = envelope.headers.increment_failed_attempts();

        let Some(policy) = self.select(envelope, kind) else {
            error!(
                endpoint = %envelope.endpoint,
                position = %envelope.position,
                %kind,
                attempts,
                reason,
                "no error policy applies"
            );
            return Err(PolicyError::Exhausted {
                kind,
                attempts,
                reason: reason.to_string(),
            });
        };

        let outcome = match policy.action() {
            PolicyAction::Retry { .. } => {
                let delay = policy.retry_delay(attempts);
                debug!(
                    position = %envelope.position,
                    %kind,
                    attempts,
                    ?delay,
                    "retrying envelope"
                );
                return Ok(PolicyOutcome::Retry { delay });
            }
            PolicyAction::Skip => {
                warn!(position = %envelope.position, %kind, attempts, reason, "skipping envelope");
                PolicyOutcome::Skipped
            }
            PolicyAction::Move { endpoint } => {
                let message = envelope
                    .forward_to(endpoint.clone())
                    .with_header(SOURCE_ENDPOINT, envelope.endpoint.clone())
                    .with_header(FAILURE_REASON, reason);
                producer
                    .produce_message(&message)
                    .map_err(|source| PolicyError::Move {
                        endpoint: endpoint.clone(),
                        source,
                    })?;
                info!(
                    position = %envelope.position,
                    target = %endpoint,
                    %kind,
                    attempts,
                    "envelope moved"
                );
                PolicyOutcome::Moved {
                    endpoint: endpoint.clone(),
                }
            }
            PolicyAction::Stop => PolicyOutcome::Stopped,
        };

        if let Some(message) = policy.side_effect(envelope) {
            producer
                .produce_message(&message)
                .map_err(PolicyError::SideEffect)?;
        }

        Ok(outcome)
    }
}
