use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use super::ErrorKind;
use crate::envelope::{Envelope, OutboundMessage};

/// Predicate deciding whether a policy applies to a failed envelope.
pub type ApplyRule = Arc<dyn Fn(&Envelope, ErrorKind) -> bool + Send + Sync>;

/// Builds a message to publish as a side effect of applying a policy.
pub type MessageFactory = Arc<dyn Fn(&Envelope) -> OutboundMessage + Send + Sync>;

/// What happens to the envelope once a policy applies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyAction {
    /// Redeliver the same envelope without acknowledging it.
    Retry {
        initial_delay: Duration,
        delay_increment: Duration,
    },
    /// Acknowledge and drop the envelope.
    Skip,
    /// Produce the envelope to another endpoint, then acknowledge it.
    Move { endpoint: String },
    /// Halt the consumer loop without acknowledging.
    Stop,
}

impl PolicyAction {
    pub fn name(&self) -> &'static str {
        match self {
            PolicyAction::Retry { .. } => "retry",
            PolicyAction::Skip => "skip",
            PolicyAction::Move { .. } => "move",
            PolicyAction::Stop => "stop",
        }
    }
}

/// One recovery policy: an action plus the filters that decide when it applies.
///
/// ## Example
///
/// ```
/// use reliable_rust::error_policy::{ErrorKind, ErrorPolicy};
/// use std::time::Duration;
///
/// let retry = ErrorPolicy::retry()
///     .with_delay(Duration::from_millis(100), Duration::from_millis(50))
///     .max_failed_attempts(3)
///     .exclude(ErrorKind::Deserialization);
/// let park = ErrorPolicy::move_to("orders-dead-letter");
/// # let _ = (retry, park);
/// ```
#[derive(Clone)]
pub struct ErrorPolicy {
    action: PolicyAction,
    max_failed_attempts: Option<u32>,
    included: HashSet<ErrorKind>,
    excluded: HashSet<ErrorKind>,
    apply_rule: Option<ApplyRule>,
    side_effect: Option<MessageFactory>,
}

impl ErrorPolicy {
    fn new(action: PolicyAction) -> Self {
        Self {
            action,
            max_failed_attempts: None,
            included: HashSet::new(),
            excluded: HashSet::new(),
            apply_rule: None,
            side_effect: None,
        }
    }

    /// Retry immediately.
    pub fn retry() -> Self {
        Self::new(PolicyAction::Retry {
            initial_delay: Duration::ZERO,
            delay_increment: Duration::ZERO,
        })
    }

    pub fn skip() -> Self {
        Self::new(PolicyAction::Skip)
    }

    pub fn move_to(endpoint: impl Into<String>) -> Self {
        Self::new(PolicyAction::Move {
            endpoint: endpoint.into(),
        })
    }

    pub fn stop() -> Self {
        Self::new(PolicyAction::Stop)
    }

    /// Set the retry back-off. Ignored by non-retry policies.
    pub fn with_delay(mut self, initial: Duration, increment: Duration) -> Self {
        if let PolicyAction::Retry {
            initial_delay,
            delay_increment,
        } = &mut self.action
        {
            *initial_delay = initial;
            *delay_increment = increment;
        }
        self
    }

    /// Skip this policy once the failed-attempts counter exceeds `max`.
    pub fn max_failed_attempts(mut self, max: u32) -> Self {
        self.max_failed_attempts = Some(max);
        self
    }

    /// Only apply to the given kinds. Can be called more than once.
    pub fn include(mut self, kind: ErrorKind) -> Self {
        self.included.insert(kind);
        self
    }

    /// Never apply to the given kind.
    pub fn exclude(mut self, kind: ErrorKind) -> Self {
        self.excluded.insert(kind);
        self
    }

    pub fn apply_when<F>(mut self, rule: F) -> Self
    where
        F: Fn(&Envelope, ErrorKind) -> bool + Send + Sync + 'static,
    {
        self.apply_rule = Some(Arc::new(rule));
        self
    }

    /// Publish a message whenever this policy applies (except for retries).
    pub fn publish<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Envelope) -> OutboundMessage + Send + Sync + 'static,
    {
        self.side_effect = Some(Arc::new(factory));
        self
    }

    pub fn action(&self) -> &PolicyAction {
        &self.action
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_failed_attempts
    }

    pub(crate) fn side_effect(&self, envelope: &Envelope) -> Option<OutboundMessage> {
        self.side_effect.as_ref().map(|factory| factory(envelope))
    }

    /// Delay before the retry following `attempts` failures.
    pub fn retry_delay(&self, attempts: u32) -> Duration {
        match &self.action {
            PolicyAction::Retry {
                initial_delay,
                delay_increment,
            } => *initial_delay + delay_increment.saturating_mul(attempts.saturating_sub(1)),
            _ => Duration::ZERO,
        }
    }

    /// Evaluate the filters in order, logging the first that rejects.
    pub fn can_handle(&self, envelope: &Envelope, kind: ErrorKind) -> bool {
        let attempts = envelope.failed_attempts();
        let policy = self.action.name();

        if let Some(max) = self.max_failed_attempts {
            if attempts > max {
                trace!(
                    policy,
                    attempts,
                    max,
                    position = %envelope.position,
                    "policy skipped: failed attempts exceed the maximum"
                );
                return false;
            }
        }

        if !self.included.is_empty() && !self.included.contains(&kind) {
            trace!(policy, %kind, position = %envelope.position, "policy skipped: kind not included");
            return false;
        }

        if self.excluded.contains(&kind) {
            trace!(policy, %kind, position = %envelope.position, "policy skipped: kind excluded");
            return false;
        }

        if let Some(rule) = &self.apply_rule {
            if !rule(envelope, kind) {
                trace!(policy, %kind, position = %envelope.position, "policy skipped: apply rule returned false");
                return false;
            }
        }

        true
    }
}

impl fmt::Debug for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorPolicy")
            .field("action", &self.action)
            .field("max_failed_attempts", &self.max_failed_attempts)
            .field("included", &self.included)
            .field("excluded", &self.excluded)
            .field("apply_rule", &self.apply_rule.is_some())
            .field("side_effect", &self.side_effect.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Headers, Position, FAILED_ATTEMPTS};

    fn failed(attempts: u32) -> Envelope {
        Envelope::new(
            "orders",
            Position::new(0, 1),
            b"{}".to_vec(),
            Headers::new().with(FAILED_ATTEMPTS, attempts.to_string()),
        )
    }

    #[test]
    fn max_attempts_is_exclusive() {
        let policy = ErrorPolicy::retry().max_failed_attempts(2);
        assert!(policy.can_handle(&failed(2), ErrorKind::Handler));
        assert!(!policy.can_handle(&failed(3), ErrorKind::Handler));
    }

    #[test]
    fn include_and_exclude_filter_kinds() {
        let policy = ErrorPolicy::skip()
            .include(ErrorKind::Deserialization)
            .include(ErrorKind::Handler)
            .exclude(ErrorKind::Handler);

        assert!(policy.can_handle(&failed(1), ErrorKind::Deserialization));
        assert!(!policy.can_handle(&failed(1), ErrorKind::Handler));
        assert!(!policy.can_handle(&failed(1), ErrorKind::Transient));
    }

    #[test]
    fn apply_rule_sees_the_envelope() {
        let policy = ErrorPolicy::stop().apply_when(|envelope, _| envelope.position.offset > 5);
        assert!(!policy.can_handle(&failed(1), ErrorKind::Unknown));
    }

    #[test]
    fn retry_delay_grows_linearly() {
        let policy = ErrorPolicy::retry()
            .with_delay(Duration::from_millis(100), Duration::from_millis(50));

        assert_eq!(policy.retry_delay(1), Duration::from_millis(100));
        assert_eq!(policy.retry_delay(2), Duration::from_millis(150));
        assert_eq!(policy.retry_delay(4), Duration::from_millis(250));
        assert_eq!(ErrorPolicy::skip().retry_delay(3), Duration::ZERO);
    }
}
