//! Built-in consumer and producer behaviors.

use tracing::{debug, info_span, trace, warn};
use uuid::Uuid;

use super::context::{ConsumerContext, ProducerContext};
use super::error::PipelineError;
use super::pipeline::{ConsumerBehavior, ConsumerNext, Outcome, ProducerBehavior, ProducerNext};
use crate::envelope::{Headers, Position, MESSAGE_ID};
use crate::store::TransactionalStore;

/// Runs the rest of the chain inside a span carrying the envelope's identity.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingBehavior;

impl ConsumerBehavior for TracingBehavior {
    fn invoke(&self, ctx: ConsumerContext, next: ConsumerNext<'_>) -> Result<Outcome, PipelineError> {
        let envelope = ctx.envelope();
        let span = info_span!(
            "consume",
            endpoint = %envelope.endpoint,
            position = %envelope.position,
            group = %ctx.group(),
            message_id = envelope.message_id().unwrap_or("-"),
            failed_attempts = envelope.failed_attempts(),
        );
        let _guard = span.enter();

        let result = next.run(ctx);
        match &result {
            Ok(outcome) => debug!(?outcome, "envelope processed"),
            Err(err) => warn!(error = %err, kind = %err.kind(), "envelope processing failed"),
        }
        result
    }
}

impl ProducerBehavior for TracingBehavior {
    fn invoke(
        &self,
        ctx: ProducerContext,
        next: ProducerNext<'_>,
    ) -> Result<Option<Position>, PipelineError> {
        let message = ctx.message();
        let span = info_span!(
            "produce",
            endpoint = %message.endpoint,
            message_id = message.headers.message_id().unwrap_or("-"),
        );
        let _guard = span.enter();

        let result = next.run(ctx);
        match &result {
            Ok(Some(position)) => debug!(%position, "message produced"),
            Ok(None) => debug!("message staged in outbox"),
            Err(err) => warn!(error = %err, "produce failed"),
        }
        result
    }
}

/// Opens a transaction around the rest of the chain.
///
/// Commits when the chain succeeds and rolls back when it fails. A context
/// that already carries a transaction joins it instead of opening another.
pub struct TransactionBehavior<S> {
    store: S,
}

impl<S: TransactionalStore> TransactionBehavior<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: TransactionalStore> ConsumerBehavior for TransactionBehavior<S> {
    fn invoke(&self, ctx: ConsumerContext, next: ConsumerNext<'_>) -> Result<Outcome, PipelineError> {
        if ctx.transaction().is_some() {
            return next.run(ctx);
        }

        let tx = self.store.begin()?;
        trace!(%tx, "transaction opened");
        match next.run(ctx.with_transaction(tx)) {
            Ok(outcome) => {
                self.store.commit(tx)?;
                trace!(%tx, "transaction committed");
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback_err) = self.store.rollback(tx) {
                    warn!(%tx, error = %rollback_err, "rollback failed");
                }
                trace!(%tx, "transaction rolled back");
                Err(err)
            }
        }
    }
}

/// Parses the body as JSON and attaches it to the envelope.
///
/// A body that is not valid JSON fails with `PipelineError::Deserialization`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonDeserializeBehavior;

impl ConsumerBehavior for JsonDeserializeBehavior {
    fn invoke(&self, ctx: ConsumerContext, next: ConsumerNext<'_>) -> Result<Outcome, PipelineError> {
        if ctx.envelope().deserialized.is_some() {
            return next.run(ctx);
        }

        let value: serde_json::Value = serde_json::from_slice(&ctx.envelope().body)
            .map_err(|e| PipelineError::Deserialization(e.to_string()))?;
        let mut envelope = ctx.envelope().clone();
        envelope.deserialized = Some(value);
        next.run(ctx.with_envelope(envelope))
    }
}

/// Stamps a fresh UUID into the message id header when none is present.
#[derive(Clone, Copy, Debug, Default)]
pub struct MessageIdBehavior;

impl ProducerBehavior for MessageIdBehavior {
    fn invoke(
        &self,
        ctx: ProducerContext,
        next: ProducerNext<'_>,
    ) -> Result<Option<Position>, PipelineError> {
        if ctx.message().headers.contains(MESSAGE_ID) {
            return next.run(ctx);
        }
        let mut message = ctx.message().clone();
        message
            .headers
            .set(MESSAGE_ID, Uuid::new_v4().to_string());
        next.run(ctx.with_message(message))
    }
}

/// Adds fixed headers to every produced message without overriding existing ones.
#[derive(Clone, Debug, Default)]
pub struct StaticHeadersBehavior {
    headers: Headers,
}

impl StaticHeadersBehavior {
    pub fn new(headers: Headers) -> Self {
        Self { headers }
    }
}

impl ProducerBehavior for StaticHeadersBehavior {
    fn invoke(
        &self,
        ctx: ProducerContext,
        next: ProducerNext<'_>,
    ) -> Result<Option<Position>, PipelineError> {
        let mut message = ctx.message().clone();
        for (key, value) in self.headers.iter() {
            message.headers.set_if_absent(key, value);
        }
        next.run(ctx.with_message(message))
    }
}
