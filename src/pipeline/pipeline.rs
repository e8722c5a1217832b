use std::sync::Arc;

use tracing::trace;

use super::context::{ConsumerContext, ProducerContext};
use super::error::{HandlerError, PipelineError};
use crate::broker::Producer;
use crate::envelope::{OutboundMessage, Position};
use crate::outbox::OutboxAppender;
use crate::store::TransactionId;

/// Result of a successful consumer pipeline run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The handler ran to completion.
    Handled,
    /// The envelope was already processed; the handler did not run.
    Duplicate,
}

/// Application logic at the end of a consumer pipeline.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, ctx: &ConsumerContext) -> Result<(), HandlerError>;
}

impl<F> MessageHandler for F
where
    F: Fn(&ConsumerContext) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, ctx: &ConsumerContext) -> Result<(), HandlerError> {
        self(ctx)
    }
}

/// One link in the consumer chain.
///
/// A behavior either short-circuits by returning without calling `next`, or
/// passes a (possibly rebuilt) context to `next.run`.
pub trait ConsumerBehavior: Send + Sync {
    fn invoke(&self, ctx: ConsumerContext, next: ConsumerNext<'_>)
        -> Result<Outcome, PipelineError>;
}

/// The remainder of a consumer chain.
#[derive(Clone, Copy)]
pub struct ConsumerNext<'a> {
    behaviors: &'a [Arc<dyn ConsumerBehavior>],
    handler: &'a dyn MessageHandler,
}

impl ConsumerNext<'_> {
    pub fn run(self, ctx: ConsumerContext) -> Result<Outcome, PipelineError> {
        match self.behaviors.split_first() {
            Some((behavior, rest)) => behavior.invoke(
                ctx,
                ConsumerNext {
                    behaviors: rest,
                    handler: self.handler,
                },
            ),
            None => {
                self.handler.handle(&ctx)?;
                Ok(Outcome::Handled)
            }
        }
    }
}

/// Ordered consumer behaviors ending in a message handler.
#[derive(Clone)]
pub struct ConsumerPipeline {
    behaviors: Vec<Arc<dyn ConsumerBehavior>>,
    handler: Arc<dyn MessageHandler>,
}

impl ConsumerPipeline {
    pub fn builder() -> ConsumerPipelineBuilder {
        ConsumerPipelineBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }

    pub fn execute(&self, ctx: ConsumerContext) -> Result<Outcome, PipelineError> {
        trace!(
            endpoint = %ctx.envelope().endpoint,
            position = %ctx.envelope().position,
            behaviors = self.behaviors.len(),
            "executing consumer pipeline"
        );
        ConsumerNext {
            behaviors: &self.behaviors,
            handler: self.handler.as_ref(),
        }
        .run(ctx)
    }
}

#[derive(Default)]
pub struct ConsumerPipelineBuilder {
    behaviors: Vec<Arc<dyn ConsumerBehavior>>,
}

impl ConsumerPipelineBuilder {
    /// Append a behavior; behaviors run in the order they were added.
    pub fn with(mut self, behavior: impl ConsumerBehavior + 'static) -> Self {
        self.behaviors.push(Arc::new(behavior));
        self
    }

    pub fn with_shared(mut self, behavior: Arc<dyn ConsumerBehavior>) -> Self {
        self.behaviors.push(behavior);
        self
    }

    pub fn build(self, handler: impl MessageHandler + 'static) -> ConsumerPipeline {
        ConsumerPipeline {
            behaviors: self.behaviors,
            handler: Arc::new(handler),
        }
    }
}

/// One link in the producer chain.
pub trait ProducerBehavior: Send + Sync {
    fn invoke(
        &self,
        ctx: ProducerContext,
        next: ProducerNext<'_>,
    ) -> Result<Option<Position>, PipelineError>;
}

/// Where a producer pipeline finally sends its message.
#[derive(Clone)]
pub enum ProducerRoute {
    /// Produce to the broker immediately.
    Direct(Arc<dyn Producer>),
    /// Append to the outbox inside the caller's transaction.
    Outbox(Arc<dyn OutboxAppender>),
}

impl ProducerRoute {
    fn dispatch(&self, ctx: ProducerContext) -> Result<Option<Position>, PipelineError> {
        match self {
            ProducerRoute::Direct(producer) => {
                Ok(Some(producer.produce_message(ctx.message())?))
            }
            ProducerRoute::Outbox(outbox) => {
                let tx = ctx.transaction().ok_or(PipelineError::MissingTransaction)?;
                outbox.append(tx, ctx.message())?;
                Ok(None)
            }
        }
    }
}

/// The remainder of a producer chain.
#[derive(Clone, Copy)]
pub struct ProducerNext<'a> {
    behaviors: &'a [Arc<dyn ProducerBehavior>],
    route: &'a ProducerRoute,
}

impl ProducerNext<'_> {
    pub fn run(self, ctx: ProducerContext) -> Result<Option<Position>, PipelineError> {
        match self.behaviors.split_first() {
            Some((behavior, rest)) => behavior.invoke(
                ctx,
                ProducerNext {
                    behaviors: rest,
                    route: self.route,
                },
            ),
            None => self.route.dispatch(ctx),
        }
    }
}

/// Ordered producer behaviors ending in a route.
///
/// `publish` returns the broker position for direct routes and `None` for
/// outbox routes, where the message is only staged in the transaction.
#[derive(Clone)]
pub struct ProducerPipeline {
    behaviors: Vec<Arc<dyn ProducerBehavior>>,
    route: ProducerRoute,
}

impl ProducerPipeline {
    pub fn new(route: ProducerRoute) -> Self {
        Self {
            behaviors: Vec::new(),
            route,
        }
    }

    pub fn with(mut self, behavior: impl ProducerBehavior + 'static) -> Self {
        self.behaviors.push(Arc::new(behavior));
        self
    }

    pub fn route(&self) -> &ProducerRoute {
        &self.route
    }

    pub fn publish(
        &self,
        message: OutboundMessage,
        tx: Option<TransactionId>,
    ) -> Result<Option<Position>, PipelineError> {
        ProducerNext {
            behaviors: &self.behaviors,
            route: &self.route,
        }
        .run(ProducerContext::new(message, tx))
    }

    /// Publish from inside a consumer pipeline, joining its transaction.
    pub fn publish_in(
        &self,
        ctx: &ConsumerContext,
        message: OutboundMessage,
    ) -> Result<Option<Position>, PipelineError> {
        self.publish(message, ctx.transaction())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::envelope::{Envelope, Headers};
    use std::sync::Mutex;

    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ConsumerBehavior for Recording {
        fn invoke(
            &self,
            ctx: ConsumerContext,
            next: ConsumerNext<'_>,
        ) -> Result<Outcome, PipelineError> {
            self.log.lock().unwrap().push(format!("{} in", self.name));
            let outcome = next.run(ctx);
            self.log.lock().unwrap().push(format!("{} out", self.name));
            outcome
        }
    }

    struct ShortCircuit;

    impl ConsumerBehavior for ShortCircuit {
        fn invoke(&self, _: ConsumerContext, _: ConsumerNext<'_>) -> Result<Outcome, PipelineError> {
            Ok(Outcome::Duplicate)
        }
    }

    fn context() -> ConsumerContext {
        let envelope = Envelope::new("orders", Position::new(0, 0), Vec::new(), Headers::new());
        ConsumerContext::new(envelope, "billing")
    }

    #[test]
    fn behaviors_wrap_the_handler_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler_log = Arc::clone(&log);
        let pipeline = ConsumerPipeline::builder()
            .with(Recording {
                name: "outer",
                log: Arc::clone(&log),
            })
            .with(Recording {
                name: "inner",
                log: Arc::clone(&log),
            })
            .build(move |_: &ConsumerContext| -> Result<(), HandlerError> {
                handler_log.lock().unwrap().push("handler".to_string());
                Ok(())
            });

        assert_eq!(pipeline.execute(context()).unwrap(), Outcome::Handled);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["outer in", "inner in", "handler", "inner out", "outer out"]
        );
    }

    #[test]
    fn short_circuit_skips_the_handler() {
        let pipeline = ConsumerPipeline::builder()
            .with(ShortCircuit)
            .build(|_: &ConsumerContext| -> Result<(), HandlerError> {
                panic!("handler must not run")
            });

        assert_eq!(pipeline.execute(context()).unwrap(), Outcome::Duplicate);
    }

    #[test]
    fn handler_errors_propagate() {
        let pipeline = ConsumerPipeline::builder()
            .build(|_: &ConsumerContext| -> Result<(), HandlerError> {
                Err(HandlerError::Rejected("no".into()))
            });

        assert!(matches!(
            pipeline.execute(context()),
            Err(PipelineError::Handler(HandlerError::Rejected(_)))
        ));
    }

    #[test]
    fn direct_route_returns_the_position() {
        let broker = InMemoryBroker::new();
        let pipeline = ProducerPipeline::new(ProducerRoute::Direct(Arc::new(broker.clone())));

        let position = pipeline
            .publish(OutboundMessage::with_string_body("orders", "hi"), None)
            .unwrap();
        assert_eq!(position, Some(Position::new(0, 0)));
        assert_eq!(broker.len("orders"), 1);
    }
}
