//! Pipeline - ordered behavior chains around consuming and producing.
//!
//! ```text
//! poll ─► Tracing ─► Transaction ─► Deduplication ─► JsonDeserialize ─► handler
//!
//! publish ─► MessageId ─► StaticHeaders ─► Tracing ─► route (Direct | Outbox)
//! ```
//!
//! Each behavior receives an immutable context and a `next` continuation.
//! It may short-circuit, rebuild the context for the rest of the chain, or
//! wrap `next` with work before and after. The consumer chain ends in a
//! `MessageHandler`; the producer chain ends in a `ProducerRoute`.

mod behaviors;
mod context;
mod error;
#[allow(clippy::module_inception)]
mod pipeline;

pub use behaviors::{
    JsonDeserializeBehavior, MessageIdBehavior, StaticHeadersBehavior, TracingBehavior,
    TransactionBehavior,
};
pub use context::{ConsumerContext, ProducerContext};
pub use error::{HandlerError, PipelineError};
pub use pipeline::{
    ConsumerBehavior, ConsumerNext, ConsumerPipeline, ConsumerPipelineBuilder, MessageHandler,
    Outcome, ProducerBehavior, ProducerNext, ProducerPipeline, ProducerRoute,
};
