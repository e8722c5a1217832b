pub mod broker;
pub mod clock;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod error_policy;
pub mod inbound;
pub mod lock;
pub mod outbox;
pub mod pipeline;
pub mod store;

pub use broker::{Connection, Consumer, InMemoryBroker, Producer, TransportError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, RelaySettings};
pub use consumer::{ConsumerError, ConsumerLoop, ConsumerSettings, ConsumerThread};
pub use envelope::{Envelope, Headers, OutboundMessage, Position};
pub use error_policy::{ErrorKind, ErrorPolicy, ErrorPolicyChain};
pub use inbound::{DeduplicationBehavior, EndpointKey, OffsetStore, StoredOffset};
pub use lock::{DistributedLockManager, Lock, LockError, LockSettings, LockStore};
pub use outbox::{
    OutboxError, OutboxProcessor, OutboxProcessorThread, OutboxRow, OutboxStore, OutboxWriter,
};
pub use pipeline::{
    ConsumerContext, ConsumerPipeline, HandlerError, PipelineError, ProducerPipeline,
    ProducerRoute,
};
pub use store::{InMemoryStore, StoreError, TransactionId, TransactionalStore};
