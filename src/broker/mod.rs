//! Broker abstraction - uniform producer/consumer capability over any transport.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │         ConsumerLoop / OutboxProcessor / ErrorPolicyChain    │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Producer + Consumer + Connection                │
//! │  Producer: produce(endpoint, key, body, headers) -> Position │
//! │  Consumer: subscribe / poll(timeout) / ack / seek            │
//! └─────────────────────────────────────────────────────────────┘
//!          │                  │                     │
//!          ▼                  ▼                     ▼
//! ┌──────────────┐    ┌─────────────┐    ┌─────────────────────┐
//! │InMemoryBroker│    │ Kafka driver│    │    AMQP driver      │
//! │  (included)  │    │ (external)  │    │    (external)       │
//! └──────────────┘    └─────────────┘    └─────────────────────┘
//! ```

mod consumer;
mod error;
mod in_memory;
mod producer;

pub use consumer::{Connection, Consumer};
pub use error::TransportError;
pub use in_memory::{InMemoryBroker, InMemoryConsumer};
pub use producer::Producer;
