//! Consumer loop - one sequential processor per subscription.
//!
//! ```text
//! poll ─► pipeline ─► Ok ─────────────────────────────► ack
//!              │
//!              └─ Err ─► ErrorPolicyChain ─► Retry ─► (same envelope again)
//!                                        ├─► Skip / Move ─► ack
//!                                        └─► Stop / none ─► halt, no ack
//! ```
//!
//! Partitions are independent: give each partition its own consumer (for
//! example `InMemoryBroker::consumer_for(&[p])`) and its own loop, and run
//! each loop on a `ConsumerThread`.

mod consumer_loop;
mod error;
mod thread;

pub use consumer_loop::{ConsumerLoop, ConsumerSettings, Disposition, Processed};
pub use error::ConsumerError;
pub use thread::{ConsumerStats, ConsumerThread};
