//! Transactional outbox - atomic "write state + enqueue message".
//!
//! Producers stage outgoing messages as rows in the same transaction as
//! their business writes (`OutboxWriter`). A single active
//! `OutboxProcessor`, elected through the distributed lock, later produces
//! the committed rows to the broker and marks them sent.
//!
//! ```text
//! handler tx: business rows + outbox rows ── commit ──► outbox table
//!                                                           │
//!              OutboxProcessor (lock holder) ◄── pending ───┘
//!                      │ produce
//!                      ▼
//!                   broker ── ack ──► mark sent (own tx)
//! ```

mod error;
mod processor;
mod row;
mod thread;
mod writer;

pub use error::OutboxError;
pub use processor::{DrainResult, OutboxProcessor, OutboxSettings};
pub use row::{NewOutboxRow, OutboxRow, OutboxStore};
pub use thread::{OutboxProcessorThread, OutboxStats};
pub use writer::{OutboxAppender, OutboxWriter};
