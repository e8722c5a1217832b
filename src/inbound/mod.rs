//! Inbound deduplication - effectively-once consumption on top of
//! at-least-once delivery.
//!
//! Progress per `(endpoint, partition, group)` is kept as a `StoredOffset`
//! in the same store as the handler's writes. `DeduplicationBehavior`
//! consults it before the handler runs and advances it in the handler's
//! transaction afterwards.

mod deduplication;
mod offset;

pub use deduplication::{DeduplicationBehavior, DEFAULT_MESSAGE_ID_WINDOW};
pub use offset::{EndpointKey, OffsetStore, StoredOffset};
