//! Consumer and connection traits.

use std::time::Duration;

use super::TransportError;
use crate::envelope::{Envelope, Position};

/// Connection lifecycle shared by producers and consumers.
pub trait Connection {
    fn connect(&mut self) -> Result<(), TransportError>;

    fn close(&mut self) -> Result<(), TransportError>;
}

/// Pull-based consumer of a partitioned endpoint.
///
/// After `subscribe`, repeated `poll` calls form the lazy and potentially
/// infinite delivery sequence. Progress is only committed through `ack`.
pub trait Consumer: Send {
    /// Join `group` on `endpoint`, resuming from the group's committed offsets.
    fn subscribe(&mut self, endpoint: &str, group: &str) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the next record.
    fn poll(&mut self, timeout: Duration) -> Result<Option<Envelope>, TransportError>;

    /// Commit progress up to and including `position`.
    fn ack(&mut self, position: &Position) -> Result<(), TransportError>;

    /// Reposition the consumer so the next poll on that partition returns `position`.
    fn seek(&mut self, position: &Position) -> Result<(), TransportError>;
}

impl<C: Consumer + ?Sized> Consumer for Box<C> {
    fn subscribe(&mut self, endpoint: &str, group: &str) -> Result<(), TransportError> {
        (**self).subscribe(endpoint, group)
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<Envelope>, TransportError> {
        (**self).poll(timeout)
    }

    fn ack(&mut self, position: &Position) -> Result<(), TransportError> {
        (**self).ack(position)
    }

    fn seek(&mut self, position: &Position) -> Result<(), TransportError> {
        (**self).seek(position)
    }
}
