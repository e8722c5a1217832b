use thiserror::Error;

use crate::broker::TransportError;
use crate::envelope::Position;
use crate::error_policy::{ErrorKind, PolicyError};

#[derive(Error, Debug)]
pub enum ConsumerError {
    /// The broker failed a poll, ack or subscribe.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A stop policy halted the loop. The envelope was not acknowledged.
    #[error("consumer stopped by error policy at {position}")]
    Stopped { position: Position },

    /// No error policy applied. The envelope was not acknowledged.
    #[error("no error policy applies to {kind} failure at {position} after {attempts} attempts")]
    PolicyExhausted {
        position: Position,
        kind: ErrorKind,
        attempts: u32,
    },

    /// A move or side-effect publish failed; the envelope will be redelivered.
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl ConsumerError {
    /// Fatal errors halt the partition loop until an operator intervenes.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConsumerError::Stopped { .. } | ConsumerError::PolicyExhausted { .. }
        )
    }
}
