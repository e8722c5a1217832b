use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of a processing failure, assigned where the failure happens.
///
/// Error policies filter on these kinds instead of on concrete error types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The body could not be turned into a message.
    Deserialization,
    /// Business logic rejected or failed the message.
    Handler,
    /// A collaborator was temporarily unavailable.
    Transient,
    /// A compare-and-set lost a race.
    Concurrency,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Deserialization => "deserialization",
            ErrorKind::Handler => "handler",
            ErrorKind::Transient => "transient",
            ErrorKind::Concurrency => "concurrency",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}
