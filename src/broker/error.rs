use thiserror::Error;

/// Failure talking to the broker transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection to the broker failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The broker is unreachable
    #[error("broker unavailable")]
    Unavailable,

    /// The broker rejected the record
    #[error("record rejected: {0}")]
    Rejected(String),

    /// No acknowledgment within the configured timeout
    #[error("transport timeout")]
    Timeout,

    /// Consumer used before `subscribe`
    #[error("consumer is not subscribed")]
    NotSubscribed,

    /// Any other transport failure
    #[error("transport error: {0}")]
    Other(String),
}
