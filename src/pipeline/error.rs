//! Error types for pipeline behaviors and message handlers.

use std::error::Error as StdError;

use thiserror::Error;

use crate::broker::TransportError;
use crate::error_policy::ErrorKind;
use crate::store::StoreError;

/// Error returned by application message handlers.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Business logic rejected the message (validation, invariant violation).
    #[error("rejected: {0}")]
    Rejected(String),

    /// A dependency was temporarily unavailable; a retry may succeed.
    #[error("transient failure: {0}")]
    Transient(String),

    /// An optimistic concurrency check failed.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The payload could not be decoded.
    #[error("decode failed: {0}")]
    DecodeFailed(String),

    /// Store error while applying the message's effects.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Publishing a follow-up message failed.
    #[error("publish failed: {0}")]
    Publish(#[source] Box<PipelineError>),

    /// Other error.
    #[error("handler error: {0}")]
    Other(Box<dyn StdError + Send + Sync>),
}

impl HandlerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HandlerError::Rejected(_) => ErrorKind::Handler,
            HandlerError::Transient(_) => ErrorKind::Transient,
            HandlerError::Conflict(_) => ErrorKind::Concurrency,
            HandlerError::DecodeFailed(_) => ErrorKind::Deserialization,
            HandlerError::Store(err) => store_kind(err),
            HandlerError::Publish(err) => err.kind(),
            HandlerError::Other(_) => ErrorKind::Unknown,
        }
    }
}

impl From<PipelineError> for HandlerError {
    fn from(err: PipelineError) -> Self {
        HandlerError::Publish(Box::new(err))
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::DecodeFailed(err.to_string())
    }
}

impl From<bitcode::Error> for HandlerError {
    fn from(err: bitcode::Error) -> Self {
        HandlerError::DecodeFailed(err.to_string())
    }
}

/// Failure anywhere in a consumer or producer pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("deserialization failed: {0}")]
    Deserialization(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The outbox route was used outside of a transaction.
    #[error("outbox append requires an ambient transaction")]
    MissingTransaction,
}

impl PipelineError {
    /// The error kind error policies match against.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Handler(err) => err.kind(),
            PipelineError::Deserialization(_) => ErrorKind::Deserialization,
            PipelineError::Store(err) => store_kind(err),
            PipelineError::Transport(_) => ErrorKind::Transient,
            PipelineError::MissingTransaction => ErrorKind::Unknown,
        }
    }
}

fn store_kind(err: &StoreError) -> ErrorKind {
    match err {
        StoreError::ConcurrencyConflict(_) => ErrorKind::Concurrency,
        StoreError::Poisoned(_) | StoreError::UnknownTransaction(_) | StoreError::NotFound(_) => {
            ErrorKind::Transient
        }
    }
}
