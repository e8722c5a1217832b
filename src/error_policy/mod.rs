//! Error policies - what to do with an envelope whose processing failed.
//!
//! Policies are evaluated in order against the failure's `ErrorKind` and the
//! envelope's failed-attempts counter; the first one that applies decides
//! between retry, skip, move and stop.

mod chain;
mod kind;
mod policy;

pub use chain::{ErrorPolicyChain, PolicyError, PolicyOutcome};
pub use kind::ErrorKind;
pub use policy::{ApplyRule, ErrorPolicy, MessageFactory, PolicyAction};
