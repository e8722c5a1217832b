//! Distributed lock - lease-based mutual exclusion across process instances.
//!
//! A lock row `{ name, holder_id, acquired_at, expires_at }` is claimed with
//! a compare-and-set on expiry, renewed on a heartbeat strictly shorter than
//! the lease, and released explicitly or reclaimed after expiry. The
//! protocol lives in `DistributedLockManager`; storage is behind `LockStore`.

mod error;
mod in_memory;
#[allow(clippy::module_inception)]
mod lock;
mod lock_manager;

pub use error::LockError;
pub use in_memory::InMemoryLockStore;
pub use lock::{Lock, LockStore};
pub use lock_manager::{DistributedLockManager, LockSettings};
