use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::{StoreError, TransactionId, TransactionalStore};

/// Identifies one consumer's progress: an endpoint partition read by a group.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointKey {
    pub endpoint: String,
    pub partition: u32,
    pub group: String,
}

impl EndpointKey {
    pub fn new(endpoint: impl Into<String>, partition: u32, group: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            partition,
            group: group.into(),
        }
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]/{}", self.endpoint, self.partition, self.group)
    }
}

/// Highest offset a group has processed on a partition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOffset {
    pub key: EndpointKey,
    pub committed_offset: u64,
    /// Message id of the envelope at `committed_offset`, when it had one.
    pub last_message_id: Option<String>,
    /// Ids of the most recently processed envelopes, oldest first.
    #[serde(default)]
    pub recent_message_ids: Vec<String>,
}

impl StoredOffset {
    pub fn new(key: EndpointKey, committed_offset: u64) -> Self {
        Self {
            key,
            committed_offset,
            last_message_id: None,
            recent_message_ids: Vec::new(),
        }
    }

    /// True when `message_id` was processed recently enough to be remembered.
    pub fn has_seen(&self, message_id: &str) -> bool {
        self.last_message_id.as_deref() == Some(message_id)
            || self.recent_message_ids.iter().any(|id| id == message_id)
    }
}

/// Persistence for stored offsets.
///
/// `store_offset` only stages the write; the new offset becomes visible when
/// `tx` commits. Commit must reject an offset that does not strictly advance
/// the stored one with `StoreError::ConcurrencyConflict`.
pub trait OffsetStore: TransactionalStore {
    fn stored_offset(&self, key: &EndpointKey) -> Result<Option<StoredOffset>, StoreError>;

    fn store_offset(&self, tx: TransactionId, offset: StoredOffset) -> Result<(), StoreError>;
}
