use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::envelope::{Headers, OutboundMessage};
use crate::store::{StoreError, TransactionId, TransactionalStore};

/// A persisted outgoing message awaiting dispatch.
///
/// Rows are immutable apart from `sent_at`, which is set exactly once after
/// the broker acknowledged the record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboxRow {
    pub id: u64,
    #[serde(with = "body_serde")]
    pub body: Vec<u8>,
    pub headers: Headers,
    pub target_endpoint: String,
    pub key: Option<String>,
    pub created_at: SystemTime,
    pub sent_at: Option<SystemTime>,
}

impl OutboxRow {
    pub fn is_pending(&self) -> bool {
        self.sent_at.is_none()
    }

    pub fn to_message(&self) -> OutboundMessage {
        OutboundMessage {
            endpoint: self.target_endpoint.clone(),
            key: self.key.clone(),
            body: self.body.clone(),
            headers: self.headers.clone(),
        }
    }
}

/// An outbox row before the store assigned its id.
#[derive(Clone, Debug, PartialEq)]
pub struct NewOutboxRow {
    pub body: Vec<u8>,
    pub headers: Headers,
    pub target_endpoint: String,
    pub key: Option<String>,
    pub created_at: SystemTime,
}

impl NewOutboxRow {
    pub fn from_message(message: &OutboundMessage, created_at: SystemTime) -> Self {
        Self {
            body: message.body.clone(),
            headers: message.headers.clone(),
            target_endpoint: message.endpoint.clone(),
            key: message.key.clone(),
            created_at,
        }
    }
}

/// Persistence for outbox rows.
///
/// Inserts and sent markers are staged in a transaction; reads only see
/// committed rows.
pub trait OutboxStore: TransactionalStore {
    fn insert_outbox_row(&self, tx: TransactionId, row: NewOutboxRow) -> Result<(), StoreError>;

    /// Unsent rows in `(created_at, id)` order, at most `limit` of them.
    fn pending_outbox_rows(&self, limit: usize) -> Result<Vec<OutboxRow>, StoreError>;

    /// Number of unsent rows.
    fn count_pending_outbox_rows(&self) -> Result<usize, StoreError>;

    fn mark_outbox_row_sent(
        &self,
        tx: TransactionId,
        id: u64,
        sent_at: SystemTime,
    ) -> Result<(), StoreError>;

    /// Every committed row, sent or not.
    fn outbox_rows(&self) -> Result<Vec<OutboxRow>, StoreError>;
}

mod body_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(body).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(&encoded).map_err(serde::de::Error::custom)
    }
}
