//! Settings for the relay components, loadable from JSON.
//!
//! ```
//! use reliable_rust::config::RelaySettings;
//! use std::time::Duration;
//!
//! let settings = RelaySettings::from_json(r#"{
//!     "outbox": { "batch_size": 25, "poll_interval": 200 },
//!     "lock": { "lease": 15000, "heartbeat": 5000 }
//! }"#).unwrap();
//!
//! assert_eq!(settings.outbox.batch_size, 25);
//! assert_eq!(settings.lock.lease, Duration::from_secs(15));
//! assert_eq!(settings.consumer.poll_timeout, Duration::from_millis(100));
//! ```

use serde::Deserialize;
use thiserror::Error;

use crate::consumer::ConsumerSettings;
use crate::lock::{LockError, LockSettings};
use crate::outbox::OutboxSettings;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid settings json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid lock settings: {0}")]
    Lock(#[from] LockError),
}

/// All relay settings. Missing sections and fields take their defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub outbox: OutboxSettings,
    pub consumer: ConsumerSettings,
    pub lock: LockSettings,
}

impl RelaySettings {
    /// Parse and validate settings from JSON. Durations are in milliseconds.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.lock.validate()?;
        Ok(())
    }
}

/// Serde helpers for `Duration` fields stored as whole milliseconds.
pub mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
