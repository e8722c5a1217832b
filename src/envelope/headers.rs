use serde::{Deserialize, Serialize};

/// Stable identifier of a logical message.
pub const MESSAGE_ID: &str = "x-message-id";
/// Number of failed processing attempts for the current logical message.
pub const FAILED_ATTEMPTS: &str = "x-failed-attempts";
/// Endpoint a moved message originally came from.
pub const SOURCE_ENDPOINT: &str = "x-source-endpoint";
/// Display form of the error that caused a move.
pub const FAILURE_REASON: &str = "x-failure-reason";

/// Ordered string-to-string header map.
///
/// Insertion order is preserved. Setting an existing key replaces its value
/// in place, so a header keeps the slot it was first written to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style `set`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    /// Set a header only if it is not present yet.
    pub fn set_if_absent(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if !self.contains(&key) {
            self.0.push((key, value.into()));
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The `x-message-id` header, if set.
    pub fn message_id(&self) -> Option<&str> {
        self.get(MESSAGE_ID)
    }

    /// The `x-failed-attempts` counter. Missing or malformed values count as 0.
    pub fn failed_attempts(&self) -> u32 {
        self.get(FAILED_ATTEMPTS)
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    }

    /// Increment `x-failed-attempts` and return the new value.
    pub fn increment_failed_attempts(&mut self) -> u32 {
        let attempts = self.failed_attempts().saturating_add(1);
        self.set(FAILED_ATTEMPTS, attempts.to_string());
        attempts
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (key, value) in iter {
            headers.set(key, value);
        }
        headers
    }
}
