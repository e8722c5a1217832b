//! Outbound message type.

use serde::Serialize;

use super::headers::Headers;

/// A message on its way to a broker endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Target endpoint (topic).
    pub endpoint: String,
    /// Optional partitioning key.
    pub key: Option<String>,
    /// Serialized payload.
    pub body: Vec<u8>,
    pub headers: Headers,
}

impl OutboundMessage {
    pub fn new(endpoint: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            endpoint: endpoint.into(),
            key: None,
            body,
            headers: Headers::new(),
        }
    }

    /// Create a message with a bitcode-serialized payload.
    pub fn encode<T: Serialize>(
        endpoint: impl Into<String>,
        payload: &T,
    ) -> Result<Self, bitcode::Error> {
        let bytes = bitcode::serialize(payload)?;
        Ok(Self::new(endpoint, bytes))
    }

    /// Create a message with a JSON payload.
    pub fn json<T: Serialize>(
        endpoint: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        let bytes = serde_json::to_vec(payload)?;
        Ok(Self::new(endpoint, bytes))
    }

    /// Create a message with a string payload.
    pub fn with_string_body(endpoint: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(endpoint, body.into().into_bytes())
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(key, value);
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}
