//! Envelope - the in-flight wrapper around a consumed record.
//!
//! An envelope carries the raw body, the ordered headers, the endpoint it was
//! read from and its position. Pipeline behaviors may attach a deserialized
//! form of the body. Each envelope is owned by the pipeline invocation
//! processing it.

mod headers;
mod message;
mod position;

use serde::de::DeserializeOwned;

pub use headers::{Headers, FAILED_ATTEMPTS, FAILURE_REASON, MESSAGE_ID, SOURCE_ENDPOINT};
pub use message::OutboundMessage;
pub use position::Position;

#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub body: Vec<u8>,
    pub headers: Headers,
    pub endpoint: String,
    pub position: Position,
    /// Set by a deserializing behavior.
    pub deserialized: Option<serde_json::Value>,
}

impl Envelope {
    pub fn new(
        endpoint: impl Into<String>,
        position: Position,
        body: Vec<u8>,
        headers: Headers,
    ) -> Self {
        Self {
            body,
            headers,
            endpoint: endpoint.into(),
            position,
            deserialized: None,
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        self.headers.message_id()
    }

    pub fn failed_attempts(&self) -> u32 {
        self.headers.failed_attempts()
    }

    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Decode the body from bitcode binary format.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, bitcode::Error> {
        bitcode::deserialize(&self.body)
    }

    /// Decode the deserialized JSON value (or the raw body) into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.deserialized {
            Some(value) => serde_json::from_value(value.clone()),
            None => serde_json::from_slice(&self.body),
        }
    }

    /// Build an outbound copy of this envelope targeting another endpoint.
    ///
    /// Body and headers are carried over unchanged.
    pub fn forward_to(&self, endpoint: impl Into<String>) -> OutboundMessage {
        OutboundMessage::new(endpoint, self.body.clone()).with_headers(self.headers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_keeps_body_and_headers() {
        let envelope = Envelope::new(
            "orders",
            Position::new(0, 7),
            b"payload".to_vec(),
            Headers::new().with(MESSAGE_ID, "m-1"),
        );

        let message = envelope.forward_to("dead-letter");
        assert_eq!(message.endpoint, "dead-letter");
        assert_eq!(message.body, b"payload".to_vec());
        assert_eq!(message.headers.message_id(), Some("m-1"));
    }

    #[test]
    fn json_reads_body_when_not_deserialized() {
        let envelope = Envelope::new(
            "orders",
            Position::new(0, 0),
            br#"{"id":3}"#.to_vec(),
            Headers::new(),
        );
        let value: serde_json::Value = envelope.json().unwrap();
        assert_eq!(value["id"], 3);
    }

    #[test]
    fn binary_payloads_decode_through_the_envelope() {
        let message =
            OutboundMessage::encode("telemetry", &(42u32, "sensor-7".to_string())).unwrap();
        let envelope = Envelope::new("telemetry", Position::new(0, 0), message.body, message.headers);

        let (reading, name): (u32, String) = envelope.decode().unwrap();
        assert_eq!(reading, 42);
        assert_eq!(name, "sensor-7");
    }
}
