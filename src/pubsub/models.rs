//! Message and option types exchanged between the client and its callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Opaque per-delivery token used to acknowledge or extend a delivered message.
///
/// Redelivery of the same underlying message yields a new handle. The content
/// is never inspected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AckHandle(String);

impl AckHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for AckHandle {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for AckHandle {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for AckHandle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A message as delivered by the transport, payload still in wire encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub ack_handle: AckHandle,
    /// Base64 text as sent on the wire.
    pub data: String,
    pub attributes: HashMap<String, String>,
    pub message_id: Option<String>,
    pub publish_time: Option<String>,
}

/// Decoded message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Bytes(Vec<u8>),
    Text(String),
}

impl Payload {
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Bytes(b) => b.is_empty(),
            Payload::Text(t) => t.is_empty(),
        }
    }

    /// Returns the text form, if this payload was decoded as text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(t) => Some(t),
            Payload::Bytes(_) => None,
        }
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_string())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Bytes(value)
    }
}

/// A delivered message with its payload decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub ack_handle: AckHandle,
    pub payload: Payload,
    pub attributes: HashMap<String, String>,
    pub message_id: Option<String>,
    pub publish_time: Option<DateTime<Utc>>,
}

/// A message to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub payload: Payload,
    pub attributes: HashMap<String, String>,
}

impl OutgoingMessage {
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            payload: payload.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// An outgoing message after encoding, as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireMessage {
    pub data: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
}

/// Options for a plain pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullOptions {
    pub return_immediately: bool,
    pub max_messages: u32,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self {
            return_immediately: true,
            max_messages: 1,
        }
    }
}

/// Decoded messages returned by a pull.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullResult {
    pub messages: Vec<Message>,
}

impl PullResult {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn ack_handles(&self) -> Vec<AckHandle> {
        self.messages.iter().map(|m| m.ack_handle.clone()).collect()
    }
}

/// Server-assigned ids, one per published message, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishResult {
    pub message_ids: Vec<String>,
}

/// Renewal settings for a long-running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongRunningJobOptions {
    /// Deadline requested on every extension.
    pub extend_by: Duration,
    /// Interval between extensions.
    pub period: Duration,
}

impl LongRunningJobOptions {
    pub fn from_millis(extend_by_ms: u64, period_ms: u64) -> Self {
        Self {
            extend_by: Duration::from_millis(extend_by_ms),
            period: Duration::from_millis(period_ms),
        }
    }
}

impl Default for LongRunningJobOptions {
    fn default() -> Self {
        Self::from_millis(60_000, 30_000)
    }
}

/// Whole seconds sent as `ackDeadlineSeconds`; sub-second remainders are truncated.
pub fn ack_deadline_seconds(deadline: Duration) -> u64 {
    deadline.as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_handle_is_transparent_in_json() {
        let handle = AckHandle::from("projects/p/subscriptions/s:abc");
        let json = serde_json::to_string(&handle).unwrap();
        assert_eq!(json, "\"projects/p/subscriptions/s:abc\"");
        assert_eq!(handle.to_string(), "projects/p/subscriptions/s:abc");
    }

    #[test]
    fn test_ack_deadline_seconds_truncates() {
        assert_eq!(ack_deadline_seconds(Duration::from_millis(15_000)), 15);
        assert_eq!(ack_deadline_seconds(Duration::from_millis(15_999)), 15);
        assert_eq!(ack_deadline_seconds(Duration::from_millis(999)), 0);
    }

    #[test]
    fn test_wire_message_omits_empty_attributes() {
        let msg = WireMessage {
            data: "aGVsbG8=".to_string(),
            attributes: HashMap::new(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            serde_json::json!({ "data": "aGVsbG8=" })
        );
    }

    #[test]
    fn test_outgoing_message_builder() {
        let msg = OutgoingMessage::new("hi").with_attribute("kind", "greeting");
        assert_eq!(msg.payload, Payload::Text("hi".to_string()));
        assert_eq!(msg.attributes.get("kind").map(String::as_str), Some("greeting"));
    }

    #[test]
    fn test_long_running_job_options_defaults() {
        let opts = LongRunningJobOptions::default();
        assert_eq!(opts.extend_by, Duration::from_secs(60));
        assert_eq!(opts.period, Duration::from_secs(30));
    }
}
