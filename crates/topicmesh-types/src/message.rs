//! The message envelope carried by every frame.

use crate::control::{Control, ControlError, CONTROL_PREFIX};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single published message.
///
/// Application messages and control messages share this shape. Control
/// messages are recognised by their reserved topic and decoded with
/// [`Message::control`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Topic name the message belongs to.
    pub topic: String,
    /// Arbitrary structured payload.
    pub data: serde_json::Value,
    /// Creation time in seconds since the Unix epoch.
    pub timestamp: f64,
    /// Unique per message instance; never derived from content.
    pub message_id: String,
    /// Name of the sending node, if any.
    #[serde(default)]
    pub source_node: Option<String>,
}

impl Message {
    /// Create a message stamped with the current time and a fresh ID.
    pub fn new(topic: impl Into<String>, data: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            topic: topic.into(),
            data,
            timestamp: now.timestamp_micros() as f64 / 1_000_000.0,
            message_id: uuid::Uuid::new_v4().to_string(),
            source_node: None,
        }
    }

    /// Set the sending node.
    pub fn with_source(mut self, source_node: impl Into<String>) -> Self {
        self.source_node = Some(source_node.into());
        self
    }

    /// Whether the topic lives in the reserved control namespace.
    pub fn is_reserved(&self) -> bool {
        is_reserved_topic(&self.topic)
    }

    /// Decode this message as a control message.
    ///
    /// Returns `Ok(None)` for topics that are not one of the known control
    /// topics, and an error when the topic is known but the payload does not
    /// match it.
    pub fn control(&self) -> Result<Option<Control>, ControlError> {
        Control::from_message(self)
    }

    /// The timestamp as a UTC datetime, if it is representable.
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        let micros = (self.timestamp * 1_000_000.0).round() as i64;
        DateTime::from_timestamp_micros(micros)
    }
}

/// Whether a topic name uses the reserved `__` prefix.
pub fn is_reserved_topic(topic: &str) -> bool {
    topic.starts_with(CONTROL_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_assigns_unique_ids() {
        let a = Message::new("temp", json!({"v": 42}));
        let b = Message::new("temp", json!({"v": 42}));
        assert_ne!(a.message_id, b.message_id);
        assert_eq!(a.data, b.data);
        assert!(a.source_node.is_none());
    }

    #[test]
    fn test_with_source() {
        let msg = Message::new("temp", json!(1)).with_source("sensor");
        assert_eq!(msg.source_node.as_deref(), Some("sensor"));
    }

    #[test]
    fn test_reserved_topics() {
        assert!(Message::new("__registration__", json!({})).is_reserved());
        assert!(Message::new("__anything", json!({})).is_reserved());
        assert!(!Message::new("arm_state", json!({})).is_reserved());
        assert!(!is_reserved_topic("_single"));
    }

    #[test]
    fn test_sent_at_tracks_timestamp() {
        let msg = Message::new("t", json!(null));
        let sent = msg.sent_at().unwrap();
        let drift = (Utc::now() - sent).num_seconds().abs();
        assert!(drift < 5);
    }

    #[test]
    fn test_missing_source_node_defaults_to_none() {
        let raw = r#"{"topic":"t","data":[1,2],"timestamp":1.5,"message_id":"m-1"}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.source_node, None);
        assert_eq!(msg.timestamp, 1.5);
    }
}
