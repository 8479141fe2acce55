//! Shared event types for the Feedgate server.
//!
//! Inbound webhook events are kept as opaque JSON. The only field this
//! server interprets is `for_user_id`, which partitions persisted history by
//! the account the event was delivered for.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the field that identifies the account an event belongs to.
pub const FOR_USER_ID_FIELD: &str = "for_user_id";

/// An inbound webhook event.
///
/// Serializes transparently as the original JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventRecord(Value);

impl EventRecord {
    /// Wraps a JSON value as an event.
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Returns the `for_user_id` field as a string.
    ///
    /// Numeric IDs are accepted and rendered in decimal. Missing, null, or
    /// empty values yield `None`.
    pub fn for_user_id(&self) -> Option<String> {
        match self.0.get(FOR_USER_ID_FIELD)? {
            Value::String(id) if !id.is_empty() => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    /// Returns the underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consumes the record, returning the JSON value.
    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for EventRecord {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Control message sent to a live subscriber right after it joins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionAck {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

impl Default for ConnectionAck {
    fn default() -> Self {
        Self {
            kind: "connection_ack".to_string(),
            message: "Connected to live event stream!".to_string(),
        }
    }
}
