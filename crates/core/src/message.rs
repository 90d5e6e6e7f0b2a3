use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single unit of traffic on the message bus.
///
/// `data` carries the payload, `context` carries routing metadata such as
/// the correlation id linking a request to its downstream handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub context: Value,
}

impl Message {
    pub fn new(msg_type: &str, data: Value) -> Self {
        Self {
            msg_type: msg_type.to_string(),
            data,
            context: Value::Null,
        }
    }

    pub fn with_context(msg_type: &str, data: Value, context: Value) -> Self {
        Self {
            msg_type: msg_type.to_string(),
            data,
            context,
        }
    }

    /// Construct a response to this message, carrying the context forward
    /// so correlation ids survive the round trip.
    pub fn reply(&self, msg_type: &str, data: Value) -> Self {
        Self {
            msg_type: msg_type.to_string(),
            data,
            context: self.context.clone(),
        }
    }

    /// Correlation id from the message context, if any.
    pub fn ident(&self) -> Option<&str> {
        self.context.get("ident").and_then(Value::as_str)
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}
