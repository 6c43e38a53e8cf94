//! The envelope exchanged with peers and message handlers.
//!
//! The hub only ever looks at `type`; `data` is handed through untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved envelope types.
pub mod kinds {
    /// Liveness check sent by a peer.
    pub const PING: &str = "ping";
    /// Reply to a `ping`, echoing its data.
    pub const PONG: &str = "pong";
    /// Carries a handler failure message as `data`.
    pub const ERROR: &str = "error";
}

/// A typed message unit.
///
/// Serialized as `{"type": <string>, "data": <any JSON>}`. A missing `data`
/// field decodes as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type, selects the meaning of `data`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque payload.
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Create a new envelope.
    #[must_use]
    pub fn new(kind: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            kind: kind.into(),
            data: data.into(),
        }
    }

    /// Create an envelope with a `null` payload.
    #[must_use]
    pub fn empty(kind: impl Into<String>) -> Self {
        Self::new(kind, Value::Null)
    }

    /// Create an error envelope carrying a message string.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(kinds::ERROR, Value::String(message.into()))
    }

    /// Create a pong envelope.
    #[must_use]
    pub fn pong(data: Value) -> Self {
        Self::new(kinds::PONG, data)
    }

    /// Check whether this envelope has the given type.
    #[must_use]
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// Check whether this is an error envelope.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.is(kinds::ERROR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_envelope() {
        let env = Envelope::error("boom");
        assert!(env.is_error());
        assert_eq!(env.data, json!("boom"));
    }

    #[test]
    fn test_missing_data_is_null() {
        let env: Envelope = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(env.is(kinds::PING));
        assert_eq!(env.data, Value::Null);
    }

    #[test]
    fn test_field_names_on_the_wire() {
        let text = serde_json::to_string(&Envelope::empty("pong")).unwrap();
        assert_eq!(text, r#"{"type":"pong","data":null}"#);
    }
}
