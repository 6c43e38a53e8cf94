//! Codec for encoding and decoding Switchboard envelopes.
//!
//! Envelopes travel as UTF-8 JSON, one envelope per WebSocket message, so
//! there is no length prefix: the transport already delimits frames.

use thiserror::Error;

use crate::envelope::Envelope;

/// Maximum encoded envelope size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// Malformed inbound frame.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Encode an envelope to its JSON text form.
///
/// # Errors
///
/// Returns an error if the envelope is too large or encoding fails.
pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(envelope).map_err(ProtocolError::Encode)?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(text)
}

/// Decode an envelope from raw frame bytes.
///
/// Accepts both text and binary frames as long as they hold JSON.
///
/// # Errors
///
/// Returns an error if the data is too large or is not a valid envelope.
pub fn decode(data: &[u8]) -> Result<Envelope, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    serde_json::from_slice(data).map_err(ProtocolError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_decode_roundtrip() {
        let envelope = Envelope::new("notify", json!({"id": 7, "tags": ["a", "b"]}));
        let encoded = encode(&envelope).unwrap();
        let decoded = decode(encoded.as_bytes()).unwrap();
        assert_eq!(envelope, decoded);
    }

    #[test]
    fn test_decode_malformed() {
        match decode(b"not json") {
            Err(ProtocolError::Decode(_)) => {}
            other => panic!("Expected Decode error, got {:?}", other),
        }

        // Valid JSON but no type field
        assert!(matches!(
            decode(br#"{"data": 1}"#),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn test_frame_too_large() {
        let envelope = Envelope::new("blob", "x".repeat(MAX_FRAME_SIZE));

        match encode(&envelope) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }
}
