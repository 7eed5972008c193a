//! Line codec for the wire protocol
//!
//! One JSON object per `\n`-terminated line. Framing itself (splitting on
//! newlines, enforcing [`MAX_LINE_BYTES`] and [`MAX_SERVER_LINE_BYTES`]) is
//! done by `LinesCodec` in the engine and player; this module only turns one
//! line into one message.

use std::io;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::messages::{ClientMessage, ServerMessage};

/// Longest line a client may send, newline excluded
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Longest line the server sends. A full `state` carries the whole session,
/// so it gets more room than any single client line.
pub const MAX_SERVER_LINE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    /// Not JSON at all
    #[error("Invalid JSON")]
    Malformed,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// JSON, but not a message we can read
    #[error("Invalid message: {0}")]
    InvalidPayload(String),
}

/// Messages that report unrecognised `type` tags through an `Unknown` arm
trait WireMessage: DeserializeOwned {
    fn is_unknown(&self) -> bool;
}

impl WireMessage for ClientMessage {
    fn is_unknown(&self) -> bool {
        matches!(self, ClientMessage::Unknown)
    }
}

impl WireMessage for ServerMessage {
    fn is_unknown(&self) -> bool {
        matches!(self, ServerMessage::Unknown)
    }
}

/// Serializes `msg` without the trailing newline.
pub fn encode_line<T: Serialize>(msg: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::InvalidPayload(e.to_string()))
}

/// Length of `encode_line(msg)` without building the string.
pub fn encoded_len<T: Serialize>(msg: &T) -> Result<usize, ProtocolError> {
    let mut counter = ByteCounter(0);
    serde_json::to_writer(&mut counter, msg)
        .map_err(|e| ProtocolError::InvalidPayload(e.to_string()))?;
    Ok(counter.0)
}

struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn decode_client_line(line: &str) -> Result<ClientMessage, ProtocolError> {
    decode(line)
}

pub fn decode_server_line(line: &str) -> Result<ServerMessage, ProtocolError> {
    decode(line)
}

/// The `type` tag as it should appear in an error message
fn type_label(value: &Value) -> String {
    match value.get("type") {
        Some(Value::String(name)) => name.clone(),
        Some(other) => other.to_string(),
        None => "null".to_string(),
    }
}

fn decode<T: WireMessage>(line: &str) -> Result<T, ProtocolError> {
    let value: Value = serde_json::from_str(line.trim()).map_err(|_| ProtocolError::Malformed)?;
    if !value.is_object() {
        return Err(ProtocolError::InvalidPayload(
            "message must be a JSON object".to_string(),
        ));
    }

    let label = type_label(&value);
    let tagged = value.get("type").is_some_and(Value::is_string);
    match serde_json::from_value::<T>(value) {
        Ok(msg) if msg.is_unknown() => Err(ProtocolError::UnknownType(label)),
        Ok(msg) => Ok(msg),
        // A missing or non-string tag fails before `Unknown` can catch it
        Err(_) if !tagged => Err(ProtocolError::UnknownType(label)),
        Err(e) => Err(ProtocolError::InvalidPayload(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_encode_has_no_newline() {
        let line = encode_line(&ClientMessage::Ping).expect("encode");
        assert_eq!(line, r#"{"type":"ping"}"#);
    }

    #[test]
    fn test_encoded_len_matches_encoding() {
        let msg = ServerMessage::chat("SERVER", "Ann joined. \u{e9}");
        let line = encode_line(&msg).expect("encode");
        assert_eq!(encoded_len(&msg), Ok(line.len()));
    }

    #[test]
    fn test_decode_client_messages() {
        assert_eq!(decode_client_line(r#"{"type":"ping"}"#), Ok(ClientMessage::Ping));
        assert_eq!(
            decode_client_line("  {\"type\":\"chat\",\"message\":\"hi\"}\r\n"),
            Ok(ClientMessage::Chat {
                from: None,
                message: Some("hi".to_string())
            })
        );
    }

    #[test]
    fn test_malformed_json() {
        assert_eq!(decode_client_line("{not json"), Err(ProtocolError::Malformed));
        assert_eq!(ProtocolError::Malformed.to_string(), "Invalid JSON");
    }

    #[test]
    fn test_unknown_type_names_the_type() {
        let err = decode_client_line(r#"{"type":"teleport","x":1}"#).expect_err("unknown");
        assert_eq!(err, ProtocolError::UnknownType("teleport".to_string()));
        assert_eq!(err.to_string(), "Unknown message type: teleport");
    }

    #[test]
    fn test_missing_or_odd_type_tag() {
        assert_eq!(
            decode_client_line(r#"{"message":"hi"}"#),
            Err(ProtocolError::UnknownType("null".to_string()))
        );
        assert_eq!(
            decode_client_line(r#"{"type":7}"#),
            Err(ProtocolError::UnknownType("7".to_string()))
        );
    }

    #[test]
    fn test_non_object_is_invalid_payload() {
        assert!(matches!(
            decode_client_line("[1, 2]"),
            Err(ProtocolError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_bad_payload_for_known_type() {
        assert!(matches!(
            decode_server_line(r#"{"type":"pong","time":"noon"}"#),
            Err(ProtocolError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_server_line_round_trip() {
        let msg = ServerMessage::TokenUpdate {
            token: json!({"id": "abc123", "x": 100, "y": 200}),
        };
        let line = encode_line(&msg).expect("encode");
        assert_eq!(decode_server_line(&line), Ok(msg));
    }
}
