//! Wire message types for engine-player communication
//!
//! Every message is one JSON object per line with a `type` tag. The server
//! sends `ServerMessage`, receives `ClientMessage`; the player the reverse.
//!
//! ## Versioning Policy
//!
//! - New variants can be added at the end (forward compatible)
//! - Renaming variants is a breaking change and needs a protocol version bump
//! - Unknown `type` tags deserialize to `Unknown` so decoding can report them

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tabletop_domain::common::lenient;
use tabletop_domain::{SessionSnapshot, TokenRecord};

/// Sender name the server uses for its own notices
pub const SERVER_SENDER: &str = "SERVER";

// =============================================================================
// Client Messages (Player → Engine)
// =============================================================================

/// Messages from client (Player) to server (Engine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Bind an identity to the connection
    Join {
        /// Missing or empty means "use the connection id"
        #[serde(default, deserialize_with = "lenient::optional")]
        client_id: Option<String>,
        #[serde(default, deserialize_with = "lenient::optional")]
        name: Option<String>,
        /// Missing counts as version 0
        #[serde(default, deserialize_with = "lenient::optional_int")]
        protocol_version: Option<i64>,
    },
    /// Full or partial token record; kept raw so it can be relayed untouched
    TokenUpdate {
        #[serde(default)]
        token: Value,
    },
    Chat {
        #[serde(default, deserialize_with = "lenient::optional")]
        from: Option<String>,
        /// Non-string messages are dropped by the server
        #[serde(default, deserialize_with = "lenient::optional")]
        message: Option<String>,
    },
    Ping,
    /// Replace the whole session
    StateUpdate {
        #[serde(default)]
        state: Value,
    },
    /// Unknown message type
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    pub fn join(client_id: impl Into<String>, name: impl Into<String>, protocol_version: u32) -> Self {
        Self::Join {
            client_id: Some(client_id.into()),
            name: Some(name.into()),
            protocol_version: Some(i64::from(protocol_version)),
        }
    }

    pub fn token_update(record: &TokenRecord) -> Self {
        Self::TokenUpdate {
            token: serde_json::to_value(record).unwrap_or_default(),
        }
    }

    pub fn chat(message: impl Into<String>) -> Self {
        Self::Chat {
            from: None,
            message: Some(message.into()),
        }
    }

    pub fn state_update(snapshot: &SessionSnapshot) -> Self {
        Self::StateUpdate {
            state: serde_json::to_value(snapshot).unwrap_or_default(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::TokenUpdate { .. } => "token_update",
            Self::Chat { .. } => "chat",
            Self::Ping => "ping",
            Self::StateUpdate { .. } => "state_update",
            Self::Unknown => "unknown",
        }
    }
}

// =============================================================================
// Server Messages (Engine → Player)
// =============================================================================

/// Messages from server (Engine) to client (Player)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full session snapshot
    State {
        #[serde(default)]
        protocol_version: u32,
        #[serde(flatten)]
        snapshot: SessionSnapshot,
    },
    /// A token record exactly as some client sent it
    TokenUpdate {
        #[serde(default)]
        token: Value,
    },
    Chat {
        #[serde(default)]
        from: String,
        #[serde(default)]
        message: String,
    },
    Pong {
        /// Seconds since the Unix epoch
        #[serde(default)]
        time: f64,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    /// Unknown message type
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    pub fn state(protocol_version: u32, snapshot: SessionSnapshot) -> Self {
        Self::State {
            protocol_version,
            snapshot,
        }
    }

    pub fn chat(from: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Chat {
            from: from.into(),
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::State { .. } => "state",
            Self::TokenUpdate { .. } => "token_update",
            Self::Chat { .. } => "chat",
            Self::Pong { .. } => "pong",
            Self::Error { .. } => "error",
            Self::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod serde_tests {
    use serde_json::json;

    use super::{ClientMessage, ServerMessage};
    use tabletop_domain::{SessionSnapshot, TokenRecord};

    #[test]
    fn join_uses_snake_case_tag() {
        let msg = ClientMessage::join("abcd1234", "Alice", 1);
        assert_eq!(
            serde_json::to_value(&msg).expect("serialize"),
            json!({"type": "join", "client_id": "abcd1234", "name": "Alice", "protocol_version": 1})
        );
    }

    #[test]
    fn join_tolerates_missing_and_mistyped_fields() {
        let decoded: ClientMessage =
            serde_json::from_str(r#"{"type":"join","name":5}"#).expect("deserialize");
        assert_eq!(
            decoded,
            ClientMessage::Join {
                client_id: None,
                name: None,
                protocol_version: None
            }
        );
    }

    #[test]
    fn token_update_keeps_unknown_fields() {
        let raw = json!({"type": "token_update", "token": {"id": "abc123", "x": 100, "glow": true}});
        let decoded: ClientMessage = serde_json::from_value(raw.clone()).expect("deserialize");
        assert_eq!(serde_json::to_value(&decoded).expect("serialize"), raw);
    }

    #[test]
    fn token_update_from_record() {
        let mut record = TokenRecord::default();
        record.id = Some("abc123".to_string());
        record.x = Some(100.0);
        let ClientMessage::TokenUpdate { token } = ClientMessage::token_update(&record) else {
            panic!("expected token_update");
        };
        assert_eq!(token, json!({"id": "abc123", "x": 100.0}));
    }

    #[test]
    fn state_flattens_snapshot() {
        let msg = ServerMessage::state(1, SessionSnapshot::default());
        assert_eq!(
            serde_json::to_value(&msg).expect("serialize"),
            json!({
                "type": "state",
                "protocol_version": 1,
                "campaign_meta": {},
                "tokens": [],
                "tilemap": null,
                "background": null
            })
        );
    }

    #[test]
    fn state_parses_with_junk_tokens() {
        let decoded: ServerMessage = serde_json::from_value(json!({
            "type": "state",
            "protocol_version": 1,
            "tokens": [{"id": "t1", "x": 3}, 42],
            "tilemap": null
        }))
        .expect("deserialize");
        let ServerMessage::State { snapshot, .. } = decoded else {
            panic!("expected state");
        };
        assert_eq!(snapshot.tokens.len(), 1);
        assert!(snapshot.tilemap.is_none());
    }

    #[test]
    fn unknown_client_message_deserializes_to_unknown() {
        let decoded: ClientMessage =
            serde_json::from_str(r#"{"type":"BrandNewThing","foo":1}"#).expect("deserialize");
        assert!(matches!(decoded, ClientMessage::Unknown));
    }

    #[test]
    fn unknown_server_message_deserializes_to_unknown() {
        let decoded: ServerMessage =
            serde_json::from_str(r#"{"type":"BrandNewThing","foo":1}"#).expect("deserialize");
        assert!(matches!(decoded, ServerMessage::Unknown));
    }
}
