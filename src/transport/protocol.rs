//! JSON control messages exchanged with the voice agent
//!
//! Audio travels as binary frames and never goes through these types.

use crate::{Result, VoxError};
use serde::{Deserialize, Serialize};

/// Control message received from the agent
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The agent accepted the session
    SessionReady {
        voice: String,
        #[serde(default)]
        session_token: Option<String>,
    },

    /// The user's utterance as recognized remotely
    Transcript { text: String },

    /// Reply text, followed by zero or more binary audio frames
    ReplyText { text: String },

    /// Non-fatal problem, e.g. nothing was recognized
    Error { message: String },

    /// Any type this client does not know yet
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Parse one text frame
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| VoxError::ProtocolError(format!("Malformed control message: {}", e)))
    }
}

/// Control message sent to the agent
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    EndSession,
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| VoxError::ProtocolError(format!("Failed to encode message: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_ready() {
        let msg = ServerMessage::parse(
            r#"{"type":"session_ready","voice":"Amy","session_token":"abc123"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ServerMessage::SessionReady {
                voice: "Amy".into(),
                session_token: Some("abc123".into()),
            }
        );

        let msg = ServerMessage::parse(r#"{"type":"session_ready","voice":"Amy"}"#).unwrap();
        assert!(matches!(msg, ServerMessage::SessionReady { session_token: None, .. }));
    }

    #[test]
    fn test_parse_conversation_messages() {
        assert_eq!(
            ServerMessage::parse(r#"{"type":"transcript","text":"hi there"}"#).unwrap(),
            ServerMessage::Transcript { text: "hi there".into() }
        );
        assert_eq!(
            ServerMessage::parse(r#"{"type":"reply_text","text":"Hello!"}"#).unwrap(),
            ServerMessage::ReplyText { text: "Hello!".into() }
        );
        assert_eq!(
            ServerMessage::parse(r#"{"type":"error","message":"No speech detected"}"#).unwrap(),
            ServerMessage::Error { message: "No speech detected".into() }
        );
    }

    #[test]
    fn test_unknown_type_is_tolerated() {
        let msg = ServerMessage::parse(r#"{"type":"typing_indicator","on":true}"#).unwrap();
        assert_eq!(msg, ServerMessage::Unknown);
    }

    #[test]
    fn test_malformed_is_protocol_error() {
        for text in ["not json", r#"{"text":"no type"}"#, r#"{"type":"transcript"}"#] {
            let err = ServerMessage::parse(text).unwrap_err();
            assert!(matches!(err, VoxError::ProtocolError(_)), "{}", text);
            assert!(err.is_recoverable());
        }
    }

    #[test]
    fn test_end_session_wire_form() {
        assert_eq!(
            ClientMessage::EndSession.to_json().unwrap(),
            r#"{"type":"end_session"}"#
        );
    }
}
