//! WebSocket Protocol Types
//!
//! Message types for client-server communication over the chat
//! WebSocket. Clients reconstruct a response by concatenating
//! `Chunk` texts in arrival order; every generation ends with exactly
//! one of `Complete`, `Stopped`, or `Error`.

use serde::{Deserialize, Serialize};

/// Messages sent FROM the client TO the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Start a generation for the given prompt
    Chat { prompt: String },
    /// Stop the in-flight generation; a no-op when none is active
    Stop,
}

/// Messages sent FROM the server TO the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// One increment of generated text
    Chunk { text: String },
    /// Generation reached natural end-of-stream; no further chunks
    Complete,
    /// Generation was stopped at the client's request
    Stopped,
    /// Generation failed; the session is idle again and may be retried
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_wire_format() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"Chat","prompt":"hi"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Chat { prompt } if prompt == "hi"));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"Stop"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Stop));
    }

    #[test]
    fn server_message_wire_format() {
        let json = serde_json::to_string(&ServerMessage::Chunk {
            text: "Hel".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"Chunk","text":"Hel"}"#);

        let json = serde_json::to_string(&ServerMessage::Complete).unwrap();
        assert_eq!(json, r#"{"type":"Complete"}"#);
    }

    #[test]
    fn unknown_client_message_fails_to_parse() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"Dance"}"#).is_err());
    }
}
