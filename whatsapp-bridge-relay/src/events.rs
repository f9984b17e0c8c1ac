//! Channel event vocabulary
//!
//! Everything that crosses the live fan-out channel, in both directions.
//! The envelope is `{ "event": ..., "data": ... }`; event names are part of
//! the compatibility surface and must not change:
//!
//! server → client: `chats`, `qr`, `ready`, `disconnected`, `auth_failure`,
//! `whatsapp-message`, `chat-updated`, `error`
//!
//! client → server: `send_message`, `clear_unread`

use serde::{Deserialize, Serialize};

use crate::chat::{Chat, ChatStore};
use crate::message::ChatMessage;

/// Connectivity of the single messaging-network session
///
/// Exactly one value is current at any time; transitions are one-way
/// announcements with no client acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    AwaitingPairing,
    Ready,
    Disconnected,
    AuthFailed,
}

/// Event broadcast from the relay to connected clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum RelayEvent {
    /// Full conversation map, pushed once per connection on connect
    #[serde(rename = "chats")]
    Snapshot(ChatStore),

    /// Opaque pairing code, relayed verbatim
    #[serde(rename = "qr")]
    PairingCode(String),

    #[serde(rename = "ready")]
    Ready,

    #[serde(rename = "disconnected")]
    Disconnected(String),

    #[serde(rename = "auth_failure")]
    AuthFailure(String),

    /// A message was appended (inbound or mirrored outbound)
    #[serde(rename = "whatsapp-message")]
    Message(ChatMessage),

    /// Post-append conversation snapshot, including unread counters
    #[serde(rename = "chat-updated")]
    ChatUpdated(Chat),

    /// Dispatch failure, delivered to the requesting client only
    #[serde(rename = "error")]
    Error { message: String },
}

/// Command sent by a client over the channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientCommand {
    #[serde(rename = "send_message")]
    SendMessage(SendMessagePayload),

    #[serde(rename = "clear_unread")]
    ClearUnread(ClearUnreadPayload),
}

/// Wire shape of a send request
///
/// An attachment arrives as the URL of an object the client already put in
/// storage through `POST /upload-media`, plus its descriptor fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub phone_number: String,

    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,

    #[serde(default)]
    pub is_voice_message: bool,

    #[serde(default)]
    pub duration: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearUnreadPayload {
    pub phone_number: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let json = serde_json::to_value(&RelayEvent::Ready).unwrap();
        assert_eq!(json["event"], "ready");

        let json = serde_json::to_value(&RelayEvent::PairingCode("code".into())).unwrap();
        assert_eq!(json["event"], "qr");
        assert_eq!(json["data"], "code");

        let json = serde_json::to_value(&RelayEvent::AuthFailure("nope".into())).unwrap();
        assert_eq!(json["event"], "auth_failure");

        let json = serde_json::to_value(&RelayEvent::Error {
            message: "boom".into(),
        })
        .unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["data"]["message"], "boom");
    }

    #[test]
    fn test_message_event_name() {
        let msg = ChatMessage {
            id: "m1".into(),
            body: "hi".into(),
            from: Some("77011234567@c.us".into()),
            to: "me@c.us".into(),
            timestamp: "2024-01-01T10:00:00+00:00".into(),
            from_me: false,
            has_media: false,
            media_url: None,
            media_type: None,
            file_name: None,
            file_size: None,
            is_voice_message: false,
            duration: 0,
            sender: None,
            is_group: false,
        };

        let json = serde_json::to_value(&RelayEvent::Message(msg)).unwrap();
        assert_eq!(json["event"], "whatsapp-message");
        assert_eq!(json["data"]["body"], "hi");
    }

    #[test]
    fn test_connection_state_names() {
        assert_eq!(
            serde_json::to_value(ConnectionState::AwaitingPairing).unwrap(),
            "awaiting_pairing"
        );
        assert_eq!(
            serde_json::to_value(ConnectionState::AuthFailed).unwrap(),
            "auth_failed"
        );
    }

    #[test]
    fn test_client_command_roundtrip() {
        let json = r#"{
            "event": "send_message",
            "data": {
                "phoneNumber": "77011234567",
                "message": "hello",
                "mediaUrl": "https://cdn/images/1_a.jpg",
                "mediaType": "image/jpeg"
            }
        }"#;

        let cmd: ClientCommand = serde_json::from_str(json).unwrap();
        match &cmd {
            ClientCommand::SendMessage(payload) => {
                assert_eq!(payload.phone_number, "77011234567");
                assert_eq!(payload.media_type.as_deref(), Some("image/jpeg"));
                assert!(!payload.is_voice_message);
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let back = serde_json::to_string(&cmd).unwrap();
        let reparsed: ClientCommand = serde_json::from_str(&back).unwrap();
        assert_eq!(cmd, reparsed);
    }

    #[test]
    fn test_clear_unread_parse() {
        let json = r#"{"event":"clear_unread","data":{"phoneNumber":"77011234567@c.us"}}"#;
        let cmd: ClientCommand = serde_json::from_str(json).unwrap();
        assert_eq!(
            cmd,
            ClientCommand::ClearUnread(ClearUnreadPayload {
                phone_number: "77011234567@c.us".into()
            })
        );
    }
}
