//! Messaging network capability
//!
//! The relay never speaks the messaging network's wire protocol itself.
//! The authenticated session lives in an external gateway collaborator that
//! exposes exactly two surfaces: an event stream in (pairing codes,
//! connectivity transitions, received messages) and send operations out.
//! Both are modeled here so the pipelines can run against in-memory fakes.

use async_trait::async_trait;

use crate::error::Result;

/// Network domain suffix for direct conversations
pub const ADDRESS_SUFFIX: &str = "@c.us";

/// An event emitted by the gateway session
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// One-time pairing code to relay verbatim to operators
    PairingCode(String),

    /// Session authenticated and ready to send
    Ready,

    /// Session lost; the reason is free text from the network
    Disconnected(String),

    /// Authentication rejected; re-pairing required
    AuthFailure(String),

    /// A message arrived (or was echoed from another linked device)
    Message(InboundMessage),
}

/// A raw received message before normalization
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Network-issued id, when the network supplied one
    pub id: Option<String>,

    pub from: String,
    pub to: String,

    /// Self-authored (echoed from another device of the same account)
    pub from_me: bool,

    pub body: String,

    /// Receipt timestamp, RFC 3339; absent means "now"
    pub timestamp: Option<String>,

    /// Inline binary payload, when the message carries media
    pub media: Option<InboundMedia>,

    /// Push-to-talk voice capture flag
    pub is_voice: bool,

    pub is_group: bool,

    /// Sender display name inside a group
    pub sender: Option<String>,
}

/// Inline media payload of a received message
#[derive(Debug, Clone)]
pub struct InboundMedia {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: Option<String>,
}

/// Attachment handed to the gateway for sending
#[derive(Debug, Clone)]
pub struct OutgoingMedia {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: Option<String>,

    /// Deliver as a voice note rather than an audio file
    pub as_voice: bool,
}

/// Receipt returned by the network for a successful send
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    /// Network-issued id of the delivered message
    pub message_id: String,

    /// Our own address as seen by the network
    pub from: Option<String>,
}

/// Send operations of the messaging network
///
/// The single session behind this trait serializes sends itself; concurrent
/// callers share it without extra locking here.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    async fn send_text(&self, address: &str, body: &str) -> Result<DeliveryReceipt>;

    /// Send media with an optional caption
    async fn send_media(
        &self,
        address: &str,
        media: OutgoingMedia,
        caption: &str,
    ) -> Result<DeliveryReceipt>;
}

/// Normalize an operator-entered destination into the network address form
///
/// Strips everything but digits and appends the network domain suffix.
/// Already qualified addresses pass through unchanged.
pub fn normalize_address(raw: &str) -> String {
    if raw.contains(ADDRESS_SUFFIX) {
        return raw.to_string();
    }
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("{}{}", digits, ADDRESS_SUFFIX)
}
