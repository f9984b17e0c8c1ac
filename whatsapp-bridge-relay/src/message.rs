//! Canonical message record
//!
//! One immutable text/media event within a conversation. The wire shape
//! (camelCase field names, RFC 3339 timestamps) matches what the browser
//! clients and the gateway already speak, so the same struct crosses the
//! WebSocket channel, the HTTP API, and the durable store unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tolerance window for the fallback de-duplication key, in seconds.
///
/// The network delivers at-least-once; two copies of the same message can
/// arrive with slightly different receipt timestamps.
pub const DEDUP_TOLERANCE_SECS: i64 = 2;

/// A single message within a conversation
///
/// Immutable after creation. Direction is carried by `from_me`:
/// `true` for operator-authored (outbound) messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Network-issued or locally generated unique id
    pub id: String,

    /// Plain text body; may be empty only when media is attached
    pub body: String,

    /// Origin address (absent on some outbound receipts)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    /// Destination address
    pub to: String,

    /// RFC 3339 timestamp of send/receipt
    pub timestamp: String,

    /// Outbound (operator-authored) vs inbound
    pub from_me: bool,

    /// Whether an attachment descriptor is present
    #[serde(default)]
    pub has_media: bool,

    /// Public URL of the stored attachment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,

    /// Attachment MIME type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    /// Original attachment filename
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    /// Attachment size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,

    /// Voice note (push-to-talk capture) flag
    #[serde(default)]
    pub is_voice_message: bool,

    /// Audio duration in whole seconds (0 when unknown)
    #[serde(default)]
    pub duration: u64,

    /// Sender display name inside a group conversation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,

    /// Whether the owning conversation is a group
    #[serde(default)]
    pub is_group: bool,
}

impl ChatMessage {
    /// Address of the conversation this message belongs to
    ///
    /// Self-authored messages (including ones echoed from another linked
    /// device) live under the destination; everything else under the origin.
    pub fn chat_address(&self) -> &str {
        if self.from_me {
            &self.to
        } else {
            self.from.as_deref().unwrap_or(&self.to)
        }
    }

    /// De-duplication check against an already recorded message
    ///
    /// Primary key is the message id. When either side lacks one, fall back
    /// to the (body, direction, timestamp) triple with a small tolerance
    /// window to absorb at-least-once delivery.
    pub fn is_duplicate_of(&self, other: &ChatMessage) -> bool {
        if !self.id.is_empty() && !other.id.is_empty() {
            return self.id == other.id;
        }

        self.body == other.body
            && self.from_me == other.from_me
            && timestamps_close(&self.timestamp, &other.timestamp)
    }
}

fn timestamps_close(a: &str, b: &str) -> bool {
    match (
        DateTime::parse_from_rfc3339(a),
        DateTime::parse_from_rfc3339(b),
    ) {
        (Ok(a), Ok(b)) => (a - b).num_seconds().abs() <= DEDUP_TOLERANCE_SECS,
        // Unparseable timestamps only match exactly
        _ => a == b,
    }
}

/// Current time as the wire timestamp format
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339()
}
