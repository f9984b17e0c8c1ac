//! Conversation record
//!
//! One `Chat` per counterparty address. The message sequence is append-only;
//! `last_message` and `timestamp` are denormalized from the tail on every
//! append so list views never have to walk the sequence.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::message::ChatMessage;

/// Full keyed conversation map, as pushed to clients on connect
pub type ChatStore = HashMap<String, Chat>;

/// A conversation with one counterparty address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    /// Stable record id
    pub id: String,

    /// Network-qualified counterparty address; unique key, immutable
    pub phone_number: String,

    /// Display name; falls back to the bare number
    pub name: String,

    /// Ordered message sequence, insertion order = arrival order
    #[serde(default)]
    pub messages: Vec<ChatMessage>,

    /// Most recent entry; absent iff `messages` is empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<ChatMessage>,

    /// Inbound messages not yet seen by the operator
    #[serde(default)]
    pub unread_count: u32,

    /// Last-activity timestamp
    pub timestamp: String,
}

impl Chat {
    /// Create an empty conversation for an address
    pub fn new(address: &str) -> Self {
        Self {
            id: format!("chat_{}", Utc::now().timestamp_millis()),
            phone_number: address.to_string(),
            name: display_name(address),
            messages: Vec::new(),
            last_message: None,
            unread_count: 0,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Append a message, keeping the denormalized fields consistent
    ///
    /// Returns `false` without mutating anything when the message is a
    /// duplicate of an already recorded entry.
    pub fn push(&mut self, message: ChatMessage) -> bool {
        if self.messages.iter().any(|m| message.is_duplicate_of(m)) {
            return false;
        }

        self.timestamp = message.timestamp.clone();
        if !message.from_me {
            self.unread_count += 1;
        }
        self.last_message = Some(message.clone());
        self.messages.push(message);
        true
    }
}

/// Fallback display name for an unknown counterparty
///
/// Strips the network domain suffix, leaving the bare number.
pub fn display_name(address: &str) -> String {
    match address.split_once('@') {
        Some((number, _)) => number.to_string(),
        None => address.to_string(),
    }
}
