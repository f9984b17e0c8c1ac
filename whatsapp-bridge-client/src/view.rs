//! Conversation view state machine
//!
//! Selection: no conversation selected, or viewing exactly one. Entering a
//! conversation (and receiving a message while viewing it) issues a
//! `clear_unread` command back over the channel — the server owns the
//! counters, the view only mirrors them. The search filter narrows the
//! visible list without touching the underlying replica, and each full
//! snapshot from the server replaces the replica wholesale.

use tracing::debug;

use whatsapp_bridge_relay::{
    Chat, ChatStore, ClearUnreadPayload, ClientCommand, ConnectionState, RelayEvent,
    SendMessagePayload,
};

/// Derived UI state for one operator client
pub struct ConversationView {
    chats: ChatStore,
    active_chat: Option<String>,
    search_query: String,
    draft: String,
    recording_voice_note: bool,
    connection: ConnectionState,
    pairing_code: Option<String>,
    last_error: Option<String>,
}

impl ConversationView {
    pub fn new() -> Self {
        Self {
            chats: ChatStore::new(),
            active_chat: None,
            search_query: String::new(),
            draft: String::new(),
            recording_voice_note: false,
            connection: ConnectionState::Connecting,
            pairing_code: None,
            last_error: None,
        }
    }

    /// Apply a channel event to the replica
    ///
    /// Returns the commands the client must send back (at most a
    /// `clear_unread` for the active conversation).
    pub fn apply(&mut self, event: RelayEvent) -> Vec<ClientCommand> {
        match event {
            RelayEvent::Snapshot(store) => {
                debug!("Applying snapshot of {} conversations", store.len());
                self.chats = store;
                // A selection that vanished from the snapshot is dropped
                if let Some(active) = &self.active_chat {
                    if !self.chats.contains_key(active) {
                        self.active_chat = None;
                    }
                }
                self.mark_active_read()
            }
            RelayEvent::Message(message) => {
                let address = message.chat_address().to_string();
                let chat = self
                    .chats
                    .entry(address.clone())
                    .or_insert_with(|| Chat::new(&address));
                chat.push(message);
                self.mark_active_read()
            }
            RelayEvent::ChatUpdated(chat) => {
                self.chats.insert(chat.phone_number.clone(), chat);
                self.mark_active_read()
            }
            RelayEvent::PairingCode(code) => {
                self.connection = ConnectionState::AwaitingPairing;
                self.pairing_code = Some(code);
                Vec::new()
            }
            RelayEvent::Ready => {
                self.connection = ConnectionState::Ready;
                self.pairing_code = None;
                Vec::new()
            }
            RelayEvent::Disconnected(_) => {
                self.connection = ConnectionState::Disconnected;
                self.pairing_code = None;
                Vec::new()
            }
            RelayEvent::AuthFailure(_) => {
                self.connection = ConnectionState::AuthFailed;
                self.pairing_code = None;
                Vec::new()
            }
            RelayEvent::Error { message } => {
                self.last_error = Some(message);
                Vec::new()
            }
        }
    }

    /// Select a conversation (or deselect with `None`)
    ///
    /// Entering a conversation clears its unread counter, locally and on
    /// the server.
    pub fn select_chat(&mut self, address: Option<String>) -> Vec<ClientCommand> {
        self.active_chat = address;
        self.mark_active_read()
    }

    /// Build a send command from the current draft and an optional staged
    /// attachment
    ///
    /// Returns `None` for an empty draft with no attachment. The draft is
    /// cleared, but no message is inserted locally — the view waits for
    /// the broadcast round-trip.
    pub fn compose_send(&mut self, attachment: Option<SendMessagePayload>) -> Option<ClientCommand> {
        let address = self.active_chat.clone()?;
        let text = self.draft.trim().to_string();

        let mut payload = attachment.unwrap_or(SendMessagePayload {
            phone_number: String::new(),
            message: String::new(),
            media_url: None,
            media_type: None,
            file_name: None,
            file_size: None,
            is_voice_message: false,
            duration: 0,
        });

        if text.is_empty() && payload.media_url.is_none() {
            return None;
        }

        payload.phone_number = address;
        payload.message = text;
        self.draft.clear();
        self.recording_voice_note = false;

        Some(ClientCommand::SendMessage(payload))
    }

    pub fn set_search(&mut self, query: impl Into<String>) {
        self.search_query = query.into();
    }

    pub fn set_draft(&mut self, draft: impl Into<String>) {
        self.draft = draft.into();
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn start_recording(&mut self) {
        self.recording_voice_note = true;
    }

    pub fn stop_recording(&mut self) {
        self.recording_voice_note = false;
    }

    pub fn is_recording(&self) -> bool {
        self.recording_voice_note
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn pairing_code(&self) -> Option<&str> {
        self.pairing_code.as_deref()
    }

    /// Last dispatch failure reported by the server, cleared on read
    pub fn take_error(&mut self) -> Option<String> {
        self.last_error.take()
    }

    pub fn active_chat(&self) -> Option<&Chat> {
        self.chats.get(self.active_chat.as_deref()?)
    }

    /// Chat list filtered by the search query, most recent activity first
    ///
    /// Case-insensitive substring match on display name or address; never
    /// mutates the replica.
    pub fn visible_chats(&self) -> Vec<&Chat> {
        let query = self.search_query.to_lowercase();
        let mut chats: Vec<&Chat> = self
            .chats
            .values()
            .filter(|chat| {
                query.is_empty()
                    || chat.name.to_lowercase().contains(&query)
                    || chat.phone_number.to_lowercase().contains(&query)
            })
            .collect();
        chats.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        chats
    }

    /// Total unread across all conversations, for the badge
    pub fn unread_total(&self) -> u32 {
        self.chats.values().map(|c| c.unread_count).sum()
    }

    /// Zero the active conversation's counter, emitting the server command
    /// when it was non-zero
    fn mark_active_read(&mut self) -> Vec<ClientCommand> {
        let Some(address) = self.active_chat.clone() else {
            return Vec::new();
        };
        let Some(chat) = self.chats.get_mut(&address) else {
            return Vec::new();
        };
        if chat.unread_count == 0 {
            return Vec::new();
        }

        chat.unread_count = 0;
        vec![ClientCommand::ClearUnread(ClearUnreadPayload {
            phone_number: address,
        })]
    }
}

impl Default for ConversationView {
    fn default() -> Self {
        Self::new()
    }
}
