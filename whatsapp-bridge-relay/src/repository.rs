//! Chat repository
//!
//! Single source of truth for conversation state. All mutation funnels
//! through the per-conversation critical section: the outer map lock is
//! held only long enough to resolve (or lazily insert) a conversation
//! entry, and the entry's own mutex serializes read-modify-write against
//! racing inbound and outbound traffic for the same address.
//!
//! Durability is write-through to an injected [`ChatPersistence`] backend.
//! A failed durable write does NOT roll back the in-memory update — the
//! process keeps serving the fresher state and clients reconcile on their
//! next full snapshot. The `persisted` flag on [`Appended`] surfaces the
//! failure to callers that care.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::chat::{Chat, ChatStore};
use crate::error::Result;
use crate::message::ChatMessage;

/// Durable keyed store of conversations
///
/// Keyed upsert/query over whole conversation records; the backend is
/// arbitrary (the daemon ships a PostgREST adapter, tests use a map).
#[async_trait]
pub trait ChatPersistence: Send + Sync {
    async fn load_all(&self) -> Result<ChatStore>;

    async fn upsert(&self, chat: &Chat) -> Result<()>;
}

/// Outcome of an `append`
#[derive(Debug, Clone)]
pub struct Appended {
    /// Post-append conversation snapshot
    pub chat: Chat,

    /// The message was already recorded; nothing changed
    pub deduplicated: bool,

    /// The durable write succeeded (always `true` for deduplicated appends)
    pub persisted: bool,
}

/// Owned, lifecycle-scoped conversation store
pub struct ChatRepository {
    chats: RwLock<HashMap<String, Arc<Mutex<Chat>>>>,
    persistence: Arc<dyn ChatPersistence>,
}

impl ChatRepository {
    /// Initialize from the durable store
    ///
    /// An unreachable backend degrades to an empty cache with a warning;
    /// the relay keeps serving live traffic either way.
    pub async fn load(persistence: Arc<dyn ChatPersistence>) -> Self {
        let initial = match persistence.load_all().await {
            Ok(store) => {
                info!("Loaded {} conversations from persistence", store.len());
                store
            }
            Err(e) => {
                warn!("Failed to load conversations, starting empty: {}", e);
                ChatStore::new()
            }
        };

        let chats = initial
            .into_iter()
            .map(|(address, chat)| (address, Arc::new(Mutex::new(chat))))
            .collect();

        Self {
            chats: RwLock::new(chats),
            persistence,
        }
    }

    /// Snapshot of one conversation
    pub async fn get(&self, address: &str) -> Option<Chat> {
        let entry = self.chats.read().await.get(address).cloned()?;
        let chat = entry.lock().await.clone();
        Some(chat)
    }

    /// Snapshot of the full conversation map, for client sync
    pub async fn list_all(&self) -> ChatStore {
        let entries: Vec<(String, Arc<Mutex<Chat>>)> = self
            .chats
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut store = ChatStore::with_capacity(entries.len());
        for (address, entry) in entries {
            store.insert(address, entry.lock().await.clone());
        }
        store
    }

    /// Append a message, creating the conversation lazily
    ///
    /// Duplicate messages (by de-dup key) leave the conversation untouched
    /// and return the existing snapshot.
    pub async fn append(&self, address: &str, message: ChatMessage) -> Appended {
        let entry = self.entry(address).await;
        let mut chat = entry.lock().await;

        if !chat.push(message) {
            debug!("Duplicate message for {}, skipping", address);
            return Appended {
                chat: chat.clone(),
                deduplicated: true,
                persisted: true,
            };
        }

        let persisted = self.persist(&chat).await;
        Appended {
            chat: chat.clone(),
            deduplicated: false,
            persisted,
        }
    }

    /// Create an empty conversation for an address if none exists
    ///
    /// Returns the snapshot and whether a new record was created.
    pub async fn ensure_chat(&self, address: &str) -> (Chat, bool) {
        {
            if let Some(entry) = self.chats.read().await.get(address) {
                return (entry.lock().await.clone(), false);
            }
        }

        let entry = self.entry(address).await;
        let chat = entry.lock().await;
        self.persist(&chat).await;
        (chat.clone(), true)
    }

    /// Reset the unread counter to zero
    pub async fn clear_unread(&self, address: &str) -> Option<Chat> {
        self.update(address, |chat| chat.unread_count = 0).await
    }

    /// Overwrite the unread counter, clamped to the message count
    pub async fn set_unread(&self, address: &str, count: u32) -> Option<Chat> {
        self.update(address, |chat| {
            chat.unread_count = count.min(chat.messages.len() as u32)
        })
        .await
    }

    /// Rename a conversation
    pub async fn set_display_name(&self, address: &str, name: &str) -> Option<Chat> {
        let name = name.to_string();
        self.update(address, move |chat| chat.name = name).await
    }

    /// Resolve the entry for an address, inserting a fresh conversation
    /// under the write lock when absent.
    async fn entry(&self, address: &str) -> Arc<Mutex<Chat>> {
        {
            if let Some(entry) = self.chats.read().await.get(address) {
                return entry.clone();
            }
        }

        let mut chats = self.chats.write().await;
        chats
            .entry(address.to_string())
            .or_insert_with(|| {
                info!("Creating conversation for {}", address);
                Arc::new(Mutex::new(Chat::new(address)))
            })
            .clone()
    }

    async fn update<F>(&self, address: &str, mutate: F) -> Option<Chat>
    where
        F: FnOnce(&mut Chat),
    {
        let entry = self.chats.read().await.get(address).cloned()?;
        let mut chat = entry.lock().await;
        mutate(&mut chat);
        self.persist(&chat).await;
        Some(chat.clone())
    }

    /// Write-through; failure keeps the in-memory state and logs
    async fn persist(&self, chat: &Chat) -> bool {
        match self.persistence.upsert(chat).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Failed to persist conversation {}: {} (in-memory state kept)",
                    chat.phone_number, e
                );
                false
            }
        }
    }
}
