//! In-memory fakes for the capability traits
//!
//! The relay core is tested without the real network, bucket, or database:
//! every collaborator is replaced by a recording fake that can be flipped
//! into a failing mode.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::chat::{Chat, ChatStore};
use crate::error::{RelayError, Result};
use crate::gateway::{DeliveryReceipt, MessagingGateway, OutgoingMedia};
use crate::media::MediaStore;
use crate::repository::ChatPersistence;

/// Recording in-memory persistence backend
#[derive(Default)]
pub struct MemoryPersistence {
    store: Mutex<ChatStore>,
    fail: AtomicBool,
}

impl MemoryPersistence {
    pub fn fail_upserts(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn stored(&self) -> ChatStore {
        self.store.lock().await.clone()
    }
}

#[async_trait]
impl ChatPersistence for MemoryPersistence {
    async fn load_all(&self) -> Result<ChatStore> {
        Ok(self.store.lock().await.clone())
    }

    async fn upsert(&self, chat: &Chat) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RelayError::Persistence("backend down".to_string()));
        }
        self.store
            .lock()
            .await
            .insert(chat.phone_number.clone(), chat.clone());
        Ok(())
    }
}

/// One recorded upload
#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub path: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Recording in-memory object store
#[derive(Default)]
pub struct MemoryMediaStore {
    uploads: Mutex<Vec<UploadRecord>>,
    fail: AtomicBool,
}

impl MemoryMediaStore {
    pub fn fail_uploads(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn uploads(&self) -> Vec<UploadRecord> {
        self.uploads.lock().await.clone()
    }
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RelayError::Storage("bucket unreachable".to_string()));
        }
        self.uploads.lock().await.push(UploadRecord {
            path: path.to_string(),
            bytes,
            content_type: content_type.to_string(),
        });
        Ok(format!("https://storage.test/public/{}", path))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let uploads = self.uploads.lock().await;
        uploads
            .iter()
            .find(|u| url.ends_with(&u.path))
            .map(|u| u.bytes.clone())
            .ok_or_else(|| RelayError::Storage(format!("object not found: {}", url)))
    }
}

/// One recorded gateway send
#[derive(Debug, Clone)]
pub struct SentRecord {
    pub address: String,
    pub body: String,
    pub media: Option<OutgoingMedia>,
}

/// Recording fake of the messaging network session
#[derive(Default)]
pub struct FakeGateway {
    sent: Mutex<Vec<SentRecord>>,
    fail: AtomicBool,
    counter: AtomicU64,
}

impl FakeGateway {
    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<SentRecord> {
        self.sent.lock().await.clone()
    }

    async fn record(&self, record: SentRecord) -> Result<DeliveryReceipt> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RelayError::Gateway("session dropped".to_string()));
        }
        self.sent.lock().await.push(record);
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(DeliveryReceipt {
            message_id: format!("net-{}", n),
            from: Some("me@c.us".to_string()),
        })
    }
}

#[async_trait]
impl MessagingGateway for FakeGateway {
    async fn send_text(&self, address: &str, body: &str) -> Result<DeliveryReceipt> {
        self.record(SentRecord {
            address: address.to_string(),
            body: body.to_string(),
            media: None,
        })
        .await
    }

    async fn send_media(
        &self,
        address: &str,
        media: OutgoingMedia,
        caption: &str,
    ) -> Result<DeliveryReceipt> {
        self.record(SentRecord {
            address: address.to_string(),
            body: caption.to_string(),
            media: Some(media),
        })
        .await
    }
}

/// Repository wired to fresh fakes, for pipeline tests
pub async fn test_repository() -> (
    Arc<crate::repository::ChatRepository>,
    Arc<MemoryPersistence>,
) {
    let persistence = Arc::new(MemoryPersistence::default());
    let repo = Arc::new(crate::repository::ChatRepository::load(persistence.clone()).await);
    (repo, persistence)
}
