//! Message ingestion pipeline
//!
//! Normalizes raw gateway events into canonical records: resolves the
//! owning conversation, stores inline media through the media store,
//! appends through the repository, and fans the result out. One bad event
//! is logged and dropped; the ingestion loop itself never dies.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::events::RelayEvent;
use crate::gateway::{GatewayEvent, InboundMessage};
use crate::hub::EventHub;
use crate::media::{self, MediaKind, MediaStore};
use crate::message::{now_timestamp, ChatMessage};
use crate::repository::ChatRepository;

/// Ingestion side of the relay
pub struct IngestionPipeline {
    repo: Arc<ChatRepository>,
    media: Arc<dyn MediaStore>,
    hub: EventHub,
}

impl IngestionPipeline {
    pub fn new(repo: Arc<ChatRepository>, media: Arc<dyn MediaStore>, hub: EventHub) -> Self {
        Self { repo, media, hub }
    }

    /// Consume the gateway event stream until it closes
    ///
    /// Per-event failures are logged and swallowed so one malformed or
    /// unstorable message cannot stall the ones behind it.
    pub async fn run(self, mut events: mpsc::Receiver<GatewayEvent>) {
        info!("Ingestion pipeline started");
        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle_event(event).await {
                error!("Dropping gateway event: {}", e);
            }
        }
        info!("Gateway event stream closed, ingestion pipeline stopping");
    }

    /// Process a single gateway event
    pub async fn handle_event(&self, event: GatewayEvent) -> Result<()> {
        match event {
            GatewayEvent::PairingCode(code) => {
                info!("Pairing code received, relaying to clients");
                self.hub.publish(RelayEvent::PairingCode(code));
                Ok(())
            }
            GatewayEvent::Ready => {
                info!("Messaging session ready");
                self.hub.publish(RelayEvent::Ready);
                Ok(())
            }
            GatewayEvent::Disconnected(reason) => {
                warn!("Messaging session disconnected: {}", reason);
                self.hub.publish(RelayEvent::Disconnected(reason));
                Ok(())
            }
            GatewayEvent::AuthFailure(reason) => {
                warn!("Messaging session authentication failed: {}", reason);
                self.hub.publish(RelayEvent::AuthFailure(reason));
                Ok(())
            }
            GatewayEvent::Message(raw) => self.ingest_message(raw).await,
        }
    }

    async fn ingest_message(&self, raw: InboundMessage) -> Result<()> {
        // Self-authored traffic (echoed from another linked device) files
        // under the destination; everything else under the origin.
        let address = if raw.from_me {
            raw.to.clone()
        } else {
            raw.from.clone()
        };

        let mut has_media = false;
        let mut media_url = None;
        let mut media_type = None;
        let mut file_name = None;
        let mut file_size = None;
        let mut duration = 0;

        if let Some(payload) = &raw.media {
            let kind = MediaKind::from_mime(&payload.mime_type);
            let name = payload
                .file_name
                .clone()
                .unwrap_or_else(|| media::default_file_name(kind, &payload.mime_type));

            if raw.is_voice {
                duration = media::probe_audio_duration_secs(&payload.bytes);
            }

            let path = media::object_path(kind, &name);
            let url = self
                .media
                .upload(&path, payload.bytes.clone(), &payload.mime_type)
                .await?;

            has_media = true;
            file_size = Some(payload.bytes.len() as u64);
            media_url = Some(url);
            media_type = Some(payload.mime_type.clone());
            file_name = Some(name);
        }

        let message = ChatMessage {
            id: raw
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            body: raw.body,
            from: Some(raw.from),
            to: raw.to,
            timestamp: raw.timestamp.unwrap_or_else(now_timestamp),
            from_me: raw.from_me,
            has_media,
            media_url,
            media_type,
            file_name,
            file_size,
            is_voice_message: raw.is_voice,
            duration,
            sender: raw.sender,
            is_group: raw.is_group,
        };

        let appended = self.repo.append(&address, message.clone()).await;
        if appended.deduplicated {
            // At-least-once delivery from the network; absorbed silently.
            return Ok(());
        }

        self.hub.publish(RelayEvent::Message(message));
        self.hub.publish(RelayEvent::ChatUpdated(appended.chat));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ConnectionState;
    use crate::gateway::InboundMedia;
    use crate::test_utils::{test_repository, MemoryMediaStore};

    fn text_event(id: &str, from: &str, body: &str) -> GatewayEvent {
        GatewayEvent::Message(InboundMessage {
            id: Some(id.to_string()),
            from: from.to_string(),
            to: "me@c.us".to_string(),
            from_me: false,
            body: body.to_string(),
            timestamp: Some("2024-01-01T10:00:00+00:00".to_string()),
            media: None,
            is_voice: false,
            is_group: false,
            sender: None,
        })
    }

    async fn pipeline() -> (IngestionPipeline, Arc<MemoryMediaStore>, EventHub) {
        let (repo, _) = test_repository().await;
        let media = Arc::new(MemoryMediaStore::default());
        let hub = EventHub::default();
        (
            IngestionPipeline::new(repo, media.clone(), hub.clone()),
            media,
            hub,
        )
    }

    #[tokio::test]
    async fn test_inbound_text_creates_chat_and_broadcasts() {
        let (pipeline, _, hub) = pipeline().await;
        let mut rx = hub.subscribe();

        pipeline
            .handle_event(text_event("m1", "77011234567@c.us", "Hi"))
            .await
            .unwrap();

        let chat = pipeline.repo.get("77011234567@c.us").await.unwrap();
        assert_eq!(chat.name, "77011234567");
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.unread_count, 1);

        match rx.recv().await.unwrap() {
            RelayEvent::Message(msg) => assert_eq!(msg.body, "Hi"),
            other => panic!("expected message event, got {:?}", other),
        }
        match rx.recv().await.unwrap() {
            RelayEvent::ChatUpdated(chat) => assert_eq!(chat.unread_count, 1),
            other => panic!("expected chat-updated event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_self_authored_files_under_destination() {
        let (pipeline, _, _) = pipeline().await;

        pipeline
            .handle_event(GatewayEvent::Message(InboundMessage {
                id: Some("m1".to_string()),
                from: "me@c.us".to_string(),
                to: "77011234567@c.us".to_string(),
                from_me: true,
                body: "sent from my phone".to_string(),
                timestamp: None,
                media: None,
                is_voice: false,
                is_group: false,
                sender: None,
            }))
            .await
            .unwrap();

        let chat = pipeline.repo.get("77011234567@c.us").await.unwrap();
        assert_eq!(chat.messages.len(), 1);
        // Mirrored own message must not count as unread
        assert_eq!(chat.unread_count, 0);
    }

    #[tokio::test]
    async fn test_media_message_uploads_and_classifies() {
        let (pipeline, media, _) = pipeline().await;

        pipeline
            .handle_event(GatewayEvent::Message(InboundMessage {
                id: Some("m1".to_string()),
                from: "77011234567@c.us".to_string(),
                to: "me@c.us".to_string(),
                from_me: false,
                body: String::new(),
                timestamp: None,
                media: Some(InboundMedia {
                    bytes: vec![0xFF, 0xD8, 0xFF],
                    mime_type: "image/jpeg".to_string(),
                    file_name: Some("photo.jpg".to_string()),
                }),
                is_voice: false,
                is_group: false,
                sender: None,
            }))
            .await
            .unwrap();

        let uploads = media.uploads().await;
        assert_eq!(uploads.len(), 1);
        assert!(uploads[0].path.starts_with("images/"));
        assert_eq!(uploads[0].content_type, "image/jpeg");

        let msg = &pipeline.repo.get("77011234567@c.us").await.unwrap().messages[0];
        assert!(msg.has_media);
        assert_eq!(msg.media_type.as_deref(), Some("image/jpeg"));
        assert_eq!(msg.file_size, Some(3));
        assert!(msg.media_url.as_deref().unwrap().contains("images/"));
    }

    #[tokio::test]
    async fn test_voice_note_gets_duration_probe() {
        let (pipeline, _, _) = pipeline().await;

        // Unprobeable bytes degrade to duration 0 rather than failing
        pipeline
            .handle_event(GatewayEvent::Message(InboundMessage {
                id: Some("m1".to_string()),
                from: "77011234567@c.us".to_string(),
                to: "me@c.us".to_string(),
                from_me: false,
                body: String::new(),
                timestamp: None,
                media: Some(InboundMedia {
                    bytes: b"opus-ish".to_vec(),
                    mime_type: "audio/ogg".to_string(),
                    file_name: None,
                }),
                is_voice: true,
                is_group: false,
                sender: None,
            }))
            .await
            .unwrap();

        let msg = &pipeline.repo.get("77011234567@c.us").await.unwrap().messages[0];
        assert!(msg.is_voice_message);
        assert_eq!(msg.duration, 0);
        assert!(msg.file_name.as_deref().unwrap().ends_with(".ogg"));
    }

    #[tokio::test]
    async fn test_upload_failure_drops_event_only() {
        let (pipeline, media, _) = pipeline().await;
        media.fail_uploads(true);

        let result = pipeline
            .handle_event(GatewayEvent::Message(InboundMessage {
                id: Some("m1".to_string()),
                from: "77011234567@c.us".to_string(),
                to: "me@c.us".to_string(),
                from_me: false,
                body: String::new(),
                timestamp: None,
                media: Some(InboundMedia {
                    bytes: vec![1, 2, 3],
                    mime_type: "image/png".to_string(),
                    file_name: None,
                }),
                is_voice: false,
                is_group: false,
                sender: None,
            }))
            .await;
        assert!(result.is_err());

        // Subsequent events still process
        media.fail_uploads(false);
        pipeline
            .handle_event(text_event("m2", "77011234567@c.us", "still alive"))
            .await
            .unwrap();
        let chat = pipeline.repo.get("77011234567@c.us").await.unwrap();
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.messages[0].body, "still alive");
    }

    #[tokio::test]
    async fn test_duplicate_delivery_not_rebroadcast() {
        let (pipeline, _, hub) = pipeline().await;

        pipeline
            .handle_event(text_event("m1", "77011234567@c.us", "Hi"))
            .await
            .unwrap();

        let mut rx = hub.subscribe();
        pipeline
            .handle_event(text_event("m1", "77011234567@c.us", "Hi"))
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
        let chat = pipeline.repo.get("77011234567@c.us").await.unwrap();
        assert_eq!(chat.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_id_synthesized() {
        let (pipeline, _, _) = pipeline().await;

        pipeline
            .handle_event(GatewayEvent::Message(InboundMessage {
                id: None,
                from: "77011234567@c.us".to_string(),
                to: "me@c.us".to_string(),
                from_me: false,
                body: "no id".to_string(),
                timestamp: None,
                media: None,
                is_voice: false,
                is_group: false,
                sender: None,
            }))
            .await
            .unwrap();

        let msg = &pipeline.repo.get("77011234567@c.us").await.unwrap().messages[0];
        assert!(!msg.id.is_empty());
    }

    #[tokio::test]
    async fn test_pairing_and_connectivity_events() {
        let (pipeline, _, hub) = pipeline().await;
        let mut rx = hub.subscribe();

        pipeline
            .handle_event(GatewayEvent::PairingCode("qr-blob".to_string()))
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            RelayEvent::PairingCode("qr-blob".to_string())
        );
        assert_eq!(hub.connection_state(), ConnectionState::AwaitingPairing);

        pipeline.handle_event(GatewayEvent::Ready).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), RelayEvent::Ready);
        assert_eq!(hub.connection_state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_run_survives_bad_events() {
        let (pipeline, media, _) = pipeline().await;
        let repo = pipeline.repo.clone();
        media.fail_uploads(true);

        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(pipeline.run(rx));

        // Media upload fails for this one
        tx.send(GatewayEvent::Message(InboundMessage {
            id: Some("bad".to_string()),
            from: "77011234567@c.us".to_string(),
            to: "me@c.us".to_string(),
            from_me: false,
            body: String::new(),
            timestamp: None,
            media: Some(InboundMedia {
                bytes: vec![0],
                mime_type: "image/png".to_string(),
                file_name: None,
            }),
            is_voice: false,
            is_group: false,
            sender: None,
        }))
        .await
        .unwrap();

        tx.send(text_event("good", "77011234567@c.us", "after the storm"))
            .await
            .unwrap();
        drop(tx);
        handle.await.unwrap();

        let chat = repo.get("77011234567@c.us").await.unwrap();
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.messages[0].id, "good");
    }
}
