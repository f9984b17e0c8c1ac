//! Message dispatch pipeline
//!
//! Operator-issued sends: validate, stage the attachment, hand the payload
//! to the messaging gateway, then mirror the sent message into the
//! repository so the operator's own history never waits for a network
//! echo. Ordering is deliberate — upload before send (no partial sends),
//! send before append (an append failure must not trigger a duplicate
//! network delivery).

use std::sync::Arc;

use tracing::{info, warn};

use crate::chat::Chat;
use crate::error::{RelayError, Result};
use crate::events::{RelayEvent, SendMessagePayload};
use crate::gateway::{normalize_address, MessagingGateway, OutgoingMedia};
use crate::hub::EventHub;
use crate::media::{self, MediaKind, MediaStore};
use crate::message::{now_timestamp, ChatMessage};
use crate::repository::ChatRepository;

/// An operator send request
#[derive(Debug, Clone)]
pub struct SendRequest {
    /// Destination in any operator-entered form; normalized before sending
    pub phone_number: String,

    /// Message text; may be empty only with an attachment
    pub message: String,

    pub attachment: Option<Attachment>,
}

/// Attachment of a send request
#[derive(Debug, Clone)]
pub enum Attachment {
    /// Raw bytes, uploaded to the media store before the network send
    Bytes {
        bytes: Vec<u8>,
        mime_type: String,
        file_name: String,
        as_voice: bool,
    },

    /// An object the client already uploaded; fetched back for the send
    Stored {
        url: String,
        mime_type: Option<String>,
        file_name: Option<String>,
        file_size: Option<u64>,
        as_voice: bool,
        duration: u64,
    },
}

impl From<SendMessagePayload> for SendRequest {
    fn from(payload: SendMessagePayload) -> Self {
        let attachment = payload.media_url.map(|url| Attachment::Stored {
            url,
            mime_type: payload.media_type,
            file_name: payload.file_name,
            file_size: payload.file_size,
            as_voice: payload.is_voice_message,
            duration: payload.duration,
        });

        Self {
            phone_number: payload.phone_number,
            message: payload.message,
            attachment,
        }
    }
}

/// Result of a dispatch
#[derive(Debug, Clone)]
pub struct DispatchReceipt {
    /// The mirrored outbound message
    pub message: ChatMessage,

    /// Post-append conversation snapshot
    pub chat: Chat,

    /// Whether the mirror reached the durable store
    pub persisted: bool,
}

/// Dispatch side of the relay
pub struct Dispatcher {
    repo: Arc<ChatRepository>,
    media: Arc<dyn MediaStore>,
    gateway: Arc<dyn MessagingGateway>,
    hub: EventHub,
}

/// Staged attachment, ready for the gateway
struct StagedAttachment {
    bytes: Vec<u8>,
    url: String,
    mime_type: String,
    file_name: String,
    file_size: u64,
    as_voice: bool,
    duration: u64,
}

impl Dispatcher {
    pub fn new(
        repo: Arc<ChatRepository>,
        media: Arc<dyn MediaStore>,
        gateway: Arc<dyn MessagingGateway>,
        hub: EventHub,
    ) -> Self {
        Self {
            repo,
            media,
            gateway,
            hub,
        }
    }

    /// Send a message on behalf of the operator
    ///
    /// Returns an error with no side effects for invalid requests; an
    /// upload error before anything reached the network; a gateway error
    /// after upload (the stored object stays, an acceptable orphan). A
    /// mirror-append persistence failure is reported through `persisted`,
    /// never by failing a dispatch whose network leg succeeded.
    pub async fn send(&self, request: SendRequest) -> Result<DispatchReceipt> {
        self.validate(&request)?;

        let address = normalize_address(&request.phone_number);
        let staged = match request.attachment {
            Some(attachment) => Some(self.stage(attachment).await?),
            None => None,
        };

        let receipt = match &staged {
            Some(staged) => {
                self.gateway
                    .send_media(
                        &address,
                        OutgoingMedia {
                            bytes: staged.bytes.clone(),
                            mime_type: staged.mime_type.clone(),
                            file_name: Some(staged.file_name.clone()),
                            as_voice: staged.as_voice,
                        },
                        &request.message,
                    )
                    .await?
            }
            None => self.gateway.send_text(&address, &request.message).await?,
        };

        info!("Message delivered to {} ({})", address, receipt.message_id);

        let message = ChatMessage {
            id: receipt.message_id,
            body: request.message,
            from: receipt.from,
            to: address.clone(),
            timestamp: now_timestamp(),
            from_me: true,
            has_media: staged.is_some(),
            media_url: staged.as_ref().map(|s| s.url.clone()),
            media_type: staged.as_ref().map(|s| s.mime_type.clone()),
            file_name: staged.as_ref().map(|s| s.file_name.clone()),
            file_size: staged.as_ref().map(|s| s.file_size),
            is_voice_message: staged.as_ref().is_some_and(|s| s.as_voice),
            duration: staged.as_ref().map(|s| s.duration).unwrap_or(0),
            sender: None,
            is_group: false,
        };

        let appended = self.repo.append(&address, message.clone()).await;
        if !appended.persisted {
            warn!(
                "Sent message {} mirrored in memory only; durable write failed",
                message.id
            );
        }

        self.hub.publish(RelayEvent::Message(message.clone()));
        self.hub
            .publish(RelayEvent::ChatUpdated(appended.chat.clone()));

        Ok(DispatchReceipt {
            chat: appended.chat,
            message,
            persisted: appended.persisted,
        })
    }

    fn validate(&self, request: &SendRequest) -> Result<()> {
        let empty_attachment = match &request.attachment {
            None => true,
            Some(Attachment::Bytes { bytes, .. }) => bytes.is_empty(),
            Some(Attachment::Stored { url, .. }) => url.is_empty(),
        };

        if request.message.trim().is_empty() && empty_attachment {
            return Err(RelayError::invalid_request(
                "message text or attachment required",
            ));
        }
        if request.phone_number.trim().is_empty() {
            return Err(RelayError::invalid_request("destination required"));
        }
        Ok(())
    }

    /// Upload raw bytes, or fetch an already stored object back
    async fn stage(&self, attachment: Attachment) -> Result<StagedAttachment> {
        match attachment {
            Attachment::Bytes {
                bytes,
                mime_type,
                file_name,
                as_voice,
            } => {
                let kind = MediaKind::from_mime(&mime_type);
                let duration = if as_voice || kind == MediaKind::Audio {
                    media::probe_audio_duration_secs(&bytes)
                } else {
                    0
                };
                let path = media::object_path(kind, &file_name);
                let url = self
                    .media
                    .upload(&path, bytes.clone(), &mime_type)
                    .await?;
                let file_size = bytes.len() as u64;

                Ok(StagedAttachment {
                    bytes,
                    url,
                    mime_type,
                    file_name,
                    file_size,
                    as_voice,
                    duration,
                })
            }
            Attachment::Stored {
                url,
                mime_type,
                file_name,
                file_size,
                as_voice,
                duration,
            } => {
                let bytes = self.media.download(&url).await?;
                let mime_type =
                    mime_type.unwrap_or_else(|| "application/octet-stream".to_string());
                let file_name = file_name.unwrap_or_else(|| {
                    media::default_file_name(MediaKind::from_mime(&mime_type), &mime_type)
                });
                let file_size = file_size.unwrap_or(bytes.len() as u64);

                Ok(StagedAttachment {
                    bytes,
                    url,
                    mime_type,
                    file_name,
                    file_size,
                    as_voice,
                    duration,
                })
            }
        }
    }
}
