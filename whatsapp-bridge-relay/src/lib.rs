//! WhatsApp chat relay core
//!
//! Holds the conversation/message model, the chat repository, the
//! ingestion and dispatch pipelines, and the live fan-out hub. The
//! messaging network, the object-storage bucket, and the durable chat
//! store are external collaborators reached only through the capability
//! traits defined here ([`MessagingGateway`], [`MediaStore`],
//! [`ChatPersistence`]), so the whole core runs against in-memory fakes in
//! tests.

pub mod chat;
pub mod dispatch;
pub mod events;
pub mod gateway;
pub mod hub;
pub mod ingest;
pub mod media;
pub mod message;
pub mod repository;

mod error;

pub use chat::{display_name, Chat, ChatStore};
pub use dispatch::{Attachment, DispatchReceipt, Dispatcher, SendRequest};
pub use error::{RelayError, Result};
pub use events::{
    ClearUnreadPayload, ClientCommand, ConnectionState, RelayEvent, SendMessagePayload,
};
pub use gateway::{
    normalize_address, DeliveryReceipt, GatewayEvent, InboundMedia, InboundMessage,
    MessagingGateway, OutgoingMedia, ADDRESS_SUFFIX,
};
pub use hub::EventHub;
pub use ingest::IngestionPipeline;
pub use media::{probe_audio_duration_secs, MediaKind, MediaStore};
pub use message::{now_timestamp, ChatMessage};
pub use repository::{Appended, ChatPersistence, ChatRepository};

#[cfg(test)]
pub mod test_utils;
