//! Error handling for the relay
//!
//! One error enum covers the whole relay surface. Collaborator failures
//! (storage, persistence, the messaging gateway) carry the upstream message
//! as text because the collaborators are reached through capability traits
//! and their concrete error types are not visible here.

use thiserror::Error;

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors that can occur during relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// I/O error (sockets, file system)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Operator request rejected before any side effect
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Object storage upload/download failure
    #[error("Media storage error: {0}")]
    Storage(String),

    /// Durable chat store failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The messaging session is not established yet
    #[error("Messaging session not ready")]
    SessionNotReady,

    /// The messaging network refused or failed a send
    #[error("Gateway send failed: {0}")]
    Gateway(String),

    /// Malformed event or reply from the gateway process
    #[error("Invalid gateway packet: {0}")]
    InvalidPacket(String),
}

impl RelayError {
    /// Create an `InvalidRequest` error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        RelayError::InvalidRequest(msg.into())
    }

    /// Whether the operation might succeed if the operator retries it
    ///
    /// Validation errors are permanent for the same input; collaborator
    /// failures are transient.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            RelayError::InvalidRequest(_) | RelayError::InvalidPacket(_)
        )
    }

    /// Simplified message suitable for the operator-facing error event
    pub fn user_message(&self) -> String {
        match self {
            RelayError::InvalidRequest(msg) => format!("Invalid request: {}", msg),
            RelayError::Storage(_) => "Failed to upload media. Try again.".to_string(),
            RelayError::Persistence(_) => {
                "Message sent but history may lag until the next refresh.".to_string()
            }
            RelayError::SessionNotReady => {
                "WhatsApp session is not connected yet. Scan the pairing code first.".to_string()
            }
            RelayError::Gateway(_) => "Failed to send message. Try again.".to_string(),
            RelayError::InvalidPacket(msg) => format!("Invalid data received: {}", msg),
            RelayError::Io(e) => format!("I/O error: {}", e),
            RelayError::Json(e) => format!("Data format error: {}", e),
        }
    }
}
