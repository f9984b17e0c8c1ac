//! HTTP and WebSocket surface
//!
//! The compatibility surface the browser clients already speak:
//!
//! - `GET /chats` — full conversation map
//! - `POST /chats/:phone_number/clear-unread`
//! - `POST /chat` — explicit "start new chat"
//! - `POST /upload-media` — multipart staging of an attachment
//! - `GET /ws` — the live fan-out channel
//!
//! Every WebSocket connection gets the full snapshot first, then the
//! session status, then every broadcast. Dispatch failures go back to the
//! requesting socket only, as an `error` event.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use whatsapp_bridge_relay::{
    media, normalize_address, ChatRepository, ClientCommand, ConnectionState, Dispatcher, EventHub,
    MediaKind, MediaStore, RelayError, RelayEvent,
};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<ChatRepository>,
    pub dispatcher: Arc<Dispatcher>,
    pub hub: EventHub,
    pub media: Arc<dyn MediaStore>,
}

/// Request-level error with the original error JSON shape
struct ApiError(RelayError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RelayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::SessionNotReady => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.0.user_message(),
            "details": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        Self(e)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chats", get(get_chats))
        .route("/chats/:phone_number/clear-unread", post(clear_unread))
        .route("/chat", post(create_chat))
        .route("/upload-media", post(upload_media))
        .route("/ws", get(ws_upgrade))
        // Attachments up to the bucket object limit
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024))
        .with_state(state)
}

async fn get_chats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.repo.list_all().await)
}

async fn clear_unread(
    State(state): State<AppState>,
    Path(phone_number): Path<String>,
) -> impl IntoResponse {
    if let Some(chat) = state.repo.clear_unread(&phone_number).await {
        state.hub.publish(RelayEvent::ChatUpdated(chat));
    }
    Json(json!({ "success": true }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateChatRequest {
    phone_number: String,
}

async fn create_chat(
    State(state): State<AppState>,
    Json(request): Json<CreateChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.phone_number.trim().is_empty() {
        return Err(RelayError::invalid_request("phone number required").into());
    }

    let address = normalize_address(&request.phone_number);
    let (chat, created) = state.repo.ensure_chat(&address).await;
    if created {
        info!("Operator started new chat with {}", address);
        state.hub.publish(RelayEvent::ChatUpdated(chat.clone()));
    }
    Ok(Json(chat))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadMediaResponse {
    url: String,
    duration: u64,
    is_voice_message: bool,
}

async fn upload_media(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| RelayError::invalid_request(format!("bad multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or("file").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| RelayError::invalid_request(format!("bad file field: {}", e)))?
            .to_vec();

        if bytes.is_empty() {
            return Err(RelayError::invalid_request("empty file").into());
        }

        let kind = MediaKind::from_mime(&content_type);
        let duration = if kind == MediaKind::Audio {
            media::probe_audio_duration_secs(&bytes)
        } else {
            0
        };
        let is_voice_message = kind == MediaKind::Audio && file_name.contains("voice_message");

        let path = media::object_path(kind, &file_name);
        debug!("Staging upload {} ({} bytes)", path, bytes.len());
        let url = state.media.upload(&path, bytes, &content_type).await?;

        return Ok(Json(UploadMediaResponse {
            url,
            duration,
            is_voice_message,
        }));
    }

    Err(RelayError::invalid_request("no file uploaded").into())
}

async fn ws_upgrade(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, mut socket: WebSocket) {
    info!("Channel client connected");
    let mut events = state.hub.subscribe();

    // Snapshot first, then the current session status, so the client can
    // render without a separate request.
    if send_event(&mut socket, &RelayEvent::Snapshot(state.repo.list_all().await))
        .await
        .is_err()
    {
        return;
    }
    if let Some(event) = status_event(&state.hub) {
        if send_event(&mut socket, &event).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            broadcast = events.recv() => match broadcast {
                Ok(event) => {
                    if send_event(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    // Too slow; resync with a fresh snapshot
                    warn!("Channel client lagged {} events, resyncing", missed);
                    let snapshot = RelayEvent::Snapshot(state.repo.list_all().await);
                    if send_event(&mut socket, &snapshot).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    handle_command(&state, &mut socket, &text).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Channel client read error: {}", e);
                    break;
                }
            },
        }
    }

    info!("Channel client disconnected");
}

/// Event representing the current session status for a fresh connection
fn status_event(hub: &EventHub) -> Option<RelayEvent> {
    match hub.connection_state() {
        ConnectionState::Ready => Some(RelayEvent::Ready),
        ConnectionState::AwaitingPairing => {
            hub.pending_pairing_code().map(RelayEvent::PairingCode)
        }
        ConnectionState::Disconnected => {
            Some(RelayEvent::Disconnected("session offline".to_string()))
        }
        ConnectionState::AuthFailed => {
            Some(RelayEvent::AuthFailure("authentication failed".to_string()))
        }
        ConnectionState::Connecting => None,
    }
}

async fn handle_command(state: &AppState, socket: &mut WebSocket, text: &str) {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            warn!("Ignoring malformed channel command: {}", e);
            let event = RelayEvent::Error {
                message: format!("Malformed command: {}", e),
            };
            let _ = send_event(socket, &event).await;
            return;
        }
    };

    match command {
        ClientCommand::SendMessage(payload) => {
            // Success is announced through the broadcast round-trip; only
            // failures come back on this socket.
            if let Err(e) = state.dispatcher.send(payload.into()).await {
                warn!("Dispatch failed: {}", e);
                let event = RelayEvent::Error {
                    message: e.user_message(),
                };
                let _ = send_event(socket, &event).await;
            }
        }
        ClientCommand::ClearUnread(payload) => {
            if let Some(chat) = state.repo.clear_unread(&payload.phone_number).await {
                state.hub.publish(RelayEvent::ChatUpdated(chat));
            }
        }
    }
}

async fn send_event(socket: &mut WebSocket, event: &RelayEvent) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).expect("relay events always serialize");
    socket.send(WsMessage::Text(text)).await
}
