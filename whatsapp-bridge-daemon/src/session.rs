//! Gateway session adapter
//!
//! The authenticated WhatsApp session lives in a sidecar process; this
//! adapter is the only place that speaks its wire format. Packets are
//! JSON objects, one per line:
//!
//! ```text
//! {"type":"qr","body":{"code":"..."}}
//! {"type":"message","body":{"id":"...","from":"...","fromMe":false,...}}
//! {"type":"send","body":{"requestId":"...","to":"...","message":"..."}}
//! {"type":"sent","body":{"requestId":"...","id":"...","from":"..."}}
//! ```
//!
//! Inbound packets become [`GatewayEvent`]s on an mpsc stream consumed by
//! the ingestion pipeline. Sends write a `send` packet and wait for the
//! correlated `sent`/`send_error` reply, bounded by the configured
//! timeout. Media bytes cross the socket base64-encoded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use whatsapp_bridge_relay::{
    DeliveryReceipt, GatewayEvent, InboundMedia, InboundMessage, MessagingGateway, OutgoingMedia,
    RelayError, Result,
};

use async_trait::async_trait;

/// One parsed line off the gateway socket
#[derive(Debug, Clone, Deserialize)]
struct GatewayPacket {
    #[serde(rename = "type")]
    kind: String,

    #[serde(default)]
    body: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageBody {
    id: Option<String>,
    from: String,
    to: String,
    #[serde(default)]
    from_me: bool,
    #[serde(default)]
    body: String,
    timestamp: Option<String>,
    #[serde(default)]
    is_voice: bool,
    #[serde(default)]
    is_group: bool,
    sender: Option<String>,
    media: Option<MediaBody>,
}

#[derive(Debug, Deserialize)]
struct MediaBody {
    data: String,
    mimetype: String,
    filename: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplyBody {
    request_id: String,
    id: Option<String>,
    from: Option<String>,
    error: Option<String>,
}

type PendingSends = Mutex<HashMap<String, oneshot::Sender<Result<DeliveryReceipt>>>>;

/// Live connection to the gateway sidecar
pub struct GatewaySession {
    writer: Mutex<OwnedWriteHalf>,
    pending: PendingSends,
    ready: AtomicBool,
    send_timeout: Duration,
}

impl GatewaySession {
    /// Connect and start the reader task
    ///
    /// A refused connection here is the one fatal startup error of the
    /// relay; the caller decides that. Returns the session handle plus the
    /// event stream for the ingestion pipeline.
    pub async fn connect(
        endpoint: &str,
        send_timeout: Duration,
    ) -> std::io::Result<(Arc<Self>, mpsc::Receiver<GatewayEvent>)> {
        let stream = TcpStream::connect(endpoint).await?;
        info!("Connected to WhatsApp gateway at {}", endpoint);

        let (read_half, write_half) = stream.into_split();
        let (events_tx, events_rx) = mpsc::channel(128);

        let session = Arc::new(Self {
            writer: Mutex::new(write_half),
            pending: Mutex::new(HashMap::new()),
            ready: AtomicBool::new(false),
            send_timeout,
        });

        tokio::spawn(session.clone().read_loop(read_half, events_tx));
        Ok((session, events_rx))
    }

    async fn read_loop(
        self: Arc<Self>,
        read_half: OwnedReadHalf,
        events: mpsc::Sender<GatewayEvent>,
    ) {
        let mut lines = BufReader::new(read_half).lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match self.route(&line).await {
                    Ok(Some(event)) => {
                        if events.send(event).await.is_err() {
                            warn!("Ingestion side gone, stopping gateway reader");
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => error!("Discarding gateway line: {}", e),
                },
                Ok(None) => break,
                Err(e) => {
                    error!("Gateway socket read failed: {}", e);
                    break;
                }
            }
        }

        self.ready.store(false, Ordering::SeqCst);
        self.fail_pending("gateway connection closed").await;
        let _ = events
            .send(GatewayEvent::Disconnected(
                "gateway connection closed".to_string(),
            ))
            .await;
    }

    /// Parse one line; replies resolve pending sends, everything else
    /// becomes an event
    async fn route(&self, line: &str) -> Result<Option<GatewayEvent>> {
        let packet: GatewayPacket = serde_json::from_str(line)
            .map_err(|e| RelayError::InvalidPacket(format!("{}: {}", e, truncate(line))))?;

        match packet.kind.as_str() {
            "qr" => {
                let code = packet.body["code"]
                    .as_str()
                    .ok_or_else(|| RelayError::InvalidPacket("qr without code".to_string()))?;
                Ok(Some(GatewayEvent::PairingCode(code.to_string())))
            }
            "ready" => {
                self.ready.store(true, Ordering::SeqCst);
                Ok(Some(GatewayEvent::Ready))
            }
            "disconnected" => {
                self.ready.store(false, Ordering::SeqCst);
                let reason = packet.body["reason"].as_str().unwrap_or("unknown");
                Ok(Some(GatewayEvent::Disconnected(reason.to_string())))
            }
            "auth_failure" => {
                self.ready.store(false, Ordering::SeqCst);
                let reason = packet.body["reason"].as_str().unwrap_or("unknown");
                Ok(Some(GatewayEvent::AuthFailure(reason.to_string())))
            }
            "message" => {
                let body: MessageBody = serde_json::from_value(packet.body)
                    .map_err(|e| RelayError::InvalidPacket(format!("message body: {}", e)))?;
                Ok(Some(GatewayEvent::Message(into_inbound(body)?)))
            }
            "sent" | "send_error" => {
                let reply: ReplyBody = serde_json::from_value(packet.body)
                    .map_err(|e| RelayError::InvalidPacket(format!("reply body: {}", e)))?;
                self.resolve(reply).await;
                Ok(None)
            }
            other => {
                debug!("Ignoring gateway packet type {}", other);
                Ok(None)
            }
        }
    }

    async fn resolve(&self, reply: ReplyBody) {
        let Some(waiter) = self.pending.lock().await.remove(&reply.request_id) else {
            warn!("Reply for unknown send request {}", reply.request_id);
            return;
        };

        let result = match reply.error {
            Some(error) => Err(RelayError::Gateway(error)),
            None => Ok(DeliveryReceipt {
                message_id: reply
                    .id
                    .unwrap_or_else(|| format!("sent_{}", reply.request_id)),
                from: reply.from,
            }),
        };
        let _ = waiter.send(result);
    }

    async fn fail_pending(&self, reason: &str) {
        for (_, waiter) in self.pending.lock().await.drain() {
            let _ = waiter.send(Err(RelayError::Gateway(reason.to_string())));
        }
    }

    /// Write a send packet and wait for its correlated reply
    async fn request(&self, mut body: Value) -> Result<DeliveryReceipt> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(RelayError::SessionNotReady);
        }

        let request_id = Uuid::new_v4().to_string();
        body["requestId"] = json!(request_id);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);

        let packet = json!({ "type": "send", "body": body });
        let mut line = serde_json::to_vec(&packet)?;
        line.push(b'\n');

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.write_all(&line).await {
                self.pending.lock().await.remove(&request_id);
                return Err(RelayError::Gateway(format!("socket write failed: {}", e)));
            }
        }

        match tokio::time::timeout(self.send_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RelayError::Gateway("session dropped".to_string())),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(RelayError::Gateway("delivery receipt timed out".to_string()))
            }
        }
    }
}

#[async_trait]
impl MessagingGateway for GatewaySession {
    async fn send_text(&self, address: &str, body: &str) -> Result<DeliveryReceipt> {
        self.request(json!({ "to": address, "message": body })).await
    }

    async fn send_media(
        &self,
        address: &str,
        media: OutgoingMedia,
        caption: &str,
    ) -> Result<DeliveryReceipt> {
        self.request(json!({
            "to": address,
            "message": caption,
            "media": {
                "data": BASE64.encode(&media.bytes),
                "mimetype": media.mime_type,
                "filename": media.file_name,
            },
            "sendAsVoice": media.as_voice,
        }))
        .await
    }
}

fn into_inbound(body: MessageBody) -> Result<InboundMessage> {
    let media = match body.media {
        Some(media) => {
            let bytes = BASE64
                .decode(media.data.as_bytes())
                .map_err(|e| RelayError::InvalidPacket(format!("media payload: {}", e)))?;
            Some(InboundMedia {
                bytes,
                mime_type: media.mimetype,
                file_name: media.filename,
            })
        }
        None => None,
    };

    Ok(InboundMessage {
        id: body.id,
        from: body.from,
        to: body.to,
        from_me: body.from_me,
        body: body.body,
        timestamp: body.timestamp,
        media,
        is_voice: body.is_voice,
        is_group: body.is_group,
        sender: body.sender,
    })
}

fn truncate(line: &str) -> String {
    const MAX: usize = 120;
    if line.len() <= MAX {
        line.to_string()
    } else {
        let cut: String = line.chars().take(MAX).collect();
        format!("{}...", cut)
    }
}
