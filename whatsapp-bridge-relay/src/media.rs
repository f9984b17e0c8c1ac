//! Media handling
//!
//! Attachment classification, storage path layout, and the object-storage
//! capability trait. Audio duration probing is best-effort header
//! inspection: a failed probe yields 0 and never blocks a message.
//!
//! ## Storage layout
//!
//! Objects land under a folder per media category with a millisecond
//! timestamp prefix for collision resistance:
//!
//! ```text
//! images/1716123456789_photo.jpg
//! audio/1716123456790_voice_message.ogg
//! ```

use async_trait::async_trait;
use chrono::Utc;

use crate::error::Result;

/// Media category, classified by MIME prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Other,
}

impl MediaKind {
    /// Classify a MIME type; anything unrecognized is `Other`
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            Self::Image
        } else if mime.starts_with("video/") {
            Self::Video
        } else if mime.starts_with("audio/") {
            Self::Audio
        } else {
            Self::Other
        }
    }

    /// Storage folder for this category
    pub fn folder(&self) -> &'static str {
        match self {
            Self::Image => "images",
            Self::Video => "videos",
            Self::Audio => "audio",
            Self::Other => "other",
        }
    }
}

/// Object storage capability
///
/// Implemented against the real bucket by the daemon and by an in-memory
/// fake in tests. `upload` returns the publicly fetchable URL; `download`
/// fetches an already stored object back for the network send.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;

    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}

/// Collision-resistant object path for an attachment
pub fn object_path(kind: MediaKind, file_name: &str) -> String {
    format!(
        "{}/{}_{}",
        kind.folder(),
        Utc::now().timestamp_millis(),
        sanitize_file_name(file_name)
    )
}

/// Fallback filename when the network supplies none
pub fn default_file_name(kind: MediaKind, mime: &str) -> String {
    let ext = mime.split('/').nth(1).unwrap_or("bin");
    format!(
        "{}_{}.{}",
        kind.folder().trim_end_matches('s'),
        Utc::now().timestamp_millis(),
        ext
    )
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// Best-effort audio duration in whole seconds
///
/// Understands WAV (RIFF byte-rate math) and Ogg (final page granule
/// position at the Opus 48 kHz clock). Anything else, including truncated
/// or corrupt headers, yields 0.
pub fn probe_audio_duration_secs(bytes: &[u8]) -> u64 {
    wav_duration_secs(bytes)
        .or_else(|| ogg_duration_secs(bytes))
        .unwrap_or(0)
}

fn wav_duration_secs(bytes: &[u8]) -> Option<u64> {
    if bytes.len() < 44 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return None;
    }

    let mut byte_rate: Option<u64> = None;
    let mut data_len: Option<u64> = None;
    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().ok()?) as usize;
        let body = pos + 8;
        match id {
            b"fmt " if body + 12 <= bytes.len() => {
                byte_rate = Some(u32::from_le_bytes(
                    bytes[body + 8..body + 12].try_into().ok()?,
                ) as u64);
            }
            b"data" => {
                data_len = Some(size as u64);
            }
            _ => {}
        }
        // Chunks are word-aligned
        pos = body + size + (size % 2);
    }

    match (byte_rate, data_len) {
        (Some(rate), Some(len)) if rate > 0 => Some(len / rate),
        _ => None,
    }
}

const OPUS_SAMPLE_RATE: u64 = 48_000;

fn ogg_duration_secs(bytes: &[u8]) -> Option<u64> {
    if bytes.len() < 28 || &bytes[0..4] != b"OggS" {
        return None;
    }

    // The granule position of the last page is the total sample count at
    // the codec clock; Opus voice notes always run at 48 kHz.
    let last_page = bytes
        .windows(4)
        .rposition(|w| w == b"OggS")
        .filter(|&p| p + 14 <= bytes.len())?;

    let granule = u64::from_le_bytes(bytes[last_page + 6..last_page + 14].try_into().ok()?);
    if granule == 0 || granule == u64::MAX {
        return None;
    }
    Some(granule / OPUS_SAMPLE_RATE)
}
