//! Daemon configuration
//!
//! TOML config file with serde defaults; every section may be omitted.
//! Supabase credentials can also come from the environment
//! (`SUPABASE_URL`, `SUPABASE_SERVICE_ROLE_KEY`), which wins over the
//! file so deployments keep secrets out of it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP/WebSocket surface
    #[serde(default)]
    pub server: ServerConfig,

    /// WhatsApp gateway sidecar
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Supabase project shared by storage and persistence
    #[serde(default)]
    pub supabase: SupabaseConfig,

    /// Media bucket
    #[serde(default)]
    pub storage: StorageConfig,

    /// Durable chat store
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address of the gateway sidecar socket
    #[serde(default = "default_gateway_endpoint")]
    pub endpoint: String,

    /// How long to wait for a delivery receipt
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupabaseConfig {
    /// Project base URL
    #[serde(default)]
    pub url: String,

    /// Service-role key
    #[serde(default)]
    pub service_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Bucket name for message attachments
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Per-object size limit applied at bucket creation
    #[serde(default = "default_file_size_limit")]
    pub file_size_limit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Conversation table name
    #[serde(default = "default_table")]
    pub table: String,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_gateway_endpoint() -> String {
    "127.0.0.1:3010".to_string()
}

fn default_send_timeout() -> u64 {
    60
}

fn default_bucket() -> String {
    "whatsapp-media".to_string()
}

fn default_file_size_limit() -> u64 {
    50_000_000
}

fn default_table() -> String {
    "whatsapp_chats".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: default_gateway_endpoint(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            file_size_limit: default_file_size_limit(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            table: default_table(),
        }
    }
}

impl Config {
    /// Load from an explicit path, the default location, or defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path().filter(|p| p.exists()),
        };

        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("read config {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("parse config {}", path.display()))?
            }
            None => Self::default(),
        };

        if let Ok(url) = std::env::var("SUPABASE_URL") {
            config.supabase.url = url;
        }
        if let Ok(key) = std::env::var("SUPABASE_SERVICE_ROLE_KEY") {
            config.supabase.service_key = key;
        }

        Ok(config)
    }

    /// `~/.config/whatsapp-bridge/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("whatsapp-bridge").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.gateway.endpoint, "127.0.0.1:3010");
        assert_eq!(config.storage.bucket, "whatsapp-media");
        assert_eq!(config.persistence.table, "whatsapp_chats");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 8080

            [supabase]
            url = "https://project.supabase.co"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.supabase.url, "https://project.supabase.co");
        assert_eq!(config.storage.file_size_limit, 50_000_000);
    }

    #[test]
    fn test_roundtrip() {
        let config = Config::default();
        let raw = toml::to_string(&config).unwrap();
        let back: Config = toml::from_str(&raw).unwrap();
        assert_eq!(back.gateway.send_timeout_secs, 60);
    }
}
