//! Supabase Storage adapter
//!
//! Implements the relay's [`MediaStore`] capability against the Supabase
//! Storage REST API. Objects are public; the returned URL is fetchable
//! without credentials. `ensure_bucket` creates the bucket on first run.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use whatsapp_bridge_relay::{MediaStore, RelayError, Result};

use crate::config::{StorageConfig, SupabaseConfig};

/// Media bucket client
pub struct SupabaseMediaStore {
    http: reqwest::Client,
    base_url: String,
    service_key: String,
    bucket: String,
    file_size_limit: u64,
}

#[derive(Debug, Deserialize)]
struct BucketInfo {
    name: String,
}

impl SupabaseMediaStore {
    pub fn new(http: reqwest::Client, supabase: &SupabaseConfig, storage: &StorageConfig) -> Self {
        Self {
            http,
            base_url: supabase.url.trim_end_matches('/').to_string(),
            service_key: supabase.service_key.clone(),
            bucket: storage.bucket.clone(),
            file_size_limit: storage.file_size_limit,
        }
    }

    /// Create the media bucket when it does not exist yet
    pub async fn ensure_bucket(&self) -> Result<()> {
        let response = self
            .http
            .get(format!("{}/storage/v1/bucket", self.base_url))
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
            .send()
            .await
            .map_err(storage_error)?;

        let buckets: Vec<BucketInfo> = response
            .error_for_status()
            .map_err(storage_error)?
            .json()
            .await
            .map_err(storage_error)?;

        if buckets.iter().any(|b| b.name == self.bucket) {
            debug!("Bucket {} already exists", self.bucket);
            return Ok(());
        }

        self.http
            .post(format!("{}/storage/v1/bucket", self.base_url))
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
            .json(&json!({
                "name": self.bucket,
                "public": true,
                "file_size_limit": self.file_size_limit,
            }))
            .send()
            .await
            .map_err(storage_error)?
            .error_for_status()
            .map_err(storage_error)?;

        info!("Created media bucket {}", self.bucket);
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, path
        )
    }
}

#[async_trait]
impl MediaStore for SupabaseMediaStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        self.http
            .post(format!(
                "{}/storage/v1/object/{}/{}",
                self.base_url, self.bucket, path
            ))
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
            .header("content-type", content_type)
            .header("cache-control", "3600")
            .body(bytes)
            .send()
            .await
            .map_err(storage_error)?
            .error_for_status()
            .map_err(storage_error)?;

        Ok(self.public_url(path))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self
            .http
            .get(url)
            .send()
            .await
            .map_err(storage_error)?
            .error_for_status()
            .map_err(storage_error)?
            .bytes()
            .await
            .map_err(storage_error)?;

        Ok(bytes.to_vec())
    }
}

fn storage_error(e: reqwest::Error) -> RelayError {
    RelayError::Storage(e.to_string())
}
