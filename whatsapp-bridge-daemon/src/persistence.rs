//! Durable chat store adapter
//!
//! Implements [`ChatPersistence`] over the Supabase PostgREST API. One row
//! per conversation, columns matching the wire shape of [`Chat`]
//! (camelCase, with `messages` and `lastMessage` as JSON). Upserts resolve
//! on the `phoneNumber` unique key. Rows that fail to decode are skipped
//! with a warning rather than poisoning the whole load.

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use whatsapp_bridge_relay::{Chat, ChatPersistence, ChatStore, RelayError, Result};

use crate::config::{PersistenceConfig, SupabaseConfig};

/// PostgREST-backed conversation store
pub struct SupabaseChatPersistence {
    http: reqwest::Client,
    base_url: String,
    service_key: String,
    table: String,
}

impl SupabaseChatPersistence {
    pub fn new(
        http: reqwest::Client,
        supabase: &SupabaseConfig,
        persistence: &PersistenceConfig,
    ) -> Self {
        Self {
            http,
            base_url: supabase.url.trim_end_matches('/').to_string(),
            service_key: supabase.service_key.clone(),
            table: persistence.table.clone(),
        }
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }
}

#[async_trait]
impl ChatPersistence for SupabaseChatPersistence {
    async fn load_all(&self) -> Result<ChatStore> {
        let rows: Vec<Value> = self
            .http
            .get(self.table_url())
            .query(&[("select", "*")])
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
            .send()
            .await
            .map_err(persistence_error)?
            .error_for_status()
            .map_err(persistence_error)?
            .json()
            .await
            .map_err(persistence_error)?;

        let mut store = ChatStore::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value::<Chat>(row) {
                Ok(chat) => {
                    store.insert(chat.phone_number.clone(), chat);
                }
                Err(e) => warn!("Skipping undecodable conversation row: {}", e),
            }
        }
        Ok(store)
    }

    async fn upsert(&self, chat: &Chat) -> Result<()> {
        self.http
            .post(self.table_url())
            .query(&[("on_conflict", "phoneNumber")])
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
            .header("prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[chat])
            .send()
            .await
            .map_err(persistence_error)?
            .error_for_status()
            .map_err(persistence_error)?;

        Ok(())
    }
}

fn persistence_error(e: reqwest::Error) -> RelayError {
    RelayError::Persistence(e.to_string())
}
