use bytes::Bytes;
use tracing::debug;

use crate::errors::{ConfigError, StorageError};
use crate::upload::ObjectStore;

use super::config::SupabaseStoreConfig;

/// [`ObjectStore`] over the storage REST API.
pub struct SupabaseStore {
    client: reqwest::Client,
    config: SupabaseStoreConfig,
}

impl SupabaseStore {
    pub fn new(config: SupabaseStoreConfig) -> Result<Self, ConfigError> {
        if config.service_key.trim().is_empty() {
            return Err(ConfigError::missing("SUPABASE_SERVICE_ROLE_KEY"));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::invalid("http_client", format!("failed to build client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }
}

#[async_trait::async_trait]
impl ObjectStore for SupabaseStore {
    async fn put(
        &self,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let size = bytes.len();
        let response = self
            .client
            .post(self.config.object_url(path))
            .bearer_auth(&self.config.service_key)
            .header("apikey", &self.config.service_key)
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(StorageError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        debug!(bucket = %self.config.bucket, %path, size, "object written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_service_key_is_rejected() {
        let err = SupabaseStore::new(SupabaseStoreConfig::new("https://p.supabase.co", " ", "b"))
            .err()
            .expect("blank key");
        assert_eq!(err, ConfigError::missing("SUPABASE_SERVICE_ROLE_KEY"));
    }

    #[test]
    fn store_exposes_bucket() {
        let store = SupabaseStore::new(SupabaseStoreConfig::new(
            "https://p.supabase.co",
            "key",
            "analysis-images",
        ))
        .expect("store");
        assert_eq!(store.bucket(), "analysis-images");
    }
}
