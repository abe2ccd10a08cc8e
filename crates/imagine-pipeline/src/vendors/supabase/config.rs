use std::time::Duration;

use crate::config::StorageConfig;
use crate::errors::ConfigError;

/// Configuration for the storage REST client.
#[derive(Clone, Debug)]
pub struct SupabaseStoreConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`.
    pub url: String,
    /// Service-role key sent as both bearer token and `apikey`.
    pub service_key: String,
    pub bucket: String,
    pub timeout: Duration,
}

impl SupabaseStoreConfig {
    pub fn new(
        url: impl Into<String>,
        service_key: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            service_key: service_key.into(),
            bucket: bucket.into(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn from_storage(storage: &StorageConfig) -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        if storage.url.as_deref().is_none_or(|v| v.trim().is_empty()) {
            missing.push("SUPABASE_URL".to_string());
        }
        if storage.service_key.as_deref().is_none_or(|v| v.trim().is_empty()) {
            missing.push("SUPABASE_SERVICE_ROLE_KEY".to_string());
        }
        if storage.bucket.trim().is_empty() {
            missing.push("STORAGE_BUCKET".to_string());
        }
        match (&storage.url, &storage.service_key) {
            (Some(url), Some(key)) if missing.is_empty() => {
                Ok(Self::new(url.trim(), key.trim(), storage.bucket.trim()))
            }
            _ => Err(ConfigError::Missing { keys: missing }),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.url.trim_end_matches('/'),
            self.bucket,
            path.trim_start_matches('/')
        )
    }
}
