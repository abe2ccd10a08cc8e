//! Durable tile upload with all-or-nothing reporting.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::errors::{StorageError, TileFailure, UploadError};
use crate::model::{ImageTile, UploadOutcome};
use crate::policy::RetryPolicy;

/// Object storage the uploader writes tiles into.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Writes `bytes` at `path`, replacing any existing object so retries are safe.
    async fn put(&self, path: &str, bytes: Bytes, content_type: &str)
    -> Result<(), StorageError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Process-local [`ObjectStore`] used in mock mode.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, StoredObject>,
}

impl MemoryObjectStore {
    pub fn get(&self, path: &str) -> Option<StoredObject> {
        self.objects.get(path).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let object = StoredObject {
            bytes,
            content_type: content_type.to_string(),
        };
        self.objects.insert(path.to_string(), object);
        Ok(())
    }
}

/// Storage path for one tile: `{request_id}/{index}.{ext}`.
pub fn tile_path(request_id: &str, tile: &ImageTile) -> String {
    format!("{request_id}/{}.{}", tile.index, tile.extension())
}

/// Persists tile sets, retrying each tile according to its [`RetryPolicy`].
pub struct DurableUploader {
    store: Arc<dyn ObjectStore>,
    policy: RetryPolicy,
}

impl DurableUploader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Writes the tiles one after another.
    ///
    /// Reports every path when all tiles landed, and no paths plus the failed tiles otherwise.
    /// Tiles written before a failure are left in place; they are not rolled back.
    pub async fn upload(&self, request_id: &str, tiles: &[ImageTile]) -> UploadOutcome {
        let mut paths = Vec::with_capacity(tiles.len());
        let mut failures = Vec::new();

        for tile in tiles {
            let path = tile_path(request_id, tile);
            match self.put_with_retry(&path, tile).await {
                Ok(()) => paths.push(path),
                Err(failure) => failures.push(failure),
            }
        }

        if failures.is_empty() {
            info!(%request_id, tiles = paths.len(), "tiles uploaded");
            UploadOutcome::stored(paths)
        } else {
            let error = UploadError { failures };
            warn!(%request_id, failed = error.failures.len(), stored = paths.len(), "{error}");
            UploadOutcome::failed(error)
        }
    }

    async fn put_with_retry(&self, path: &str, tile: &ImageTile) -> Result<(), TileFailure> {
        let mut retries = 0_u32;
        loop {
            let attempt = retries + 1;
            let result = self
                .store
                .put(path, tile.bytes.clone(), &tile.content_type)
                .await;
            match result {
                Ok(()) => {
                    debug!(%path, tile = tile.index, attempt, "tile stored");
                    return Ok(());
                }
                Err(error) if self.policy.can_retry(retries) => {
                    let backoff = self.policy.backoff_duration(retries);
                    warn!(%path, tile = tile.index, attempt, error = %error, backoff_ms = backoff.as_millis() as u64, "tile upload failed; retrying");
                    if !backoff.is_zero() {
                        tokio::time::sleep(backoff).await;
                    }
                    retries += 1;
                }
                Err(error) => {
                    warn!(%path, tile = tile.index, attempt, error = %error, "tile upload failed");
                    return Err(TileFailure {
                        index: tile.index,
                        path: path.to_string(),
                        attempts: attempt,
                        error,
                    });
                }
            }
        }
    }
}
