use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _, BufReader};
use tracing::{debug, info, warn};

use super::{ConnectionGuard, EventFetcher, EventHub, EventKind, StreamConnector, StreamEvent};
use crate::errors::{ConnectionError, FetchError};

/// Full message bodies keyed by message id, used to complete partial events.
#[derive(Default)]
pub struct MessageCache {
    bodies: DashMap<String, StreamEvent>,
}

impl MessageCache {
    pub fn insert(&self, event: StreamEvent) {
        self.bodies.insert(event.message_id.clone(), event);
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

#[async_trait::async_trait]
impl EventFetcher for MessageCache {
    async fn fetch_full(&self, event: &StreamEvent) -> Result<StreamEvent, FetchError> {
        self.bodies
            .get(&event.message_id)
            .map(|body| body.value().clone())
            .ok_or_else(|| FetchError {
                message_id: event.message_id.clone(),
                message: "no full body recorded".into(),
            })
    }
}

/// Operation carried by one feed line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedOp {
    Create,
    Update,
    /// Records a full body for later partial re-fetches without publishing it.
    Body,
}

/// One line of a JSON-lines event feed.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FeedRecord {
    pub op: FeedOp,
    pub event: StreamEvent,
}

/// Reads newline-delimited [`FeedRecord`]s and publishes them on the hub.
///
/// Returns the number of lines applied. Malformed lines are logged and skipped.
pub async fn pump_records<R>(reader: R, hub: &EventHub, cache: &MessageCache) -> usize
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut applied = 0;
    let mut line_no = 0_usize;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "event feed read failed");
                break;
            }
        };
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let record: FeedRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(err) => {
                warn!(line = line_no, error = %err, "skipping malformed feed line");
                continue;
            }
        };
        match record.op {
            FeedOp::Body => cache.insert(record.event),
            FeedOp::Create | FeedOp::Update => {
                if !record.event.is_partial {
                    cache.insert(record.event.clone());
                }
                let kind = if record.op == FeedOp::Create {
                    EventKind::Created
                } else {
                    EventKind::Updated
                };
                let delivered = hub.publish(kind, record.event);
                debug!(line = line_no, ?kind, delivered, "feed event published");
            }
        }
        applied += 1;
    }
    applied
}

/// Connector that replays a JSON-lines file into the hub.
///
/// Stands in for a live vendor connection: any process that can write the records can drive
/// the pipeline. Replay starts when the stream connects, so only subscribers registered by then
/// see the records.
pub struct JsonLinesConnector {
    path: PathBuf,
    cache: Arc<MessageCache>,
}

impl JsonLinesConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Arc::new(MessageCache::default()),
        }
    }
}

#[async_trait::async_trait]
impl StreamConnector for JsonLinesConnector {
    async fn connect(&self, hub: Arc<EventHub>) -> Result<ConnectionGuard, ConnectionError> {
        let file = tokio::fs::File::open(&self.path).await.map_err(|e| {
            ConnectionError(format!("cannot open event feed {}: {e}", self.path.display()))
        })?;
        let cache = Arc::clone(&self.cache);
        let path = self.path.clone();
        let task = tokio::spawn(async move {
            let applied = pump_records(BufReader::new(file), &hub, &cache).await;
            info!(path = %path.display(), applied, "event feed drained");
        });
        Ok(ConnectionGuard::with_task(task.abort_handle()))
    }

    fn fetcher(&self) -> Arc<dyn EventFetcher> {
        self.cache.clone()
    }
}
