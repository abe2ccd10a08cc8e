//! Notification stream plumbing.
//!
//! The stream is one process-wide connection ([`SharedStream`]) that fans inbound events out to
//! short-lived subscribers registered on an [`EventHub`]. Vendor connections plug in through
//! [`StreamConnector`]; partial events are completed through [`EventFetcher`].

mod connection;
mod feed;
mod hub;

use std::sync::Arc;

pub use connection::{ConnectionGuard, SharedStream, StaticConnector};
pub use feed::{FeedOp, FeedRecord, JsonLinesConnector, MessageCache, pump_records};
pub use hub::{EventHub, Subscription};

use crate::errors::{ConnectionError, FetchError};

/// Whether an event is a new message or an edit of one seen before.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Updated,
}

/// File attached to an event.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Attachment {
    pub url: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl Attachment {
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content_type: Some("image/png".to_string()),
        }
    }

    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("image/"))
    }
}

/// One inbound notification.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StreamEvent {
    pub message_id: String,
    #[serde(default)]
    pub author_id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub embedded_image_urls: Vec<String>,
    #[serde(default)]
    pub has_interactive_controls: bool,
    /// Only an id and routing data arrived; the body must be fetched.
    #[serde(default)]
    pub is_partial: bool,
}

impl StreamEvent {
    /// Image references: image attachments first, then embedded previews.
    pub fn image_urls(&self) -> Vec<String> {
        self.attachments
            .iter()
            .filter(|a| a.is_image())
            .map(|a| a.url.clone())
            .chain(self.embedded_image_urls.iter().cloned())
            .collect()
    }

    pub fn image_count(&self) -> usize {
        self.attachments.iter().filter(|a| a.is_image()).count() + self.embedded_image_urls.len()
    }
}

/// Loads the full body of a partial event.
#[async_trait::async_trait]
pub trait EventFetcher: Send + Sync {
    async fn fetch_full(&self, event: &StreamEvent) -> Result<StreamEvent, FetchError>;
}

/// Establishes the vendor connection and feeds its events into the hub.
///
/// Called at most once per [`SharedStream`]. Long-running readers should be spawned and their
/// abort handle returned in the guard so shutdown can stop them.
#[async_trait::async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, hub: Arc<EventHub>) -> Result<ConnectionGuard, ConnectionError>;

    /// Fetcher used to complete partial events from this connection.
    fn fetcher(&self) -> Arc<dyn EventFetcher>;
}
