use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{info, warn};

use super::{EventFetcher, EventHub, StreamConnector};
use crate::errors::ConnectionError;

/// Keeps the vendor connection's background work alive.
#[derive(Debug, Default)]
pub struct ConnectionGuard {
    task: Option<tokio::task::AbortHandle>,
}

impl ConnectionGuard {
    /// A connection with no background task (events are published by someone else).
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn with_task(task: tokio::task::AbortHandle) -> Self {
        Self { task: Some(task) }
    }

    fn stop(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// Process-wide notification stream: connected lazily on first use, reused afterwards,
/// torn down only by [`SharedStream::shutdown`].
pub struct SharedStream {
    connector: Arc<dyn StreamConnector>,
    hub: Arc<EventHub>,
    connection: OnceCell<ConnectionGuard>,
}

impl SharedStream {
    pub fn new(connector: Arc<dyn StreamConnector>) -> Self {
        Self {
            connector,
            hub: EventHub::new(),
            connection: OnceCell::new(),
        }
    }

    /// The hub events are fanned out on, whether or not the connection is up yet.
    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    pub fn fetcher(&self) -> Arc<dyn EventFetcher> {
        self.connector.fetcher()
    }

    /// Establishes the connection once; concurrent callers share the same attempt.
    ///
    /// A failed attempt is not cached, so the next caller retries.
    pub async fn connect(&self) -> Result<Arc<EventHub>, ConnectionError> {
        if self.hub.is_closed() {
            return Err(ConnectionError("stream has been shut down".into()));
        }
        self.connection
            .get_or_try_init(|| async {
                let guard = self.connector.connect(Arc::clone(&self.hub)).await;
                match &guard {
                    Ok(_) => info!("notification stream connected"),
                    Err(err) => warn!(error = %err, "notification stream connection failed"),
                }
                guard
            })
            .await?;
        Ok(Arc::clone(&self.hub))
    }

    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }

    /// Stops the connection and closes the hub. Outstanding waits observe a closed stream.
    pub fn shutdown(&self) {
        if let Some(guard) = self.connection.get() {
            guard.stop();
        }
        self.hub.close();
        info!("notification stream shut down");
    }
}

/// Connector for streams whose events are published directly on the hub
/// (in-process producers and tests).
pub struct StaticConnector {
    fetcher: Arc<dyn EventFetcher>,
}

impl StaticConnector {
    pub fn new(fetcher: Arc<dyn EventFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait::async_trait]
impl StreamConnector for StaticConnector {
    async fn connect(&self, _hub: Arc<EventHub>) -> Result<ConnectionGuard, ConnectionError> {
        Ok(ConnectionGuard::detached())
    }

    fn fetcher(&self) -> Arc<dyn EventFetcher> {
        Arc::clone(&self.fetcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, MessageCache};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingConnector {
        calls: Arc<AtomicUsize>,
        fail_first: bool,
    }

    #[async_trait::async_trait]
    impl StreamConnector for CountingConnector {
        async fn connect(&self, _hub: Arc<EventHub>) -> Result<ConnectionGuard, ConnectionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail_first && n == 0 {
                return Err(ConnectionError("login rejected".into()));
            }
            Ok(ConnectionGuard::detached())
        }

        fn fetcher(&self) -> Arc<dyn EventFetcher> {
            Arc::new(MessageCache::default())
        }
    }

    #[tokio::test]
    async fn concurrent_first_use_connects_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let stream = Arc::new(SharedStream::new(Arc::new(CountingConnector {
            calls: calls.clone(),
            fail_first: false,
        })));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let stream = Arc::clone(&stream);
                tokio::spawn(async move { stream.connect().await.map(|_| ()) })
            })
            .collect();
        for task in tasks {
            task.await.expect("join").expect("connect");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(stream.is_connected());
    }

    #[tokio::test]
    async fn failed_connection_is_retried_by_next_caller() {
        let calls = Arc::new(AtomicUsize::new(0));
        let stream = SharedStream::new(Arc::new(CountingConnector {
            calls: calls.clone(),
            fail_first: true,
        }));
        assert!(stream.connect().await.is_err());
        assert!(!stream.is_connected());
        assert!(stream.connect().await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn shutdown_closes_subscriptions_and_blocks_reconnect() {
        let stream = SharedStream::new(Arc::new(StaticConnector::new(Arc::new(
            MessageCache::default(),
        ))));
        let hub = stream.connect().await.expect("connect");
        let mut sub = hub.subscribe(EventKind::Created);

        stream.shutdown();
        assert!(sub.recv().await.is_none());
        assert!(stream.connect().await.is_err());
    }

    #[tokio::test]
    async fn shutdown_aborts_connector_task() {
        let task = tokio::spawn(std::future::pending::<()>());
        let guard = ConnectionGuard::with_task(task.abort_handle());
        guard.stop();
        let err = task.await.expect_err("aborted");
        assert!(err.is_cancelled());
    }
}
