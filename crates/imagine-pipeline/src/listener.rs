//! Completion listener: waits on the shared notification stream for the event that carries a
//! finished generation.
//!
//! Each wait moves through `Listening → {Matched | TimedOut} → Closed`. A wait owns two
//! subscriptions (created and updated events) and a timer; it resolves exactly once and always
//! releases both subscriptions before returning.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::ListenError;
use crate::event::{EventFetcher, EventHub, EventKind, SharedStream, StreamEvent, Subscription};
use crate::model::{CompletionResult, CorrelationToken, GenerationRequest};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
pub const MOCK_LISTENER_DELAY: Duration = Duration::from_secs(3);

/// Placeholder grid references returned in mock mode.
pub const MOCK_IMAGE_URLS: [&str; 4] = [
    "https://placehold.co/512x512/1a1a2e/eee8d5/png?text=Image+1",
    "https://placehold.co/512x512/16213e/eee8d5/png?text=Image+2",
    "https://placehold.co/512x512/0f3460/eee8d5/png?text=Image+3",
    "https://placehold.co/512x512/533483/eee8d5/png?text=Image+4",
];

/// Waits for the completion event of a triggered generation.
#[async_trait::async_trait]
pub trait CompletionWaiter: Send + Sync {
    async fn wait(&self, request: &GenerationRequest) -> Result<CompletionResult, ListenError>;
}

/// True when an event carries a finished result rather than progress.
///
/// Finished means interactive controls plus at least one image, or exactly four images.
pub fn is_completed_result(event: &StreamEvent) -> bool {
    let images = event.image_count();
    (event.has_interactive_controls && images >= 1) || images == 4
}

/// Who authors completion events and where they are posted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenerIdentity {
    pub author_id: String,
    pub channel_id: String,
}

impl ListenerIdentity {
    pub fn new(author_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            author_id: author_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerState {
    Listening,
    Matched,
    TimedOut,
    Closed,
}

/// Listener over the shared notification stream.
///
/// Correlation is weak: the service does not echo the request token, so an event is attributed
/// to a wait only by author, channel and [`is_completed_result`]. Two generations outstanding in
/// the same channel can both resolve from the first finished grid. Enable
/// `PipelineConfig::serialize_per_channel` when that matters.
pub struct CompletionListener {
    stream: Arc<SharedStream>,
    fetcher: Arc<dyn EventFetcher>,
    identity: ListenerIdentity,
    timeout: Duration,
}

impl CompletionListener {
    pub fn new(stream: Arc<SharedStream>, identity: ListenerIdentity) -> Self {
        let fetcher = stream.fetcher();
        Self {
            stream,
            fetcher,
            identity,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn EventFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn watch(&self, active: &mut ActiveWait) -> Result<Vec<String>, ListenError> {
        loop {
            let Some((kind, event)) = active.next().await else {
                return Err(ListenError::StreamClosed);
            };
            if let Some(urls) = self.evaluate(&active.token, kind, event).await {
                return Ok(urls);
            }
        }
    }

    /// Applies the filters in order and returns the image references of a finished result.
    async fn evaluate(
        &self,
        token: &CorrelationToken,
        kind: EventKind,
        event: StreamEvent,
    ) -> Option<Vec<String>> {
        debug!(%token, ?kind, message_id = %event.message_id, author = %event.author_id, channel = %event.channel_id, "event received");
        if event.author_id != self.identity.author_id {
            debug!(%token, expected = %self.identity.author_id, "ignoring event from another author");
            return None;
        }
        if event.channel_id != self.identity.channel_id {
            debug!(%token, expected = %self.identity.channel_id, "ignoring event from another channel");
            return None;
        }

        let event = if event.is_partial {
            match self.fetcher.fetch_full(&event).await {
                Ok(full) if !full.is_partial => full,
                Ok(_) => {
                    debug!(%token, message_id = %event.message_id, "fetched body is still partial");
                    return None;
                }
                Err(err) => {
                    warn!(%token, error = %err, "failed to fetch partial event; still listening");
                    return None;
                }
            }
        } else {
            event
        };

        let complete = is_completed_result(&event);
        debug!(
            %token,
            attachments = event.attachments.len(),
            embeds = event.embedded_image_urls.len(),
            controls = event.has_interactive_controls,
            complete,
            "evaluated event"
        );
        complete.then(|| event.image_urls())
    }
}

#[async_trait::async_trait]
impl CompletionWaiter for CompletionListener {
    async fn wait(&self, request: &GenerationRequest) -> Result<CompletionResult, ListenError> {
        let token = request.correlation_token.clone();
        // Subscribe before connecting: a connector may start publishing as soon as it is up.
        let mut active = ActiveWait::open(self.stream.hub(), token.clone());
        if let Err(err) = self.stream.connect().await {
            active.close();
            return Err(ListenError::Connection(err.0));
        }
        debug!(%token, channel = %self.identity.channel_id, timeout_s = self.timeout.as_secs(), "listening for completion");

        let outcome = tokio::time::timeout(self.timeout, self.watch(&mut active)).await;
        match outcome {
            Ok(Ok(image_urls)) => {
                active.resolve(ListenerState::Matched);
                info!(%token, images = image_urls.len(), "completed result received");
                Ok(CompletionResult::matched(image_urls))
            }
            Ok(Err(err)) => {
                active.close();
                warn!(%token, error = %err, "stopped listening");
                Err(err)
            }
            Err(_) => {
                active.resolve(ListenerState::TimedOut);
                warn!(%token, waited_s = self.timeout.as_secs(), "timed out waiting for completed result");
                Err(ListenError::Timeout {
                    token: token.to_string(),
                    waited: self.timeout,
                })
            }
        }
    }
}

/// Per-wait state: the two subscriptions and the resolution bookkeeping.
struct ActiveWait {
    token: CorrelationToken,
    state: ListenerState,
    created: Subscription,
    updated: Subscription,
}

impl ActiveWait {
    fn open(hub: &Arc<EventHub>, token: CorrelationToken) -> Self {
        Self {
            token,
            state: ListenerState::Listening,
            created: hub.subscribe(EventKind::Created),
            updated: hub.subscribe(EventKind::Updated),
        }
    }

    async fn next(&mut self) -> Option<(EventKind, StreamEvent)> {
        tokio::select! {
            Some(event) = self.created.recv() => Some((EventKind::Created, event)),
            Some(event) = self.updated.recv() => Some((EventKind::Updated, event)),
            else => None,
        }
    }

    /// Records the terminal state and releases the subscriptions. Only the first call counts.
    fn resolve(&mut self, terminal: ListenerState) -> bool {
        if self.state != ListenerState::Listening {
            return false;
        }
        self.state = terminal;
        debug!(token = %self.token, state = ?terminal, "wait resolved");
        self.close();
        true
    }

    /// Unsubscribes both handlers. Returns `true` only on the first call.
    fn close(&mut self) -> bool {
        if self.state == ListenerState::Closed {
            return false;
        }
        self.created.unsubscribe();
        self.updated.unsubscribe();
        self.state = ListenerState::Closed;
        true
    }
}

/// Listener that fabricates a finished grid after a fixed delay.
#[derive(Clone, Debug)]
pub struct MockListener {
    delay: Duration,
}

impl MockListener {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for MockListener {
    fn default() -> Self {
        Self::new(MOCK_LISTENER_DELAY)
    }
}

#[async_trait::async_trait]
impl CompletionWaiter for MockListener {
    async fn wait(&self, request: &GenerationRequest) -> Result<CompletionResult, ListenError> {
        tokio::time::sleep(self.delay).await;
        info!(token = %request.correlation_token, "mock completion received");
        Ok(CompletionResult::matched(
            MOCK_IMAGE_URLS.iter().map(|u| u.to_string()).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Attachment, JsonLinesConnector, MessageCache, StaticConnector};
    use std::io::Write as _;

    const BOT: &str = "936929561302675456";
    const CHANNEL: &str = "chan-1";

    struct Fixture {
        stream: Arc<SharedStream>,
        hub: Arc<EventHub>,
        cache: Arc<MessageCache>,
    }

    impl Fixture {
        fn new() -> Self {
            let cache = Arc::new(MessageCache::default());
            let stream = Arc::new(SharedStream::new(Arc::new(StaticConnector::new(
                cache.clone(),
            ))));
            let hub = Arc::clone(stream.hub());
            Self { stream, hub, cache }
        }

        fn listener(&self, timeout: Duration) -> Arc<CompletionListener> {
            Arc::new(
                CompletionListener::new(self.stream.clone(), ListenerIdentity::new(BOT, CHANNEL))
                    .with_timeout(timeout),
            )
        }

        fn spawn_wait(
            &self,
            listener: &Arc<CompletionListener>,
        ) -> tokio::task::JoinHandle<Result<CompletionResult, ListenError>> {
            let listener = Arc::clone(listener);
            let request = GenerationRequest::new("prompt");
            tokio::spawn(async move { listener.wait(&request).await })
        }

        async fn until_subscribers(&self, count: usize) {
            while self.hub.subscriber_count() < count {
                tokio::task::yield_now().await;
            }
        }
    }

    fn event(id: &str, author: &str, channel: &str, images: usize, controls: bool) -> StreamEvent {
        StreamEvent {
            message_id: id.into(),
            author_id: author.into(),
            channel_id: channel.into(),
            attachments: (0..images)
                .map(|i| Attachment::image(format!("https://cdn/{id}/{i}.png")))
                .collect(),
            embedded_image_urls: Vec::new(),
            has_interactive_controls: controls,
            is_partial: false,
        }
    }

    #[test]
    fn heuristic_truth_table() {
        let cases = [
            (true, 1, true),
            (false, 4, true),
            (false, 2, false),
            (true, 0, false),
            (false, 1, false),
            (true, 4, true),
            (false, 5, false),
        ];
        for (controls, images, expected) in cases {
            let e = event("m", BOT, CHANNEL, images, controls);
            assert_eq!(
                is_completed_result(&e),
                expected,
                "controls={controls} images={images}"
            );
        }
    }

    #[test]
    fn embedded_images_count_toward_heuristic() {
        let mut e = event("m", BOT, CHANNEL, 2, false);
        e.embedded_image_urls = vec!["https://cdn/e1".into(), "https://cdn/e2".into()];
        assert!(is_completed_result(&e));
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_matching_event_resolves_the_wait() {
        let fx = Fixture::new();
        let listener = fx.listener(DEFAULT_TIMEOUT);
        let handle = fx.spawn_wait(&listener);
        fx.until_subscribers(2).await;

        fx.hub.publish(EventKind::Created, event("a", "someone", CHANNEL, 4, true));
        fx.hub.publish(EventKind::Created, event("b", BOT, "elsewhere", 4, true));
        fx.hub.publish(EventKind::Created, event("c", BOT, CHANNEL, 2, false));
        fx.hub.publish(EventKind::Created, event("d", BOT, CHANNEL, 4, false));
        fx.hub.publish(EventKind::Created, event("e", BOT, CHANNEL, 4, false));

        let result = handle.await.expect("join").expect("matched");
        assert!(result.matched);
        assert_eq!(result.image_urls.len(), 4);
        assert!(result.image_urls.iter().all(|u| u.starts_with("https://cdn/d/")));
        assert_eq!(fx.hub.subscriber_count(), 0);
        assert_eq!(
            fx.hub.publish(EventKind::Created, event("f", BOT, CHANNEL, 4, false)),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn partial_event_completes_only_after_fetch() {
        let fx = Fixture::new();
        fx.cache.insert(event("p", BOT, CHANNEL, 4, false));
        let listener = fx.listener(DEFAULT_TIMEOUT);
        let handle = fx.spawn_wait(&listener);
        fx.until_subscribers(2).await;

        let mut partial = event("p", BOT, CHANNEL, 0, false);
        partial.is_partial = true;
        fx.hub.publish(EventKind::Updated, partial);

        let result = handle.await.expect("join").expect("matched");
        assert_eq!(result.image_urls.len(), 4);
        assert!(result.image_urls[0].starts_with("https://cdn/p/"));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_event_never_completes_by_itself() {
        let fx = Fixture::new();
        fx.cache.insert(event("p", BOT, CHANNEL, 2, false));
        let listener = fx.listener(Duration::from_secs(5));
        let handle = fx.spawn_wait(&listener);
        fx.until_subscribers(2).await;

        // Looks finished, but the full body is still in progress.
        let mut partial = event("p", BOT, CHANNEL, 4, false);
        partial.is_partial = true;
        fx.hub.publish(EventKind::Updated, partial);

        let err = handle.await.expect("join").expect_err("must not match");
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_partial_fetch_keeps_listening() {
        let fx = Fixture::new();
        let listener = fx.listener(DEFAULT_TIMEOUT);
        let handle = fx.spawn_wait(&listener);
        fx.until_subscribers(2).await;

        let mut unknown = event("gone", BOT, CHANNEL, 0, false);
        unknown.is_partial = true;
        fx.hub.publish(EventKind::Updated, unknown);
        tokio::task::yield_now().await;
        fx.hub.publish(EventKind::Updated, event("ok", BOT, CHANNEL, 1, true));

        let result = handle.await.expect("join").expect("matched");
        assert_eq!(result.image_urls, vec!["https://cdn/ok/0.png".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_resolves_unmatched_and_deregisters() {
        let fx = Fixture::new();
        let listener = fx.listener(DEFAULT_TIMEOUT);
        let started = tokio::time::Instant::now();
        let handle = fx.spawn_wait(&listener);
        fx.until_subscribers(2).await;
        fx.hub.publish(EventKind::Created, event("noise", "someone", CHANNEL, 4, true));

        let err = handle.await.expect("join").expect_err("timeout");
        assert!(started.elapsed() >= DEFAULT_TIMEOUT);
        match &err {
            ListenError::Timeout { waited, .. } => assert_eq!(*waited, DEFAULT_TIMEOUT),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!err.result().matched);
        assert_eq!(fx.hub.subscriber_count(), 0);
        assert_eq!(
            fx.hub.publish(EventKind::Created, event("late", BOT, CHANNEL, 4, true)),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waits_cancel_independently() {
        let fx = Fixture::new();
        let short = fx.listener(Duration::from_secs(10));
        let long = fx.listener(DEFAULT_TIMEOUT);
        let short_wait = fx.spawn_wait(&short);
        let long_wait = fx.spawn_wait(&long);
        fx.until_subscribers(4).await;

        let err = short_wait.await.expect("join").expect_err("short times out");
        assert!(err.is_timeout());
        assert_eq!(fx.hub.subscriber_count(), 2);

        fx.hub.publish(EventKind::Created, event("done", BOT, CHANNEL, 4, false));
        let result = long_wait.await.expect("join").expect("long matches");
        assert!(result.matched);
        assert_eq!(fx.hub.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn same_channel_waits_share_one_completion() {
        // Weak correlation: nothing ties the event to either request.
        let fx = Fixture::new();
        let listener = fx.listener(DEFAULT_TIMEOUT);
        let first = fx.spawn_wait(&listener);
        let second = fx.spawn_wait(&listener);
        fx.until_subscribers(4).await;

        fx.hub.publish(EventKind::Created, event("grid", BOT, CHANNEL, 4, false));
        let a = first.await.expect("join").expect("first");
        let b = second.await.expect("join").expect("second");
        assert_eq!(a.image_urls, b.image_urls);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_ends_outstanding_waits() {
        let fx = Fixture::new();
        let listener = fx.listener(DEFAULT_TIMEOUT);
        let handle = fx.spawn_wait(&listener);
        fx.until_subscribers(2).await;

        fx.stream.shutdown();
        let err = handle.await.expect("join").expect_err("closed");
        assert_eq!(err, ListenError::StreamClosed);
    }

    #[tokio::test]
    async fn dropped_wait_releases_subscriptions() {
        let fx = Fixture::new();
        let listener = fx.listener(DEFAULT_TIMEOUT);
        let handle = fx.spawn_wait(&listener);
        fx.until_subscribers(2).await;
        handle.abort();
        let _ = handle.await;
        assert_eq!(fx.hub.subscriber_count(), 0);
    }

    fn feed_file(lines: &[String]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        for line in lines {
            writeln!(file, "{line}").expect("write");
        }
        file.flush().expect("flush");
        file
    }

    fn feed_line(op: &str, event: &StreamEvent) -> String {
        serde_json::json!({ "op": op, "event": event }).to_string()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn replayed_feed_reaches_a_fresh_wait() {
        let file = feed_file(&[feed_line("create", &event("grid", BOT, CHANNEL, 1, true))]);
        for run in 0..50 {
            let stream = Arc::new(SharedStream::new(Arc::new(JsonLinesConnector::new(
                file.path(),
            ))));
            let listener =
                CompletionListener::new(stream.clone(), ListenerIdentity::new(BOT, CHANNEL))
                    .with_timeout(Duration::from_secs(5));
            match listener.wait(&GenerationRequest::new("prompt")).await {
                Ok(result) => assert_eq!(result.image_urls, vec!["https://cdn/grid/0.png"]),
                Err(err) => panic!("run {run}: {err:?}"),
            }
            assert_eq!(stream.hub().subscriber_count(), 0);
            stream.shutdown();
        }
    }

    #[tokio::test]
    async fn replayed_partial_update_is_completed_from_recorded_body() {
        let mut partial = event("grid", BOT, CHANNEL, 0, false);
        partial.is_partial = true;
        let file = feed_file(&[
            feed_line("create", &event("noise", "someone", CHANNEL, 4, true)),
            feed_line("update", &event("grid", BOT, CHANNEL, 2, false)),
            feed_line("body", &event("grid", BOT, CHANNEL, 4, false)),
            feed_line("update", &partial),
        ]);
        let stream = Arc::new(SharedStream::new(Arc::new(JsonLinesConnector::new(
            file.path(),
        ))));
        let listener = CompletionListener::new(stream.clone(), ListenerIdentity::new(BOT, CHANNEL))
            .with_timeout(Duration::from_secs(5));

        let result = listener
            .wait(&GenerationRequest::new("prompt"))
            .await
            .expect("matched");
        assert_eq!(result.image_urls.len(), 4);
        assert!(result.image_urls[0].starts_with("https://cdn/grid/"));
    }

    #[tokio::test]
    async fn failed_connection_releases_subscriptions() {
        let stream = Arc::new(SharedStream::new(Arc::new(JsonLinesConnector::new(
            "/nonexistent/imagine-feed.jsonl",
        ))));
        let listener = CompletionListener::new(stream.clone(), ListenerIdentity::new(BOT, CHANNEL));
        let err = listener
            .wait(&GenerationRequest::new("prompt"))
            .await
            .expect_err("no feed");
        assert!(matches!(err, ListenError::Connection(_)));
        assert_eq!(stream.hub().subscriber_count(), 0);
    }

    #[test]
    fn active_wait_resolves_exactly_once() {
        let hub = EventHub::new();
        let mut active = ActiveWait::open(&hub, CorrelationToken::from("1"));
        assert_eq!(hub.subscriber_count(), 2);

        assert!(active.resolve(ListenerState::Matched));
        assert!(!active.resolve(ListenerState::TimedOut));
        assert!(!active.close());
        assert_eq!(active.state, ListenerState::Closed);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn mock_listener_returns_placeholder_grid() {
        let started = tokio::time::Instant::now();
        let result = MockListener::default()
            .wait(&GenerationRequest::new("p"))
            .await
            .expect("mock");
        assert!(started.elapsed() >= MOCK_LISTENER_DELAY);
        assert_eq!(result.image_urls.len(), 4);
    }
}
