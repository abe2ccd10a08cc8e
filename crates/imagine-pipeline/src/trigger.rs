use std::time::Duration;

use tracing::info;

use crate::errors::TriggerError;
use crate::model::GenerationRequest;

pub const MOCK_TRIGGER_DELAY: Duration = Duration::from_millis(500);

/// Starts a generation on the external service.
///
/// Implementations issue exactly one outbound request carrying the prompt and return the
/// locally created [`GenerationRequest`]. Callers pass a prompt that is non-empty after trimming.
#[async_trait::async_trait]
pub trait GenerationTrigger: Send + Sync {
    async fn trigger(&self, prompt: &str) -> Result<GenerationRequest, TriggerError>;
}

/// Trigger that never leaves the process: waits a fixed delay and succeeds.
#[derive(Clone, Debug)]
pub struct MockTrigger {
    delay: Duration,
}

impl MockTrigger {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for MockTrigger {
    fn default() -> Self {
        Self::new(MOCK_TRIGGER_DELAY)
    }
}

#[async_trait::async_trait]
impl GenerationTrigger for MockTrigger {
    async fn trigger(&self, prompt: &str) -> Result<GenerationRequest, TriggerError> {
        let request = GenerationRequest::new(prompt);
        tokio::time::sleep(self.delay).await;
        let preview: String = prompt.chars().take(50).collect();
        info!(token = %request.correlation_token, prompt = %preview, "mock generation triggered");
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn mock_trigger_succeeds_within_fixed_delay() {
        let trigger = MockTrigger::default();
        let started = tokio::time::Instant::now();
        let request = trigger.trigger("a lotus on dark water").await.expect("mock");
        let elapsed = started.elapsed();

        assert_eq!(request.prompt, "a lotus on dark water");
        assert!(!request.correlation_token.as_str().is_empty());
        assert!(elapsed >= MOCK_TRIGGER_DELAY);
        assert!(elapsed < MOCK_TRIGGER_DELAY + Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn mock_trigger_issues_distinct_tokens() {
        let trigger = MockTrigger::new(Duration::ZERO);
        let a = trigger.trigger("one").await.expect("first");
        let b = trigger.trigger("two").await.expect("second");
        assert_ne!(a.correlation_token, b.correlation_token);
    }
}
