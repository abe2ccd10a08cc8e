use std::time::Duration;

use tracing::info;

use crate::errors::AnalysisError;

/// Separates the prose from the generation prompt in an analysis response.
pub const IMAGE_PROMPT_DELIMITER: &str = "---IMAGE PROMPT---";

pub const MOCK_ANALYSIS_DELAY: Duration = Duration::from_secs(2);

const MOCK_RESPONSE: &str = "Ah, welcome, soul-friend. It sounds as though you're wading through some murky emotional waters today, but within that murkiness, there's a glimmer of something transformative.

**Reflective Analysis:** The essence here is a yearning for unfiltered expression and a release from perceived judgment. **Key Word:** Authenticity.

**Left-Field Insight:** What if the need to defend is simply a call to define?

**Follow-Up Prompt:** What would it feel like to create something solely for the joy of it?

---IMAGE PROMPT---

A vibrant watercolor painting of a single luminous lotus flower blooming from dark, swirling waters, faint alchemical symbols in the background, soft morning light filtering through mist.";

/// Prose plus an optional prompt for image generation.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AnalysisResult {
    pub analysis_text: String,
    pub image_prompt: Option<String>,
}

/// Splits a raw response on [`IMAGE_PROMPT_DELIMITER`].
///
/// Without a delimiter (or with nothing after it) the whole response is prose and there is no
/// prompt. Text after a second delimiter is ignored.
pub fn parse_analysis_response(response: &str) -> AnalysisResult {
    let mut parts = response.split(IMAGE_PROMPT_DELIMITER);
    let analysis = parts.next().unwrap_or_default().trim();
    match parts.next() {
        Some(prompt) => AnalysisResult {
            analysis_text: analysis.to_string(),
            image_prompt: Some(prompt.trim().to_string()).filter(|p| !p.is_empty()),
        },
        None => AnalysisResult {
            analysis_text: response.trim().to_string(),
            image_prompt: None,
        },
    }
}

/// Text-analysis collaborator. `model` overrides the configured model when set.
#[async_trait::async_trait]
pub trait AnalysisService: Send + Sync {
    async fn analyze(&self, text: &str, model: Option<&str>)
    -> Result<AnalysisResult, AnalysisError>;
}

/// Canned analysis returned after a fixed delay.
#[derive(Clone, Debug)]
pub struct MockAnalysis {
    delay: Duration,
}

impl MockAnalysis {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for MockAnalysis {
    fn default() -> Self {
        Self::new(MOCK_ANALYSIS_DELAY)
    }
}

#[async_trait::async_trait]
impl AnalysisService for MockAnalysis {
    async fn analyze(
        &self,
        text: &str,
        _model: Option<&str>,
    ) -> Result<AnalysisResult, AnalysisError> {
        tokio::time::sleep(self.delay).await;
        let preview: String = text.chars().take(50).collect();
        info!(text = %preview, "mock analysis");
        Ok(parse_analysis_response(MOCK_RESPONSE))
    }
}
