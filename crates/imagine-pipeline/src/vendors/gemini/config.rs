use std::path::PathBuf;
use std::time::Duration;

use crate::config::AnalysisConfig;
use crate::errors::ConfigError;

use super::models::DEFAULT_MODEL_ID;

/// Configuration for the generateContent client.
#[derive(Clone, Debug)]
pub struct GeminiClientConfig {
    pub api_key: String,
    /// Base URL for the API. Useful for proxies or local test servers.
    pub base_url: String,
    /// Model used when a call does not name one.
    pub default_model: String,
    /// File holding the system instruction. No instruction is sent when unset.
    pub prompt_path: Option<PathBuf>,
    pub timeout: Duration,
}

impl GeminiClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            default_model: DEFAULT_MODEL_ID.to_string(),
            prompt_path: None,
            timeout: Duration::from_secs(180),
        }
    }

    pub fn from_analysis(analysis: &AnalysisConfig) -> Result<Self, ConfigError> {
        let api_key = analysis
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigError::missing("GEMINI_API_KEY"))?;
        let mut config = Self::new(api_key);
        if let Some(model) = analysis.model.as_deref().filter(|m| !m.trim().is_empty()) {
            config.default_model = model.trim().to_string();
        }
        config.prompt_path = analysis.prompt_path.clone();
        Ok(config)
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn prompt_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.prompt_path = Some(path.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn generate_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{model}:generateContent",
            self.base_url.trim_end_matches('/')
        )
    }
}
