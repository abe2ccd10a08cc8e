use tokio::sync::OnceCell;
use tracing::debug;

use crate::analysis::{AnalysisResult, AnalysisService, parse_analysis_response};
use crate::errors::{AnalysisError, ConfigError};

use super::config::GeminiClientConfig;

/// [`AnalysisService`] over the generateContent endpoint.
pub struct GeminiAnalysis {
    client: reqwest::Client,
    config: GeminiClientConfig,
    system_prompt: OnceCell<Option<String>>,
}

impl GeminiAnalysis {
    pub fn new(config: GeminiClientConfig) -> Result<Self, ConfigError> {
        if config.api_key.trim().is_empty() {
            return Err(ConfigError::missing("GEMINI_API_KEY"));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::invalid("http_client", format!("failed to build client: {e}")))?;
        Ok(Self {
            client,
            config,
            system_prompt: OnceCell::new(),
        })
    }

    /// Reads the system instruction on first use and keeps it for the process lifetime.
    async fn system_prompt(&self) -> Result<Option<&str>, AnalysisError> {
        let prompt = self
            .system_prompt
            .get_or_try_init(|| async {
                let Some(path) = &self.config.prompt_path else {
                    return Ok(None);
                };
                tokio::fs::read_to_string(path).await.map(Some).map_err(|e| {
                    AnalysisError::Config(ConfigError::invalid(
                        "ANALYSIS_PROMPT_PATH",
                        format!("cannot read {}: {e}", path.display()),
                    ))
                })
            })
            .await?;
        Ok(prompt.as_deref())
    }
}

#[async_trait::async_trait]
impl AnalysisService for GeminiAnalysis {
    async fn analyze(
        &self,
        text: &str,
        model: Option<&str>,
    ) -> Result<AnalysisResult, AnalysisError> {
        let model = model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.config.default_model.as_str());
        let system_prompt = self.system_prompt().await?;
        let body = build_request_body(system_prompt, text);
        debug!(%model, chars = text.len(), "requesting analysis");

        let response = self
            .client
            .post(self.config.generate_url(model))
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalysisError::Transport(format!("analysis request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(AnalysisError::Provider {
                status: Some(status.as_u16()),
                message: format!("generateContent failed with status {status}: {body}"),
            });
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AnalysisError::Protocol(format!("invalid response body: {e}")))?;
        let raw = extract_text(&payload)?;
        Ok(parse_analysis_response(&raw))
    }
}

pub(crate) fn build_request_body(system_prompt: Option<&str>, text: &str) -> serde_json::Value {
    let mut body = serde_json::json!({
        "contents": [{
            "role": "user",
            "parts": [{ "text": text }],
        }],
    });
    if let Some(prompt) = system_prompt.map(str::trim).filter(|p| !p.is_empty()) {
        body["systemInstruction"] = serde_json::json!({ "parts": [{ "text": prompt }] });
    }
    body
}

/// Concatenates the text parts of the first candidate.
pub(crate) fn extract_text(payload: &serde_json::Value) -> Result<String, AnalysisError> {
    let parts = payload
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .ok_or_else(|| {
            let reason = payload
                .get("promptFeedback")
                .and_then(|f| f.get("blockReason"))
                .and_then(|r| r.as_str())
                .unwrap_or("no candidates");
            AnalysisError::Protocol(format!("response carried no text ({reason})"))
        })?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.trim().is_empty() {
        return Err(AnalysisError::Protocol("response text was empty".into()));
    }
    Ok(text)
}
