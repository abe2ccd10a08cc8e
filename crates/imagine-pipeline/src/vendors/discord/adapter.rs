use tracing::{debug, info, warn};

use crate::errors::{ConfigError, TriggerError};
use crate::model::GenerationRequest;
use crate::trigger::GenerationTrigger;

use super::config::{DiscordClientConfig, Routing};

const COMMAND_NAME: &str = "imagine";
const COMMAND_VERSION: &str = "1237876415471554623";
/// Application command invocation.
const INTERACTION_TYPE: u8 = 2;
const CHAT_INPUT_COMMAND: u8 = 1;
const STRING_OPTION: u8 = 3;

/// Starts generations by invoking the service's slash command.
pub struct DiscordTrigger {
    client: reqwest::Client,
    config: DiscordClientConfig,
}

impl DiscordTrigger {
    pub fn new(config: DiscordClientConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::invalid("http_client", format!("failed to build client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait::async_trait]
impl GenerationTrigger for DiscordTrigger {
    async fn trigger(&self, prompt: &str) -> Result<GenerationRequest, TriggerError> {
        let routing = self.config.routing()?;
        let request = GenerationRequest::new(prompt);
        let session_id = uuid::Uuid::new_v4().simple().to_string();
        let body = build_interaction_payload(
            &self.config,
            routing,
            prompt,
            request.correlation_token.as_str(),
            &session_id,
        );
        debug!(token = %request.correlation_token, channel = %routing.channel_id, "invoking generation command");

        let response = self
            .client
            .post(self.config.interactions_url())
            .header(reqwest::header::AUTHORIZATION, routing.user_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| TriggerError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            warn!(token = %request.correlation_token, status = status.as_u16(), "generation command rejected");
            return Err(TriggerError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(token = %request.correlation_token, "generation command accepted");
        Ok(request)
    }
}

pub(crate) fn build_interaction_payload(
    config: &DiscordClientConfig,
    routing: Routing<'_>,
    prompt: &str,
    nonce: &str,
    session_id: &str,
) -> serde_json::Value {
    serde_json::json!({
        "type": INTERACTION_TYPE,
        "application_id": config.application_id,
        "guild_id": routing.guild_id,
        "channel_id": routing.channel_id,
        "session_id": session_id,
        "nonce": nonce,
        "data": {
            "version": COMMAND_VERSION,
            "id": config.command_id,
            "name": COMMAND_NAME,
            "type": CHAT_INPUT_COMMAND,
            "options": [{
                "type": STRING_OPTION,
                "name": "prompt",
                "value": prompt,
            }],
            "application_command": {
                "id": config.command_id,
                "type": CHAT_INPUT_COMMAND,
                "application_id": config.application_id,
                "version": COMMAND_VERSION,
                "name": COMMAND_NAME,
                "description": "Create images with Midjourney",
                "options": [{
                    "type": STRING_OPTION,
                    "name": "prompt",
                    "description": "The prompt to imagine",
                    "required": true,
                }],
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_routing_nonce_and_prompt() {
        let config = DiscordClientConfig::new("user", "guild-1", "chan-1");
        let routing = config.routing().expect("routing");
        let payload = build_interaction_payload(&config, routing, "a red fox", "1700000000000", "sess");

        assert_eq!(payload["type"], 2);
        assert_eq!(payload["application_id"], "936929561302675456");
        assert_eq!(payload["guild_id"], "guild-1");
        assert_eq!(payload["channel_id"], "chan-1");
        assert_eq!(payload["nonce"], "1700000000000");
        assert_eq!(payload["session_id"], "sess");
        assert_eq!(payload["data"]["id"], "938956540159881230");
        assert_eq!(payload["data"]["name"], "imagine");
        let options = payload["data"]["options"].as_array().expect("options");
        assert_eq!(options.len(), 1);
        assert_eq!(options[0]["value"], "a red fox");
    }

    #[tokio::test]
    async fn missing_routing_fails_before_any_request() {
        let mut config = DiscordClientConfig::new("user", "guild", "chan")
            // Unroutable; the call must not get this far.
            .api_base("http://127.0.0.1:9");
        config.channel_id = None;
        let trigger = DiscordTrigger::new(config).expect("client");
        let err = trigger.trigger("prompt").await.expect_err("config");
        assert!(matches!(err, TriggerError::Config(ConfigError::Missing { .. })));
    }
}
