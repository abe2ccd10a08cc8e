use std::time::Duration;

use crate::config::{DEFAULT_API_BASE, DEFAULT_APPLICATION_ID, DEFAULT_IMAGINE_COMMAND_ID, ServiceConfig};
use crate::errors::ConfigError;

/// Configuration for the command-invocation client.
#[derive(Clone, Debug)]
pub struct DiscordClientConfig {
    pub user_token: Option<String>,
    pub guild_id: Option<String>,
    pub channel_id: Option<String>,
    pub application_id: String,
    pub command_id: String,
    /// Base URL of the API. Overridable for proxies or local test servers.
    pub api_base: String,
    pub timeout: Duration,
}

/// Routing identifiers that must all be present before a request goes out.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Routing<'a> {
    pub user_token: &'a str,
    pub guild_id: &'a str,
    pub channel_id: &'a str,
}

impl DiscordClientConfig {
    pub fn new(
        user_token: impl Into<String>,
        guild_id: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Self {
        Self {
            user_token: Some(user_token.into()),
            guild_id: Some(guild_id.into()),
            channel_id: Some(channel_id.into()),
            application_id: DEFAULT_APPLICATION_ID.to_string(),
            command_id: DEFAULT_IMAGINE_COMMAND_ID.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn from_service(service: &ServiceConfig) -> Self {
        Self {
            user_token: service.user_token.clone(),
            guild_id: service.guild_id.clone(),
            channel_id: service.channel_id.clone(),
            application_id: service.application_id.clone(),
            command_id: service.command_id.clone(),
            api_base: service.api_base.clone(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn interactions_url(&self) -> String {
        format!("{}/api/v9/interactions", self.api_base.trim_end_matches('/'))
    }

    /// Borrows the routing identifiers, naming every one that is missing.
    pub(crate) fn routing(&self) -> Result<Routing<'_>, ConfigError> {
        fn present(v: &Option<String>) -> Option<&str> {
            v.as_deref().map(str::trim).filter(|v| !v.is_empty())
        }
        let (user_token, guild_id, channel_id) = (
            present(&self.user_token),
            present(&self.guild_id),
            present(&self.channel_id),
        );
        match (user_token, guild_id, channel_id) {
            (Some(user_token), Some(guild_id), Some(channel_id)) => Ok(Routing {
                user_token,
                guild_id,
                channel_id,
            }),
            _ => {
                let keys = [
                    ("DISCORD_USER_TOKEN", user_token.is_none()),
                    ("DISCORD_GUILD_ID", guild_id.is_none()),
                    ("DISCORD_CHANNEL_ID", channel_id.is_none()),
                ]
                .into_iter()
                .filter(|(_, missing)| *missing)
                .map(|(key, _)| key.to_string())
                .collect();
                Err(ConfigError::Missing { keys })
            }
        }
    }
}
