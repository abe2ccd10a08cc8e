//! Pipeline configuration read from the environment.
//!
//! Validation is eager: [`PipelineConfig::from_env`] reports every missing key at once, before
//! any component is built or any request is attempted.

use std::path::PathBuf;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::policy::RetryPolicy;

pub const DEFAULT_APPLICATION_ID: &str = "936929561302675456";
pub const DEFAULT_IMAGINE_COMMAND_ID: &str = "938956540159881230";
pub const DEFAULT_API_BASE: &str = "https://discord.com";
pub const DEFAULT_BUCKET: &str = "analysis-images";
pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_UPLOAD_ATTEMPTS: u32 = 2;
pub const DEFAULT_UPLOAD_BACKOFF_MS: u64 = 0;
pub const DEFAULT_TILE_QUALITY: u8 = 90;

/// Identity and routing of the external generation service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Credential used on the command-invocation endpoint.
    pub user_token: Option<String>,
    pub guild_id: Option<String>,
    pub channel_id: Option<String>,
    /// Application id of the service; completion events are authored by it.
    pub application_id: String,
    pub command_id: String,
    pub api_base: String,
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self {
            user_token: None,
            guild_id: None,
            channel_id: None,
            application_id: DEFAULT_APPLICATION_ID.to_string(),
            command_id: DEFAULT_IMAGINE_COMMAND_ID.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Object storage for tiles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageConfig {
    pub bucket: String,
    pub url: Option<String>,
    pub service_key: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_BUCKET.to_string(),
            url: None,
            service_key: None,
        }
    }
}

/// Text-analysis collaborator settings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnalysisConfig {
    pub mock: bool,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub prompt_path: Option<PathBuf>,
}

/// Full configuration of one pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Swap the trigger and listener for their mock implementations.
    pub mock_mode: bool,
    pub service: ServiceConfig,
    /// Credential of the live notification-stream connection.
    ///
    /// Checked here so a misconfigured deployment fails before the first trigger. The connector
    /// is supplied by the caller of `GenerationOrchestrator::from_config` and authenticates with
    /// it; the file-replay `JsonLinesConnector` has no login and ignores it.
    pub stream_token: Option<String>,
    pub storage: StorageConfig,
    pub analysis: AnalysisConfig,
    /// Ceiling for one completion wait.
    pub timeout: Duration,
    pub upload_policy: RetryPolicy,
    /// Serialize trigger+wait per channel (see `CompletionListener` on weak correlation).
    pub serialize_per_channel: bool,
    pub tile_quality: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mock_mode: false,
            service: ServiceConfig::new(),
            stream_token: None,
            storage: StorageConfig::default(),
            analysis: AnalysisConfig::default(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            upload_policy: RetryPolicy::attempts(DEFAULT_UPLOAD_ATTEMPTS),
            serialize_per_channel: false,
            tile_quality: DEFAULT_TILE_QUALITY,
        }
    }
}

fn env_first(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| {
        std::env::var(k)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_bool(key: &str) -> Result<bool, ConfigError> {
    match env_first(&[key]) {
        None => Ok(false),
        Some(raw) => parse_bool(&raw)
            .ok_or_else(|| ConfigError::invalid(key, format!("expected a boolean, got `{raw}`"))),
    }
}

fn env_number<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env_first(&[key]) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::invalid(key, format!("expected a number, got `{raw}`"))),
    }
}

impl PipelineConfig {
    /// Reads and validates configuration from the process environment.
    ///
    /// Unset optional values keep their defaults. Mock mode (`USE_AI_MOCKS`) drops the
    /// requirement for service, stream and storage credentials.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mock_mode = env_bool("USE_AI_MOCKS")?;
        let analysis_mock = env_bool("USE_MOCKS")? || mock_mode;
        let timeout_ms: u64 = env_number("IMAGINE_TIMEOUT_MS", DEFAULT_TIMEOUT_MS)?;
        let attempts: u32 = env_number("IMAGINE_UPLOAD_ATTEMPTS", DEFAULT_UPLOAD_ATTEMPTS)?;
        let backoff_ms: u64 = env_number("IMAGINE_UPLOAD_BACKOFF_MS", DEFAULT_UPLOAD_BACKOFF_MS)?;
        if attempts == 0 {
            return Err(ConfigError::invalid(
                "IMAGINE_UPLOAD_ATTEMPTS",
                "at least one attempt is required",
            ));
        }

        let config = Self {
            mock_mode,
            service: ServiceConfig {
                user_token: env_first(&["DISCORD_USER_TOKEN"]),
                guild_id: env_first(&["DISCORD_GUILD_ID"]),
                channel_id: env_first(&["DISCORD_CHANNEL_ID"]),
                application_id: env_first(&["MIDJOURNEY_APP_ID"])
                    .unwrap_or_else(|| DEFAULT_APPLICATION_ID.to_string()),
                command_id: env_first(&["MIDJOURNEY_IMAGINE_COMMAND_ID"])
                    .unwrap_or_else(|| DEFAULT_IMAGINE_COMMAND_ID.to_string()),
                api_base: env_first(&["DISCORD_API_BASE"])
                    .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            },
            stream_token: env_first(&["DISCORD_BOT_TOKEN"]),
            storage: StorageConfig {
                bucket: std::env::var("STORAGE_BUCKET")
                    .map(|v| v.trim().to_string())
                    .unwrap_or_else(|_| DEFAULT_BUCKET.to_string()),
                url: env_first(&["SUPABASE_URL"]),
                service_key: env_first(&["SUPABASE_SERVICE_ROLE_KEY"]),
            },
            analysis: AnalysisConfig {
                mock: analysis_mock,
                api_key: env_first(&["GEMINI_API_KEY"]),
                model: env_first(&["GEMINI_MODEL"]),
                prompt_path: env_first(&["ANALYSIS_PROMPT_PATH"]).map(PathBuf::from),
            },
            timeout: Duration::from_millis(timeout_ms),
            upload_policy: RetryPolicy::attempts(attempts).with_backoff_ms(backoff_ms),
            serialize_per_channel: env_bool("IMAGINE_SERIALIZE_PER_CHANNEL")?,
            tile_quality: DEFAULT_TILE_QUALITY,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that every setting needed by the selected implementations is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid(
                "IMAGINE_TIMEOUT_MS",
                "timeout must be greater than 0",
            ));
        }
        if self.tile_quality == 0 || self.tile_quality > 100 {
            return Err(ConfigError::invalid("tile_quality", "must be within 1..=100"));
        }

        let mut missing = Vec::new();
        let mut require = |key: &str, value: Option<&str>| {
            if value.is_none_or(|v| v.trim().is_empty()) {
                missing.push(key.to_string());
            }
        };

        if !self.mock_mode {
            require("DISCORD_USER_TOKEN", self.service.user_token.as_deref());
            require("DISCORD_GUILD_ID", self.service.guild_id.as_deref());
            require("DISCORD_CHANNEL_ID", self.service.channel_id.as_deref());
            require("DISCORD_BOT_TOKEN", self.stream_token.as_deref());
            require("MIDJOURNEY_APP_ID", Some(self.service.application_id.as_str()));
            require("SUPABASE_URL", self.storage.url.as_deref());
            require("SUPABASE_SERVICE_ROLE_KEY", self.storage.service_key.as_deref());
        }
        require("STORAGE_BUCKET", Some(self.storage.bucket.as_str()));
        if !self.analysis.mock {
            require("GEMINI_API_KEY", self.analysis.api_key.as_deref());
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Missing { keys: missing })
        }
    }

    /// A configuration that runs entirely on mocks and in-memory storage.
    pub fn mock() -> Self {
        Self {
            mock_mode: true,
            analysis: AnalysisConfig {
                mock: true,
                ..AnalysisConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_upload_attempts(mut self, attempts: u32) -> Self {
        let backoff_ms = self.upload_policy.initial_backoff_ms;
        self.upload_policy = RetryPolicy::attempts(attempts).with_backoff_ms(backoff_ms);
        self
    }

    pub fn with_upload_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.upload_policy = self.upload_policy.with_backoff_ms(backoff_ms);
        self
    }

    /// Channel the listener watches and the trigger posts into.
    pub fn channel_id(&self) -> Option<&str> {
        self.service.channel_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> PipelineConfig {
        PipelineConfig {
            service: ServiceConfig {
                user_token: Some("user".into()),
                guild_id: Some("guild".into()),
                channel_id: Some("chan".into()),
                ..ServiceConfig::new()
            },
            stream_token: Some("bot".into()),
            storage: StorageConfig {
                url: Some("https://storage.test".into()),
                service_key: Some("key".into()),
                ..StorageConfig::default()
            },
            analysis: AnalysisConfig {
                api_key: Some("gemini".into()),
                ..AnalysisConfig::default()
            },
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.timeout, Duration::from_millis(120_000));
        assert_eq!(config.upload_policy.total_attempts(), 2);
        assert_eq!(config.storage.bucket, "analysis-images");
        assert_eq!(config.tile_quality, 90);
    }

    #[test]
    fn complete_config_validates() {
        assert!(complete().validate().is_ok());
    }

    #[test]
    fn missing_credentials_are_reported_together() {
        let config = PipelineConfig {
            stream_token: None,
            service: ServiceConfig {
                user_token: Some("  ".into()),
                ..complete().service
            },
            ..complete()
        };
        let err = config.validate().expect_err("should fail");
        assert_eq!(
            err,
            ConfigError::Missing {
                keys: vec!["DISCORD_USER_TOKEN".into(), "DISCORD_BOT_TOKEN".into()],
            }
        );
    }

    #[test]
    fn mock_mode_skips_service_credentials() {
        assert!(PipelineConfig::mock().validate().is_ok());
    }

    #[test]
    fn blank_bucket_is_rejected_even_in_mock_mode() {
        let mut config = PipelineConfig::mock();
        config.storage.bucket = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing { keys }) if keys == vec!["STORAGE_BUCKET".to_string()]
        ));
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let config = PipelineConfig::mock().with_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn upload_backoff_survives_attempt_changes() {
        let config = PipelineConfig::mock()
            .with_upload_backoff_ms(50)
            .with_upload_attempts(3);
        assert_eq!(config.upload_policy.total_attempts(), 3);
        assert_eq!(
            config.upload_policy.backoff_duration(0),
            Duration::from_millis(50)
        );
        assert_eq!(
            config.upload_policy.backoff_duration(1),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
