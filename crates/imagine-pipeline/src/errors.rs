use std::time::Duration;

use crate::model::CompletionResult;

/// Invalid or incomplete pipeline configuration.
///
/// Always fatal: raised before any outbound request is attempted and never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// One or more required settings are absent or blank.
    #[error("missing configuration: {}", keys.join(", "))]
    Missing { keys: Vec<String> },
    /// A setting is present but unusable.
    #[error("invalid configuration for {key}: {message}")]
    Invalid { key: String, message: String },
}

impl ConfigError {
    pub fn missing(key: impl Into<String>) -> Self {
        Self::Missing {
            keys: vec![key.into()],
        }
    }

    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// The generation request could not be started.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TriggerError {
    /// Credentials or routing identifiers are missing.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The command endpoint answered with a non-success status.
    #[error("generation service rejected the request with status {status}")]
    Rejected { status: u16, body: String },
    /// The request never got an answer.
    #[error("generation request failed: {0}")]
    Transport(String),
}

/// A completion wait ended without a matching event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListenError {
    /// No completed result was observed within the ceiling.
    #[error("no completed result for request {token} after {}s", waited.as_secs())]
    Timeout { token: String, waited: Duration },
    /// The shared notification stream could not be established.
    #[error("notification stream unavailable: {0}")]
    Connection(String),
    /// The notification stream was shut down while waiting.
    #[error("notification stream closed while waiting")]
    StreamClosed,
}

impl ListenError {
    /// The terminal completion value for a failed wait (never matched).
    pub fn result(&self) -> CompletionResult {
        CompletionResult::unmatched()
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Re-fetching the full body of a partial event failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to fetch full event {message_id}: {message}")]
pub struct FetchError {
    pub message_id: String,
    pub message: String,
}

/// Establishing the shared stream connection failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stream connection failed: {0}")]
pub struct ConnectionError(pub String);

/// The composite asset could not be retrieved or split.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecomposeError {
    /// The asset could not be downloaded.
    #[error("failed to fetch {url}: {message}")]
    Fetch {
        url: String,
        status: Option<u16>,
        message: String,
    },
    /// The bytes are not an image with usable dimensions.
    #[error("unsupported composite image: {0}")]
    Format(String),
    /// A tile could not be re-encoded.
    #[error("failed to encode tile: {0}")]
    Encode(String),
}

/// A single object-store write failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("storage rejected write with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("storage transport error: {0}")]
    Transport(String),
}

/// One tile that could not be persisted after all attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileFailure {
    pub index: usize,
    pub path: String,
    pub attempts: u32,
    pub error: StorageError,
}

/// Tile upload failed for at least one tile; no paths are reported.
///
/// Non-fatal: callers keep the rest of their result and drop the images.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("image upload failed; analysis will be saved without images ({} tile(s) failed)", failures.len())]
pub struct UploadError {
    pub failures: Vec<TileFailure>,
}

/// Errors from the text-analysis collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("analysis provider error: {message}")]
    Provider {
        status: Option<u16>,
        message: String,
    },
    #[error("analysis transport error: {0}")]
    Transport(String),
    #[error("analysis protocol error: {0}")]
    Protocol(String),
}

/// Phase of the pipeline an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Config,
    Validation,
    Analysis,
    Trigger,
    Listen,
    Decompose,
}

/// Top-level error returned by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("analysis failed: {0}")]
    Analysis(#[source] AnalysisError),
    #[error("trigger failed: {0}")]
    Trigger(#[source] TriggerError),
    #[error("listen failed: {0}")]
    Listen(#[source] ListenError),
    /// The completion event carried no usable image reference.
    #[error("completion event carried no image reference")]
    NoAsset,
    #[error("post-processing failed: {0}")]
    Decompose(#[source] DecomposeError),
}

impl PipelineError {
    pub fn phase(&self) -> Phase {
        match self {
            Self::Config(_) => Phase::Config,
            Self::Validation(_) => Phase::Validation,
            Self::Analysis(_) => Phase::Analysis,
            Self::Trigger(TriggerError::Config(_)) => Phase::Config,
            Self::Trigger(_) => Phase::Trigger,
            Self::Listen(_) | Self::NoAsset => Phase::Listen,
            Self::Decompose(_) => Phase::Decompose,
        }
    }

    /// Short user-facing description of the failure.
    pub fn summary(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::Trigger(TriggerError::Config(_)) => {
                "image generation is not configured"
            }
            Self::Validation(_) => "invalid input",
            Self::Analysis(_) => "text analysis failed",
            Self::Trigger(_) => "generation could not be started",
            Self::Listen(ListenError::Timeout { .. }) => "generation timed out",
            Self::Listen(_) | Self::NoAsset => "generated images were not received",
            Self::Decompose(_) => "post-processing failed",
        }
    }
}

impl From<TriggerError> for PipelineError {
    fn from(value: TriggerError) -> Self {
        Self::Trigger(value)
    }
}

impl From<ListenError> for PipelineError {
    fn from(value: ListenError) -> Self {
        Self::Listen(value)
    }
}

impl From<DecomposeError> for PipelineError {
    fn from(value: DecomposeError) -> Self {
        Self::Decompose(value)
    }
}

impl From<AnalysisError> for PipelineError {
    fn from(value: AnalysisError) -> Self {
        Self::Analysis(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_lists_every_key() {
        let err = ConfigError::Missing {
            keys: vec!["DISCORD_USER_TOKEN".into(), "DISCORD_CHANNEL_ID".into()],
        };
        assert_eq!(
            err.to_string(),
            "missing configuration: DISCORD_USER_TOKEN, DISCORD_CHANNEL_ID"
        );
    }

    #[test]
    fn trigger_config_errors_report_config_phase() {
        let err = PipelineError::from(TriggerError::Config(ConfigError::missing("X")));
        assert_eq!(err.phase(), Phase::Config);
        let err = PipelineError::from(TriggerError::Rejected {
            status: 401,
            body: String::new(),
        });
        assert_eq!(err.phase(), Phase::Trigger);
        assert_eq!(err.summary(), "generation could not be started");
    }

    #[test]
    fn timeout_summary_and_result() {
        let listen = ListenError::Timeout {
            token: "1".into(),
            waited: Duration::from_secs(120),
        };
        assert!(!listen.result().matched);
        assert!(listen.to_string().contains("120s"));
        let err = PipelineError::from(listen);
        assert_eq!(err.summary(), "generation timed out");
    }
}
