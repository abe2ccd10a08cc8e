use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::errors::{PipelineError, UploadError};

/// Number of tiles in a composite grid.
pub const TILE_COUNT: usize = 4;

/// Locally generated identifier for one in-flight generation.
///
/// Tokens are time-based and strictly increasing within a process. They are only used for
/// local bookkeeping: the generation service does not reliably echo them back.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct CorrelationToken(String);

static LAST_TOKEN: AtomicU64 = AtomicU64::new(0);

impl CorrelationToken {
    /// Issues the next token: `max(now_millis, previous + 1)`.
    pub fn next() -> Self {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let mut current = LAST_TOKEN.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(current + 1);
            match LAST_TOKEN.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Self(candidate.to_string()),
                Err(observed) => current = observed,
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One generation request, alive for the duration of a single orchestration call.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GenerationRequest {
    pub correlation_token: CorrelationToken,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
}

impl GenerationRequest {
    /// Creates a request with a fresh token.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            correlation_token: CorrelationToken::next(),
            prompt: prompt.into(),
            created_at: Utc::now(),
        }
    }
}

/// Terminal value of a completion wait.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CompletionResult {
    pub matched: bool,
    pub image_urls: Vec<String>,
}

impl CompletionResult {
    pub fn matched(image_urls: Vec<String>) -> Self {
        Self {
            matched: true,
            image_urls,
        }
    }

    pub fn unmatched() -> Self {
        Self::default()
    }
}

/// Pixel rectangle of one quadrant inside the composite image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TileRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TileRegion {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// One quadrant of a composite grid, re-encoded.
///
/// Index order is fixed: top-left, top-right, bottom-left, bottom-right.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageTile {
    pub index: usize,
    pub bytes: Bytes,
    pub content_type: String,
}

impl ImageTile {
    /// File extension used when persisting this tile.
    pub fn extension(&self) -> &'static str {
        extension_for(&self.content_type)
    }
}

/// `png` for PNG content types, `jpg` for everything else.
pub fn extension_for(content_type: &str) -> &'static str {
    if content_type.contains("png") {
        "png"
    } else {
        "jpg"
    }
}

/// Result of persisting a tile set.
///
/// `paths` is either the complete set (one per tile) or empty; it is never partial.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadOutcome {
    pub paths: Vec<String>,
    pub error: Option<UploadError>,
}

impl UploadOutcome {
    pub fn stored(paths: Vec<String>) -> Self {
        Self { paths, error: None }
    }

    pub fn failed(error: UploadError) -> Self {
        Self {
            paths: Vec::new(),
            error: Some(error),
        }
    }

    /// Warning text for callers that keep going without images.
    pub fn warning(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

/// Final result of one orchestrated generation.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct GenerationOutcome {
    pub request_id: uuid::Uuid,
    pub correlation_token: CorrelationToken,
    /// Image references carried by the completion event.
    pub image_urls: Vec<String>,
    #[serde(skip)]
    pub tiles: Vec<ImageTile>,
    /// Storage paths, empty when the upload failed.
    pub paths: Vec<String>,
    /// Upload warning, set when `paths` is empty because a tile failed.
    pub upload_error: Option<String>,
}

/// Result of the analysis-then-generation flow.
///
/// The analysis text is always present; image generation failures are kept beside it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JournalOutcome {
    pub analysis_text: String,
    pub image_prompt: Option<String>,
    pub generation: Option<Result<GenerationOutcome, PipelineError>>,
}
