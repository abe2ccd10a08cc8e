//! Asynchronous image-generation pipeline.
//!
//! A prompt is sent to a slow external generation service; the finished 2x2 grid arrives later
//! as an event on a shared notification stream. The pipeline correlates that event with the
//! waiting request, enforces a timeout, splits the grid into four tiles and persists them.
//!
//! Vendor-specific APIs are namespaced under `vendors::*`.
//!
//! # Mock pipeline
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use imagine_pipeline::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), PipelineError> {
//! let connector = Arc::new(JsonLinesConnector::new("events.jsonl"));
//! let orchestrator = GenerationOrchestrator::from_config(&PipelineConfig::mock(), connector)?;
//!
//! let outcome = orchestrator.generate("a lotus on dark water").await?;
//! println!("{:?}", outcome.paths);
//! # Ok(())
//! # }
//! ```

/// Text-analysis collaborator and response parsing.
pub mod analysis;
/// Environment configuration and validation.
pub mod config;
/// Composite download and quadrant splitting.
pub mod decompose;
/// Error taxonomy for every pipeline phase.
pub mod errors;
/// Notification stream: events, hub, shared connection.
pub mod event;
/// Completion listener and its matching rules.
pub mod listener;
/// Requests, tokens, tiles and outcomes.
pub mod model;
pub mod observability;
/// Orchestrator entry point and builder.
pub mod orchestrator;
/// Retry policy for tile writes.
pub mod policy;
/// Common imports for typical usage.
pub mod prelude;
/// Generation trigger contract.
pub mod trigger;
/// Durable tile upload and object stores.
pub mod upload;
/// HTTP implementations of the collaborator traits.
pub mod vendors;

pub use analysis::{AnalysisResult, AnalysisService, MockAnalysis, parse_analysis_response};
pub use config::PipelineConfig;
pub use decompose::{AssetFetcher, GridDecomposer, HttpAssetFetcher, quadrant_regions, split_grid};
pub use errors::{
    AnalysisError, ConfigError, DecomposeError, ListenError, Phase, PipelineError, StorageError,
    TriggerError, UploadError,
};
pub use event::{
    EventFetcher, EventHub, EventKind, JsonLinesConnector, SharedStream, StreamConnector,
    StreamEvent, Subscription,
};
pub use listener::{CompletionListener, CompletionWaiter, ListenerIdentity, MockListener};
pub use model::{
    CompletionResult, CorrelationToken, GenerationOutcome, GenerationRequest, ImageTile,
    JournalOutcome, TileRegion, UploadOutcome,
};
pub use observability::init_observability;
pub use orchestrator::{GenerationOrchestrator, GenerationOrchestratorBuilder};
pub use policy::RetryPolicy;
pub use trigger::{GenerationTrigger, MockTrigger};
pub use upload::{DurableUploader, MemoryObjectStore, ObjectStore};
