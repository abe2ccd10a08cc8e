//! Common imports for typical pipeline usage.
pub use crate::{
    CompletionResult, ConfigError, GenerationOrchestrator, GenerationOutcome, GenerationRequest,
    JournalOutcome, JsonLinesConnector, PipelineConfig, PipelineError, StreamConnector,
    StreamEvent, init_observability,
};
