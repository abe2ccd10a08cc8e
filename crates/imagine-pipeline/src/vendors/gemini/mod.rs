//! Text analysis over the Gemini generateContent API, plus the model catalog.
mod adapter;
mod config;
mod models;

pub use adapter::GeminiAnalysis;
pub use config::GeminiClientConfig;
pub use models::{DEFAULT_MODEL_ID, GEMINI_MODELS, GeminiModel, find_model};
