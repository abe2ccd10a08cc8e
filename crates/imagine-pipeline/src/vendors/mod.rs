//! HTTP implementations of the pipeline's collaborator traits.
//!
//! Vendor-specific configuration lives here so the core pipeline stays provider-agnostic.
pub mod discord;
pub mod gemini;
pub mod supabase;
