//! Object storage over the Supabase storage REST API.
mod adapter;
mod config;

pub use adapter::SupabaseStore;
pub use config::SupabaseStoreConfig;
