//! Generation trigger over the chat service's command-invocation endpoint.
mod adapter;
mod config;

pub use adapter::DiscordTrigger;
pub use config::DiscordClientConfig;
