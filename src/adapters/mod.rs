//! Adapters module - client-facing channels.
//!
//! Each adapter drives agent sessions for one kind of client and implements
//! the [`Channel`] trait for uniform start/stop handling.
//!
//! # Supported Channels
//!
//! - **WebSocket**: the gateway, one session per connection
//! - **CLI**: local REPL over a single session
//!
//! # Adding a New Channel
//!
//! 1. Create a new file (e.g., `sse.rs`)
//! 2. Implement the [`Channel`] trait
//! 3. Add to [`ChannelRegistry`]

pub mod cli;
pub mod protocol;
pub mod websocket;

pub use cli::CliChannel;
pub use websocket::Gateway;

/// Channel trait for client adapters.
///
/// All channel implementations must be [`Send`] + [`Sync`] for async compatibility.
pub trait Channel: Send + Sync {
    /// Channel name (e.g., "websocket", "cli").
    fn name(&self) -> &str;

    /// Start serving; returns once the channel is stopped or its input ends.
    fn start(&self) -> impl std::future::Future<Output = crate::Result<()>> + Send;

    /// Stop the channel.
    fn stop(&self) -> impl std::future::Future<Output = crate::Result<()>> + Send;
}

/// Channel registry: metadata about available channels.
pub struct ChannelRegistry;

impl ChannelRegistry {
    /// List all available channel names.
    pub fn available() -> &'static [&'static str] {
        &["websocket", "cli"]
    }

    /// Get a human-readable description of a channel.
    pub fn description(name: &str) -> &'static str {
        match name {
            "websocket" => "WebSocket gateway, one agent session per connection",
            "cli" => "Interactive command line interface",
            _ => "Unknown channel",
        }
    }
}
