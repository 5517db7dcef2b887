//! Channel adapters.
//!
//! An adapter translates a transport's native messages into bus envelopes and
//! back. The [`ChannelManager`] keeps one reconnecting supervisor per adapter
//! running and routes outbound traffic to the adapter it is addressed to.

pub mod error;
pub mod manager;
pub mod plugin;
pub mod reconnect;
pub mod stdio;

pub use {
    error::{Error, Result},
    manager::ChannelManager,
    plugin::ChannelAdapter,
    reconnect::{Backoff, supervise},
    stdio::{STDIO_CHANNEL, StdioChannel},
};
