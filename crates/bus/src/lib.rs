//! Message bus decoupling channel adapters from the dispatcher.
//!
//! Adapters publish [`InboundMessage`]s and consume [`OutboundMessage`]s; the
//! dispatcher and scheduler do the reverse.

pub mod events;
pub mod queue;

pub use {
    events::{
        CRON_CHANNEL, InboundMessage, OutboundMessage, SYSTEM_CHANNEL, is_internal_channel, meta,
        session_key,
    },
    queue::{InboundSender, MessageBus},
};
