//! Per-conversation dispatch of inbound messages.
//!
//! The [`Dispatcher`] drains the bus, serializes processing per session key,
//! keeps every in-flight unit cancellable, and answers `/stop` inline.
//! Auxiliary work spawned by a processing step is tracked by the
//! [`SubagentManager`] so it can be cancelled together with the session.

pub mod dispatcher;
pub mod processor;
pub mod registry;
pub mod subagent;

pub use {
    dispatcher::{DispatchConfig, Dispatcher},
    processor::{MessageProcessor, ProcessContext, SessionRef},
    registry::{SessionRegistry, StopReport},
    subagent::{SubagentInfo, SubagentManager},
};
