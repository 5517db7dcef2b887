//! Operator controls exposed as tools.
//!
//! Each tool takes a JSON argument object, validates it into a closed action
//! enum, and answers with human-readable text.

pub mod cron_tool;
pub mod events_tool;
pub mod registry;

pub use {
    cron_tool::{CronAction, CronTool},
    events_tool::{EventsAction, EventsTool},
    registry::{AgentTool, ToolContext, ToolRegistry},
};
