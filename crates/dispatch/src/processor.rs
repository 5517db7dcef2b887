//! The seam between the dispatcher and whatever produces replies.

use std::sync::Arc;

use {
    async_trait::async_trait,
    switchyard_bus::{InboundMessage, OutboundMessage, session_key},
    tokio_util::sync::CancellationToken,
};

use crate::subagent::SubagentManager;

/// The conversation a message belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionRef {
    pub channel: String,
    pub chat_id: String,
}

impl SessionRef {
    pub fn new(channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
        }
    }

    pub fn of(msg: &InboundMessage) -> Self {
        Self::new(msg.channel.clone(), msg.chat_id.clone())
    }

    pub fn key(&self) -> String {
        session_key(&self.channel, &self.chat_id)
    }
}

/// Handed to every processing step.
#[derive(Clone)]
pub struct ProcessContext {
    pub session: SessionRef,
    /// Fires when the unit is stopped. Long-running steps should watch it.
    pub cancel: CancellationToken,
    pub subagents: Arc<SubagentManager>,
}

impl ProcessContext {
    pub fn session_key(&self) -> String {
        self.session.key()
    }
}

/// Produces the reply for one inbound message.
///
/// Returning `Ok(None)` means "nothing to say". Errors are opaque to the
/// dispatcher, which logs them and answers with a generic error message.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(
        &self,
        msg: InboundMessage,
        ctx: ProcessContext,
    ) -> anyhow::Result<Option<OutboundMessage>>;
}
