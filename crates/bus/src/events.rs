//! Envelopes carried by the bus.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Channel used for messages synthesized by the scheduler.
pub const CRON_CHANNEL: &str = "cron";

/// Channel used for internal announcements (subagent results).
pub const SYSTEM_CHANNEL: &str = "system";

/// Metadata keys understood by the core. Everything else is opaque.
pub mod meta {
    /// Payload kind of the job that produced the message (`system_event` / `agent_turn`).
    pub const KIND: &str = "kind";
    /// Id of the job that produced the message.
    pub const JOB_ID: &str = "job_id";
    /// Id of the subagent that produced the message.
    pub const SUBAGENT_ID: &str = "subagent_id";
    /// Channel the eventual reply must be sent to.
    pub const REPLY_CHANNEL: &str = "reply_channel";
    /// Chat id the eventual reply must be sent to.
    pub const REPLY_CHAT_ID: &str = "reply_chat_id";
}

/// Internal channels have no transport behind them.
pub fn is_internal_channel(channel: &str) -> bool {
    channel == CRON_CHANNEL || channel == SYSTEM_CHANNEL
}

/// Build the `channel:chat_id` key that groups a conversation.
pub fn session_key(channel: &str, chat_id: &str) -> String {
    format!("{channel}:{chat_id}")
}

/// A message arriving from a channel adapter (or synthesized internally).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: String,
    pub sender_id: String,
    pub chat_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn session_key(&self) -> String {
        session_key(&self.channel, &self.chat_id)
    }

    /// Explicit reply destination recorded in metadata, if both halves are present.
    pub fn reply_route(&self) -> Option<(&str, &str)> {
        let channel = self.metadata.get(meta::REPLY_CHANNEL)?;
        let chat_id = self.metadata.get(meta::REPLY_CHAT_ID)?;
        Some((channel.as_str(), chat_id.as_str()))
    }

    /// Messages on internal channels have no transport to answer on.
    pub fn is_internal(&self) -> bool {
        is_internal_channel(&self.channel)
    }
}

/// A message on its way back to a channel adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            metadata: HashMap::new(),
        }
    }

    /// Reply addressed to the conversation `inbound` came from.
    pub fn reply_to(inbound: &InboundMessage, content: impl Into<String>) -> Self {
        Self::new(inbound.channel.clone(), inbound.chat_id.clone(), content)
    }

    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn session_key(&self) -> String {
        session_key(&self.channel, &self.chat_id)
    }

    pub fn is_internal(&self) -> bool {
        is_internal_channel(&self.channel)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_joins_channel_and_chat() {
        let msg = InboundMessage::new("telegram", "u1", "42", "hi");
        assert_eq!(msg.session_key(), "telegram:42");
    }

    #[test]
    fn reply_route_needs_both_keys() {
        let msg = InboundMessage::new(CRON_CHANNEL, "cron", "job1", "tick")
            .with_meta(meta::REPLY_CHANNEL, "slack");
        assert!(msg.reply_route().is_none());

        let msg = msg.with_meta(meta::REPLY_CHAT_ID, "C123");
        assert_eq!(msg.reply_route(), Some(("slack", "C123")));
    }

    #[test]
    fn inbound_metadata_defaults_when_missing() {
        let json = r#"{"channel":"cli","sender_id":"u","chat_id":"c","content":"x"}"#;
        let msg: InboundMessage = serde_json::from_str(json).unwrap();
        assert!(msg.metadata.is_empty());
        assert!(!msg.is_internal());
    }

    #[test]
    fn reply_to_mirrors_inbound_address() {
        let inbound = InboundMessage::new("rabbitmq", "app", "corr-1", "ping");
        let out = OutboundMessage::reply_to(&inbound, "pong");
        assert_eq!(out.session_key(), inbound.session_key());
    }
}
