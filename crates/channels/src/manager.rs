use std::{collections::HashMap, sync::Arc};

use {
    switchyard_bus::{InboundSender, MessageBus, OutboundMessage},
    switchyard_config::ReconnectConfig,
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result,
    plugin::ChannelAdapter,
    reconnect::{Backoff, supervise},
};

/// Registry of all channel adapters, keyed by channel id.
pub struct ChannelManager {
    adapters: HashMap<String, Arc<dyn ChannelAdapter>>,
    reconnect: ReconnectConfig,
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}

impl ChannelManager {
    pub fn new(reconnect: ReconnectConfig) -> Self {
        Self {
            adapters: HashMap::new(),
            reconnect,
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn ChannelAdapter>> {
        self.adapters.get(id)
    }

    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Spawn one reconnecting supervisor per adapter.
    pub fn start_all(&self, sink: &InboundSender, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        self.adapters
            .values()
            .map(|adapter| {
                info!(channel = %adapter.id(), "starting channel");
                tokio::spawn(supervise(
                    Arc::clone(adapter),
                    sink.clone(),
                    cancel.clone(),
                    Backoff::from(self.reconnect),
                ))
            })
            .collect()
    }

    /// Hand one outbound envelope to the adapter it is addressed to.
    pub async fn deliver(&self, msg: &OutboundMessage) -> Result<()> {
        let adapter = self
            .adapters
            .get(&msg.channel)
            .ok_or_else(|| Error::unknown_channel(msg.channel.as_str()))?;
        adapter.send(msg).await
    }

    /// Drain the outbound queue until `cancel` fires. Failures are logged and
    /// the message is dropped.
    pub async fn route_outbound(&self, bus: &MessageBus, cancel: CancellationToken) {
        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = bus.consume_outbound() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            debug!(channel = %msg.channel, chat_id = %msg.chat_id, "routing outbound message");
            if let Err(e) = self.deliver(&msg).await {
                warn!(
                    channel = %msg.channel,
                    chat_id = %msg.chat_id,
                    error = %e,
                    "failed to deliver outbound message"
                );
            }
        }
        debug!("outbound router stopped");
    }
}
