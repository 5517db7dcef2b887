//! In-process queues between channel adapters and the dispatcher.

use tokio::sync::{Mutex, mpsc};

use crate::events::{InboundMessage, OutboundMessage};

/// Two independent unbounded FIFO queues.
///
/// Publishing never blocks. Consuming waits until a message is available.
/// Nothing is persisted: messages still queued at shutdown are dropped.
pub struct MessageBus {
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<InboundMessage>>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: Mutex<mpsc::UnboundedReceiver<OutboundMessage>>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: Mutex::new(outbound_rx),
        }
    }

    pub fn publish_inbound(&self, msg: InboundMessage) {
        tracing::debug!(
            channel = %msg.channel,
            chat_id = %msg.chat_id,
            "inbound message queued"
        );
        // The bus owns a receiver for its whole lifetime, so send cannot fail.
        let _ = self.inbound_tx.send(msg);
    }

    pub fn publish_outbound(&self, msg: OutboundMessage) {
        tracing::debug!(
            channel = %msg.channel,
            chat_id = %msg.chat_id,
            "outbound message queued"
        );
        let _ = self.outbound_tx.send(msg);
    }

    /// Wait for the next inbound message.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        self.inbound_rx.lock().await.recv().await
    }

    /// Wait for the next outbound message.
    pub async fn consume_outbound(&self) -> Option<OutboundMessage> {
        self.outbound_rx.lock().await.recv().await
    }

    /// Cloneable handle for adapters that only ever publish inbound traffic.
    pub fn inbound_sender(&self) -> InboundSender {
        InboundSender {
            tx: self.inbound_tx.clone(),
        }
    }
}

/// Publish-only view of the inbound queue.
#[derive(Clone)]
pub struct InboundSender {
    tx: mpsc::UnboundedSender<InboundMessage>,
}

impl InboundSender {
    /// Returns `false` once the bus has been dropped.
    pub fn publish(&self, msg: InboundMessage) -> bool {
        self.tx.send(msg).is_ok()
    }
}
