use {
    async_trait::async_trait,
    switchyard_bus::{InboundSender, OutboundMessage},
    tokio_util::sync::CancellationToken,
};

use crate::Result;

/// Core adapter trait. Each transport implements this.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Channel identifier, matched against `OutboundMessage::channel`.
    fn id(&self) -> &str;

    /// Establish the transport connection.
    async fn connect(&self) -> Result<()>;

    /// Translate incoming traffic into inbound envelopes until the transport
    /// drops or `cancel` fires.
    ///
    /// `Ok(())` means the transport ended for good and the supervisor should
    /// stop. An error means the connection was lost and should be retried.
    async fn listen(&self, sink: InboundSender, cancel: CancellationToken) -> Result<()>;

    /// Deliver one outbound envelope.
    async fn send(&self, msg: &OutboundMessage) -> Result<()>;
}
