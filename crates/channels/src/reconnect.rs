//! Connect/listen supervision with exponential backoff.

use std::{sync::Arc, time::Duration};

use {
    switchyard_bus::InboundSender,
    switchyard_config::ReconnectConfig,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::plugin::ChannelAdapter;

/// Doubling delay, capped at a maximum.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// The delay to wait now. Each call doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl From<ReconnectConfig> for Backoff {
    fn from(cfg: ReconnectConfig) -> Self {
        Self::new(
            Duration::from_millis(cfg.initial_delay_ms),
            Duration::from_millis(cfg.max_delay_ms),
        )
    }
}

/// Keep `adapter` connected and listening until `cancel` fires or the
/// adapter reports that its transport has ended.
///
/// Failures are logged and retried; nothing is published to the bus.
pub async fn supervise(
    adapter: Arc<dyn ChannelAdapter>,
    sink: InboundSender,
    cancel: CancellationToken,
    mut backoff: Backoff,
) {
    let channel = adapter.id().to_string();
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let result = match adapter.connect().await {
            Ok(()) => {
                info!(channel = %channel, "channel connected");
                backoff.reset();
                adapter.listen(sink.clone(), cancel.clone()).await
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!(channel = %channel, "channel closed");
                break;
            },
            Err(e) if cancel.is_cancelled() => {
                debug!(channel = %channel, error = %e, "channel error during shutdown");
                break;
            },
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(
                    channel = %channel,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "channel connection lost, reconnecting after delay"
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {},
                }
            },
        }
    }
    debug!(channel = %channel, "channel supervisor stopped");
}
