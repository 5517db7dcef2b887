//! Line-oriented terminal channel.

use std::io::BufRead;

use {
    async_trait::async_trait,
    switchyard_bus::{InboundMessage, InboundSender, OutboundMessage},
    switchyard_config::StdioConfig,
    tokio::{
        io::{AsyncWrite, AsyncWriteExt},
        sync::{Mutex, mpsc},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error},
};

use crate::{Error, Result, plugin::ChannelAdapter};

pub const STDIO_CHANNEL: &str = "stdio";

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Each non-empty input line becomes one inbound message from a fixed
/// sender in a fixed chat. Replies are written one per line.
pub struct StdioChannel {
    sender_id: String,
    chat_id: String,
    lines: Mutex<mpsc::UnboundedReceiver<String>>,
    writer: Mutex<Writer>,
}

impl StdioChannel {
    /// Read the process stdin on a detached thread and write to stdout.
    ///
    /// The reader thread is not a runtime task, so a pending read never holds
    /// up runtime shutdown.
    pub fn new(config: &StdioConfig) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("stdin-reader".into())
            .spawn(move || {
                for line in std::io::stdin().lock().lines() {
                    match line {
                        Ok(line) => {
                            if tx.send(line).is_err() {
                                break;
                            }
                        },
                        Err(e) => {
                            error!(error = %e, "error reading stdin");
                            break;
                        },
                    }
                }
            })?;
        Ok(Self::with_io(config, rx, tokio::io::stdout()))
    }

    pub fn with_io(
        config: &StdioConfig,
        lines: mpsc::UnboundedReceiver<String>,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            sender_id: config.sender_id.clone(),
            chat_id: config.chat_id.clone(),
            lines: Mutex::new(lines),
            writer: Mutex::new(Box::new(writer)),
        }
    }
}

#[async_trait]
impl ChannelAdapter for StdioChannel {
    fn id(&self) -> &str {
        STDIO_CHANNEL
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn listen(&self, sink: InboundSender, cancel: CancellationToken) -> Result<()> {
        let mut lines = self.lines.lock().await;
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                line = lines.recv() => line,
            };
            let Some(line) = line else {
                debug!("stdin closed");
                return Ok(());
            };
            let content = line.trim();
            if content.is_empty() {
                continue;
            }
            let msg = InboundMessage::new(STDIO_CHANNEL, &self.sender_id, &self.chat_id, content);
            if !sink.publish(msg) {
                return Err(Error::unavailable("bus closed"));
            }
        }
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(msg.content.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }
}
