pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by adapters and the outbound router.
///
/// None of these reach the bus: supervisors log and retry, the router logs
/// and drops the message.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Outbound message addressed to a channel nobody registered.
    #[error("no adapter registered for channel '{channel}'")]
    UnknownChannel { channel: String },

    /// Transport is not connected or has gone away.
    #[error("channel unavailable: {message}")]
    Unavailable { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unknown_channel(channel: impl Into<String>) -> Self {
        Self::UnknownChannel {
            channel: channel.into(),
        }
    }
}
