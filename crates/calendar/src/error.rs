use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Cron(#[from] switchyard_cron::Error),

    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("invalid event document: {message}")]
    InvalidDocument { message: String },

    #[error("failed to parse iCalendar data: {message}")]
    IcsParse { message: String },

    #[error("{capability} support is not compiled in")]
    CapabilityUnavailable { capability: &'static str },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn ics_parse(message: impl Into<String>) -> Self {
        Self::IcsParse {
            message: message.into(),
        }
    }
}

impl switchyard_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

switchyard_common::impl_context!(Error);
