use thiserror::Error;

/// Errors surfaced by the conversation engine services.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("conversation sequence not initialized")]
    SequenceNotInitialized,

    #[error("transport error: {source}")]
    Transport {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    #[must_use]
    pub fn transport(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Transport {
            source: Box::new(source),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Self::transport(e)
    }
}

impl From<murmur_storage::Error> for Error {
    fn from(e: murmur_storage::Error) -> Self {
        use murmur_storage::Error as Storage;
        match e {
            Storage::SequenceNotInitialized => Self::SequenceNotInitialized,
            Storage::ConversationNotFound => Self::not_found("conversation"),
            Storage::ParticipantNotFound => Self::not_found("participant"),
            Storage::UserNotFound => Self::not_found("user"),
            Storage::InvalidConversationId => Self::invalid_argument("invalid conversation id"),
            Storage::InvalidParticipantId => Self::invalid_argument("invalid participant id"),
            Storage::InvalidUserId => Self::invalid_argument("invalid user id"),
            other => Self::transport(other),
        }
    }
}

impl From<murmur_queue::Error> for Error {
    fn from(e: murmur_queue::Error) -> Self {
        Self::transport(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
