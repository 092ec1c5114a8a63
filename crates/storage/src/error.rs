use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("invalid conversation id")]
    InvalidConversationId,

    #[error("invalid participant id")]
    InvalidParticipantId,

    #[error("invalid user id")]
    InvalidUserId,

    #[error("conversation not found")]
    ConversationNotFound,

    #[error("participant not found")]
    ParticipantNotFound,

    #[error("user not found")]
    UserNotFound,

    #[error("conversation sequence not initialized")]
    SequenceNotInitialized,

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
}

pub type Result<T> = std::result::Result<T, Error>;
