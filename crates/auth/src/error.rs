use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("verification provider error: {message}")]
    Provider { message: String },

    #[error(transparent)]
    Storage(#[from] murmur_storage::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
