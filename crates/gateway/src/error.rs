//! HTTP error surface: service errors mapped onto status codes and a small
//! JSON body.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use murmur_protocol::error_codes;

pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            error_codes::UNAUTHORIZED,
            message,
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "code": self.code,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

impl From<murmur_auth::Error> for ApiError {
    fn from(e: murmur_auth::Error) -> Self {
        use murmur_auth::Error as Auth;
        let (status, code) = match &e {
            Auth::Unauthorized { .. } => (StatusCode::UNAUTHORIZED, error_codes::UNAUTHORIZED),
            Auth::InvalidArgument { .. } => {
                (StatusCode::BAD_REQUEST, error_codes::INVALID_ARGUMENT)
            },
            Auth::Provider { .. } => (StatusCode::BAD_GATEWAY, error_codes::TRANSPORT),
            Auth::Storage(_) | Auth::Json(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, error_codes::INTERNAL)
            },
        };
        Self::new(status, code, e.to_string())
    }
}

impl From<murmur_chat::Error> for ApiError {
    fn from(e: murmur_chat::Error) -> Self {
        use murmur_chat::Error as Chat;
        let (status, code) = match &e {
            Chat::InvalidArgument { .. } => {
                (StatusCode::BAD_REQUEST, error_codes::INVALID_ARGUMENT)
            },
            Chat::NotFound { .. } => (StatusCode::NOT_FOUND, error_codes::NOT_FOUND),
            Chat::SequenceNotInitialized | Chat::Transport { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, error_codes::TRANSPORT)
            },
        };
        Self::new(status, code, e.to_string())
    }
}
