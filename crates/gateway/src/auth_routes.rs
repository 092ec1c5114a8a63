//! Thin login surface: OTP request/verify handing off to the user and
//! token services.

use std::sync::Arc;

use {
    axum::{Json, extract::State},
    serde::{Deserialize, Serialize},
    tracing::info,
};

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct RequestOtpBody {
    pub phone: String,
}

#[derive(Debug, Serialize)]
pub struct RequestOtpResponse {
    pub message: &'static str,
}

pub async fn request_otp(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RequestOtpBody>,
) -> Result<Json<RequestOtpResponse>, ApiError> {
    state.users.request_otp(&body.phone).await?;
    Ok(Json(RequestOtpResponse {
        message: "verification code sent",
    }))
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpBody {
    pub phone: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyOtpResponse {
    pub token: String,
    pub user_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub async fn verify_otp(
    State(state): State<Arc<AppState>>,
    Json(body): Json<VerifyOtpBody>,
) -> Result<Json<VerifyOtpResponse>, ApiError> {
    let user = state.users.verify_otp(&body.phone, &body.code).await?;
    let token = state.tokens.generate(&user.id)?;
    info!(user_id = %user.id, "user verified");
    Ok(Json(VerifyOtpResponse {
        token,
        user_id: user.id,
        created_at: user.created_at,
    }))
}
