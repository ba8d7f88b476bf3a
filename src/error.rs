use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Access denied")]
    AccessDenied,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Habit limit of {limit} reached")]
    HabitLimitReached { limit: i64 },

    #[error("Invalid referral code")]
    InvalidReferralCode,

    #[error("You cannot invite yourself")]
    SelfReferral,

    #[error("User has already been referred")]
    AlreadyReferred,

    #[error("Referral program unlocks at a {required}-day streak (current: {streak})")]
    ReferralNotUnlocked { streak: u32, required: u32 },

    #[error("Invalid notification signature")]
    InvalidSignature,

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable code for the transport layer.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "unauthorized",
            AppError::AccessDenied => "access_denied",
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation",
            AppError::HabitLimitReached { .. } => "habit_limit_reached",
            AppError::InvalidReferralCode => "invalid_referral_code",
            AppError::SelfReferral => "self_referral",
            AppError::AlreadyReferred => "already_referred",
            AppError::ReferralNotUnlocked { .. } => "referral_not_unlocked",
            AppError::InvalidSignature => "invalid_signature",
            AppError::Gateway(_) => "gateway_error",
            AppError::Database(_) | AppError::Internal(_) => "internal",
        }
    }

    /// Referral rejections are reported next to a successful registration
    /// instead of failing it.
    pub fn is_referral_rejection(&self) -> bool {
        matches!(
            self,
            AppError::InvalidReferralCode
                | AppError::SelfReferral
                | AppError::AlreadyReferred
                | AppError::ReferralNotUnlocked { .. }
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::AccessDenied => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::HabitLimitReached { .. } => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::InvalidReferralCode
            | AppError::SelfReferral
            | AppError::ReferralNotUnlocked { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, self.to_string())
            }
            AppError::AlreadyReferred => (StatusCode::CONFLICT, self.to_string()),
            AppError::InvalidSignature => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Gateway(e) => {
                tracing::error!(error = %e, "Payment gateway error");
                (StatusCode::BAD_GATEWAY, "Payment gateway unavailable".into())
            }
            AppError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".into(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!(error = %e, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".into(),
                )
            }
        };

        let body = json!({
            "error": {
                "code": self.code(),
                "message": message,
                "status": status.as_u16(),
            }
        });

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
