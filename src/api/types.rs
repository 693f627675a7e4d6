// src/api/types.rs

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::TokenPair;
use crate::domain::User;
use crate::infra::errors::DeskError;

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A `DeskError` on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub DeskError);

impl From<DeskError> for ApiError {
    fn from(err: DeskError) -> Self {
        ApiError(err)
    }
}

pub fn status_for(err: &DeskError) -> StatusCode {
    match err {
        DeskError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        DeskError::Forbidden(_) => StatusCode::FORBIDDEN,
        DeskError::NotFound { .. } => StatusCode::NOT_FOUND,
        DeskError::Conflict(_) | DeskError::InvalidTransition { .. } => StatusCode::CONFLICT,
        DeskError::Validation(_) | DeskError::FileTooLarge { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        DeskError::Provider { .. }
        | DeskError::RateLimited { .. }
        | DeskError::Parse(_)
        | DeskError::Storage(_) => StatusCode::BAD_GATEWAY,
        DeskError::Database(_) | DeskError::Config(_) | DeskError::Io(_) | DeskError::Other(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(code = self.0.code(), "Request failed: {:#}", self.0);
            "Internal server error".to_string()
        } else {
            self.0.to_string()
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct ResetRequested {
    pub message: String,
    /// Only present when the server is configured to expose it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResetConfirm {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&DeskError::Validation("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&DeskError::InvalidTransition {
                entity: "session",
                from: "recorded".into(),
                to: "analyzed".into()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&DeskError::Parse("eof".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&DeskError::Other(anyhow::anyhow!("boom"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
