use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::billing::{BillingError, UsageAction};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Billing(#[from] BillingError),
    #[error("not found")]
    NotFound,
    #[error("authentication required")]
    Unauthorized,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("monthly {action} limit of {limit} reached; upgrade to premium to continue")]
    QuotaExceeded { action: UsageAction, limit: i64 },
    #[error("{0}")]
    Message(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::QuotaExceeded { .. } => StatusCode::FORBIDDEN,
            AppError::Billing(BillingError::InvalidSignature(_) | BillingError::Payload(_)) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Billing(
                BillingError::Provider(_)
                | BillingError::ProviderRejected { .. }
                | BillingError::ProviderUnavailable,
            ) => StatusCode::BAD_GATEWAY,
            AppError::Db(_) | AppError::Billing(BillingError::Persistence(_)) | AppError::Message(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!(?self);
            // internals stay in the log
            match status {
                StatusCode::BAD_GATEWAY => "billing provider unavailable".to_string(),
                _ => "internal error".to_string(),
            }
        } else {
            tracing::debug!(?self);
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
