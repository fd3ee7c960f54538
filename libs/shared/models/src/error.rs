use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Boundary error handed to whatever transport sits in front of the cells.
///
/// Business rejections carry a stable machine-readable `code`; infrastructure
/// failures collapse into `Unavailable` so callers can tell "retry later"
/// apart from "this request is not allowed".
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Conflict [{code}]: {message}")]
    Conflict { code: &'static str, message: String },

    #[error("Rejected [{code}]: {message}")]
    Rejected { code: &'static str, message: String },

    #[error("Service temporarily unavailable: {0}")]
    Unavailable(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Conflict { code, .. } => code,
            AppError::Rejected { code, .. } => code,
            AppError::Unavailable(_) => "TEMPORARILY_UNAVAILABLE",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let message = match &self {
            AppError::NotFound(msg) | AppError::BadRequest(msg) => msg.clone(),
            AppError::Conflict { message, .. } | AppError::Rejected { message, .. } => message.clone(),
            AppError::Unavailable(detail) => {
                tracing::error!("Infrastructure failure: {}", detail);
                "Service temporarily unavailable, please retry".to_string()
            }
        };

        if status.is_client_error() {
            tracing::warn!("Request rejected: {} [{}]: {}", status, code, message);
        }

        let body = Json(json!({
            "code": code,
            "error": message
        }));

        (status, body).into_response()
    }
}
