use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal server error")]
    Internal,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Database(_)
            | AppError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::Unauthorized => "authentication_error",
            AppError::Forbidden(_) => "authorization_error",
            AppError::NotFound => "not_found_error",
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Database(_)
            | AppError::Internal => "server_error",
        }
    }

    /// Message safe to hand to a client. Database/config details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Database(_)
            | AppError::Internal => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status_code().is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = json!({
            "error": self.error_type(),
            "message": self.public_message(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_validation_to_400() {
        let err = AppError::Validation("empty content".into());
        assert_eq!(err.status_code().as_u16(), 400);
        assert_eq!(err.error_type(), "validation_error");
    }

    #[test]
    fn maps_forbidden_to_403() {
        let err = AppError::Forbidden("users are not friends".into());
        assert_eq!(err.status_code().as_u16(), 403);
        assert_eq!(err.error_type(), "authorization_error");
    }

    #[test]
    fn database_details_never_reach_clients() {
        let err = AppError::Database(sqlx::Error::PoolClosed);
        assert_eq!(err.status_code().as_u16(), 500);
        assert_eq!(err.public_message(), "internal server error");
    }
}
