use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;

use crate::config::messages;
use crate::model::ModelError;
use crate::store::StoreError;

/// Errors surfaced by the HTTP layer. Each variant maps to a status code and
/// a `{error, status}` JSON body.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{}", messages::MODEL_NOT_LOADED)]
    ModelNotLoaded,
    #[error("Missing or invalid {} header", crate::config::USER_HEADER)]
    Unauthorized,
    #[error("{0} not found")]
    NotFound(String),
    #[error("{}", messages::RATE_LIMITED)]
    RateLimited,
    #[error("An unexpected error occurred during analysis: {0}")]
    Model(#[from] ModelError),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    fn status_label(&self) -> &'static str {
        match self {
            AppError::Validation(_) | AppError::Store(StoreError::InvalidName(_)) => {
                "validation_error"
            }
            AppError::RateLimited => "rate_limited",
            AppError::Unauthorized => "unauthorized",
            AppError::NotFound(_) | AppError::Store(StoreError::NotFound { .. }) => "not_found",
            _ => "error",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            AppError::Store(StoreError::InvalidName(_)) => StatusCode::BAD_REQUEST,
            AppError::ModelNotLoaded
            | AppError::Model(_)
            | AppError::Store(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        HttpResponse::build(status).json(json!({
            "error": self.to_string(),
            "status": self.status_label(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_bad_requests() {
        let err = AppError::Validation("Age must be between 15 and 30".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.status_label(), "validation_error");
    }

    #[test]
    fn missing_profile_maps_to_not_found() {
        let err = AppError::from(StoreError::NotFound {
            user: "a@b.c".into(),
            profile: "spring".into(),
        });
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn rate_limit_is_429() {
        assert_eq!(AppError::RateLimited.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }
}
