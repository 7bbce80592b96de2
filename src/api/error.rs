use std::collections::HashMap;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::db::DbError;

/// Everything a handler can surface to an HTTP caller. Uncategorized
/// failures collapse into `Internal` and are logged, never echoed.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("resource not found")]
    NotFound,
    #[error("{0}")]
    Conflict(String),
    #[error("validation failed")]
    FailedValidation(HashMap<String, String>),
    #[error("rate limit exceeded")]
    RateLimited,
    // The HTTP layer always streams; this survives for delivery surfaces
    // that cannot.
    #[allow(dead_code)]
    #[error("streaming responses are not supported")]
    SseNotSupported,
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn unauthorized(message: &'static str) -> Self {
        ApiError::Unauthorized(message)
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::FailedValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::SseNotSupported | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = match self {
            ApiError::FailedValidation(fields) => json!({ "error": fields }),
            ApiError::Internal(_) => json!({
                "error": "the server encountered a problem and could not process this request"
            }),
            other => json!({ "error": other.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::RecordNotFound => ApiError::NotFound,
            DbError::SessionNotFound => ApiError::unauthorized("authentication required"),
            DbError::AlreadyLiked => ApiError::Conflict(err.to_string()),
            DbError::AlreadyFollowing => ApiError::Conflict(err.to_string()),
            DbError::DuplicateEmail => ApiError::Conflict(err.to_string()),
            DbError::TokenGeneration(_) | DbError::Sqlx(_) => {
                ApiError::Internal(anyhow::Error::new(err))
            }
        }
    }
}

impl From<redis::RedisError> for ApiError {
    fn from(err: redis::RedisError) -> Self {
        ApiError::Internal(err.into())
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let fields = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let message = errs
                    .first()
                    .and_then(|e| e.message.as_ref())
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "is invalid".to_string());
                (field.to_string(), message)
            })
            .collect();

        ApiError::FailedValidation(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_their_status_codes() {
        assert_eq!(
            ApiError::bad_request("x").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::unauthorized("x").status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Conflict("x".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::FailedValidation(HashMap::new()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::RateLimited.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::SseNotSupported.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn db_sentinels_map_to_api_kinds() {
        assert!(matches!(
            ApiError::from(DbError::RecordNotFound),
            ApiError::NotFound
        ));
        assert!(matches!(
            ApiError::from(DbError::AlreadyLiked),
            ApiError::Conflict(_)
        ));
        assert!(matches!(
            ApiError::from(DbError::AlreadyFollowing),
            ApiError::Conflict(_)
        ));
        assert!(matches!(
            ApiError::from(DbError::SessionNotFound),
            ApiError::Unauthorized(_)
        ));
    }
}
