//! API error type mapped to HTTP status codes.
//!
//! Responses carry a JSON body `{"message": "..."}`, plus an `error` field
//! with the underlying cause for server-side failures.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::llm::LlmError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 400
    #[error("{0}")]
    BadRequest(String),

    /// 404
    #[error("{0}")]
    NotFound(String),

    /// 500. `message` is what the client sees, `cause` the underlying failure.
    #[error("{message}: {cause}")]
    Internal { message: String, cause: String },
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        ApiError::Internal {
            message: message.into(),
            cause: cause.to_string(),
        }
    }
}

/// Attach a client-facing message to internal failures.
pub trait ResultExt<T> {
    fn or_internal(self, message: &str) -> Result<T, ApiError>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn or_internal(self, message: &str) -> Result<T, ApiError> {
        self.map_err(|e| ApiError::internal(message, e))
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::internal("Internal server error", format!("{:#}", err))
    }
}

impl From<LlmError> for ApiError {
    fn from(err: LlmError) -> Self {
        if err.is_configuration() {
            ApiError::BadRequest(err.to_string())
        } else {
            ApiError::internal("Error extracting text with LLM", err)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "message": message }))).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(json!({ "message": message }))).into_response()
            }
            ApiError::Internal { message, cause } => {
                tracing::error!(error = %cause, "{}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "message": message, "error": cause })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::bad_request("x").into_response().status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::not_found("x").into_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::from(anyhow::anyhow!("disk on fire")).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_llm_configuration_errors_are_client_errors() {
        assert!(matches!(ApiError::from(LlmError::MissingApiKey), ApiError::BadRequest(_)));
        assert!(matches!(ApiError::from(LlmError::EmptyResponse), ApiError::Internal { .. }));
    }

    #[test]
    fn test_or_internal() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::other("boom"));
        match result.or_internal("Error fetching images") {
            Err(ApiError::Internal { message, cause }) => {
                assert_eq!(message, "Error fetching images");
                assert_eq!(cause, "boom");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
