use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::outreach::resolver::MappingError;
use crate::table::TableError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
///
/// Only request-fatal conditions live here. Per-row gate and completion
/// failures are recorded in the output sheet and never surface as errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Input parse error: {0}")]
    InputParse(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<TableError> for AppError {
    fn from(err: TableError) -> Self {
        match err {
            TableError::Parse(msg) => AppError::InputParse(msg),
            TableError::Serialization(msg) => AppError::Serialization(msg),
        }
    }
}

impl From<MappingError> for AppError {
    fn from(err: MappingError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::Validation(format!("Invalid multipart body: {}", err.body_text()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::InputParse(msg) => (
                StatusCode::BAD_REQUEST,
                "INPUT_PARSE_ERROR",
                format!("Could not read the uploaded table: {msg}"),
            ),
            AppError::Serialization(msg) => {
                tracing::error!("Serialization error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "SERIALIZATION_ERROR",
                    format!("Could not encode the output spreadsheet: {msg}"),
                )
            }
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_errors_map_to_fatal_classes() {
        let parse: AppError = TableError::Parse("CSV line 3: bad".to_string()).into();
        assert!(matches!(parse, AppError::InputParse(_)));

        let ser: AppError = TableError::Serialization("too long".to_string()).into();
        assert!(matches!(ser, AppError::Serialization(_)));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::InputParse("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Serialization("x".into()).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::Conflict("x".into()).into_response().status(),
            StatusCode::CONFLICT
        );
    }
}
