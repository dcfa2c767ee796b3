//! Application error taxonomy and HTTP mapping.
//!
//! The ownership policy collapses "exists but owned by someone else" into
//! "not found", so there is deliberately no Forbidden variant: probing a
//! foreign resource id must be indistinguishable from probing a
//! nonexistent one.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed or rejected input, reported before any store write.
    #[error("{0}")]
    Validation(String),

    /// Missing resource, or one the caller does not own.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Missing or invalid session token.
    #[error("unauthorized")]
    Unauthorized,

    /// The external extractor could not produce a transaction.
    #[error("could not extract transaction from SMS")]
    Extraction,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::Validation(_) | AppError::Extraction => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Storage(StorageError::NotFound) => StatusCode::NOT_FOUND,
            AppError::Storage(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {self:?}");
        }

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unowned_and_missing_map_to_the_same_status() {
        let missing = AppError::NotFound("card").into_response();
        let storage = AppError::Storage(StorageError::NotFound).into_response();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(storage.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn validation_is_bad_request() {
        let resp = AppError::Validation("score must be 300-900".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
