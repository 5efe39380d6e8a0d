//! Error types for the pagesplit server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pagesplit_core::PageSplitError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Split(#[from] PageSplitError),

    #[error("Scratch storage error: {0}")]
    Scratch(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        // Every failure is a 500; callers only ever get the whole bundle or nothing
        let message = self.to_string();
        error!("Request failed: {}", message);

        let body = ErrorResponse { error: message };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}
