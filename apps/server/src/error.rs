// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types and handling for the server.
//!
//! Collaborator failures are logged with their details where they happen;
//! clients only ever see the short message of the variant.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bim_viewer_core::{ModelIdError, ServiceError, UploadError};
use serde::Serialize;
use thiserror::Error;

/// API error types.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No file provided")]
    MissingFile,

    #[error("File too large: maximum size is {max_mb} MB")]
    FileTooLarge { max_mb: usize },

    #[error("Multipart error: {0}")]
    Multipart(#[from] axum::extract::multipart::MultipartError),

    #[error("Invalid model identifier: {0}")]
    InvalidModelId(#[from] ModelIdError),

    #[error("Failed to get token")]
    Token(#[source] ServiceError),

    #[error("Failed to get model information")]
    ListModels(#[source] ServiceError),

    #[error("Failed to upload model")]
    Upload(#[from] UploadError),

    #[error("Failed to get model status")]
    Status(#[source] ServiceError),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::MissingFile => (StatusCode::BAD_REQUEST, "MISSING_FILE"),
            ApiError::FileTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "FILE_TOO_LARGE"),
            ApiError::Multipart(_) => (StatusCode::BAD_REQUEST, "MULTIPART_ERROR"),
            ApiError::InvalidModelId(_) => (StatusCode::BAD_REQUEST, "INVALID_URN"),
            ApiError::Token(_) => (StatusCode::INTERNAL_SERVER_ERROR, "TOKEN_ERROR"),
            ApiError::ListModels(_) => (StatusCode::INTERNAL_SERVER_ERROR, "LIST_ERROR"),
            ApiError::Upload(_) => (StatusCode::INTERNAL_SERVER_ERROR, "UPLOAD_ERROR"),
            ApiError::Status(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STATUS_ERROR"),
        };

        if status.is_server_error() {
            match std::error::Error::source(&self) {
                Some(source) => tracing::error!(code, error = %source, "Request failed"),
                None => tracing::error!(code, "Request failed"),
            }
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
