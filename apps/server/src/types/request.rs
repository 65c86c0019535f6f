// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Request types for the API.

use crate::error::ApiError;
use axum::extract::multipart::MultipartError;
use axum::extract::Multipart;
use axum::http::StatusCode;
use bim_viewer_core::client::{FIELD_ENTRY_POINT, FIELD_MODEL_FILE};
use bim_viewer_core::upload::entry_point;
use bim_viewer_core::FilePayload;

/// Fields of a `POST /api/models` multipart body.
#[derive(Debug)]
pub struct UploadForm {
    pub file: FilePayload,
    /// Root design inside an archive. Blank values are dropped.
    pub entry_point: Option<String>,
}

impl UploadForm {
    /// Read the form, rejecting files over `max_bytes`.
    pub async fn from_multipart(multipart: &mut Multipart, max_bytes: usize) -> Result<Self, ApiError> {
        let mut file = None;
        let mut hint = None;

        let too_large = |err| body_error(err, max_bytes);

        while let Some(field) = multipart.next_field().await.map_err(too_large)? {
            let field_name = field.name().unwrap_or_default().to_string();
            tracing::debug!(field_name = %field_name, "Processing multipart field");

            if field_name == FIELD_MODEL_FILE {
                let name = field.file_name().unwrap_or("model").to_string();
                let data = field.bytes().await.map_err(too_large)?;
                if data.len() > max_bytes {
                    return Err(file_too_large(max_bytes));
                }
                tracing::debug!(file = %name, size = data.len(), "Extracted file from multipart");
                file = Some(FilePayload::new(name, data));
            } else if field_name == FIELD_ENTRY_POINT {
                let text = field.text().await.map_err(too_large)?;
                hint = entry_point(Some(&text)).map(str::to_string);
            }
        }

        let Some(file) = file else {
            tracing::warn!("No '{}' field found in multipart request", FIELD_MODEL_FILE);
            return Err(ApiError::MissingFile);
        };
        Ok(Self { file, entry_point: hint })
    }
}

fn file_too_large(max_bytes: usize) -> ApiError {
    ApiError::FileTooLarge {
        max_mb: max_bytes / (1024 * 1024),
    }
}

/// The body limit layer aborts oversized uploads mid-stream.
fn body_error(err: MultipartError, max_bytes: usize) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        tracing::warn!(max_bytes, "Upload exceeds the body limit");
        return file_too_large(max_bytes);
    }
    ApiError::Multipart(err)
}
