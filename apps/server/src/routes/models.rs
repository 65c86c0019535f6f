// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Model listing, upload and translation status endpoints.

use crate::error::ApiError;
use crate::types::UploadForm;
use crate::AppState;
use axum::{
    extract::{Multipart, Path, State},
    Json,
};
use bim_viewer_core::{ModelIdentifier, ModelInfo, ModelUploader, StatusResponse, TranslationState};

/// GET /api/models - Every stored model.
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<ModelInfo>>, ApiError> {
    let models = state.uploads.list_models().await.map_err(ApiError::ListModels)?;
    tracing::debug!(count = models.len(), "Listed models");
    Ok(Json(models))
}

/// POST /api/models - Store a file and start translating it.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ModelInfo>, ApiError> {
    let form = UploadForm::from_multipart(&mut multipart, state.config.max_file_size_bytes()).await?;
    let info = state
        .uploads
        .upload(form.file, form.entry_point.as_deref())
        .await?;
    Ok(Json(info))
}

/// GET /api/models/:urn/status - Translation status derived from the manifest.
pub async fn status(
    State(state): State<AppState>,
    Path(urn): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let id = ModelIdentifier::new(urn)?;
    let translation = match state.translator.get_manifest(&id).await.map_err(ApiError::Status)? {
        Some(manifest) => manifest.translation_state(),
        None => TranslationState::NotTranslated,
    };
    tracing::debug!(model = %id, state = %translation, "Translation status");
    Ok(Json(StatusResponse::from(&translation)))
}
