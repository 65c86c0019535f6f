// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Viewer token endpoint.

use crate::error::ApiError;
use crate::AppState;
use axum::{extract::State, Json};
use bim_viewer_core::{Scope, ViewerToken};

/// GET /api/auth/token - Read-only token for the viewer widget.
pub async fn token(State(state): State<AppState>) -> Result<Json<ViewerToken>, ApiError> {
    let token = state
        .auth
        .issue_token(Scope::VIEWER)
        .await
        .map_err(ApiError::Token)?;
    Ok(Json(token))
}
