// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! BIM Viewer Server - upload, translate and view BIM models.
//!
//! Thin API over Autodesk Platform Services used by the viewer client:
//! the client uploads source files here, polls their translation status and
//! fetches a read-only token for the viewer widget.
//!
//! # Endpoints
//!
//! - `GET /api/health` - Health check
//! - `GET /api/auth/token` - Viewer access token
//! - `GET /api/models` - List stored models
//! - `POST /api/models` - Upload a model (`model-file`, optional `model-zip-entrypoint`)
//! - `GET /api/models/:urn/status` - Translation status

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    routing::get,
    Router,
};
use bim_viewer_core::{AuthService, TranslationService, UploadCoordinator};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};

mod config;
mod error;
mod routes;
mod services;
mod types;

use config::Config;
use services::ApsClient;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub uploads: Arc<UploadCoordinator>,
    pub translator: Arc<dyn TranslationService>,
    pub auth: Arc<dyn AuthService>,
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let config = Arc::clone(&state.config);
    Router::new()
        // Root endpoint - API information
        .route("/", get(routes::health::info))
        .route("/api/health", get(routes::health::check))
        .route("/api/auth/token", get(routes::auth::token))
        .route("/api/models", get(routes::models::list).post(routes::models::upload))
        .route("/api/models/:urn/status", get(routes::models::status))
        // Middleware
        .layer(DefaultBodyLimit::max(config.max_file_size_bytes()))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
        .layer(TraceLayer::new_for_http())
        .layer(config.cors_layer())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,bim_viewer_server=debug".into()),
        )
        .pretty()
        .init();

    let config = Config::from_env().context("Invalid configuration")?;

    tracing::info!(
        port = config.port,
        bucket = %config.bucket,
        aps_base_url = %config.aps_base_url,
        max_file_size_mb = config.max_file_size_mb,
        "Starting BIM Viewer Server"
    );

    let aps = Arc::new(ApsClient::new(
        config.aps_base_url.clone(),
        &config.client_id,
        &config.client_secret,
    ));
    let state = AppState {
        uploads: Arc::new(UploadCoordinator::new(aps.clone(), aps.clone(), config.bucket.clone())),
        translator: aps.clone(),
        auth: aps,
        config: Arc::new(config.clone()),
    };

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::routes::testing::{call, state};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_health() {
        let (state, _fake) = state();
        let (status, body) = call(state, "GET", "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "bim-viewer-server");
    }

    #[tokio::test]
    async fn test_info_lists_endpoints() {
        let (state, _fake) = state();
        let (status, body) = call(state, "GET", "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["endpoints"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (state, _fake) = state();
        let (status, _) = call(state, "GET", "/api/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
