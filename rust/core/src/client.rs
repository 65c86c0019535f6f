// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP client for the viewer application's API.

use crate::error::{ClientError, UploadError, UploadStage, ViewerError};
use crate::manifest::Manifest;
use crate::model::{ModelIdentifier, ModelInfo, ViewerToken};
use crate::poller::StatusSource;
use crate::status::{decode_status, TranslationState};
use crate::upload::{entry_point, FilePayload, ModelUploader};
use crate::viewer::{DocumentDescriptor, DocumentLoader};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{StatusCode, Url};
use std::time::Duration;

/// Multipart field carrying the file.
pub const FIELD_MODEL_FILE: &str = "model-file";
/// Multipart field carrying the archive entry point.
pub const FIELD_ENTRY_POINT: &str = "model-zip-entrypoint";

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root, e.g. `http://localhost:8080/api/`.
    pub base_url: String,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/".into(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Typed access to `/auth/token`, `/models` and `/models/{urn}/status`.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: Url,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            base_url: parse_base(&config.base_url)?,
            http,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ClientError> {
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status { status, body });
        }
        Ok(response)
    }

    /// `GET /auth/token`
    pub async fn fetch_token(&self) -> Result<ViewerToken, ClientError> {
        let url = self.endpoint(&["auth", "token"])?;
        Ok(self.send(self.http.get(url)).await?.json().await?)
    }

    /// `GET /models`
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, ClientError> {
        let url = self.endpoint(&["models"])?;
        Ok(self.send(self.http.get(url)).await?.json().await?)
    }

    /// `GET /models/{urn}/status`
    pub async fn fetch_status(&self, id: &ModelIdentifier) -> Result<TranslationState, ClientError> {
        let url = self.endpoint(&["models", id.as_str(), "status"])?;
        let body = self.send(self.http.get(url)).await?.bytes().await?;
        Ok(decode_status(&body)?)
    }

    /// `POST /models`
    pub async fn upload_model(
        &self,
        file: FilePayload,
        entry_point_hint: Option<&str>,
    ) -> Result<ModelInfo, ClientError> {
        let url = self.endpoint(&["models"])?;
        let part = Part::bytes(file.data.to_vec()).file_name(file.name.clone());
        let mut form = Form::new().part(FIELD_MODEL_FILE, part);
        if let Some(hint) = entry_point(entry_point_hint) {
            form = form.text(FIELD_ENTRY_POINT, hint.to_string());
        }
        Ok(self.send(self.http.post(url).multipart(form)).await?.json().await?)
    }
}

fn parse_base(base: &str) -> Result<Url, ClientError> {
    let mut url = Url::parse(base).map_err(|e| ClientError::InvalidUrl(format!("{base}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(ClientError::InvalidUrl(base.to_string()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[async_trait]
impl StatusSource for ApiClient {
    async fn query_status(&self, id: &ModelIdentifier) -> Result<TranslationState, ClientError> {
        self.fetch_status(id).await
    }
}

#[async_trait]
impl ModelUploader for ApiClient {
    async fn upload(
        &self,
        file: FilePayload,
        entry_point: Option<&str>,
    ) -> Result<ModelInfo, UploadError> {
        let name = file.name.clone();
        self.upload_model(file, entry_point).await.map_err(|e| {
            tracing::error!(file = %name, error = %e, "Upload request failed");
            UploadError::failed(&name, UploadStage::Submit, e)
        })
    }
}

/// Loads document descriptors straight from the translation service's
/// manifest endpoint, authenticated with a viewer token from the API.
pub struct ManifestDocumentLoader {
    api: ApiClient,
    http: reqwest::Client,
    derivative_base: Url,
}

impl ManifestDocumentLoader {
    /// Default root of the model derivative API.
    pub const DEFAULT_DERIVATIVE_BASE: &'static str =
        "https://developer.api.autodesk.com/modelderivative/v2/designdata/";

    pub fn new(api: ApiClient, derivative_base: &str) -> Result<Self, ClientError> {
        Ok(Self {
            http: api.http.clone(),
            api,
            derivative_base: parse_base(derivative_base)?,
        })
    }

    fn manifest_url(&self, id: &ModelIdentifier) -> Result<Url, ViewerError> {
        let mut url = self.derivative_base.clone();
        url.path_segments_mut()
            .map_err(|_| document_error(0, "invalid derivative base URL"))?
            .pop_if_empty()
            .extend(&[id.as_str(), "manifest"]);
        Ok(url)
    }
}

fn document_error(code: i32, message: impl Into<String>) -> ViewerError {
    ViewerError::DocumentLoad {
        code,
        message: message.into(),
    }
}

#[async_trait]
impl DocumentLoader for ManifestDocumentLoader {
    async fn load_document(&self, id: &ModelIdentifier) -> Result<DocumentDescriptor, ViewerError> {
        let token = self
            .api
            .fetch_token()
            .await
            .map_err(|e| document_error(0, format!("token request failed: {e}")))?;
        let response = self
            .http
            .get(self.manifest_url(id)?)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|e| document_error(0, e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(document_error(404, format!("no manifest for {id}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(document_error(i32::from(status.as_u16()), body));
        }
        let manifest: Manifest = response
            .json()
            .await
            .map_err(|e| document_error(0, format!("malformed manifest: {e}")))?;
        Ok(DocumentDescriptor::from_manifest(id.clone(), &manifest))
    }
}
