// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Upload coordinator: store a source file, then start its translation.

use crate::error::{ServiceError, UploadError, UploadStage};
use crate::model::ModelInfo;
use crate::services::{ObjectStore, TranslationService};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// File extensions offered by the upload picker.
pub const ACCEPTED_EXTENSIONS: &[&str] = &["rvt", "rfa", "dwg", "nwd", "zip"];

/// A source file to upload.
#[derive(Debug, Clone)]
pub struct FilePayload {
    pub name: String,
    pub data: Bytes,
}

impl FilePayload {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Lower-cased extension of the file name.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
    }

    /// Archives need an entry point naming their root design.
    pub fn is_archive(&self) -> bool {
        self.extension().as_deref() == Some("zip")
    }

    pub fn is_accepted(&self) -> bool {
        self.extension()
            .is_some_and(|ext| ACCEPTED_EXTENSIONS.contains(&ext.as_str()))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Normalize an entry point hint: blank means "no hint".
pub fn entry_point(hint: Option<&str>) -> Option<&str> {
    hint.map(str::trim).filter(|h| !h.is_empty())
}

/// Something that turns a file into a translating model.
#[async_trait]
pub trait ModelUploader: Send + Sync {
    async fn upload(
        &self,
        file: FilePayload,
        entry_point: Option<&str>,
    ) -> Result<ModelInfo, UploadError>;
}

/// Runs the store-then-translate sequence against the collaborators.
///
/// The coordinator never selects the new model; the caller does. Only one
/// upload should be in flight per coordinator, which callers enforce by
/// disabling upload controls while one is pending.
pub struct UploadCoordinator {
    store: Arc<dyn ObjectStore>,
    translator: Arc<dyn TranslationService>,
    container: String,
    container_ready: OnceCell<()>,
}

impl UploadCoordinator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        translator: Arc<dyn TranslationService>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            store,
            translator,
            container: container.into(),
            container_ready: OnceCell::new(),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Make sure the storage container exists. Succeeds at most once; a
    /// failure is retried on the next call.
    pub async fn ensure_container(&self) -> Result<(), ServiceError> {
        self.container_ready
            .get_or_try_init(|| async {
                tracing::debug!(container = %self.container, "Ensuring storage container");
                self.store.ensure_container(&self.container).await
            })
            .await
            .map(|_| ())
    }

    /// All stored models.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, ServiceError> {
        self.ensure_container().await?;
        let objects = self.store.list_objects(&self.container).await?;
        Ok(objects.iter().map(|o| o.model_info()).collect())
    }
}

#[async_trait]
impl ModelUploader for UploadCoordinator {
    async fn upload(
        &self,
        file: FilePayload,
        entry_point_hint: Option<&str>,
    ) -> Result<ModelInfo, UploadError> {
        let hint = entry_point(entry_point_hint);
        let name = file.name.clone();
        tracing::info!(
            file = %name,
            size = file.len(),
            entry_point = hint.unwrap_or_default(),
            "Uploading model"
        );

        self.ensure_container()
            .await
            .map_err(|e| UploadError::failed(&name, UploadStage::Container, e))?;

        let stored = self
            .store
            .put_object(&self.container, &name, file.data)
            .await
            .map_err(|e| UploadError::failed(&name, UploadStage::Store, e))?;
        let info = stored.model_info();

        let job = self
            .translator
            .start_job(&info.urn, hint)
            .await
            .map_err(|e| {
                tracing::error!(
                    file = %name,
                    urn = %info.urn,
                    error = %e,
                    "Stored object but failed to start translation"
                );
                UploadError::failed(&name, UploadStage::Translate, e)
            })?;

        tracing::info!(file = %name, urn = %info.urn, result = %job.result, "Translation job started");
        Ok(info)
    }
}
