// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Contracts of the external collaborators.
//!
//! The object store, the translation service and the auth service are third
//! party systems. The server implements these traits against the real cloud
//! APIs; tests implement them in memory.

use crate::error::ServiceError;
use crate::manifest::Manifest;
use crate::model::{ModelIdentifier, ModelInfo, ViewerToken};
use async_trait::async_trait;
use bytes::Bytes;

/// Page size used when listing stored objects.
pub const LIST_PAGE_SIZE: u32 = 64;

/// An object held by the object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Object key (file name) inside its container.
    pub key: String,
    /// Store-wide object id the model identifier is derived from.
    pub id: String,
}

impl StoredObject {
    pub fn identifier(&self) -> ModelIdentifier {
        ModelIdentifier::from_object_id(&self.id)
    }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.key.clone(),
            urn: self.identifier(),
        }
    }
}

/// One page of a container listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub items: Vec<StoredObject>,
    /// Cursor for the next page, if any.
    pub next: Option<String>,
}

/// Cloud object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create the container if it does not exist yet.
    async fn ensure_container(&self, container: &str) -> Result<(), ServiceError>;

    /// Fetch one page of objects starting at `start_at`.
    async fn list_page(
        &self,
        container: &str,
        start_at: Option<&str>,
    ) -> Result<ObjectPage, ServiceError>;

    /// Store `data` under `name`, replacing any previous object with that key.
    async fn put_object(
        &self,
        container: &str,
        name: &str,
        data: Bytes,
    ) -> Result<StoredObject, ServiceError>;

    /// Every object in the container, following pagination to the end.
    async fn list_objects(&self, container: &str) -> Result<Vec<StoredObject>, ServiceError> {
        let mut page = self.list_page(container, None).await?;
        let mut objects = std::mem::take(&mut page.items);
        while let Some(cursor) = page.next.take() {
            page = self.list_page(container, Some(&cursor)).await?;
            objects.append(&mut page.items);
        }
        Ok(objects)
    }
}

/// Handle returned when a translation job is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub urn: ModelIdentifier,
    /// Service acknowledgement ("created", "success").
    pub result: String,
}

/// Cloud translation (model derivative) service.
#[async_trait]
pub trait TranslationService: Send + Sync {
    /// Start translating `source`. A `root_file` marks the source as an
    /// archive whose root design is that entry.
    async fn start_job(
        &self,
        source: &ModelIdentifier,
        root_file: Option<&str>,
    ) -> Result<JobHandle, ServiceError>;

    /// Current manifest, or `None` if the service has none for `id`.
    async fn get_manifest(&self, id: &ModelIdentifier) -> Result<Option<Manifest>, ServiceError>;
}

/// Permission scopes requested from the auth service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    DataRead,
    DataCreate,
    DataWrite,
    BucketCreate,
    BucketRead,
    ViewablesRead,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::DataRead => "data:read",
            Scope::DataCreate => "data:create",
            Scope::DataWrite => "data:write",
            Scope::BucketCreate => "bucket:create",
            Scope::BucketRead => "bucket:read",
            Scope::ViewablesRead => "viewables:read",
        }
    }

    /// Scopes the server needs for storage and translation.
    pub const INTERNAL: &'static [Scope] = &[
        Scope::DataRead,
        Scope::DataCreate,
        Scope::DataWrite,
        Scope::BucketCreate,
        Scope::BucketRead,
    ];

    /// Scopes handed to the viewer widget.
    pub const VIEWER: &'static [Scope] = &[Scope::ViewablesRead];

    /// Space separated scope string.
    pub fn join(scopes: &[Scope]) -> String {
        scopes.iter().map(Scope::as_str).collect::<Vec<_>>().join(" ")
    }
}

/// Token issuance.
#[async_trait]
pub trait AuthService: Send + Sync {
    async fn issue_token(&self, scopes: &[Scope]) -> Result<ViewerToken, ServiceError>;
}
