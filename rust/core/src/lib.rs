// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # BIM Viewer Core
//!
//! Client-side coordination for viewing cloud-translated BIM models
//! (Revit, AutoCAD, Navisworks): track an uploaded model through translation,
//! then hand it to an embedded viewer widget once it is ready.
//!
//! ## Overview
//!
//! - **Status polling**: [`StatusPoller`] queries a [`StatusSource`] on a fixed
//!   interval until a terminal state, with stale responses discarded by
//!   generation
//! - **Selection**: [`SelectionController`] owns the selected model and
//!   restarts polling whenever it changes
//! - **Uploads**: [`UploadCoordinator`] stores a file and starts its translation
//! - **Viewer lifecycle**: [`ViewerLifecycleAdapter`] creates and disposes the
//!   widget and loads geometry once per model
//! - **Shell**: [`ViewerShell`] composes the above and derives overlay text
//!   and control state
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bim_viewer_core::{ApiClient, ClientConfig, PollerConfig, SelectionController, StatusPoller};
//! use std::sync::Arc;
//!
//! let api = Arc::new(ApiClient::new(&ClientConfig::default())?);
//! let mut selection = SelectionController::new(StatusPoller::new(api, PollerConfig::default()));
//! selection.seed_from_link("http://localhost:8080/?urn=dXJuOmFkc2s")?;
//!
//! let mut status = selection.poller().watch();
//! while status.changed().await.is_ok() {
//!     println!("{:?}", status.borrow().state);
//! }
//! ```

pub mod client;
pub mod error;
pub mod manifest;
pub mod model;
pub mod poller;
pub mod selection;
pub mod services;
pub mod shell;
pub mod status;
pub mod upload;
pub mod viewer;

pub use client::{ApiClient, ClientConfig, ManifestDocumentLoader};
pub use error::{
    ClientError, Error, ModelIdError, Result, ServiceError, ShellError, StatusDecodeError,
    UploadError, UploadStage, ViewerError,
};
pub use manifest::{Manifest, ManifestNode};
pub use model::{ModelIdentifier, ModelInfo, ViewerToken};
pub use poller::{
    PollEvent, PollSnapshot, PollerConfig, PollingSession, SessionPhase, StatusPoller,
    StatusSource,
};
pub use selection::{model_from_link, SelectionController};
pub use services::{AuthService, JobHandle, ObjectStore, Scope, StoredObject, TranslationService};
pub use shell::{status_message, ViewerShell};
pub use status::{decode_status, Diagnostic, StatusResponse, TranslationState};
pub use upload::{FilePayload, ModelUploader, UploadCoordinator};
pub use viewer::{
    DocumentDescriptor, DocumentLoader, ShowOutcome, ViewerConfig, ViewerFactory,
    ViewerLifecycleAdapter, ViewerWidget,
};
