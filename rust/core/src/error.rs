// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the viewer core.
//!
//! Each component boundary converts collaborator failures into one of the
//! typed errors below; nothing crosses a boundary as a panic.

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Aggregate error for callers that do not care which component failed.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    ModelId(#[from] ModelIdError),

    #[error(transparent)]
    StatusDecode(#[from] StatusDecodeError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Viewer(#[from] ViewerError),

    #[error(transparent)]
    Shell(#[from] ShellError),
}

/// A string could not be accepted as a model identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelIdError {
    #[error("Model identifier is empty")]
    Empty,

    #[error("Model identifier contains {ch:?} at position {position}, which is not URL-safe")]
    InvalidCharacter { ch: char, position: usize },
}

/// A status payload could not be mapped onto a translation state.
#[derive(Error, Debug)]
pub enum StatusDecodeError {
    #[error("Malformed status payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unrecognized translation status {0:?}")]
    UnknownStatus(String),
}

/// Failure talking to the application's own HTTP API.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error(transparent)]
    Decode(#[from] StatusDecodeError),

    #[error(transparent)]
    ModelId(#[from] ModelIdError),
}

/// Failure reported by an external collaborator (object store, translation
/// service, auth service).
#[derive(Error, Debug, Clone)]
pub enum ServiceError {
    #[error("{service} request failed: {message}")]
    Request {
        service: &'static str,
        message: String,
    },

    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} response could not be decoded: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },
}

impl ServiceError {
    /// HTTP status carried by the error, if the collaborator answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ServiceError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Step of the upload sequence that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    /// Making sure the storage container exists.
    Container,
    /// Storing the object.
    Store,
    /// Starting the translation job.
    Translate,
    /// Submitting the file to the application API.
    Submit,
}

impl std::fmt::Display for UploadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UploadStage::Container => "container",
            UploadStage::Store => "store",
            UploadStage::Translate => "translate",
            UploadStage::Submit => "submit",
        };
        f.write_str(name)
    }
}

/// Upload errors. Partial success (stored but not translated) is reported
/// the same way as a failure to store.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Failed to upload {file_name} ({stage}): {message}")]
    UploadFailed {
        file_name: String,
        stage: UploadStage,
        message: String,
    },
}

impl UploadError {
    pub(crate) fn failed(file_name: &str, stage: UploadStage, err: impl std::fmt::Display) -> Self {
        UploadError::UploadFailed {
            file_name: file_name.to_string(),
            stage,
            message: err.to_string(),
        }
    }

    /// The stage at which the upload failed.
    pub fn stage(&self) -> UploadStage {
        match self {
            UploadError::UploadFailed { stage, .. } => *stage,
        }
    }
}

/// Viewer widget and document loading errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViewerError {
    #[error("Viewer is not mounted")]
    NotMounted,

    #[error("Viewer initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Document load failed ({code}): {message}")]
    DocumentLoad { code: i32, message: String },

    #[error("Document for {0} has no viewable geometry")]
    NoGeometry(String),

    #[error("Geometry load failed: {0}")]
    GeometryLoad(String),
}

/// Errors raised by the presentation shell itself.
#[derive(Error, Debug)]
pub enum ShellError {
    #[error("Controls are disabled while a model is being translated or uploaded")]
    ControlsDisabled,

    #[error("Unsupported file type: {0}")]
    UnsupportedFile(String),

    #[error(transparent)]
    Upload(#[from] UploadError),
}
