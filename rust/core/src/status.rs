// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Translation state and the status wire format.
//!
//! `GET /models/{urn}/status` answers with a small JSON document:
//!
//! ```json
//! { "status": "inprogress", "progress": "42% complete", "messages": [] }
//! ```
//!
//! [`decode_status`] is the only place that payload is interpreted. Anything
//! it cannot map onto one of the four [`TranslationState`] variants is a
//! [`StatusDecodeError`], never a guess.

use crate::error::StatusDecodeError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire spelling of [`TranslationState::NotTranslated`].
pub const STATUS_NOT_TRANSLATED: &str = "n/a";
/// Wire spelling of [`TranslationState::InProgress`].
pub const STATUS_IN_PROGRESS: &str = "inprogress";
/// Wire spelling of [`TranslationState::Succeeded`]. The only accepted
/// success spelling.
pub const STATUS_SUCCEEDED: &str = "success";
/// Wire spelling of [`TranslationState::Failed`].
pub const STATUS_FAILED: &str = "failed";

/// Progress text used when an in-progress payload carries none.
pub const DEFAULT_PROGRESS: &str = "0% complete";

/// Where a model is in the translation pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationState {
    /// No manifest exists yet.
    NotTranslated,
    /// Translation running; the text is an opaque completion indicator.
    InProgress(String),
    /// Viewable geometry is available.
    Succeeded,
    /// Translation failed terminally.
    Failed(Vec<Diagnostic>),
}

impl TranslationState {
    /// `Succeeded` and `Failed` end a polling session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TranslationState::Succeeded | TranslationState::Failed(_))
    }

    /// Wire spelling of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            TranslationState::NotTranslated => STATUS_NOT_TRANSLATED,
            TranslationState::InProgress(_) => STATUS_IN_PROGRESS,
            TranslationState::Succeeded => STATUS_SUCCEEDED,
            TranslationState::Failed(_) => STATUS_FAILED,
        }
    }

    /// Build an in-progress state, substituting [`DEFAULT_PROGRESS`] for
    /// missing or blank progress text.
    pub fn in_progress(progress: Option<&str>) -> Self {
        match progress.map(str::trim) {
            Some(p) if !p.is_empty() => TranslationState::InProgress(p.to_string()),
            _ => TranslationState::InProgress(DEFAULT_PROGRESS.to_string()),
        }
    }
}

impl fmt::Display for TranslationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslationState::InProgress(progress) => write!(f, "inprogress ({progress})"),
            TranslationState::Failed(messages) => write!(f, "failed ({} messages)", messages.len()),
            other => f.write_str(other.as_str()),
        }
    }
}

/// One structured message from the translation service, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    #[serde(default)]
    pub severity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Message category as reported by the service ("error", "warning").
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: DiagnosticMessage,
}

impl Diagnostic {
    pub fn new(severity: u32, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: None,
            kind: None,
            message: DiagnosticMessage::Text(message.into()),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.code) {
            (Some(kind), Some(code)) => write!(f, "[{kind} {code}] ")?,
            (Some(kind), None) => write!(f, "[{kind}] ")?,
            (None, Some(code)) => write!(f, "[{code}] ")?,
            (None, None) => {}
        }
        write!(f, "{}", self.message)
    }
}

/// Diagnostic text: the service sends either a string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DiagnosticMessage {
    Text(String),
    Lines(Vec<String>),
}

impl Default for DiagnosticMessage {
    fn default() -> Self {
        DiagnosticMessage::Text(String::new())
    }
}

impl fmt::Display for DiagnosticMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticMessage::Text(text) => f.write_str(text),
            DiagnosticMessage::Lines(lines) => f.write_str(&lines.join(" ")),
        }
    }
}

/// Body of `GET /models/{urn}/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Diagnostic>>,
}

impl From<&TranslationState> for StatusResponse {
    fn from(state: &TranslationState) -> Self {
        let (progress, messages) = match state {
            TranslationState::InProgress(progress) => (Some(progress.clone()), None),
            TranslationState::Failed(messages) => (None, Some(messages.clone())),
            _ => (None, None),
        };
        Self {
            status: state.as_str().to_string(),
            progress,
            messages,
        }
    }
}

impl TryFrom<StatusResponse> for TranslationState {
    type Error = StatusDecodeError;

    fn try_from(response: StatusResponse) -> Result<Self, Self::Error> {
        match response.status.as_str() {
            STATUS_NOT_TRANSLATED => Ok(TranslationState::NotTranslated),
            STATUS_IN_PROGRESS => Ok(TranslationState::in_progress(response.progress.as_deref())),
            STATUS_SUCCEEDED => Ok(TranslationState::Succeeded),
            STATUS_FAILED => Ok(TranslationState::Failed(response.messages.unwrap_or_default())),
            other => {
                tracing::warn!(status = %other, "Non-canonical translation status in payload");
                Err(StatusDecodeError::UnknownStatus(other.to_string()))
            }
        }
    }
}

/// Decode a raw status payload.
pub fn decode_status(body: &[u8]) -> Result<TranslationState, StatusDecodeError> {
    let response: StatusResponse = serde_json::from_slice(body)?;
    TranslationState::try_from(response)
}
