// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Translation service manifest.
//!
//! Only the fields the viewer needs are modelled; everything else in the
//! service's document is ignored on deserialization.

use crate::status::{Diagnostic, TranslationState};
use serde::{Deserialize, Serialize};

/// Status/result document for one model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub urn: Option<String>,
    pub status: String,
    #[serde(default)]
    pub progress: Option<String>,
    #[serde(default)]
    pub derivatives: Vec<ManifestNode>,
}

/// A derivative or one of its descendants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestNode {
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub output_type: Option<String>,
    #[serde(default)]
    pub messages: Vec<Diagnostic>,
    #[serde(default)]
    pub children: Vec<ManifestNode>,
}

impl Manifest {
    /// Messages attached to each derivative and its direct children, in
    /// document order.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let mut messages = Vec::new();
        for derivative in &self.derivatives {
            messages.extend(derivative.messages.iter().cloned());
            for child in &derivative.children {
                messages.extend(child.messages.iter().cloned());
            }
        }
        messages
    }

    /// Map the service's status vocabulary onto a [`TranslationState`].
    ///
    /// `pending` counts as in progress and `timeout` as a failure. Any other
    /// unknown status is logged and reported as in progress, so clients keep
    /// polling until their own bound instead of stopping on a guess.
    pub fn translation_state(&self) -> TranslationState {
        match self.status.as_str() {
            "success" => TranslationState::Succeeded,
            "failed" | "timeout" => TranslationState::Failed(self.diagnostics()),
            "pending" | "inprogress" => TranslationState::in_progress(self.progress.as_deref()),
            other => {
                tracing::warn!(
                    status = %other,
                    urn = self.urn.as_deref().unwrap_or_default(),
                    "Unrecognized manifest status"
                );
                TranslationState::in_progress(self.progress.as_deref())
            }
        }
    }

    /// Depth-first walk over every node of every derivative.
    pub fn nodes(&self) -> Vec<&ManifestNode> {
        let mut out = Vec::new();
        let mut stack: Vec<&ManifestNode> = self.derivatives.iter().rev().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(json: &str) -> Manifest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_success_manifest() {
        let m = manifest(r#"{"urn":"abc","status":"success","progress":"complete","derivatives":[]}"#);
        assert_eq!(m.translation_state(), TranslationState::Succeeded);
    }

    #[test]
    fn test_pending_and_inprogress() {
        let m = manifest(r#"{"status":"pending","progress":"0% complete"}"#);
        assert_eq!(m.translation_state(), TranslationState::InProgress("0% complete".into()));
        let m = manifest(r#"{"status":"inprogress","progress":"67% complete"}"#);
        assert_eq!(m.translation_state(), TranslationState::InProgress("67% complete".into()));
    }

    #[test]
    fn test_failed_collects_messages() {
        let m = manifest(
            r#"{
                "status": "failed",
                "progress": "complete",
                "derivatives": [{
                    "status": "failed",
                    "outputType": "svf2",
                    "messages": [{"type":"error","code":"E1","message":"first"}],
                    "children": [
                        {"type":"geometry","role":"3d","messages":[{"type":"warning","message":["second"]}]},
                        {"type":"geometry","role":"2d"}
                    ]
                }]
            }"#,
        );
        let TranslationState::Failed(messages) = m.translation_state() else {
            panic!("expected failure");
        };
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].code.as_deref(), Some("E1"));
        assert_eq!(messages[1].kind.as_deref(), Some("warning"));
    }

    #[test]
    fn test_timeout_is_failure() {
        let m = manifest(r#"{"status":"timeout"}"#);
        assert_eq!(m.translation_state(), TranslationState::Failed(vec![]));
    }

    #[test]
    fn test_unknown_status_keeps_polling() {
        let m = manifest(r#"{"status":"queued","progress":"5% complete"}"#);
        assert_eq!(m.translation_state(), TranslationState::InProgress("5% complete".into()));
    }

    #[test]
    fn test_nodes_depth_first() {
        let m = manifest(
            r#"{"status":"success","derivatives":[
                {"name":"a","children":[{"name":"a1","children":[{"name":"a1x"}]},{"name":"a2"}]},
                {"name":"b"}
            ]}"#,
        );
        let names: Vec<_> = m.nodes().iter().filter_map(|n| n.name.as_deref()).collect();
        assert_eq!(names, ["a", "a1", "a1x", "a2", "b"]);
    }
}
