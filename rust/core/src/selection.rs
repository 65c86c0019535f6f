// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Selection controller: which model is currently of interest.

use crate::error::ClientError;
use crate::model::ModelIdentifier;
use crate::poller::StatusPoller;
use reqwest::Url;
use tokio::sync::watch;

/// Query parameter carrying the selected model in shareable links.
pub const LINK_PARAM: &str = "urn";

/// Owns the selected model and the poller that follows it.
pub struct SelectionController {
    poller: StatusPoller,
    current: watch::Sender<Option<ModelIdentifier>>,
    seeded: bool,
}

impl SelectionController {
    pub fn new(poller: StatusPoller) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            poller,
            current,
            seeded: false,
        }
    }

    /// Replace the selection. Returns `false` if `id` is already selected.
    ///
    /// The previous polling session is stopped before the new one starts.
    pub fn select(&mut self, id: Option<ModelIdentifier>) -> bool {
        if *self.current.borrow() == id {
            tracing::trace!(model = ?id, "Selection unchanged");
            return false;
        }

        self.poller.stop();
        if let Some(id) = &id {
            self.poller.start(id.clone());
        }
        tracing::info!(model = ?id.as_ref().map(ModelIdentifier::as_str), "Model selected");
        self.current.send_replace(id);
        true
    }

    /// Seed the initial selection from an external source. Only the first
    /// call per controller has any effect.
    pub fn seed(&mut self, id: Option<ModelIdentifier>) -> bool {
        if std::mem::replace(&mut self.seeded, true) {
            tracing::debug!("Initial selection already seeded");
            return false;
        }
        match id {
            Some(id) => self.select(Some(id)),
            None => false,
        }
    }

    /// Seed from a shareable link such as `https://host/?urn=<id>`.
    pub fn seed_from_link(&mut self, link: &str) -> Result<bool, ClientError> {
        let id = model_from_link(link)?;
        Ok(self.seed(id))
    }

    /// Shareable link to the current selection, rooted at `base`.
    pub fn share_link(&self, base: &str) -> Result<Option<String>, ClientError> {
        let Some(id) = self.current() else {
            return Ok(None);
        };
        let mut url = Url::parse(base).map_err(|e| ClientError::InvalidUrl(format!("{base}: {e}")))?;
        url.query_pairs_mut().clear().append_pair(LINK_PARAM, id.as_str());
        Ok(Some(url.to_string()))
    }

    pub fn current(&self) -> Option<ModelIdentifier> {
        self.current.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<ModelIdentifier>> {
        self.current.subscribe()
    }

    pub fn poller(&self) -> &StatusPoller {
        &self.poller
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }
}

/// Extract the model identifier from a shareable link, if it has one.
pub fn model_from_link(link: &str) -> Result<Option<ModelIdentifier>, ClientError> {
    let url = Url::parse(link).map_err(|e| ClientError::InvalidUrl(format!("{link}: {e}")))?;
    let value = url
        .query_pairs()
        .find(|(key, _)| key == LINK_PARAM)
        .map(|(_, value)| value.into_owned());
    match value {
        Some(value) => ModelIdentifier::parse_optional(&value).map_err(ClientError::from),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::tests::{id, settle, ScriptedSource, Step};
    use crate::poller::{PollerConfig, SessionPhase};
    use crate::status::TranslationState;
    use std::sync::Arc;

    fn controller(source: &Arc<ScriptedSource>) -> SelectionController {
        SelectionController::new(StatusPoller::new(source.clone(), PollerConfig::default()))
    }

    #[tokio::test]
    async fn test_reselecting_same_model_is_noop() {
        tokio::time::pause();
        let source = ScriptedSource::new();
        source.script("urn1", vec![Step::now(TranslationState::InProgress("1%".into()))]);
        let mut selection = controller(&source);

        assert!(selection.select(Some(id("urn1"))));
        let generation = selection.poller().snapshot().generation;
        assert!(!selection.select(Some(id("urn1"))));
        assert_eq!(selection.poller().snapshot().generation, generation);

        settle(1).await;
        assert_eq!(source.calls_for("urn1"), 1);
    }

    #[tokio::test]
    async fn test_switching_models_silences_old_session() {
        tokio::time::pause();
        let source = ScriptedSource::new();
        source.script("urnA", vec![Step::now(TranslationState::InProgress("1%".into()))]);
        source.script("urnB", vec![Step::now(TranslationState::InProgress("9%".into()))]);
        let mut selection = controller(&source);
        let mut events = selection.poller().subscribe();

        selection.select(Some(id("urnA")));
        settle(1).await;
        selection.select(Some(id("urnB")));
        settle(20).await;

        assert_eq!(source.calls_for("urnA"), 1);
        assert!(source.calls_for("urnB") >= 4);
        let mut after_switch = false;
        while let Ok(event) = events.try_recv() {
            if let crate::poller::PollEvent::Status { model, .. } = event {
                if model == id("urnB") {
                    after_switch = true;
                } else {
                    assert!(!after_switch, "urnA emitted after urnB was selected");
                }
            }
        }
    }

    #[tokio::test]
    async fn test_clearing_selection_stops_polling() {
        tokio::time::pause();
        let source = ScriptedSource::new();
        let mut selection = controller(&source);

        selection.select(Some(id("urn1")));
        settle(1).await;
        assert!(selection.select(None));
        settle(30).await;

        assert_eq!(source.calls_for("urn1"), 1);
        assert_eq!(selection.current(), None);
        assert_eq!(selection.poller().snapshot().phase, SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_reselect_after_terminal_requires_other_selection() {
        tokio::time::pause();
        let source = ScriptedSource::new();
        source.script("urn1", vec![Step::now(TranslationState::Succeeded)]);
        let mut selection = controller(&source);

        selection.select(Some(id("urn1")));
        settle(30).await;
        assert!(!selection.select(Some(id("urn1"))));
        settle(30).await;
        assert_eq!(source.calls_for("urn1"), 1);

        selection.select(Some(id("urn2")));
        selection.select(Some(id("urn1")));
        settle(1).await;
        assert_eq!(source.calls_for("urn1"), 2);
    }

    #[tokio::test]
    async fn test_seed_applies_once() {
        let source = ScriptedSource::new();
        let mut selection = controller(&source);

        assert!(selection.seed_from_link("https://viewer.example/?urn=dXJuOjE").unwrap());
        assert_eq!(selection.current(), Some(id("dXJuOjE")));
        assert!(!selection.seed(Some(id("dXJuOjI"))));
        assert_eq!(selection.current(), Some(id("dXJuOjE")));
        assert!(selection.is_seeded());
    }

    #[tokio::test]
    async fn test_seed_without_param_consumes_seed() {
        let source = ScriptedSource::new();
        let mut selection = controller(&source);

        assert!(!selection.seed_from_link("https://viewer.example/").unwrap());
        assert!(!selection.seed(Some(id("dXJuOjI"))));
        assert_eq!(selection.current(), None);
    }

    #[test]
    fn test_model_from_link() {
        assert_eq!(
            model_from_link("http://localhost:3000/?foo=1&urn=abc_DEF-1").unwrap(),
            Some(id("abc_DEF-1"))
        );
        assert_eq!(model_from_link("http://localhost:3000/?urn=").unwrap(), None);
        assert!(model_from_link("http://localhost:3000/?urn=a%2Fb").is_err());
        assert!(model_from_link("not a url").is_err());
    }

    #[tokio::test]
    async fn test_share_link() {
        let source = ScriptedSource::new();
        let mut selection = controller(&source);
        assert_eq!(selection.share_link("http://localhost:3000/").unwrap(), None);

        selection.select(Some(id("dXJuOjE")));
        assert_eq!(
            selection.share_link("http://localhost:3000/?urn=old").unwrap().as_deref(),
            Some("http://localhost:3000/?urn=dXJuOjE")
        );
    }
}
