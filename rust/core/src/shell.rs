// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Presentation shell: wires selection, polling, uploads and the viewer
//! together and derives what the page shows.

use crate::error::{ShellError, ViewerError};
use crate::model::{ModelIdentifier, ModelInfo};
use crate::poller::{PollSnapshot, SessionPhase};
use crate::selection::SelectionController;
use crate::status::TranslationState;
use crate::upload::{FilePayload, ModelUploader};
use crate::viewer::{ShowOutcome, ViewerFactory, ViewerLifecycleAdapter};
use tokio::sync::watch;

/// Overlay text once the poller gave up on a model.
pub const TIMED_OUT_MESSAGE: &str = "Translation is taking longer than expected.";

/// User-facing text for a translation state. `None` when there is nothing
/// to say, i.e. the model is viewable.
pub fn status_message(state: &TranslationState) -> Option<String> {
    match state {
        TranslationState::NotTranslated => Some("Model has not been translated.".to_string()),
        TranslationState::InProgress(progress) => {
            Some(format!("Model is being translated ({progress})..."))
        }
        TranslationState::Failed(diagnostics) => {
            let mut message = String::from("Translation failed.");
            for diagnostic in diagnostics {
                message.push('\n');
                message.push_str(&diagnostic.to_string());
            }
            Some(message)
        }
        TranslationState::Succeeded => None,
    }
}

/// The composed viewer page.
pub struct ViewerShell<F: ViewerFactory> {
    selection: SelectionController,
    viewer: ViewerLifecycleAdapter<F>,
    status: watch::Receiver<PollSnapshot>,
    upload_pending: bool,
}

impl<F: ViewerFactory> ViewerShell<F> {
    pub fn new(selection: SelectionController, viewer: ViewerLifecycleAdapter<F>) -> Self {
        let status = selection.poller().watch();
        Self {
            selection,
            viewer,
            status,
            upload_pending: false,
        }
    }

    pub fn mount(&mut self, surface: F::Surface) {
        self.viewer.mount(surface);
    }

    pub fn unmount(&mut self) {
        self.viewer.unmount();
    }

    pub fn selection(&mut self) -> &mut SelectionController {
        &mut self.selection
    }

    pub fn viewer(&mut self) -> &mut ViewerLifecycleAdapter<F> {
        &mut self.viewer
    }

    pub fn current_model(&self) -> Option<ModelIdentifier> {
        self.selection.current()
    }

    /// Model selector and uploader are locked while a model is being
    /// polled or an upload is in flight.
    pub fn controls_enabled(&self) -> bool {
        !self.upload_pending && !self.status.borrow().is_active()
    }

    pub fn is_uploading(&self) -> bool {
        self.upload_pending
    }

    /// User selection from the model list.
    pub fn select(&mut self, id: Option<ModelIdentifier>) -> Result<bool, ShellError> {
        if !self.controls_enabled() {
            return Err(ShellError::ControlsDisabled);
        }
        Ok(self.selection.select(id))
    }

    /// Overlay text for the current selection, if any.
    pub fn overlay(&self) -> Option<String> {
        let snapshot = self.status.borrow();
        if snapshot.phase == SessionPhase::TimedOut {
            return Some(TIMED_OUT_MESSAGE.to_string());
        }
        snapshot.state.as_ref().and_then(status_message)
    }

    pub fn overlay_visible(&self) -> bool {
        self.overlay().is_some()
    }

    /// The selected model when its translation is known to have succeeded.
    pub fn viewable_model(&self) -> Option<ModelIdentifier> {
        let snapshot = self.status.borrow();
        match (&snapshot.model, &snapshot.state) {
            (Some(model), Some(TranslationState::Succeeded))
                if self.selection.current().as_ref() == Some(model) =>
            {
                Some(model.clone())
            }
            _ => None,
        }
    }

    /// Hand a successfully translated selection to the viewer.
    pub async fn sync_viewer(&mut self) -> Result<ShowOutcome, ViewerError> {
        let target = self.viewable_model();
        self.viewer.show_model(target.as_ref()).await
    }

    /// Wait until the poller publishes something new. Returns `false` once
    /// the poller is gone.
    pub async fn next_change(&mut self) -> bool {
        self.status.changed().await.is_ok()
    }

    /// Lock the controls for an upload.
    pub fn begin_upload(&mut self) -> Result<(), ShellError> {
        if !self.controls_enabled() {
            return Err(ShellError::ControlsDisabled);
        }
        self.upload_pending = true;
        Ok(())
    }

    /// Unlock the controls; a successful upload becomes the selection.
    pub fn finish_upload(&mut self, result: &Result<ModelInfo, ShellError>) {
        self.upload_pending = false;
        if let Ok(info) = result {
            self.accept_upload(info);
        }
    }

    /// Select a freshly uploaded model.
    pub fn accept_upload(&mut self, info: &ModelInfo) -> bool {
        tracing::info!(file = %info.name, model = %info.urn, "Selecting uploaded model");
        self.selection.select(Some(info.urn.clone()))
    }

    /// Upload `file` and select it on success. The entry point hint is only
    /// sent for archives.
    pub async fn upload(
        &mut self,
        uploader: &dyn ModelUploader,
        file: FilePayload,
        entry_point: Option<&str>,
    ) -> Result<ModelInfo, ShellError> {
        if !file.is_accepted() {
            return Err(ShellError::UnsupportedFile(file.name));
        }
        self.begin_upload()?;
        let hint = if file.is_archive() { entry_point } else { None };
        let result = uploader.upload(file, hint).await.map_err(ShellError::from);
        if let Err(err) = &result {
            tracing::warn!(error = %err, "Upload failed");
        }
        self.finish_upload(&result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{UploadError, UploadStage};
    use crate::poller::tests::{id, settle, ScriptedSource, Step};
    use crate::poller::{PollerConfig, StatusPoller};
    use crate::status::Diagnostic;
    use crate::viewer::tests::{adapter, FakeFactory, WidgetLog};
    use crate::viewer::SkipReason;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn shell(source: &Arc<ScriptedSource>, log: &Arc<WidgetLog>) -> ViewerShell<FakeFactory> {
        let selection = SelectionController::new(StatusPoller::new(source.clone(), PollerConfig::default()));
        let mut shell = ViewerShell::new(selection, adapter(log, Duration::ZERO));
        shell.mount("canvas");
        shell
    }

    /// Uploader that remembers the hint it was given.
    #[derive(Default)]
    struct HintUploader {
        hints: Mutex<Vec<Option<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl ModelUploader for HintUploader {
        async fn upload(
            &self,
            file: FilePayload,
            entry_point: Option<&str>,
        ) -> Result<ModelInfo, UploadError> {
            self.hints.lock().unwrap().push(entry_point.map(str::to_string));
            if self.fail {
                return Err(UploadError::failed(&file.name, UploadStage::Submit, "HTTP 500"));
            }
            Ok(ModelInfo {
                urn: ModelIdentifier::from_object_id(&format!("urn:adsk.objects:os.object:bucket/{}", file.name)),
                name: file.name,
            })
        }
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(
            status_message(&TranslationState::NotTranslated).as_deref(),
            Some("Model has not been translated.")
        );
        assert_eq!(
            status_message(&TranslationState::InProgress("40% complete".into())).as_deref(),
            Some("Model is being translated (40% complete)...")
        );
        assert_eq!(status_message(&TranslationState::Succeeded), None);

        let mut unsupported = Diagnostic::new(3, "Unsupported file");
        unsupported.kind = Some("error".into());
        unsupported.code = Some("TranslationWorker-InternalFailure".into());
        let message = status_message(&TranslationState::Failed(vec![
            unsupported,
            Diagnostic::new(1, "Missing links"),
        ]))
        .unwrap();
        assert_eq!(
            message,
            "Translation failed.\n[error TranslationWorker-InternalFailure] Unsupported file\nMissing links"
        );
    }

    #[tokio::test]
    async fn test_progress_then_viewer_loads_once() {
        tokio::time::pause();
        let source = ScriptedSource::new();
        source.script(
            "urn1",
            vec![
                Step::now(TranslationState::InProgress("10%".into())),
                Step::now(TranslationState::Succeeded),
            ],
        );
        let log = Arc::new(WidgetLog::default());
        let mut shell = shell(&source, &log);
        shell.viewer().initialized().await.unwrap();

        assert!(shell.select(Some(id("urn1"))).unwrap());
        settle(1).await;
        assert_eq!(shell.overlay().as_deref(), Some("Model is being translated (10%)..."));
        assert!(!shell.controls_enabled());
        assert!(matches!(shell.select(Some(id("urn2"))), Err(ShellError::ControlsDisabled)));
        assert_eq!(
            shell.sync_viewer().await,
            Ok(ShowOutcome::Skipped(SkipReason::NoModel))
        );

        settle(5).await;
        assert!(!shell.overlay_visible());
        assert!(shell.controls_enabled());
        assert_eq!(shell.sync_viewer().await, Ok(ShowOutcome::Loaded));
        assert_eq!(
            shell.sync_viewer().await,
            Ok(ShowOutcome::Skipped(SkipReason::AlreadyLoaded))
        );
        assert_eq!(log.loads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_translation_shows_diagnostics() {
        tokio::time::pause();
        let source = ScriptedSource::new();
        source.script(
            "urn2",
            vec![Step::now(TranslationState::Failed(vec![Diagnostic::new(3, "bad geometry")]))],
        );
        let log = Arc::new(WidgetLog::default());
        let mut shell = shell(&source, &log);

        shell.select(Some(id("urn2"))).unwrap();
        settle(1).await;

        assert_eq!(shell.overlay().as_deref(), Some("Translation failed.\nbad geometry"));
        assert!(shell.controls_enabled());
        assert_eq!(shell.viewable_model(), None);
    }

    #[tokio::test]
    async fn test_next_change_reports_updates() {
        tokio::time::pause();
        let source = ScriptedSource::new();
        source.script("urn1", vec![Step::now(TranslationState::NotTranslated)]);
        let log = Arc::new(WidgetLog::default());
        let mut shell = shell(&source, &log);

        shell.select(Some(id("urn1"))).unwrap();
        assert!(shell.next_change().await);
        while shell.overlay().is_none() {
            assert!(shell.next_change().await);
        }
        assert_eq!(shell.overlay().as_deref(), Some("Model has not been translated."));
        // n/a is not terminal: polling continues and the controls stay locked.
        assert!(!shell.controls_enabled());
    }

    #[tokio::test]
    async fn test_timed_out_session_unlocks_controls() {
        tokio::time::pause();
        let source = ScriptedSource::new();
        source.script("urn1", vec![Step::now(TranslationState::InProgress("1%".into()))]);
        let selection = SelectionController::new(StatusPoller::new(
            source.clone(),
            PollerConfig {
                interval: Duration::from_secs(5),
                max_attempts: Some(2),
            },
        ));
        let log = Arc::new(WidgetLog::default());
        let mut shell = ViewerShell::new(selection, adapter(&log, Duration::ZERO));

        shell.select(Some(id("urn1"))).unwrap();
        settle(20).await;

        assert_eq!(shell.overlay().as_deref(), Some(TIMED_OUT_MESSAGE));
        assert!(shell.controls_enabled());
    }

    #[tokio::test]
    async fn test_upload_archive_selects_new_model() {
        tokio::time::pause();
        let source = ScriptedSource::new();
        let log = Arc::new(WidgetLog::default());
        let mut shell = shell(&source, &log);
        let uploader = HintUploader::default();

        let info = shell
            .upload(&uploader, FilePayload::new("model.zip", vec![1u8]), Some("main.rvt"))
            .await
            .unwrap();

        assert!(!shell.is_uploading());
        assert_eq!(shell.current_model(), Some(info.urn.clone()));
        assert_eq!(*uploader.hints.lock().unwrap(), vec![Some("main.rvt".to_string())]);
        settle(1).await;
        assert_eq!(source.calls_for(info.urn.as_str()), 1);
    }

    #[tokio::test]
    async fn test_upload_drops_hint_for_plain_files() {
        let source = ScriptedSource::new();
        let log = Arc::new(WidgetLog::default());
        let mut shell = shell(&source, &log);
        let uploader = HintUploader::default();

        shell
            .upload(&uploader, FilePayload::new("tower.rvt", vec![1u8]), Some("main.rvt"))
            .await
            .unwrap();
        assert_eq!(*uploader.hints.lock().unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn test_upload_failure_keeps_selection() {
        let source = ScriptedSource::new();
        let log = Arc::new(WidgetLog::default());
        let mut shell = shell(&source, &log);
        let uploader = HintUploader { fail: true, ..HintUploader::default() };

        let err = shell
            .upload(&uploader, FilePayload::new("tower.rvt", vec![1u8]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ShellError::Upload(_)));
        assert_eq!(shell.current_model(), None);
        assert!(shell.controls_enabled());
    }

    #[tokio::test]
    async fn test_upload_rejected_while_locked() {
        let source = ScriptedSource::new();
        let log = Arc::new(WidgetLog::default());
        let mut shell = shell(&source, &log);
        let uploader = HintUploader::default();

        assert!(matches!(
            shell
                .upload(&uploader, FilePayload::new("notes.txt", vec![1u8]), None)
                .await,
            Err(ShellError::UnsupportedFile(_))
        ));

        shell.begin_upload().unwrap();
        assert!(matches!(shell.begin_upload(), Err(ShellError::ControlsDisabled)));
        assert!(matches!(shell.select(Some(id("urn1"))), Err(ShellError::ControlsDisabled)));
        shell.finish_upload(&Err(ShellError::ControlsDisabled));
        assert!(shell.controls_enabled());
        assert!(uploader.hints.lock().unwrap().is_empty());
    }
}
