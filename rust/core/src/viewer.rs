// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Viewer lifecycle adapter.
//!
//! The rendering widget is an external library with its own asynchronous
//! bootstrap. [`ViewerLifecycleAdapter`] owns exactly one widget per mount,
//! starts the bootstrap on [`mount`](ViewerLifecycleAdapter::mount), installs
//! the widget once the bootstrap finishes and loads geometry at most once per
//! model.

use crate::error::ViewerError;
use crate::manifest::Manifest;
use crate::model::ModelIdentifier;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

/// Widget bootstrap options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerConfig {
    pub env: String,
    pub api: String,
    pub extensions: Vec<String>,
    pub theme: String,
    pub light_preset: u8,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            env: "AutodeskProduction".into(),
            api: "derivativeV2".into(),
            extensions: vec!["Autodesk.DocumentBrowser".into(), "Autodesk.FullScreen".into()],
            theme: "light-theme".into(),
            light_preset: 0,
        }
    }
}

/// A viewable node of a translated document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewableNode {
    pub guid: Option<String>,
    pub name: Option<String>,
    /// "3d" or "2d".
    pub role: Option<String>,
}

impl ViewableNode {
    pub fn is_3d(&self) -> bool {
        self.role.as_deref() == Some("3d")
    }
}

/// Everything the widget needs to open a translated model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentDescriptor {
    pub urn: ModelIdentifier,
    pub viewables: Vec<ViewableNode>,
}

impl DocumentDescriptor {
    /// Collect the geometry nodes of a manifest.
    pub fn from_manifest(urn: ModelIdentifier, manifest: &Manifest) -> Self {
        let viewables = manifest
            .nodes()
            .into_iter()
            .filter(|node| node.kind.as_deref() == Some("geometry"))
            .map(|node| ViewableNode {
                guid: node.guid.clone(),
                name: node.name.clone(),
                role: node.role.clone(),
            })
            .collect();
        Self { urn, viewables }
    }

    /// The first 3D view, or any geometry if the model has no 3D view.
    pub fn default_geometry(&self) -> Option<&ViewableNode> {
        self.viewables
            .iter()
            .find(|v| v.is_3d())
            .or_else(|| self.viewables.first())
    }
}

/// Source of document descriptors.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load_document(&self, id: &ModelIdentifier) -> Result<DocumentDescriptor, ViewerError>;
}

/// A created rendering widget.
#[async_trait]
pub trait ViewerWidget: Send + 'static {
    /// Load one view of a document into the scene.
    async fn load_geometry(
        &mut self,
        document: &DocumentDescriptor,
        view: &ViewableNode,
    ) -> Result<(), ViewerError>;

    /// Release the widget. Called exactly once.
    fn finish(&mut self);
}

/// Creates widgets bound to a drawing surface.
#[async_trait]
pub trait ViewerFactory: Send + Sync + 'static {
    type Surface: Send + 'static;
    type Widget: ViewerWidget;

    async fn create(
        &self,
        surface: Self::Surface,
        config: ViewerConfig,
    ) -> Result<Self::Widget, ViewerError>;
}

/// The mounted widget plus the model whose geometry it shows.
pub struct ViewerHandle<W> {
    widget: W,
    loaded: Option<ModelIdentifier>,
}

impl<W> ViewerHandle<W> {
    pub fn widget(&self) -> &W {
        &self.widget
    }

    pub fn loaded(&self) -> Option<&ModelIdentifier> {
        self.loaded.as_ref()
    }
}

enum Mount<W> {
    Unmounted,
    Initializing(Bootstrap<W>),
    Ready(ViewerHandle<W>),
    Failed(ViewerError),
}

/// Hand-off point between the bootstrap task and the adapter.
enum Slot<W> {
    Pending,
    Done(Result<W, ViewerError>),
    Cancelled,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Store a bootstrap result, or dispose the widget if nobody wants it anymore.
fn deliver<W: ViewerWidget>(slot: &Mutex<Slot<W>>, result: Result<W, ViewerError>) {
    let mut slot = lock(slot);
    if matches!(*slot, Slot::Cancelled) {
        if let Ok(mut widget) = result {
            widget.finish();
            tracing::debug!("Disposed widget of a cancelled bootstrap");
        }
        return;
    }
    *slot = Slot::Done(result);
}

/// A running widget bootstrap.
struct Bootstrap<W> {
    task: JoinHandle<()>,
    slot: Arc<Mutex<Slot<W>>>,
}

impl<W: ViewerWidget> Bootstrap<W> {
    fn take(&self) -> Option<Result<W, ViewerError>> {
        let mut slot = lock(&self.slot);
        match std::mem::replace(&mut *slot, Slot::Pending) {
            Slot::Done(result) => Some(result),
            other => {
                *slot = other;
                None
            }
        }
    }

    /// Mark the bootstrap cancelled under the slot lock, so a widget is either
    /// already here and finished now, or finished by the task itself.
    fn cancel(self) {
        let delivered = std::mem::replace(&mut *lock(&self.slot), Slot::Cancelled);
        if let Slot::Done(Ok(mut widget)) = delivered {
            widget.finish();
        }
        self.task.abort();
    }
}

fn bootstrap_ended(join: Result<(), tokio::task::JoinError>) -> ViewerError {
    match join {
        Err(join) => {
            tracing::error!(error = %join, "Viewer bootstrap task failed");
            ViewerError::InitializationFailed(join.to_string())
        }
        Ok(()) => ViewerError::InitializationFailed("bootstrap ended without a widget".into()),
    }
}

/// Why `show_model` did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoModel,
    NotReady,
    AlreadyLoaded,
}

/// Result of a `show_model` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowOutcome {
    Loaded,
    Skipped(SkipReason),
}

/// Owns the widget's create/destroy lifecycle and the one-time geometry load.
pub struct ViewerLifecycleAdapter<F: ViewerFactory> {
    factory: Arc<F>,
    documents: Arc<dyn DocumentLoader>,
    config: ViewerConfig,
    mount: Mount<F::Widget>,
}

impl<F: ViewerFactory> ViewerLifecycleAdapter<F> {
    pub fn new(factory: Arc<F>, documents: Arc<dyn DocumentLoader>, config: ViewerConfig) -> Self {
        Self {
            factory,
            documents,
            config,
            mount: Mount::Unmounted,
        }
    }

    /// Start creating a widget on `surface`. Returns immediately; a widget
    /// from an earlier mount is disposed first.
    pub fn mount(&mut self, surface: F::Surface) {
        self.unmount();
        let factory = Arc::clone(&self.factory);
        let config = self.config.clone();
        let slot = Arc::new(Mutex::new(Slot::Pending));
        let task = tokio::spawn({
            let slot = Arc::clone(&slot);
            async move {
                let result = factory.create(surface, config).await;
                deliver(&slot, result);
            }
        });
        tracing::debug!("Viewer bootstrap started");
        self.mount = Mount::Initializing(Bootstrap { task, slot });
    }

    /// Wait for the bootstrap started by `mount`.
    pub async fn initialized(&mut self) -> Result<(), ViewerError> {
        if let Mount::Initializing(bootstrap) = &mut self.mount {
            let joined = (&mut bootstrap.task).await;
            let result = bootstrap.take().unwrap_or_else(|| Err(bootstrap_ended(joined)));
            self.install(result);
        }
        match &self.mount {
            Mount::Ready(_) => Ok(()),
            Mount::Failed(err) => Err(err.clone()),
            _ => Err(ViewerError::NotMounted),
        }
    }

    /// Pick up a finished bootstrap without waiting.
    fn poll_initialization(&mut self) {
        let Mount::Initializing(bootstrap) = &mut self.mount else {
            return;
        };
        // Checked first: a finished task has already filled the slot.
        let finished = bootstrap.task.is_finished();
        let result = match bootstrap.take() {
            Some(result) => result,
            None if finished => Err(bootstrap_ended(Ok(()))),
            None => return,
        };
        self.install(result);
    }

    fn install(&mut self, result: Result<F::Widget, ViewerError>) {
        self.mount = match result {
            Ok(widget) => {
                tracing::info!("Viewer initialized");
                Mount::Ready(ViewerHandle { widget, loaded: None })
            }
            Err(err) => {
                tracing::error!(error = %err, "Viewer initialization failed");
                Mount::Failed(err)
            }
        };
    }

    /// Load the default 3D view of `id` unless there is nothing to do.
    ///
    /// A document or geometry failure is returned as an error but leaves the
    /// widget usable for another model.
    pub async fn show_model(&mut self, id: Option<&ModelIdentifier>) -> Result<ShowOutcome, ViewerError> {
        let Some(id) = id else {
            return Ok(ShowOutcome::Skipped(SkipReason::NoModel));
        };
        self.poll_initialization();
        let handle = match &mut self.mount {
            Mount::Ready(handle) => handle,
            Mount::Failed(err) => return Err(err.clone()),
            _ => return Ok(ShowOutcome::Skipped(SkipReason::NotReady)),
        };
        if handle.loaded.as_ref() == Some(id) {
            return Ok(ShowOutcome::Skipped(SkipReason::AlreadyLoaded));
        }

        let document = self.documents.load_document(id).await.map_err(|err| {
            tracing::warn!(model = %id, error = %err, "Document load failed");
            err
        })?;
        let view = document
            .default_geometry()
            .ok_or_else(|| ViewerError::NoGeometry(id.to_string()))?;
        handle.widget.load_geometry(&document, view).await?;
        handle.loaded = Some(id.clone());
        tracing::info!(model = %id, view = view.name.as_deref().unwrap_or_default(), "Geometry loaded");
        Ok(ShowOutcome::Loaded)
    }

    /// Dispose the widget. Safe at any point of the lifecycle.
    pub fn unmount(&mut self) {
        match std::mem::replace(&mut self.mount, Mount::Unmounted) {
            Mount::Ready(mut handle) => {
                handle.widget.finish();
                tracing::debug!("Viewer disposed");
            }
            Mount::Initializing(bootstrap) => {
                bootstrap.cancel();
                tracing::debug!("Viewer bootstrap cancelled");
            }
            Mount::Unmounted | Mount::Failed(_) => {}
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.mount, Mount::Ready(_))
    }

    pub fn handle(&self) -> Option<&ViewerHandle<F::Widget>> {
        match &self.mount {
            Mount::Ready(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn loaded_model(&self) -> Option<&ModelIdentifier> {
        self.handle().and_then(ViewerHandle::loaded)
    }
}

impl<F: ViewerFactory> Drop for ViewerLifecycleAdapter<F> {
    fn drop(&mut self) {
        self.unmount();
    }
}
