use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lantern_core::types::{ModelLoadingState, ModelStatus};
use lantern_llm::{DownloadProgress, LLMError, ModelHandle, ModelRuntime, ProgressCallback};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::{EventSink, SessionEvent};

/// Result of a [`ModelLifecycleManager::setup_model`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    /// The model was downloaded and prepared by this call
    Ready,
    /// The requested model was already the ready one
    AlreadyReady,
    /// Another setup was running; this request was dropped
    Skipped,
    /// Download or preparation failed; an alert was raised
    Failed(String),
    /// The session was torn down before setup completed
    Abandoned,
}

/// A handle lent out for one generation, tagged with the epoch it was read at
#[derive(Clone)]
pub struct BorrowedModel {
    pub handle: ModelHandle,
    pub model_id: String,
    pub epoch: u64,
}

#[derive(Default)]
struct LifecycleState {
    status: ModelStatus,
    download_progress: f64,
    selected_model_id: Option<String>,
    handle: Option<ModelHandle>,
    /// Bumped whenever the handle is taken away or replaced
    epoch: u64,
}

impl LifecycleState {
    /// Drop the handle and regress to `NotSetup`. Returns the released handle.
    fn release(&mut self) -> Option<ModelHandle> {
        let handle = self.handle.take();
        if handle.is_some() {
            self.epoch += 1;
        }
        self.status = ModelStatus::NotSetup;
        self.download_progress = 0.0;
        handle
    }

    fn set_status(&mut self, status: ModelStatus) {
        debug_assert!(status != ModelStatus::Ready);
        if self.handle.is_some() {
            self.handle = None;
            self.epoch += 1;
        }
        self.status = status;
    }

    fn set_ready(&mut self, model_id: &str, handle: ModelHandle) {
        self.handle = Some(handle);
        self.epoch += 1;
        self.status = ModelStatus::Ready;
        self.download_progress = 100.0;
        self.selected_model_id = Some(model_id.to_string());
    }
}

/// Clears the in-progress flag however setup exits
struct SetupGuard<'a>(&'a AtomicBool);

impl Drop for SetupGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

enum Stage {
    Download,
    Prepare,
    Check,
}

impl Stage {
    fn alert_title(&self) -> &'static str {
        match self {
            Stage::Download => "Download Error",
            Stage::Prepare => "Prepare Error",
            Stage::Check => "Model Check Failed",
        }
    }
}

/// Owns the selected model: its status, download progress and live handle.
///
/// A handle exists exactly while the status is `Ready`; every transition
/// that leaves `Ready` drops the handle in the same critical section.
pub struct ModelLifecycleManager {
    runtime: Arc<dyn ModelRuntime>,
    state: Arc<RwLock<LifecycleState>>,
    setup_in_progress: AtomicBool,
    liveness: CancellationToken,
    events: EventSink,
}

impl ModelLifecycleManager {
    pub fn new(runtime: Arc<dyn ModelRuntime>) -> Self {
        Self {
            runtime,
            state: Arc::new(RwLock::new(LifecycleState::default())),
            setup_in_progress: AtomicBool::new(false),
            liveness: CancellationToken::new(),
            events: EventSink::disabled(),
        }
    }

    pub fn with_liveness(mut self, token: CancellationToken) -> Self {
        self.liveness = token;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    fn alive(&self) -> bool {
        !self.liveness.is_cancelled()
    }

    pub fn status(&self) -> ModelStatus {
        self.state.read().status
    }

    pub fn loading_state(&self) -> ModelLoadingState {
        self.status().into()
    }

    pub fn download_progress(&self) -> f64 {
        self.state.read().download_progress
    }

    pub fn selected_model_id(&self) -> Option<String> {
        self.state.read().selected_model_id.clone()
    }

    pub fn is_setup_in_progress(&self) -> bool {
        self.setup_in_progress.load(Ordering::SeqCst)
    }

    /// The ready handle, if any, for one generation to use
    pub fn borrow_handle(&self) -> Option<BorrowedModel> {
        let state = self.state.read();
        let handle = state.handle.clone()?;
        Some(BorrowedModel {
            handle,
            model_id: state.selected_model_id.clone().unwrap_or_default(),
            epoch: state.epoch,
        })
    }

    /// The ready handle when `model_id` is the selected model
    pub fn ready_handle_for(&self, model_id: &str) -> Option<ModelHandle> {
        let state = self.state.read();
        if state.selected_model_id.as_deref() != Some(model_id) {
            return None;
        }
        state.handle.clone()
    }

    /// Whether a handle borrowed at `epoch` is still the live one
    pub fn is_current(&self, epoch: u64) -> bool {
        let state = self.state.read();
        state.handle.is_some() && state.epoch == epoch
    }

    fn emit_status(&self) {
        let status = self.status();
        self.events.emit(SessionEvent::ModelStatusChanged { status });
    }

    fn transition(&self, status: ModelStatus) {
        self.state.write().set_status(status);
        self.emit_status();
    }

    fn progress_callback(&self) -> ProgressCallback {
        let state = self.state.clone();
        let liveness = self.liveness.clone();
        let events = self.events.clone();
        Arc::new(move |progress: DownloadProgress| {
            if liveness.is_cancelled() {
                return;
            }
            let Some(percentage) = progress.percentage() else {
                return;
            };
            state.write().download_progress = percentage;
            events.emit(SessionEvent::DownloadProgress { percentage });
        })
    }

    /// Download and prepare `model_id`, replacing any other selected model.
    ///
    /// Only one setup runs at a time; a call made while another is in
    /// flight returns [`SetupOutcome::Skipped`] without side effects.
    pub async fn setup_model(&self, model_id: &str) -> SetupOutcome {
        if self
            .setup_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Setup of {} ignored: another setup is in progress", model_id);
            return SetupOutcome::Skipped;
        }
        let _guard = SetupGuard(&self.setup_in_progress);

        let previous = {
            let state = self.state.read();
            if state.status == ModelStatus::Ready
                && state.selected_model_id.as_deref() == Some(model_id)
            {
                return SetupOutcome::AlreadyReady;
            }
            state
                .selected_model_id
                .clone()
                .filter(|id| id.as_str() != model_id)
        };

        if let Some(previous) = previous {
            if !self.switch_from(&previous, model_id).await {
                return SetupOutcome::Abandoned;
            }
        }

        {
            let mut state = self.state.write();
            state.set_status(ModelStatus::Downloading);
            state.download_progress = 0.0;
        }
        self.emit_status();
        info!("Downloading model {}", model_id);

        let downloaded = self
            .runtime
            .download(model_id, self.progress_callback())
            .await;
        if let Err(e) = downloaded {
            return self.fail(Stage::Download, model_id, e, true).await;
        }
        if !self.alive() {
            return SetupOutcome::Abandoned;
        }

        {
            let mut state = self.state.write();
            state.download_progress = 100.0;
            state.set_status(ModelStatus::Preparing);
        }
        self.emit_status();
        info!("Preparing model {}", model_id);

        let handle = match self.runtime.prepare(model_id).await {
            Ok(handle) => handle,
            Err(e) => return self.fail(Stage::Prepare, model_id, e, true).await,
        };
        if !self.alive() {
            if let Err(e) = handle.unload().await {
                debug!("Unload of orphaned handle for {} failed: {}", model_id, e);
            }
            return SetupOutcome::Abandoned;
        }

        self.state.write().set_ready(model_id, handle);
        self.emit_status();
        info!("Model {} is ready", model_id);
        SetupOutcome::Ready
    }

    /// Unload and remove `previous` before `next` takes its place.
    ///
    /// Failures are logged. Returns `false` when the session ended meanwhile.
    async fn switch_from(&self, previous: &str, next: &str) -> bool {
        info!("Switching model from {} to {}", previous, next);
        let released = self.state.write().release();
        self.emit_status();
        if let Some(handle) = released {
            if let Err(e) = handle.unload().await {
                warn!("Failed to unload {}: {}", previous, e);
            }
        }
        if let Err(e) = self.runtime.remove(previous).await {
            warn!("Failed to remove {}: {}", previous, e);
        }
        if !self.alive() {
            return false;
        }
        self.state.write().selected_model_id = None;
        true
    }

    async fn fail(
        &self,
        stage: Stage,
        model_id: &str,
        err: LLMError,
        remove_artifact: bool,
    ) -> SetupOutcome {
        error!("{} for {}: {}", stage.alert_title(), model_id, err);

        if remove_artifact {
            if let Err(e) = self.runtime.remove(model_id).await {
                debug!("Cleanup of {} failed: {}", model_id, e);
            }
        }

        if !self.alive() {
            return SetupOutcome::Abandoned;
        }

        let released = self.state.write().release();
        self.emit_status();
        if let Some(handle) = released {
            if let Err(e) = handle.unload().await {
                warn!("Failed to unload model after {}: {}", stage.alert_title(), e);
            }
        }
        self.events.emit(SessionEvent::Alert {
            title: stage.alert_title().to_string(),
            message: err.detail(),
        });
        SetupOutcome::Failed(err.detail())
    }

    /// Check whether `model_id` (or the selected model when `None`) is
    /// already downloaded, and prepare it if so.
    ///
    /// Returns `true` when the model ended up ready. Shares the setup
    /// exclusion, so it returns `false` while a setup is running.
    pub async fn check_model_exists(&self, model_id: Option<&str>) -> bool {
        if self
            .setup_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Model check skipped: a setup is in progress");
            return false;
        }
        let _guard = SetupGuard(&self.setup_in_progress);

        let (target, selected) = {
            let state = self.state.read();
            let target = match model_id {
                Some(id) => id.to_string(),
                None => match state.selected_model_id.clone() {
                    Some(id) => id,
                    None => return false,
                },
            };
            if state.status == ModelStatus::Ready
                && state.selected_model_id.as_deref() == Some(target.as_str())
            {
                return true;
            }
            (target, state.selected_model_id.clone())
        };

        let downloaded = match self.runtime.is_downloaded(&target).await {
            Ok(downloaded) => downloaded,
            Err(e) => {
                self.fail(Stage::Check, &target, e, model_id.is_some()).await;
                return false;
            }
        };
        if !self.alive() {
            return false;
        }

        if !downloaded {
            debug!("Model {} is not downloaded", target);
            return false;
        }

        if let Some(previous) = selected.filter(|id| *id != target) {
            if !self.switch_from(&previous, &target).await {
                return false;
            }
        }

        self.transition(ModelStatus::Preparing);
        let handle = match self.runtime.prepare(&target).await {
            Ok(handle) => handle,
            Err(e) => {
                self.fail(Stage::Check, &target, e, model_id.is_some()).await;
                return false;
            }
        };
        if !self.alive() {
            if let Err(e) = handle.unload().await {
                debug!("Unload of orphaned handle for {} failed: {}", target, e);
            }
            return false;
        }

        self.state.write().set_ready(&target, handle);
        self.emit_status();
        info!("Model {} is ready", target);
        true
    }

    /// Unload and delete the selected model, then reset to `NotSetup`.
    ///
    /// Unload and removal failures are logged; the state is reset regardless.
    pub async fn remove_model(&self) {
        let (released, selected) = {
            let mut state = self.state.write();
            (state.release(), state.selected_model_id.clone())
        };
        self.emit_status();

        if let Some(handle) = released {
            if let Err(e) = handle.unload().await {
                warn!("Failed to unload model: {}", e);
            }
        }

        let Some(selected) = selected else {
            return;
        };
        if let Err(e) = self.runtime.remove(&selected).await {
            error!("Failed to remove {}: {}", selected, e);
        }

        if self.alive() {
            let mut state = self.state.write();
            state.release();
            state.selected_model_id = None;
            drop(state);
            self.emit_status();
            info!("Removed model {}", selected);
        }
    }

    /// Delete a model that may or may not be the selected one.
    ///
    /// The ready selected model goes through [`Self::remove_model`]. When the
    /// id is selected but not ready, the selection is cleared after removal.
    pub async fn remove_model_by_id(&self, model_id: &str) {
        let (is_selected, is_ready) = {
            let state = self.state.read();
            let is_selected = state.selected_model_id.as_deref() == Some(model_id);
            (is_selected, is_selected && state.status == ModelStatus::Ready)
        };

        if is_ready {
            self.remove_model().await;
            return;
        }

        if let Err(e) = self.runtime.remove(model_id).await {
            error!("Failed to remove {}: {}", model_id, e);
            return;
        }
        info!("Removed model {}", model_id);

        if is_selected && self.alive() {
            let mut state = self.state.write();
            if state.selected_model_id.as_deref() == Some(model_id) {
                state.selected_model_id = None;
                state.release();
            }
            drop(state);
            self.emit_status();
        }
    }

    /// Release the handle at session teardown
    pub async fn shutdown(&self) {
        let released = self.state.write().release();
        if let Some(handle) = released {
            if let Err(e) = handle.unload().await {
                warn!("Failed to unload model at shutdown: {}", e);
            }
        }
    }
}
