use std::sync::Arc;

use lantern_core::types::{Message, ModelLoadingState, ModelStatus};
use lantern_llm::ModelRuntime;
use lantern_session::{ConversationStore, KeyValueStore};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::{SendOutcome, StreamingGenerationEngine};
use crate::error::Result;
use crate::events::{EventSink, SessionEvent};
use crate::lifecycle::{ModelLifecycleManager, SetupOutcome};
use crate::settings::ChatSettings;

/// Point-in-time view of everything a chat screen renders
#[derive(Debug, Clone, Serialize)]
pub struct ChatSnapshot {
    /// Newest first
    pub messages: Vec<Message>,
    pub model_status: ModelStatus,
    pub model_loading_state: ModelLoadingState,
    pub download_progress: f64,
    pub selected_model_id: Option<String>,
    pub is_loading: bool,
    pub use_context_history: bool,
    pub conversation_summary: Option<String>,
    pub total_token: usize,
    pub remain_tokens: Option<usize>,
}

/// One chat screen's worth of state: the conversation for a model, the
/// model lifecycle, and the generation engine, tied to a single liveness
/// token that [`ChatSession::shutdown`] cancels.
pub struct ChatSession {
    store: Arc<ConversationStore>,
    models: Arc<ModelLifecycleManager>,
    engine: StreamingGenerationEngine,
    liveness: CancellationToken,
}

impl ChatSession {
    pub fn new(
        runtime: Arc<dyn ModelRuntime>,
        storage: Arc<dyn KeyValueStore>,
        settings: ChatSettings,
    ) -> Self {
        Self::build(runtime, storage, settings, EventSink::disabled())
    }

    /// Same as [`ChatSession::new`], with notifications sent to `tx`
    pub fn with_events(
        runtime: Arc<dyn ModelRuntime>,
        storage: Arc<dyn KeyValueStore>,
        settings: ChatSettings,
        tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self::build(runtime, storage, settings, EventSink::new(tx))
    }

    fn build(
        runtime: Arc<dyn ModelRuntime>,
        storage: Arc<dyn KeyValueStore>,
        settings: ChatSettings,
        events: EventSink,
    ) -> Self {
        let liveness = CancellationToken::new();

        let models = Arc::new(
            ModelLifecycleManager::new(runtime.clone())
                .with_liveness(liveness.clone())
                .with_events(events.clone()),
        );
        let lookup = {
            let models = models.clone();
            Arc::new(move |id: &str| models.ready_handle_for(id))
        };
        let store = Arc::new(
            ConversationStore::new(storage)
                .with_config(settings.conversation_config())
                .with_summarizer(runtime)
                .with_ready_handle(lookup)
                .with_liveness(liveness.clone()),
        );
        let engine = StreamingGenerationEngine::new(store.clone(), models.clone(), settings)
            .with_events(events);

        Self {
            store,
            models,
            engine,
            liveness,
        }
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn models(&self) -> &Arc<ModelLifecycleManager> {
        &self.models
    }

    pub fn is_alive(&self) -> bool {
        !self.liveness.is_cancelled()
    }

    /// Open the conversation for `model_id` and bring the model up if it is
    /// already downloaded.
    ///
    /// A conversation that cannot be read is logged and replaced by an
    /// empty one. Returns whether the model is ready.
    pub async fn start(&self, model_id: &str) -> bool {
        match self.store.load(model_id).await {
            Ok(count) => info!("Session started for {} with {} messages", model_id, count),
            Err(e) => warn!("Could not restore conversation for {}: {}", model_id, e),
        }
        self.models.check_model_exists(Some(model_id)).await
    }

    pub async fn send(&self, text: &str) -> SendOutcome {
        self.engine.send(text, &self.liveness).await
    }

    /// Abort the running turn without tearing the session down
    pub fn abort_generation(&self) {
        self.engine.abort();
    }

    pub async fn setup_model(&self, model_id: &str) -> SetupOutcome {
        self.models.setup_model(model_id).await
    }

    pub async fn check_model_exists(&self, model_id: Option<&str>) -> bool {
        self.models.check_model_exists(model_id).await
    }

    pub async fn remove_model(&self) {
        self.models.remove_model().await;
    }

    pub async fn remove_model_by_id(&self, model_id: &str) {
        self.models.remove_model_by_id(model_id).await;
    }

    pub async fn clear_conversation(&self) -> Result<()> {
        self.store.clear().await?;
        Ok(())
    }

    pub fn use_context_history(&self) -> bool {
        self.engine.use_context_history()
    }

    pub fn set_use_context_history(&self, enabled: bool) {
        self.engine.set_use_context_history(enabled);
    }

    pub fn is_loading(&self) -> bool {
        self.engine.is_loading()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        let model_status = self.models.status();
        ChatSnapshot {
            messages: self.store.messages(),
            model_status,
            model_loading_state: model_status.into(),
            download_progress: self.models.download_progress(),
            selected_model_id: self.models.selected_model_id(),
            is_loading: self.engine.is_loading(),
            use_context_history: self.engine.use_context_history(),
            conversation_summary: self.store.conversation_summary(),
            total_token: self.store.total_token(),
            remain_tokens: self.store.remain_tokens(),
        }
    }

    /// Tear the session down: stop in-flight work, persist the conversation,
    /// drop it from memory and release the model.
    pub async fn shutdown(&self) -> Result<()> {
        self.liveness.cancel();
        self.engine.abort();

        let flushed = self.store.flush().await;
        self.store.discard();
        self.models.shutdown().await;

        match flushed {
            Ok(true) => info!("Conversation saved"),
            Ok(false) => {}
            Err(e) => {
                warn!("Failed to save conversation: {}", e);
                return Err(e.into());
            }
        }
        Ok(())
    }
}
