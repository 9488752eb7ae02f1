use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use lantern_core::chat::GenerationRequest;
use lantern_core::types::{Message, MessageId};
use lantern_session::ConversationStore;
use parking_lot::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::{build_context, prune_context};
use crate::error::{ChatError, Result};
use crate::events::{EventSink, SessionEvent};
use crate::lifecycle::{BorrowedModel, ModelLifecycleManager};
use crate::settings::ChatSettings;

/// Why a send was refused before anything was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyInput,
    /// A generation is already running
    Busy,
    /// No model is ready
    NoModel,
}

/// Result of [`StreamingGenerationEngine::send`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Rejected(RejectReason),
    Completed {
        message_id: MessageId,
        text: String,
        /// The turn succeeded only after pruning the context
        pruned: bool,
    },
    /// The error text was written into the reply
    Failed { message_id: MessageId, error: String },
    /// The turn was aborted; nothing further was applied
    Cancelled,
}

/// Resets the loading flag when a turn ends, whichever way it ends
struct LoadingGuard<'a>(&'a AtomicBool);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs one chat turn at a time against the ready model.
///
/// Streamed text is coalesced: deltas accumulate and are written to the
/// reply at most once per frame interval, with one final write when the
/// stream ends.
pub struct StreamingGenerationEngine {
    store: Arc<ConversationStore>,
    models: Arc<ModelLifecycleManager>,
    settings: ChatSettings,
    use_context_history: AtomicBool,
    loading: AtomicBool,
    current_turn: Mutex<Option<CancellationToken>>,
    events: EventSink,
}

impl StreamingGenerationEngine {
    pub fn new(
        store: Arc<ConversationStore>,
        models: Arc<ModelLifecycleManager>,
        settings: ChatSettings,
    ) -> Self {
        let use_context_history = AtomicBool::new(settings.use_context_history);
        Self {
            store,
            models,
            settings,
            use_context_history,
            loading: AtomicBool::new(false),
            current_turn: Mutex::new(None),
            events: EventSink::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub fn use_context_history(&self) -> bool {
        self.use_context_history.load(Ordering::SeqCst)
    }

    pub fn set_use_context_history(&self, enabled: bool) {
        self.use_context_history.store(enabled, Ordering::SeqCst);
    }

    /// Abort the running turn, if any
    pub fn abort(&self) {
        if let Some(token) = self.current_turn.lock().take() {
            token.cancel();
        }
    }

    /// Run one turn for `input`.
    ///
    /// `parent` is the session liveness token; the turn stops applying
    /// updates as soon as it, or [`Self::abort`], cancels.
    pub async fn send(&self, input: &str, parent: &CancellationToken) -> SendOutcome {
        let text = input.trim();
        if text.is_empty() {
            return SendOutcome::Rejected(RejectReason::EmptyInput);
        }
        if self.is_loading() {
            return SendOutcome::Rejected(RejectReason::Busy);
        }
        let Some(model) = self.models.borrow_handle() else {
            return SendOutcome::Rejected(RejectReason::NoModel);
        };
        if self
            .loading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return SendOutcome::Rejected(RejectReason::Busy);
        }
        let _loading = LoadingGuard(&self.loading);

        let cancel = parent.child_token();
        *self.current_turn.lock() = Some(cancel.clone());

        let user = Message::user(text);
        let placeholder = Message::placeholder();
        let user_id = user.id.clone();
        let placeholder_id = placeholder.id.clone();
        self.store.append([placeholder, user]);
        self.events.emit(SessionEvent::ScrollToBottom);

        let use_history = self.use_context_history();
        let mut pruned = false;

        let outcome = loop {
            let request = self.build_request(text, &placeholder_id, use_history);
            debug!(
                "Generating with {} ({} context messages)",
                model.model_id,
                request.message_count()
            );

            match self.stream_once(&model, request, &placeholder_id, &cancel).await {
                Ok(reply) => {
                    info!("Turn completed ({} chars)", reply.chars().count());
                    break SendOutcome::Completed {
                        message_id: placeholder_id.clone(),
                        text: reply,
                        pruned,
                    };
                }
                Err(ChatError::Cancelled) => break SendOutcome::Cancelled,
                Err(_) if cancel.is_cancelled() => break SendOutcome::Cancelled,
                Err(e) if use_history && !pruned && e.is_context_overflow() => {
                    let report = prune_context(
                        &self.store,
                        &user_id,
                        &placeholder_id,
                        self.settings.keep_latest_context_messages,
                    );
                    warn!(
                        "Context overflow, retrying with {} messages ({} excluded, {} chars)",
                        report.retained, report.excluded, report.total_token
                    );
                    self.apply_text(&placeholder_id, "");
                    pruned = true;
                }
                Err(e) => {
                    error!("Generation failed: {}", e);
                    let rendered = e.render();
                    self.apply_text(&placeholder_id, &rendered);
                    break SendOutcome::Failed {
                        message_id: placeholder_id.clone(),
                        error: rendered,
                    };
                }
            }
        };

        *self.current_turn.lock() = None;
        if !matches!(outcome, SendOutcome::Cancelled) {
            self.events.emit(SessionEvent::ScrollToBottom);
        }
        outcome
    }

    fn build_request(&self, text: &str, placeholder_id: &str, use_history: bool) -> GenerationRequest {
        if !use_history {
            return GenerationRequest::prompt(text);
        }
        let history = self
            .store
            .with_messages(|messages| build_context(messages, placeholder_id));
        GenerationRequest::messages(history)
    }

    fn apply_text(&self, placeholder_id: &str, text: &str) {
        let updated = self
            .store
            .update_by_id(placeholder_id, |m| m.text = text.to_string());
        if updated {
            self.events.emit(SessionEvent::MessageUpdated {
                message_id: placeholder_id.to_string(),
                text: text.to_string(),
            });
        }
    }

    /// Stream one attempt into the placeholder and return the full reply
    async fn stream_once(
        &self,
        model: &BorrowedModel,
        request: GenerationRequest,
        placeholder_id: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if !self.models.is_current(model.epoch) {
            return Err(ChatError::ModelUnavailable);
        }

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Cancelled),
            stream = model.handle.stream(request) => stream?,
        };

        let period = self.settings.frame_interval;
        let mut frame = interval_at(Instant::now() + period, period);
        frame.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut reply = String::new();
        let mut dirty = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ChatError::Cancelled),
                _ = frame.tick(), if dirty => {
                    self.apply_text(placeholder_id, &reply);
                    dirty = false;
                }
                next = stream.next() => match next {
                    Some(Ok(delta)) => {
                        if !self.models.is_current(model.epoch) {
                            return Err(ChatError::ModelUnavailable);
                        }
                        reply.push_str(&delta);
                        dirty = true;
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                },
            }
        }

        if cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }
        self.apply_text(placeholder_id, &reply);
        Ok(reply)
    }
}
