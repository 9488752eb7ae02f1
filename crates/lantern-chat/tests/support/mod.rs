#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use lantern_chat::{ChatSession, ChatSettings, SessionEvent};
use lantern_core::chat::GenerationRequest;
use lantern_core::types::Message;
use lantern_llm::{
    DownloadProgress, LLMError, LanguageModel, ModelHandle, ModelRuntime, ProgressCallback,
    RuntimeMetadata, TextStream,
};
use lantern_session::MemoryStore;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// What the next `stream` call produces
pub enum Script {
    Reply(Vec<String>),
    /// Yields the deltas, then fails with a generation error
    FailAfter(Vec<String>, String),
    /// `stream` itself fails
    FailAtStart(String),
    /// Waits for the gate before yielding anything
    Gated(Arc<Notify>, Vec<String>),
    /// Sleeps before each delta
    Paced(Duration, Vec<String>),
}

pub fn reply(parts: &[&str]) -> Script {
    Script::Reply(parts.iter().map(|s| s.to_string()).collect())
}

#[derive(Default)]
pub struct RuntimeState {
    pub downloaded: Mutex<HashSet<String>>,
    /// `op:model` entries in call order
    pub ops: Mutex<Vec<String>>,
    pub scripts: Mutex<VecDeque<Script>>,
    pub requests: Mutex<Vec<GenerationRequest>>,
    pub download_gate: Mutex<Option<Arc<Notify>>>,
    pub fail_download: Mutex<Option<String>>,
    pub fail_prepare: Mutex<Option<String>>,
    pub fail_unload: AtomicBool,
    /// One-shot `generate` reply; `None` makes it fail
    pub summary_reply: Mutex<Option<String>>,
}

impl RuntimeState {
    fn record(&self, op: &str, model_id: &str) {
        self.ops.lock().push(format!("{}:{}", op, model_id));
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        let prefix = format!("{}:", op);
        self.ops.lock().iter().filter(|o| o.starts_with(&prefix)).count()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.ops.lock().iter().position(|o| o == entry)
    }
}

pub struct ScriptedRuntime {
    pub state: Arc<RuntimeState>,
    metadata: RuntimeMetadata,
}

impl ScriptedRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(RuntimeState::default()),
            metadata: RuntimeMetadata {
                id: "scripted".to_string(),
                name: "Scripted".to_string(),
            },
        })
    }

    pub fn mark_downloaded(&self, model_id: &str) {
        self.state.downloaded.lock().insert(model_id.to_string());
    }

    pub fn push(&self, script: Script) {
        self.state.scripts.lock().push_back(script);
    }
}

#[async_trait]
impl ModelRuntime for ScriptedRuntime {
    fn runtime_id(&self) -> &str {
        "scripted"
    }

    fn metadata(&self) -> &RuntimeMetadata {
        &self.metadata
    }

    async fn is_downloaded(&self, model_id: &str) -> lantern_llm::Result<bool> {
        Ok(self.state.downloaded.lock().contains(model_id))
    }

    async fn download(&self, model_id: &str, on_progress: ProgressCallback) -> lantern_llm::Result<()> {
        self.state.record("download", model_id);
        for loaded in [25u64, 50, 100] {
            on_progress(DownloadProgress::new(loaded, Some(100)));
            tokio::task::yield_now().await;
        }
        let gate = self.state.download_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(message) = self.state.fail_download.lock().clone() {
            return Err(LLMError::Download(message));
        }
        self.mark_downloaded(model_id);
        Ok(())
    }

    async fn prepare(&self, model_id: &str) -> lantern_llm::Result<ModelHandle> {
        self.state.record("prepare", model_id);
        if let Some(message) = self.state.fail_prepare.lock().clone() {
            return Err(LLMError::Prepare(message));
        }
        Ok(Arc::new(ScriptedModel {
            model_id: model_id.to_string(),
            state: self.state.clone(),
        }))
    }

    async fn remove(&self, model_id: &str) -> lantern_llm::Result<()> {
        self.state.record("remove", model_id);
        self.state.downloaded.lock().remove(model_id);
        Ok(())
    }
}

pub struct ScriptedModel {
    model_id: String,
    state: Arc<RuntimeState>,
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn stream(&self, request: GenerationRequest) -> lantern_llm::Result<TextStream> {
        self.state.record("stream", &self.model_id);
        self.state.requests.lock().push(request);

        let script = self
            .state
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| reply(&["ok"]));

        let stream: TextStream = match script {
            Script::Reply(deltas) => Box::pin(futures::stream::iter(deltas.into_iter().map(Ok))),
            Script::FailAfter(deltas, message) => {
                let mut items: Vec<lantern_llm::Result<String>> =
                    deltas.into_iter().map(Ok).collect();
                items.push(Err(LLMError::Generation(message)));
                Box::pin(futures::stream::iter(items))
            }
            Script::FailAtStart(message) => return Err(LLMError::Generation(message)),
            Script::Gated(gate, deltas) => {
                let wait = futures::stream::once(async move {
                    gate.notified().await;
                })
                .filter_map(|_| async { None::<lantern_llm::Result<String>> });
                Box::pin(wait.chain(futures::stream::iter(deltas.into_iter().map(Ok))))
            }
            Script::Paced(delay, deltas) => {
                Box::pin(futures::stream::iter(deltas).then(move |delta| async move {
                    tokio::time::sleep(delay).await;
                    Ok(delta)
                }))
            }
        };
        Ok(stream)
    }

    async fn generate(&self, _request: GenerationRequest) -> lantern_llm::Result<String> {
        self.state.record("generate", &self.model_id);
        self.state
            .summary_reply
            .lock()
            .clone()
            .ok_or_else(|| LLMError::Generation("no summary scripted".to_string()))
    }

    async fn unload(&self) -> lantern_llm::Result<()> {
        self.state.record("unload", &self.model_id);
        if self.state.fail_unload.load(Ordering::SeqCst) {
            return Err(LLMError::Generation("unload refused".to_string()));
        }
        Ok(())
    }
}

pub const MODEL: &str = "org/tiny-GGUF/tiny-Q4_0.gguf";

pub fn new_session(
    runtime: &Arc<ScriptedRuntime>,
    storage: &Arc<MemoryStore>,
) -> (ChatSession, mpsc::UnboundedReceiver<SessionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = ChatSession::with_events(
        runtime.clone(),
        storage.clone(),
        ChatSettings::default(),
        tx,
    );
    (session, rx)
}

/// A session whose model is already downloaded and ready
pub async fn ready_session(
    storage: Arc<MemoryStore>,
) -> (
    Arc<ChatSession>,
    Arc<ScriptedRuntime>,
    mpsc::UnboundedReceiver<SessionEvent>,
) {
    let runtime = ScriptedRuntime::new();
    runtime.mark_downloaded(MODEL);
    let (session, rx) = new_session(&runtime, &storage);
    assert!(session.start(MODEL).await);
    (Arc::new(session), runtime, rx)
}

/// Alternating user/assistant history, oldest first, as persisted JSON
pub fn seeded_history(n: usize) -> serde_json::Value {
    let messages: Vec<Message> = (0..n)
        .map(|i| {
            if i % 2 == 0 {
                Message::user(format!("question {}", i))
            } else {
                Message::assistant(format!("answer {}", i))
            }
        })
        .collect();
    serde_json::to_value(messages).unwrap()
}

pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
