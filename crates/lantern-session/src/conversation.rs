//! # Conversation Store
//!
//! 单个模型对应的对话记录。
//!
//! - 内存中按最新在前排列，持久化时按时间顺序（最早在前）写入
//! - 所有修改同步完成，修改计数 `revision` 每次递增
//! - 加载已有记录后在后台生成一句话摘要，失败时静默忽略
//! - 会话销毁（liveness token 取消）后，后台任务不再写入任何状态

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lantern_core::chat::GenerationRequest;
use lantern_core::types::{ChatMessage, Message};
use lantern_llm::{LLMError, ModelHandle, ModelRuntime};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::StorageResult;
use crate::storage::{load_typed, save_typed, KeyValueStore};

/// 摘要使用的最早对话轮数
pub const DEFAULT_SUMMARY_TURNS: usize = 5;

/// 摘要指令
pub const DEFAULT_SUMMARY_PROMPT: &str =
    "Summarize this conversation in one sentence, using the same language as the conversation.";

/// ConversationStore 配置
#[derive(Debug, Clone)]
pub struct ConversationStoreConfig {
    /// 参与摘要的最早消息数
    pub summary_turns: usize,
    /// 追加在摘要输入末尾的指令
    pub summary_prompt: String,
}

impl Default for ConversationStoreConfig {
    fn default() -> Self {
        Self {
            summary_turns: DEFAULT_SUMMARY_TURNS,
            summary_prompt: DEFAULT_SUMMARY_PROMPT.to_string(),
        }
    }
}

impl ConversationStoreConfig {
    /// 设置摘要轮数
    pub fn with_summary_turns(mut self, turns: usize) -> Self {
        self.summary_turns = turns;
        self
    }

    /// 设置摘要指令
    pub fn with_summary_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.summary_prompt = prompt.into();
        self
    }
}

/// 按模型 ID 查找会话中已就绪的模型句柄
pub type ReadyHandleLookup = Arc<dyn Fn(&str) -> Option<ModelHandle> + Send + Sync>;

#[derive(Debug, Default)]
struct ConversationState {
    /// 当前对话所属的模型 ID，也是持久化的键
    model_id: Option<String>,
    /// 最新在前
    messages: Vec<Message>,
}

/// 对话记录存储
pub struct ConversationStore {
    config: ConversationStoreConfig,
    storage: Arc<dyn KeyValueStore>,
    summarizer: Option<Arc<dyn ModelRuntime>>,
    ready_handle: Option<ReadyHandleLookup>,
    state: RwLock<ConversationState>,
    summary: Arc<RwLock<Option<String>>>,
    summary_task: Mutex<Option<JoinHandle<()>>>,
    revision: AtomicU64,
    liveness: CancellationToken,
}

impl ConversationStore {
    /// 创建空的对话存储
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            config: ConversationStoreConfig::default(),
            storage,
            summarizer: None,
            ready_handle: None,
            state: RwLock::new(ConversationState::default()),
            summary: Arc::new(RwLock::new(None)),
            summary_task: Mutex::new(None),
            revision: AtomicU64::new(0),
            liveness: CancellationToken::new(),
        }
    }

    /// 设置配置
    pub fn with_config(mut self, config: ConversationStoreConfig) -> Self {
        self.config = config;
        self
    }

    /// 设置用于生成摘要的模型运行时
    pub fn with_summarizer(mut self, runtime: Arc<dyn ModelRuntime>) -> Self {
        self.summarizer = Some(runtime);
        self
    }

    /// 摘要优先复用会话中已就绪的模型，避免重复加载
    pub fn with_ready_handle(mut self, lookup: ReadyHandleLookup) -> Self {
        self.ready_handle = Some(lookup);
        self
    }

    /// 绑定会话的 liveness token
    pub fn with_liveness(mut self, token: CancellationToken) -> Self {
        self.liveness = token;
        self
    }

    fn bump(&self) {
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    /// 加载模型对应的已保存对话，替换内存中的记录。
    ///
    /// 返回恢复的消息数。存在记录时启动后台摘要。
    pub async fn load(&self, model_id: &str) -> StorageResult<usize> {
        self.abort_summary();
        {
            let mut state = self.state.write();
            state.model_id = Some(model_id.to_string());
            state.messages.clear();
        }
        *self.summary.write() = None;
        self.bump();

        let persisted: Vec<Message> = load_typed(self.storage.as_ref(), model_id)
            .await?
            .unwrap_or_default();

        if self.liveness.is_cancelled() {
            return Ok(0);
        }

        let count = persisted.len();
        let turns: Vec<ChatMessage> = persisted
            .iter()
            .take(self.config.summary_turns)
            .filter(|m| m.has_text())
            .map(Message::to_chat_message)
            .collect();

        {
            let mut state = self.state.write();
            if state.model_id.as_deref() != Some(model_id) {
                return Ok(0);
            }
            state.messages = persisted.into_iter().rev().collect();
        }
        self.bump();
        info!("Restored {} messages for model {}", count, model_id);

        if !turns.is_empty() {
            self.spawn_summary(model_id.to_string(), turns);
        }

        Ok(count)
    }

    fn spawn_summary(&self, model_id: String, turns: Vec<ChatMessage>) {
        let Some(runtime) = self.summarizer.clone() else {
            return;
        };
        let lookup = self.ready_handle.clone();
        let summary = self.summary.clone();
        let liveness = self.liveness.clone();
        let prompt = self.config.summary_prompt.clone();

        let task = tokio::spawn(async move {
            let result = tokio::select! {
                _ = liveness.cancelled() => return,
                result = summarize(runtime.as_ref(), lookup.as_ref(), &model_id, turns, prompt) => result,
            };
            match result {
                Ok(text) if !liveness.is_cancelled() && !text.is_empty() => {
                    debug!("Conversation summary ready for {}", model_id);
                    *summary.write() = Some(text);
                }
                Ok(_) => {}
                Err(e) => debug!("Conversation summary skipped for {}: {}", model_id, e),
            }
        });

        if let Some(previous) = self.summary_task.lock().replace(task) {
            previous.abort();
        }
    }

    fn abort_summary(&self) {
        if let Some(task) = self.summary_task.lock().take() {
            task.abort();
        }
    }

    /// 等待后台摘要结束并返回结果
    pub async fn summary_ready(&self) -> Option<String> {
        let task = self.summary_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.conversation_summary()
    }

    /// 当前对话所属的模型 ID
    pub fn model_id(&self) -> Option<String> {
        self.state.read().model_id.clone()
    }

    /// 消息快照（最新在前）
    pub fn messages(&self) -> Vec<Message> {
        self.state.read().messages.clone()
    }

    /// 消息快照（最早在前）
    pub fn chronological(&self) -> Vec<Message> {
        self.state.read().messages.iter().rev().cloned().collect()
    }

    /// 在读锁内访问消息（最新在前）
    pub fn with_messages<R>(&self, f: impl FnOnce(&[Message]) -> R) -> R {
        f(&self.state.read().messages)
    }

    pub fn get(&self, id: &str) -> Option<Message> {
        self.state.read().messages.iter().find(|m| m.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().messages.is_empty()
    }

    /// 在头部插入消息，保持参数中的先后顺序
    pub fn append<I>(&self, messages: I)
    where
        I: IntoIterator<Item = Message>,
    {
        let mut state = self.state.write();
        state.messages.splice(0..0, messages);
        drop(state);
        self.bump();
    }

    /// 按 ID 修改一条消息，返回是否找到
    pub fn update_by_id(&self, id: &str, f: impl FnOnce(&mut Message)) -> bool {
        let mut state = self.state.write();
        let Some(message) = state.messages.iter_mut().find(|m| m.id == id) else {
            return false;
        };
        f(message);
        drop(state);
        self.bump();
        true
    }

    /// 修改所有消息
    pub fn update_all(&self, mut f: impl FnMut(&mut Message)) {
        let mut state = self.state.write();
        state.messages.iter_mut().for_each(&mut f);
        drop(state);
        self.bump();
    }

    /// 清空对话并删除持久化记录。没有模型 ID 时不做任何事。
    pub async fn clear(&self) -> StorageResult<()> {
        let model_id = {
            let mut state = self.state.write();
            let Some(model_id) = state.model_id.clone() else {
                return Ok(());
            };
            state.messages.clear();
            model_id
        };
        self.abort_summary();
        *self.summary.write() = None;
        self.bump();

        self.storage.remove(&model_id).await?;
        info!("Cleared conversation for model {}", model_id);
        Ok(())
    }

    /// 将内存中的对话按时间顺序写入存储。
    ///
    /// 返回是否实际写入。没有模型 ID 或没有消息时不写。
    pub async fn flush(&self) -> StorageResult<bool> {
        let (model_id, records) = {
            let state = self.state.read();
            let Some(model_id) = state.model_id.clone() else {
                return Ok(false);
            };
            let records: Vec<Message> = state.messages.iter().rev().cloned().collect();
            (model_id, records)
        };
        if records.is_empty() {
            return Ok(false);
        }

        save_typed(self.storage.as_ref(), &model_id, &records).await?;
        debug!("Flushed {} messages for model {}", records.len(), model_id);
        Ok(true)
    }

    /// 丢弃内存中的记录，不触碰存储
    pub fn discard(&self) {
        self.abort_summary();
        *self.state.write() = ConversationState::default();
        *self.summary.write() = None;
        self.bump();
    }

    /// 参与上下文的消息字符数之和
    pub fn total_token(&self) -> usize {
        self.state
            .read()
            .messages
            .iter()
            .filter(|m| m.include_in_context)
            .map(Message::char_len)
            .sum()
    }

    /// 最新一条消息上的 remain_tokens 标注
    pub fn remain_tokens(&self) -> Option<usize> {
        self.state
            .read()
            .messages
            .first()
            .and_then(|m| m.remain_tokens)
    }

    pub fn conversation_summary(&self) -> Option<String> {
        self.summary.read().clone()
    }

    /// 修改计数
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }
}

/// 生成摘要。会话中已有就绪句柄时直接使用；否则临时加载模型，
/// 用完后若会话仍未持有该模型则卸载。
async fn summarize(
    runtime: &dyn ModelRuntime,
    lookup: Option<&ReadyHandleLookup>,
    model_id: &str,
    mut turns: Vec<ChatMessage>,
    prompt: String,
) -> lantern_llm::Result<String> {
    let ready = |id: &str| lookup.and_then(|find| find(id));

    let (handle, borrowed) = match ready(model_id) {
        Some(handle) => (handle, true),
        None => {
            if !runtime.is_downloaded(model_id).await? {
                return Err(LLMError::ModelNotFound(model_id.to_string()));
            }
            (runtime.prepare(model_id).await?, false)
        }
    };

    turns.push(ChatMessage::user(prompt));
    let result = handle.generate(GenerationRequest::messages(turns)).await;

    if !borrowed && ready(model_id).is_none() {
        if let Err(e) = handle.unload().await {
            debug!("Unload of summary model {} failed: {}", model_id, e);
        }
    }
    Ok(result?.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_storage::MemoryStore;
    use async_trait::async_trait;
    use lantern_core::types::Role;
    use lantern_llm::{
        LanguageModel, ModelHandle, ProgressCallback, RuntimeMetadata, TextStream,
    };
    use std::time::Duration;

    struct SummaryRuntime {
        metadata: RuntimeMetadata,
        downloaded: bool,
        reply: String,
        delay: Duration,
        seen: Arc<Mutex<Vec<ChatMessage>>>,
        prepared: AtomicU64,
        unloaded: Arc<AtomicU64>,
    }

    impl SummaryRuntime {
        fn new(reply: &str) -> Self {
            Self {
                metadata: RuntimeMetadata {
                    id: "summary".to_string(),
                    name: "Summary".to_string(),
                },
                downloaded: true,
                reply: reply.to_string(),
                delay: Duration::ZERO,
                seen: Arc::new(Mutex::new(Vec::new())),
                prepared: AtomicU64::new(0),
                unloaded: Arc::new(AtomicU64::new(0)),
            }
        }

        fn model(&self) -> ModelHandle {
            Arc::new(SummaryModel {
                reply: self.reply.clone(),
                delay: self.delay,
                seen: self.seen.clone(),
                unloaded: self.unloaded.clone(),
            })
        }
    }

    struct SummaryModel {
        reply: String,
        delay: Duration,
        seen: Arc<Mutex<Vec<ChatMessage>>>,
        unloaded: Arc<AtomicU64>,
    }

    #[async_trait]
    impl ModelRuntime for SummaryRuntime {
        fn runtime_id(&self) -> &str {
            "summary"
        }

        fn metadata(&self) -> &RuntimeMetadata {
            &self.metadata
        }

        async fn is_downloaded(&self, _model_id: &str) -> lantern_llm::Result<bool> {
            Ok(self.downloaded)
        }

        async fn download(&self, _: &str, _: ProgressCallback) -> lantern_llm::Result<()> {
            Ok(())
        }

        async fn prepare(&self, _model_id: &str) -> lantern_llm::Result<ModelHandle> {
            self.prepared.fetch_add(1, Ordering::SeqCst);
            Ok(self.model())
        }

        async fn remove(&self, _model_id: &str) -> lantern_llm::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl LanguageModel for SummaryModel {
        fn model_id(&self) -> &str {
            "summary"
        }

        async fn stream(&self, request: GenerationRequest) -> lantern_llm::Result<TextStream> {
            tokio::time::sleep(self.delay).await;
            if let Some(messages) = request.as_messages() {
                self.seen.lock().extend(messages.iter().cloned());
            }
            let reply = self.reply.clone();
            Ok(Box::pin(futures::stream::iter(vec![Ok(reply)])))
        }

        async fn unload(&self) -> lantern_llm::Result<()> {
            self.unloaded.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn persisted(texts: &[(&str, bool)]) -> serde_json::Value {
        let messages: Vec<Message> = texts
            .iter()
            .map(|(text, is_user)| {
                if *is_user {
                    Message::user(*text)
                } else {
                    Message::assistant(*text)
                }
            })
            .collect();
        serde_json::to_value(messages).unwrap()
    }

    #[tokio::test]
    async fn test_append_inserts_at_head() {
        let store = ConversationStore::new(Arc::new(MemoryStore::new()));
        store.append([Message::assistant("a1"), Message::user("u1")]);
        store.append([Message::assistant("a2"), Message::user("u2")]);

        let texts: Vec<String> = store.messages().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["a2", "u2", "a1", "u1"]);
        assert_eq!(store.chronological()[0].text, "u1");
    }

    #[tokio::test]
    async fn test_load_reverses_and_flush_restores_order() {
        let storage = Arc::new(
            MemoryStore::new().with_entry("m", persisted(&[("first", true), ("reply", false)])),
        );
        let store = ConversationStore::new(storage.clone());

        assert_eq!(store.load("m").await.unwrap(), 2);
        assert_eq!(store.messages()[0].text, "reply");

        store.append([Message::assistant("later"), Message::user("again")]);
        assert!(store.flush().await.unwrap());

        let saved: Vec<Message> =
            serde_json::from_value(storage.load("m").await.unwrap().unwrap()).unwrap();
        let texts: Vec<&str> = saved.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "reply", "again", "later"]);
    }

    #[tokio::test]
    async fn test_flush_empty_is_noop() {
        let storage = Arc::new(MemoryStore::new());
        let store = ConversationStore::new(storage.clone());
        store.load("m").await.unwrap();

        assert!(!store.flush().await.unwrap());
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_clear_removes_record() {
        let storage =
            Arc::new(MemoryStore::new().with_entry("m", persisted(&[("hello", true)])));
        let store = ConversationStore::new(storage.clone());
        store.load("m").await.unwrap();

        store.clear().await.unwrap();
        assert!(store.is_empty());
        assert!(!storage.exists("m").await.unwrap());
        assert_eq!(store.total_token(), 0);
    }

    #[tokio::test]
    async fn test_clear_without_model_is_noop() {
        let store = ConversationStore::new(Arc::new(MemoryStore::new()));
        store.append([Message::user("x")]);
        store.clear().await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_total_token_follows_include_flag() {
        let store = ConversationStore::new(Arc::new(MemoryStore::new()));
        let keep = Message::user("abcd");
        let drop_me = Message::assistant("xyz");
        let drop_id = drop_me.id.clone();
        store.append([drop_me, keep]);
        assert_eq!(store.total_token(), 7);

        store.update_by_id(&drop_id, |m| m.include_in_context = false);
        assert_eq!(store.total_token(), 4);
    }

    #[tokio::test]
    async fn test_remain_tokens_reads_newest() {
        let store = ConversationStore::new(Arc::new(MemoryStore::new()));
        store.append([Message::user("a")]);
        assert_eq!(store.remain_tokens(), None);

        store.update_all(|m| m.remain_tokens = Some(12));
        assert_eq!(store.remain_tokens(), Some(12));
    }

    #[tokio::test]
    async fn test_revision_counts_mutations() {
        let store = ConversationStore::new(Arc::new(MemoryStore::new()));
        let start = store.revision();
        let msg = Message::assistant("");
        let id = msg.id.clone();
        store.append([msg]);
        store.update_by_id(&id, |m| m.text.push('x'));
        assert!(!store.update_by_id("missing", |_| {}));
        assert_eq!(store.revision() - start, 2);
    }

    #[tokio::test]
    async fn test_summary_uses_earliest_turns() {
        let runtime = Arc::new(SummaryRuntime::new(" A chat about tea. "));
        let seen = runtime.seen.clone();
        let texts: Vec<(String, bool)> =
            (0..8).map(|i| (format!("turn {}", i), i % 2 == 0)).collect();
        let refs: Vec<(&str, bool)> = texts.iter().map(|(t, u)| (t.as_str(), *u)).collect();
        let storage = Arc::new(MemoryStore::new().with_entry("m", persisted(&refs)));

        let store = ConversationStore::new(storage).with_summarizer(runtime);
        store.load("m").await.unwrap();

        assert_eq!(store.summary_ready().await.as_deref(), Some("A chat about tea."));

        let seen = seen.lock();
        assert_eq!(seen.len(), DEFAULT_SUMMARY_TURNS + 1);
        assert_eq!(seen[0].content, "turn 0");
        assert_eq!(seen[4].content, "turn 4");
        assert_eq!(seen[5].role, Role::User);
        assert_eq!(seen[5].content, DEFAULT_SUMMARY_PROMPT);
    }

    #[tokio::test]
    async fn test_summary_keeps_blank_turns_in_window() {
        let runtime = Arc::new(SummaryRuntime::new("ok"));
        let seen = runtime.seen.clone();
        let storage = Arc::new(MemoryStore::new().with_entry(
            "m",
            persisted(&[("a", true), ("", false), ("b", true), ("c", false), ("d", true), ("e", false)]),
        ));

        let store = ConversationStore::new(storage).with_summarizer(runtime);
        store.load("m").await.unwrap();
        store.summary_ready().await;

        let contents: Vec<String> = seen.lock().iter().map(|m| m.content.clone()).collect();
        assert_eq!(contents, vec!["a", "b", "c", "d", DEFAULT_SUMMARY_PROMPT]);
    }

    #[tokio::test]
    async fn test_summary_unloads_its_own_model() {
        let runtime = Arc::new(SummaryRuntime::new("ok"));
        let unloaded = runtime.unloaded.clone();
        let storage = Arc::new(MemoryStore::new().with_entry("m", persisted(&[("hi", true)])));

        let store = ConversationStore::new(storage).with_summarizer(runtime.clone());
        store.load("m").await.unwrap();
        assert_eq!(store.summary_ready().await.as_deref(), Some("ok"));

        assert_eq!(runtime.prepared.load(Ordering::SeqCst), 1);
        assert_eq!(unloaded.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_summary_reuses_ready_handle() {
        let runtime = Arc::new(SummaryRuntime::new("ok"));
        let ready = runtime.model();
        let lookup: ReadyHandleLookup =
            Arc::new(move |id: &str| (id == "m").then(|| ready.clone()));
        let storage = Arc::new(MemoryStore::new().with_entry("m", persisted(&[("hi", true)])));

        let store = ConversationStore::new(storage)
            .with_summarizer(runtime.clone())
            .with_ready_handle(lookup);
        store.load("m").await.unwrap();
        assert_eq!(store.summary_ready().await.as_deref(), Some("ok"));

        assert_eq!(runtime.prepared.load(Ordering::SeqCst), 0);
        assert_eq!(runtime.unloaded.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_summary_failure_is_ignored() {
        let mut runtime = SummaryRuntime::new("unused");
        runtime.downloaded = false;
        let storage = Arc::new(MemoryStore::new().with_entry("m", persisted(&[("hi", true)])));

        let store = ConversationStore::new(storage).with_summarizer(Arc::new(runtime));
        assert_eq!(store.load("m").await.unwrap(), 1);
        assert_eq!(store.summary_ready().await, None);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_dropped_after_teardown() {
        let mut runtime = SummaryRuntime::new("late");
        runtime.delay = Duration::from_secs(5);
        let storage = Arc::new(MemoryStore::new().with_entry("m", persisted(&[("hi", true)])));
        let liveness = CancellationToken::new();

        let store = ConversationStore::new(storage)
            .with_summarizer(Arc::new(runtime))
            .with_liveness(liveness.clone());
        store.load("m").await.unwrap();

        liveness.cancel();
        assert_eq!(store.summary_ready().await, None);
    }

    #[tokio::test]
    async fn test_no_summary_for_empty_history() {
        let runtime = Arc::new(SummaryRuntime::new("never"));
        let store = ConversationStore::new(Arc::new(MemoryStore::new())).with_summarizer(runtime);
        assert_eq!(store.load("fresh").await.unwrap(), 0);
        assert_eq!(store.summary_ready().await, None);
    }
}
