use async_trait::async_trait;
use futures::StreamExt;
use lantern_core::chat::{GenerationInput, GenerationOptions, GenerationRequest};
use lantern_core::types::ChatMessage;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{LLMError, Result};
use crate::runtime::base::{build_http_client, error_for_status, ndjson_stream};
use crate::runtime::{
    DownloadProgress, LanguageModel, ModelHandle, ModelRuntime, ProgressCallback, RuntimeConfig,
    RuntimeMetadata, TextStream,
};

/// Model runtime backed by a local Ollama server
pub struct OllamaRuntime {
    config: RuntimeConfig,
    client: ClientWithMiddleware,
    metadata: RuntimeMetadata,
}

impl OllamaRuntime {
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let client = build_http_client(&config)?;
        let metadata = RuntimeMetadata {
            id: config.runtime_id.clone(),
            name: "Ollama".to_string(),
        };
        Ok(Self {
            config,
            client,
            metadata,
        })
    }

    /// Get the config
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base(), path)
    }

    /// Names of every model the server has locally
    pub async fn list_local_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.url("/api/tags"))
            .timeout(self.config.timeout)
            .send()
            .await?;
        let tags: TagsResponse = error_for_status(response).await?.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    fn not_found(model_id: &str, err: LLMError) -> LLMError {
        match err {
            LLMError::Api { status: 404, .. } => LLMError::ModelNotFound(model_id.to_string()),
            other => other,
        }
    }
}

/// Map a catalog id to the name Ollama knows the model by.
///
/// Catalog ids of the form `owner/repo/file.gguf` are served through
/// Ollama's Hugging Face bridge as `hf.co/owner/repo:QUANT`, where the
/// quantization tag is the last `-` or `.` separated part of the file stem.
/// Any other id is used as is.
pub fn resolve_model_name(model_id: &str) -> String {
    let parts: Vec<&str> = model_id.split('/').collect();
    if let [owner, repo, file] = parts.as_slice() {
        if let Some(stem) = file.strip_suffix(".gguf") {
            let quant = stem
                .rfind(|c| c == '-' || c == '.')
                .map(|i| &stem[i + 1..])
                .filter(|q| !q.is_empty());
            return match quant {
                Some(quant) => format!("hf.co/{}/{}:{}", owner, repo, quant),
                None => format!("hf.co/{}/{}", owner, repo),
            };
        }
    }
    model_id.to_string()
}

fn same_model(local: &str, wanted: &str) -> bool {
    local == wanted
        || (!wanted.contains(':') && local.strip_suffix(":latest") == Some(wanted))
}

#[async_trait]
impl ModelRuntime for OllamaRuntime {
    fn runtime_id(&self) -> &str {
        &self.metadata.id
    }

    fn metadata(&self) -> &RuntimeMetadata {
        &self.metadata
    }

    async fn is_downloaded(&self, model_id: &str) -> Result<bool> {
        let wanted = resolve_model_name(model_id);
        let local = self.list_local_models().await?;
        Ok(local.iter().any(|name| same_model(name, &wanted)))
    }

    async fn download(&self, model_id: &str, on_progress: ProgressCallback) -> Result<()> {
        let name = resolve_model_name(model_id);
        log::info!("pulling {} as {}", model_id, name);

        let response = self
            .client
            .post(self.url("/api/pull"))
            .json(&json!({ "model": name, "stream": true }))
            .send()
            .await?;
        let response = error_for_status(response)
            .await
            .map_err(|e| Self::not_found(model_id, e))?;

        let mut records = Box::pin(ndjson_stream::<PullRecord>(response));
        while let Some(record) = records.next().await {
            let record = record?;
            if let Some(error) = record.error {
                return Err(LLMError::Download(error));
            }
            if let (Some(total), Some(completed)) = (record.total, record.completed) {
                on_progress(DownloadProgress::new(completed, Some(total)));
            }
            if record.status.as_deref() == Some("success") {
                log::debug!("pull of {} finished", name);
                return Ok(());
            }
        }

        Err(LLMError::Download(format!(
            "pull of {} ended before completion",
            name
        )))
    }

    async fn prepare(&self, model_id: &str) -> Result<ModelHandle> {
        let name = resolve_model_name(model_id);
        let mut body = json!({ "model": name });
        if let Some(keep_alive) = &self.config.keep_alive {
            body["keep_alive"] = json!(keep_alive);
        }

        // A generate call without a prompt only loads the model.
        let response = self
            .client
            .post(self.url("/api/generate"))
            .json(&body)
            .send()
            .await?;
        error_for_status(response).await.map_err(|e| match e {
            LLMError::Api { status: 404, .. } => LLMError::ModelNotFound(model_id.to_string()),
            LLMError::Api { message, .. } => LLMError::Prepare(message),
            other => other,
        })?;

        log::info!("model {} loaded", name);
        Ok(Arc::new(OllamaModel {
            model_id: model_id.to_string(),
            name,
            base_url: self.config.api_base().to_string(),
            keep_alive: self.config.keep_alive.clone(),
            timeout: self.config.timeout,
            client: self.client.clone(),
        }))
    }

    async fn remove(&self, model_id: &str) -> Result<()> {
        let name = resolve_model_name(model_id);
        let response = self
            .client
            .delete(self.url("/api/delete"))
            .timeout(self.config.timeout)
            .json(&json!({ "model": name }))
            .send()
            .await?;
        error_for_status(response)
            .await
            .map_err(|e| Self::not_found(model_id, e))?;
        log::info!("removed {}", name);
        Ok(())
    }
}

/// A model loaded into an Ollama server
pub struct OllamaModel {
    model_id: String,
    name: String,
    base_url: String,
    keep_alive: Option<String>,
    timeout: Duration,
    client: ClientWithMiddleware,
}

impl OllamaModel {
    /// Name the server knows this model by
    pub fn name(&self) -> &str {
        &self.name
    }

    fn build_body(&self, request: &GenerationRequest) -> Result<(String, serde_json::Value)> {
        let options = OllamaOptions::from(&request.options);
        let options = (!request.options.is_empty()).then_some(options);

        match &request.input {
            GenerationInput::Messages { messages } => {
                let body = ChatBody {
                    model: &self.name,
                    messages,
                    stream: true,
                    options,
                    keep_alive: self.keep_alive.as_deref(),
                };
                Ok((format!("{}/api/chat", self.base_url), serde_json::to_value(body)?))
            }
            GenerationInput::Prompt { prompt } => {
                let body = GenerateBody {
                    model: &self.name,
                    prompt,
                    stream: true,
                    options,
                    keep_alive: self.keep_alive.as_deref(),
                };
                Ok((format!("{}/api/generate", self.base_url), serde_json::to_value(body)?))
            }
        }
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn stream(&self, request: GenerationRequest) -> Result<TextStream> {
        let (url, body) = self.build_body(&request)?;
        log::debug!("generation request to {} ({} messages)", url, request.message_count());

        let response = self.client.post(&url).json(&body).send().await?;
        let response = error_for_status(response).await?;

        let deltas = ndjson_stream::<StreamRecord>(response).filter_map(|record| async move {
            match record {
                Ok(record) => record.into_delta().transpose(),
                Err(e) => Some(Err(e)),
            }
        });
        Ok(Box::pin(deltas))
    }

    async fn unload(&self) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(self.timeout)
            .json(&json!({ "model": self.name, "keep_alive": 0 }))
            .send()
            .await?;
        error_for_status(response).await?;
        log::debug!("model {} unloaded", self.name);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PullRecord {
    status: Option<String>,
    total: Option<u64>,
    completed: Option<u64>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

impl From<&GenerationOptions> for OllamaOptions {
    fn from(options: &GenerationOptions) -> Self {
        Self {
            temperature: options.temperature,
            num_predict: options.max_tokens,
            top_p: options.top_p,
        }
    }
}

/// One record of a streamed `/api/chat` or `/api/generate` response
#[derive(Debug, Deserialize)]
struct StreamRecord {
    message: Option<StreamMessage>,
    response: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(default)]
    content: String,
}

impl StreamRecord {
    fn into_delta(self) -> Result<Option<String>> {
        if let Some(error) = self.error {
            return Err(LLMError::Generation(error));
        }
        let text = self
            .message
            .map(|m| m.content)
            .or(self.response)
            .unwrap_or_default();
        Ok((!text.is_empty()).then_some(text))
    }
}
