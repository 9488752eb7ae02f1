use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use regex::Regex;

/// Cache key under which a fetched model list is stored.
pub const MODEL_LIST_CACHE_KEY: &str = "LIST_MODELS";

/// Lifecycle of the selected on-device model.
///
/// `Ready` is the only status in which a model handle may exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    #[default]
    NotSetup,
    Downloading,
    Preparing,
    Ready,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::NotSetup => "not_setup",
            ModelStatus::Downloading => "downloading",
            ModelStatus::Preparing => "preparing",
            ModelStatus::Ready => "ready",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ModelStatus::Ready)
    }
}

impl std::fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse loading indicator derived from [`ModelStatus`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelLoadingState {
    #[default]
    Idle,
    Downloading,
    Preparing,
}

impl From<ModelStatus> for ModelLoadingState {
    fn from(status: ModelStatus) -> Self {
        match status {
            ModelStatus::Downloading => ModelLoadingState::Downloading,
            ModelStatus::Preparing => ModelLoadingState::Preparing,
            ModelStatus::NotSetup | ModelStatus::Ready => ModelLoadingState::Idle,
        }
    }
}

/// Catalog entry for a downloadable model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    /// Human readable size such as `"638MB"` or `"1.1 GB"`
    pub size: String,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            size: size.into(),
        }
    }

    pub fn size_in_bytes(&self) -> u64 {
        parse_size_to_bytes(&self.size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

fn size_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^([\d.]+)\s*(KB|MB|GB)?$").ok())
        .as_ref()
}

/// Parse a size string into bytes.
///
/// Units are binary multiples (`1KB = 1024`). A bare number is
/// read as megabytes. Anything unparseable yields `0`.
pub fn parse_size_to_bytes(size: &str) -> u64 {
    let normalized = size.trim().to_uppercase();
    let Some(caps) = size_pattern().and_then(|re| re.captures(&normalized)) else {
        return 0;
    };
    let Ok(value) = caps[1].parse::<f64>() else {
        return 0;
    };
    let multiplier: f64 = match caps.get(2).map(|m| m.as_str()) {
        Some("KB") => 1024.0,
        Some("GB") => 1024.0 * 1024.0 * 1024.0,
        _ => 1024.0 * 1024.0,
    };
    (value * multiplier) as u64
}

/// Sort models by their parsed size
pub fn sort_by_size(models: &mut [ModelInfo], order: SortOrder) {
    models.sort_by_key(|m| m.size_in_bytes());
    if order == SortOrder::Desc {
        models.reverse();
    }
}

/// Built-in catalog used when no list has been fetched yet
pub fn default_catalog() -> Vec<ModelInfo> {
    vec![
        ModelInfo::new(
            "ggml-org/tinygemma3-GGUF/tinygemma3-Q8_0.gguf",
            "Tiny Gemma 3 (Q8_0)",
            "638MB",
        ),
        ModelInfo::new(
            "tiiuae/Falcon-H1-Tiny-90M-Instruct-GGUF/Falcon-H1-Tiny-90M-Instruct-Q3_K.gguf",
            "Falcon H1 Tiny 90M Instruct (Q3_K)",
            "84MB",
        ),
        ModelInfo::new(
            "TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF/tinyllama-1.1b-chat-v1.0.Q2_K.gguf",
            "TinyLlama 1.1B Chat (Q2_K)",
            "483MB",
        ),
        ModelInfo::new(
            "Qwen/Qwen2.5-0.5B-Instruct-GGUF/qwen2.5-0.5b-instruct-q4_k_m.gguf",
            "Qwen2.5 0.5B Instruct (Q4_K_M)",
            "491MB",
        ),
        ModelInfo::new(
            "bartowski/Llama-3.2-1B-Instruct-GGUF/Llama-3.2-1B-Instruct-Q4_K_M.gguf",
            "Llama 3.2 1B Instruct (Q4_K_M)",
            "808MB",
        ),
        ModelInfo::new(
            "microsoft/Phi-3-mini-4k-instruct-gguf/Phi-3-mini-4k-instruct-q4.gguf",
            "Phi-3 Mini 4K Instruct (Q4)",
            "2.39GB",
        ),
    ]
}
