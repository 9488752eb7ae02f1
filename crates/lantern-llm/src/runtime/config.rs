use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Runtime connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Runtime ID
    pub runtime_id: String,
    /// Base URL of the runtime's HTTP API
    pub base_url: String,
    /// Timeout for control requests in seconds. Streaming bodies are not bounded by it.
    #[serde(with = "serde_duration", default = "default_timeout")]
    pub timeout: Duration,
    /// How long the runtime keeps a prepared model resident, e.g. `"5m"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<String>,
    /// Retries for transient transport failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Additional headers to include
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl RuntimeConfig {
    /// Create a new runtime config
    pub fn new(runtime_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            runtime_id: runtime_id.into(),
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set keep-alive
    pub fn with_keep_alive(mut self, keep_alive: impl Into<String>) -> Self {
        self.keep_alive = Some(keep_alive.into());
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Add a custom header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Base URL without a trailing slash
    pub fn api_base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            runtime_id: "ollama".to_string(),
            base_url: "http://127.0.0.1:11434".to_string(),
            timeout: default_timeout(),
            keep_alive: None,
            max_retries: default_max_retries(),
            headers: HashMap::new(),
        }
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_retries() -> u32 {
    3
}

// Custom serialization for Duration
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
