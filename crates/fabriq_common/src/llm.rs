//! LLM client layer: backend abstraction, HTTP implementation, and the
//! retry router shared by every model call site.
//!
//! The planner, the answer polish pass and the role classifier all go
//! through [`LlmRouter::generate`]: one place owns the model-list fallback
//! and the transient-error backoff, each caller only supplies a prompt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::env;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// LLM configuration, deserialized from the daemon's `[llm]` config table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Master switch. Disabled means the planner runs fallback-only.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// OpenAI-compatible base URL (local Ollama or a remote provider).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Environment variable holding the API key. Local endpoints leave
    /// this unset; a remote endpoint with the variable missing is a
    /// configuration error, not a retryable one.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Prioritized model list: primary first, cheaper fallbacks after.
    #[serde(default = "default_models")]
    pub models: Vec<String>,

    /// Per-request timeout.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Attempts per model before moving down the list.
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,

    /// First backoff delay; doubles per retry.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_endpoint() -> String {
    "http://127.0.0.1:11434/v1".to_string()
}

fn default_models() -> Vec<String> {
    vec![
        "qwen2.5:7b-instruct".to_string(),
        "qwen2.5:3b-instruct".to_string(),
        "llama3.2:3b".to_string(),
    ]
}

fn default_timeout() -> u64 {
    20
}

fn default_attempts() -> u32 {
    4
}

fn default_backoff_base() -> u64 {
    250
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            endpoint: default_endpoint(),
            api_key_env: None,
            models: default_models(),
            timeout_secs: default_timeout(),
            max_attempts: default_attempts(),
            backoff_base_ms: default_backoff_base(),
        }
    }
}

/// LLM call errors, split by whether a retry is justified.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("LLM configuration error: {0}")]
    Config(String),

    #[error("rate limited (HTTP {0})")]
    RateLimited(u16),

    #[error("backend unavailable (HTTP {0})")]
    Unavailable(u16),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("invalid response payload: {0}")]
    InvalidResponse(String),

    #[error("model returned an empty response")]
    Empty,
}

impl LlmError {
    /// Rate limits, overload and timeouts justify a retry; semantic and
    /// configuration failures never do.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited(_)
                | LlmError::Unavailable(_)
                | LlmError::Timeout(_)
                | LlmError::Connect(_)
        )
    }
}

/// Exponential backoff schedule: `base * 2^attempt`, capped.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 250,
            max_ms: 8_000,
            max_attempts: 4,
        }
    }
}

impl BackoffConfig {
    pub fn delay(&self, attempt: u32) -> Duration {
        let ms = self
            .base_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.max_ms);
        Duration::from_millis(ms)
    }
}

/// One text-generation backend. Implementations must be cheap to share.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Run one generation attempt against one named model.
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, LlmError>;
}

/// Real backend speaking the OpenAI-compatible chat completions API.
/// Temperature is pinned to 0 so repeated plans are reproducible.
#[derive(Debug)]
pub struct HttpGeneration {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

impl HttpGeneration {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = match &config.api_key_env {
            Some(var) if !var.is_empty() => match env::var(var) {
                Ok(key) if !key.is_empty() => Some(key),
                _ => {
                    return Err(LlmError::Config(format!(
                        "API key env var {} is not set",
                        var
                    )))
                }
            },
            _ => None,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl GenerationBackend for HttpGeneration {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.endpoint);

        let body = serde_json::json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0,
            "stream": false,
        });

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                LlmError::Connect(e.to_string())
            } else {
                LlmError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                429 => LlmError::RateLimited(429),
                // 529 is the overloaded signal some providers use.
                500 | 502 | 503 | 529 => LlmError::Unavailable(status.as_u16()),
                code => LlmError::Http(format!("HTTP {} from {}", code, url)),
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let text = json
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .ok_or(LlmError::Empty)?;

        if text.trim().is_empty() {
            return Err(LlmError::Empty);
        }
        Ok(text.to_string())
    }
}

/// Scripted backend for tests: pops pre-arranged responses and records
/// which models were asked.
pub struct FakeGeneration {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeGeneration {
    pub fn new(responses: Vec<Result<String, LlmError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A backend that answers every call with the same text.
    pub fn always(text: &str) -> Self {
        Self::new(vec![Ok(text.to_string())])
    }

    /// A backend that fails every call with the same error.
    pub fn always_error(error: LlmError) -> Self {
        Self::new(vec![Err(error)])
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Models asked so far, in call order.
    pub fn models_called(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for FakeGeneration {
    async fn generate(&self, model: &str, _prompt: &str) -> Result<String, LlmError> {
        self.calls.lock().unwrap().push(model.to_string());

        let mut responses = self.responses.lock().unwrap();
        if responses.len() == 1 {
            // Single scripted response repeats forever.
            responses[0].clone()
        } else {
            responses.pop_front().unwrap_or(Err(LlmError::Empty))
        }
    }
}

/// The one retry utility: walks the prioritized model list, retrying each
/// model on transient failures with exponential backoff, and returns the
/// first non-empty completion.
pub struct LlmRouter {
    backend: Arc<dyn GenerationBackend>,
    models: Vec<String>,
    backoff: BackoffConfig,
}

impl LlmRouter {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        models: Vec<String>,
        backoff: BackoffConfig,
    ) -> Self {
        Self {
            backend,
            models,
            backoff,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let backend = HttpGeneration::new(config)?;
        Ok(Self::new(
            Arc::new(backend),
            config.models.clone(),
            BackoffConfig {
                base_ms: config.backoff_base_ms,
                max_attempts: config.max_attempts,
                ..BackoffConfig::default()
            },
        ))
    }

    pub async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let mut last = LlmError::Config("no models configured".to_string());

        for model in &self.models {
            let mut attempt: u32 = 0;
            loop {
                match self.backend.generate(model, prompt).await {
                    Ok(text) => {
                        debug!(model = %model, chars = text.len(), "generation succeeded");
                        return Ok(text);
                    }
                    Err(e) if e.is_transient() && attempt + 1 < self.backoff.max_attempts => {
                        let delay = self.backoff.delay(attempt);
                        warn!(
                            model = %model,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            "transient LLM failure, backing off: {}",
                            e
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Err(e) => {
                        warn!(model = %model, "giving up on model: {}", e);
                        last = e;
                        break;
                    }
                }
            }
        }

        Err(last)
    }
}
