//! Abstract LLM runtime interface.
//!
//! The concrete implementation (the managed Ollama subprocess plus its
//! HTTP client) lives in `fleetmind-llm`; consumers program against
//! [`LlmRuntime`] so tests can substitute a scripted runtime.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Opaque name of a model in the local registry (e.g. `"qwen2.5:14b"`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ModelIdentifier(String);

impl ModelIdentifier {
    /// Create a new model identifier.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ModelIdentifier {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ModelIdentifier {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for ModelIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Model server lifecycle states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Error,
}

impl ServerState {
    /// State label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerState::Stopped => "stopped",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Error => "error",
        }
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A model known to the local registry, from `GET /api/tags`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelRecord {
    /// Model name.
    pub name: String,
    /// Size on disk, in bytes.
    #[serde(default)]
    pub size: u64,
    /// Last-modified timestamp, as reported by the runtime.
    #[serde(default, rename = "modified_at")]
    pub modified_at: String,
    /// Content digest.
    #[serde(default)]
    pub digest: String,
    /// Runtime-specific detail blob.
    #[serde(default)]
    pub details: serde_json::Value,
}

/// One normalized progress record of a model download.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadProgress {
    /// Phase reported by the runtime ("pulling manifest", "success", ...).
    pub status: String,
    /// Bytes downloaded so far.
    pub completed_bytes: u64,
    /// Total bytes, when known.
    pub total_bytes: u64,
    /// Completion percentage, clamped to `[0, 100]`.
    pub percent: f32,
}

impl DownloadProgress {
    /// Normalize a raw progress record.
    pub fn new(status: impl Into<String>, completed_bytes: u64, total_bytes: u64) -> Self {
        let percent = if total_bytes > 0 {
            (completed_bytes as f32 / total_bytes as f32 * 100.0).min(100.0)
        } else {
            0.0
        };
        Self {
            status: status.into(),
            completed_bytes,
            total_bytes,
            percent,
        }
    }

    /// Whether this record terminates the download stream.
    pub fn is_terminal(&self) -> bool {
        self.status == "success"
    }
}

/// Events delivered to server-manager subscribers, in transition order.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// The server moved to a new state.
    StateChanged(ServerState),
    /// A model download made progress.
    Download(DownloadProgress),
}

/// One chunk of a token stream from the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenChunk {
    /// Text content of this chunk.
    pub content: String,
    /// Whether the runtime marked the stream done.
    pub done: bool,
}

/// A generation request against the runtime.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Model to generate with.
    pub model: ModelIdentifier,
    /// System prompt.
    pub system: String,
    /// User prompt.
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
}

impl GenerateRequest {
    /// Create a request with the engine defaults (temperature 0.1, 2048 tokens).
    pub fn new(
        model: ModelIdentifier,
        system: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            model,
            system: system.into(),
            prompt: prompt.into(),
            temperature: 0.1,
            max_tokens: 2048,
        }
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the token budget.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Boxed stream of download progress records.
pub type ProgressStream = Pin<Box<dyn Stream<Item = DownloadProgress> + Send>>;

/// Boxed stream of token chunks.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<TokenChunk, CoreError>> + Send>>;

/// Abstract LLM runtime.
#[async_trait]
pub trait LlmRuntime: Send + Sync {
    /// Lightweight health probe with a short deadline.
    async fn is_responsive(&self) -> bool;

    /// List models present in the local registry.
    async fn list_models(&self) -> Result<Vec<ModelRecord>, CoreError>;

    /// Pull a model, streaming normalized progress records.
    ///
    /// The stream ends after a record with `status == "success"`, or the
    /// error is reported through the returned result of the pull itself.
    async fn pull_model(&self, model: &ModelIdentifier) -> Result<ProgressStream, CoreError>;

    /// Generate a complete response (blocking mode).
    async fn generate(&self, request: GenerateRequest) -> Result<String, CoreError>;

    /// Generate a streaming response.
    async fn generate_stream(&self, request: GenerateRequest) -> Result<TokenStream, CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_normalization() {
        let p = DownloadProgress::new("downloading", 50, 200);
        assert!((p.percent - 25.0).abs() < f32::EPSILON);
        assert!(!p.is_terminal());
    }

    #[test]
    fn test_progress_clamped() {
        let p = DownloadProgress::new("downloading", 300, 200);
        assert_eq!(p.percent, 100.0);
    }

    #[test]
    fn test_progress_zero_total() {
        let p = DownloadProgress::new("pulling manifest", 0, 0);
        assert_eq!(p.percent, 0.0);
    }

    #[test]
    fn test_terminal_status() {
        assert!(DownloadProgress::new("success", 200, 200).is_terminal());
    }
}
