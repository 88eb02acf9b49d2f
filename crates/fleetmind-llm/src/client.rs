//! HTTP client for the runtime's native API.
//!
//! Endpoints used:
//! - `GET /api/tags` — registry listing, doubles as the health probe
//! - `POST /api/pull` — newline-delimited JSON progress stream
//! - `POST /api/generate` — single object (blocking) or NDJSON stream

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use fleetmind_core::llm::{
    DownloadProgress, GenerateRequest, LlmRuntime, ModelIdentifier, ModelRecord, ProgressStream,
    TokenChunk, TokenStream,
};
use fleetmind_core::CoreError;

/// Client for the local model runtime.
pub struct OllamaClient {
    client: Client,
    base_url: String,
    probe_timeout: Duration,
}

impl OllamaClient {
    /// Create a client for the given base URL.
    pub fn new(base_url: impl Into<String>, probe_timeout: Duration) -> Result<Self, CoreError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| CoreError::Network(e.to_string()))?;

        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }

        Ok(Self {
            client,
            base_url,
            probe_timeout,
        })
    }

    /// The configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl LlmRuntime for OllamaClient {
    async fn is_responsive(&self) -> bool {
        match self
            .client
            .get(self.url("/api/tags"))
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelRecord>, CoreError> {
        let response = self
            .client
            .get(self.url("/api/tags"))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| CoreError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::Network(format!(
                "registry listing failed with status {}",
                response.status().as_u16()
            )));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Network(e.to_string()))?;
        Ok(tags.models)
    }

    async fn pull_model(&self, model: &ModelIdentifier) -> Result<ProgressStream, CoreError> {
        let response = self
            .client
            .post(self.url("/api/pull"))
            .json(&PullRequest {
                name: model.as_str().to_string(),
            })
            .send()
            .await
            .map_err(|e| CoreError::ModelPullFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::ModelPullFailed(format!(
                "pull rejected with status {}",
                response.status().as_u16()
            )));
        }

        let (tx, rx) = mpsc::channel(32);
        let model = model.clone();

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = Vec::new();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::warn!(target: "fleetmind::llm", model = %model, error = %e, "pull stream interrupted");
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(nl) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=nl).collect();
                    let line = String::from_utf8_lossy(&line);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    let Ok(record) = serde_json::from_str::<PullRecord>(line) else {
                        continue;
                    };
                    let progress = DownloadProgress::new(
                        record.status,
                        record.completed.unwrap_or(0),
                        record.total.unwrap_or(0),
                    );
                    let terminal = progress.is_terminal();
                    if tx.send(progress).await.is_err() {
                        return;
                    }
                    if terminal {
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String, CoreError> {
        let body = WireGenerateRequest::from_request(&request, false);

        let response = self
            .client
            .post(self.url("/api/generate"))
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CoreError::Network(format!(
                "generate failed with status {}: {}",
                status.as_u16(),
                text
            )));
        }

        let parsed: GenerateRecord = response
            .json()
            .await
            .map_err(|e| CoreError::Network(e.to_string()))?;
        Ok(parsed.response)
    }

    async fn generate_stream(&self, request: GenerateRequest) -> Result<TokenStream, CoreError> {
        let body = WireGenerateRequest::from_request(&request, true);

        let response = self
            .client
            .post(self.url("/api/generate"))
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CoreError::Network(format!(
                "generate failed with status {}: {}",
                status.as_u16(),
                text
            )));
        }

        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = Vec::new();
            let mut sent_done = false;

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(CoreError::Network(e.to_string()))).await;
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(nl) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=nl).collect();
                    let line = String::from_utf8_lossy(&line);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    let Ok(record) = serde_json::from_str::<GenerateRecord>(line) else {
                        continue;
                    };
                    let done = record.done;
                    if tx
                        .send(Ok(TokenChunk {
                            content: record.response,
                            done,
                        }))
                        .await
                        .is_err()
                    {
                        return;
                    }
                    if done {
                        sent_done = true;
                        return;
                    }
                }
            }

            if !sent_done {
                tracing::warn!(target: "fleetmind::llm", "generate stream closed without done signal");
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

// Runtime API wire types

#[derive(Debug, Serialize)]
struct PullRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PullRecord {
    #[serde(default)]
    status: String,
    #[serde(default)]
    completed: Option<u64>,
    #[serde(default)]
    total: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelRecord>,
}

#[derive(Debug, Serialize)]
struct WireGenerateRequest {
    model: String,
    system: String,
    prompt: String,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

impl WireGenerateRequest {
    fn from_request(request: &GenerateRequest, stream: bool) -> Self {
        Self {
            model: request.model.as_str().to_string(),
            system: request.system.clone(),
            prompt: request.prompt.clone(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateRecord {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}
