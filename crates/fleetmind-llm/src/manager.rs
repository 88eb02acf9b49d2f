//! Server lifecycle management.
//!
//! State machine:
//!
//! ```text
//! Stopped ──start──► Starting ──ready within timeout──► Running
//! Starting ──timeout / spawn err──► Error
//! Running ──stop──► Stopped
//! Running ──health miss ×2──► Error ──start──► Starting
//! ```
//!
//! The manager never restarts the server on its own; after a health
//! loss callers decide whether to call `start` again.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

use fleetmind_core::config::LlmConfig;
use fleetmind_core::llm::{
    GenerateRequest, LlmRuntime, ModelIdentifier, ModelRecord, ProgressStream, ServerEvent,
    ServerState, TokenStream,
};
use fleetmind_core::CoreError;

use crate::client::OllamaClient;
use crate::discovery;
use crate::spawn::{spawn_server, ServerProcess, SpawnOptions};

/// Grace period between SIGTERM and SIGKILL on stop.
const STOP_GRACE: Duration = Duration::from_secs(10);

/// Consecutive probe misses before the manager declares the server lost.
const HEALTH_MISS_LIMIT: u32 = 2;

/// Event channel capacity for subscribers.
const EVENT_CAPACITY: usize = 256;

/// Server statistics snapshot.
#[derive(Debug, Clone)]
pub struct ServerStats {
    /// Current lifecycle state.
    pub state: ServerState,
    /// Whether the endpoint answered a probe just now.
    pub responsive: bool,
    /// Configured base URL.
    pub base_url: String,
    /// Configured default model.
    pub model: String,
    /// Models present in the local registry.
    pub available_models: usize,
}

/// Manages the runtime server lifecycle, health, and model downloads.
pub struct ServerManager {
    config: LlmConfig,
    runtime: Arc<dyn LlmRuntime>,
    spawn_options: SpawnOptions,
    state: RwLock<ServerState>,
    process: Mutex<Option<ServerProcess>>,
    events: broadcast::Sender<ServerEvent>,
    monitor: Mutex<Option<MonitorHandle>>,
    model_cache: Mutex<std::collections::HashMap<String, ModelRecord>>,
}

struct MonitorHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerManager {
    /// Create a manager speaking to the configured runtime endpoint.
    pub fn new(config: LlmConfig) -> Result<Arc<Self>, CoreError> {
        let client = OllamaClient::new(
            config.base_url.clone(),
            Duration::from_secs(config.probe_timeout_secs),
        )?;
        Ok(Self::with_runtime(config, Arc::new(client)))
    }

    /// Create a manager over an arbitrary runtime implementation.
    ///
    /// Tests substitute a scripted runtime here.
    pub fn with_runtime(config: LlmConfig, runtime: Arc<dyn LlmRuntime>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            config,
            runtime,
            spawn_options: SpawnOptions::default(),
            state: RwLock::new(ServerState::Stopped),
            process: Mutex::new(None),
            events,
            monitor: Mutex::new(None),
            model_cache: Mutex::new(std::collections::HashMap::new()),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe to state transitions and download progress.
    ///
    /// Transitions are totally ordered; subscribers see them in order.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Default model from the configuration.
    pub fn default_model(&self) -> ModelIdentifier {
        ModelIdentifier::new(self.config.model.clone())
    }

    fn set_state(&self, state: ServerState) {
        {
            let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
            if *guard == state {
                return;
            }
            *guard = state;
        }
        tracing::info!(target: "fleetmind::llm", state = %state, "server state changed");
        let _ = self.events.send(ServerEvent::StateChanged(state));
    }

    /// Start the server, or confirm it is already running.
    ///
    /// Idempotent: when the endpoint is already responsive the manager
    /// transitions to `Running` without spawning anything.
    pub async fn start(self: &Arc<Self>, timeout: Duration) -> Result<(), CoreError> {
        if self.runtime.is_responsive().await {
            tracing::info!(target: "fleetmind::llm", "server already responsive");
            self.set_state(ServerState::Running);
            self.start_health_monitor().await;
            return Ok(());
        }

        self.set_state(ServerState::Starting);

        let binary = match discovery::find_runtime_binary().await {
            Ok(binary) => binary,
            Err(e) => {
                self.set_state(ServerState::Error);
                return Err(e);
            }
        };

        let process = match spawn_server(&binary, self.spawn_options) {
            Ok(process) => process,
            Err(e) => {
                self.set_state(ServerState::Error);
                return Err(e);
            }
        };

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.runtime.is_responsive().await {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                let stderr = process.shutdown(STOP_GRACE).await;
                self.set_state(ServerState::Error);
                return Err(CoreError::SpawnError {
                    stderr: if stderr.is_empty() {
                        "server did not become ready within timeout".to_string()
                    } else {
                        stderr
                    },
                });
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        *self.process.lock().await = Some(process);
        self.set_state(ServerState::Running);
        self.start_health_monitor().await;
        Ok(())
    }

    /// Stop the server and return to `Stopped`.
    ///
    /// Graceful termination first; after the grace period the whole
    /// process group is killed.
    pub async fn stop(&self) {
        self.stop_health_monitor().await;

        if let Some(process) = self.process.lock().await.take() {
            let pid = process.pid();
            process.shutdown(STOP_GRACE).await;
            tracing::info!(target: "fleetmind::llm", pid, "server process stopped");
        }

        self.set_state(ServerState::Stopped);
    }

    /// Lightweight health probe.
    pub async fn is_responsive(&self) -> bool {
        self.runtime.is_responsive().await
    }

    /// List models in the local registry.
    pub async fn list_models(&self) -> Result<Vec<ModelRecord>, CoreError> {
        self.runtime.list_models().await
    }

    /// Ensure a model is present, pulling it if absent.
    ///
    /// When the model already exists this emits zero download events and
    /// returns immediately.
    pub async fn ensure_model(&self, model: &ModelIdentifier) -> Result<(), CoreError> {
        let present = self
            .runtime
            .list_models()
            .await?
            .iter()
            .any(|record| record.name.starts_with(model.as_str()));
        if present {
            tracing::info!(target: "fleetmind::llm", model = %model, "model already available");
            return Ok(());
        }

        tracing::info!(target: "fleetmind::llm", model = %model, "model not found, pulling");
        let pull = self.forward_pull(model);
        match tokio::time::timeout(Duration::from_secs(self.config.pull_timeout_secs), pull).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::ModelPullFailed(format!(
                "pull of {model} exceeded {}s deadline",
                self.config.pull_timeout_secs
            ))),
        }
    }

    async fn forward_pull(&self, model: &ModelIdentifier) -> Result<(), CoreError> {
        let mut progress = self.runtime.pull_model(model).await?;
        let mut completed = false;

        while let Some(record) = progress.next().await {
            completed = record.is_terminal();
            let _ = self.events.send(ServerEvent::Download(record));
            if completed {
                break;
            }
        }

        if completed {
            Ok(())
        } else {
            Err(CoreError::ModelPullFailed(format!(
                "pull of {model} ended without success record"
            )))
        }
    }

    /// Cached model lookup by name prefix.
    pub async fn model_info(&self, model: &ModelIdentifier) -> Option<ModelRecord> {
        {
            let cache = self.model_cache.lock().await;
            if let Some(record) = cache.get(model.as_str()) {
                return Some(record.clone());
            }
        }

        let record = self
            .runtime
            .list_models()
            .await
            .ok()?
            .into_iter()
            .find(|record| record.name.starts_with(model.as_str()))?;
        self.model_cache
            .lock()
            .await
            .insert(model.as_str().to_string(), record.clone());
        Some(record)
    }

    /// Statistics snapshot for diagnostics.
    pub async fn server_stats(&self) -> ServerStats {
        let available_models = self
            .runtime
            .list_models()
            .await
            .map(|models| models.len())
            .unwrap_or(0);
        ServerStats {
            state: self.state(),
            responsive: self.runtime.is_responsive().await,
            base_url: self.config.base_url.clone(),
            model: self.config.model.clone(),
            available_models,
        }
    }

    /// Convenience boot path: start the server and ensure the default
    /// model is present.
    pub async fn ensure_available(self: &Arc<Self>) -> Result<(), CoreError> {
        self.start(Duration::from_secs(self.config.start_timeout_secs))
            .await?;
        let model = self.default_model();
        self.ensure_model(&model).await
    }

    async fn start_health_monitor(self: &Arc<Self>) {
        let mut guard = self.monitor.lock().await;
        if guard.is_some() {
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let manager = Arc::clone(self);
        let period = Duration::from_secs(self.config.health_interval_secs);

        let task = tokio::spawn(async move {
            let mut misses = 0u32;
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so probing starts
            // one period after entering Running.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_rx.changed() => return,
                }

                if manager.state() != ServerState::Running {
                    return;
                }

                if manager.runtime.is_responsive().await {
                    misses = 0;
                    continue;
                }

                misses += 1;
                tracing::warn!(target: "fleetmind::llm", misses, "health probe failed");
                if misses >= HEALTH_MISS_LIMIT {
                    manager.set_state(ServerState::Error);
                    return;
                }
            }
        });

        *guard = Some(MonitorHandle {
            stop: stop_tx,
            task,
        });
    }

    async fn stop_health_monitor(&self) {
        if let Some(handle) = self.monitor.lock().await.take() {
            let _ = handle.stop.send(true);
            let _ = handle.task.await;
        }
    }

    fn map_runtime_error(&self, error: CoreError) -> CoreError {
        // An in-flight request that fails after the monitor declared the
        // server lost surfaces as the health loss, not a bare transport
        // error.
        if self.state() == ServerState::Error {
            if let CoreError::Network(_) = error {
                return CoreError::HealthLost;
            }
        }
        error
    }
}

#[async_trait]
impl LlmRuntime for ServerManager {
    async fn is_responsive(&self) -> bool {
        self.runtime.is_responsive().await
    }

    async fn list_models(&self) -> Result<Vec<ModelRecord>, CoreError> {
        self.runtime.list_models().await
    }

    async fn pull_model(&self, model: &ModelIdentifier) -> Result<ProgressStream, CoreError> {
        self.runtime.pull_model(model).await
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String, CoreError> {
        if self.state() == ServerState::Error {
            return Err(CoreError::HealthLost);
        }
        self.runtime
            .generate(request)
            .await
            .map_err(|e| self.map_runtime_error(e))
    }

    async fn generate_stream(&self, request: GenerateRequest) -> Result<TokenStream, CoreError> {
        if self.state() == ServerState::Error {
            return Err(CoreError::HealthLost);
        }
        self.runtime
            .generate_stream(request)
            .await
            .map_err(|e| self.map_runtime_error(e))
    }
}
