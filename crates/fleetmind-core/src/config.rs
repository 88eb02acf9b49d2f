//! Application configuration.
//!
//! Configuration is a serde document loaded from a JSON file, with
//! environment overrides applied afterwards: every key path maps to an
//! environment variable by uppercasing and replacing dots with
//! underscores under the `FLEETMIND_` prefix (`llm.base_url` →
//! `FLEETMIND_LLM_BASE_URL`).

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "FLEETMIND";

/// Default endpoint constants.
pub mod endpoints {
    /// Local Ollama runtime.
    pub const OLLAMA: &str = "http://localhost:11434";
}

/// Default model constants.
pub mod models {
    /// Default reasoning model.
    pub const DEFAULT: &str = "qwen2.5:14b";
}

/// Model runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Runtime base URL.
    pub base_url: String,
    /// Default model identifier.
    pub model: String,
    /// Server start timeout in seconds.
    pub start_timeout_secs: u64,
    /// Health monitor period in seconds.
    pub health_interval_secs: u64,
    /// Health probe deadline in seconds.
    pub probe_timeout_secs: u64,
    /// Model pull startup deadline in seconds.
    pub pull_timeout_secs: u64,
    /// Streaming generate deadline in seconds.
    pub generate_timeout_secs: u64,
    /// Blocking generate deadline in seconds.
    pub blocking_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: endpoints::OLLAMA.to_string(),
            model: models::DEFAULT.to_string(),
            start_timeout_secs: 30,
            health_interval_secs: 10,
            probe_timeout_secs: 5,
            pull_timeout_secs: 300,
            generate_timeout_secs: 120,
            blocking_timeout_secs: 30,
        }
    }
}

/// Stream processor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// UI update tick in milliseconds.
    pub update_interval_ms: u64,
    /// Inbound chunk queue capacity.
    pub chunk_queue_capacity: usize,
    /// UI update queue capacity.
    pub ui_queue_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 50,
            chunk_queue_capacity: 256,
            ui_queue_capacity: 512,
        }
    }
}

/// Authentication modes for the fleet API.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Cookie,
    Bearer,
    Oauth,
    ApiKey,
}

/// Fleet API client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetApiConfig {
    /// Fleet API base URL.
    pub base_url: String,
    /// Authentication mode.
    pub auth_mode: AuthMode,
    /// Verify TLS certificates.
    pub verify_ssl: bool,
    /// Retry attempts per request.
    pub retry_attempts: u32,
    /// Backoff between attempts, in seconds.
    pub retry_backoff_secs: u64,
}

impl Default for FleetApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            auth_mode: AuthMode::ApiKey,
            verify_ssl: true,
            retry_attempts: 3,
            retry_backoff_secs: 2,
        }
    }
}

/// Template store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesConfig {
    /// Directory holding template documents.
    pub dir: String,
    /// Optional few-shot examples file.
    pub examples_file: Option<String>,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            dir: "templates".to_string(),
            examples_file: None,
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Credential store directory; `None` means the per-user default.
    pub credentials_dir: Option<String>,
    /// Maximum config backups retained.
    pub backup_retain: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            credentials_dir: None,
            backup_retain: 10,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Model runtime settings.
    pub llm: LlmConfig,
    /// Stream processor settings.
    pub stream: StreamConfig,
    /// Fleet API settings.
    pub fleet_api: FleetApiConfig,
    /// Template settings.
    pub templates: TemplatesConfig,
    /// Persistence settings.
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Load configuration from a JSON file, then apply env overrides.
    pub fn load(path: &std::path::Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path)?;
        let mut config: AppConfig = serde_json::from_str(&text)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// The built-in defaults with env overrides applied.
    pub fn from_env() -> Self {
        let mut config = AppConfig::default();
        config.apply_env_overrides();
        config
    }

    /// Apply `FLEETMIND_*` environment overrides onto this config.
    pub fn apply_env_overrides(&mut self) {
        let mut value = match serde_json::to_value(&*self) {
            Ok(v) => v,
            Err(_) => return,
        };
        apply_overrides_at(&mut value, String::new());
        if let Ok(updated) = serde_json::from_value(value) {
            *self = updated;
        }
    }
}

/// Walk the config document and replace any leaf whose derived env var
/// is set. Scalars are parsed from the variable text by leaf type.
fn apply_overrides_at(value: &mut serde_json::Value, path: String) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                apply_overrides_at(child, child_path);
            }
        }
        leaf => {
            let env_name = format!(
                "{}_{}",
                ENV_PREFIX,
                path.replace('.', "_").to_uppercase()
            );
            if let Ok(text) = std::env::var(&env_name) {
                *leaf = parse_override(&text, leaf);
                tracing::debug!(target: "fleetmind::config", %env_name, "applied env override");
            }
        }
    }
}

/// Parse an override string according to the type of the current leaf.
fn parse_override(text: &str, current: &serde_json::Value) -> serde_json::Value {
    match current {
        serde_json::Value::Bool(_) => serde_json::Value::Bool(text.eq_ignore_ascii_case("true")),
        serde_json::Value::Number(_) => text
            .parse::<i64>()
            .map(serde_json::Value::from)
            .or_else(|_| text.parse::<f64>().map(serde_json::Value::from))
            .unwrap_or_else(|_| serde_json::Value::String(text.to_string())),
        _ => serde_json::Value::String(text.to_string()),
    }
}
