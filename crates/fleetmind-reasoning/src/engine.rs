//! Reasoning engine: one request from text to validated result.
//!
//! `submit` never blocks the caller; the request runs on a small worker
//! pool (two permits, so a streaming request and a blocking
//! template-selection call can coexist) and lands in a bounded history
//! ring. Model calls carry deadlines: 120 s streaming, 30 s blocking.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{broadcast, Semaphore};
use uuid::Uuid;

use fleetmind_core::config::StreamConfig;
use fleetmind_core::interpretation::IntentTag;
use fleetmind_core::llm::{GenerateRequest, LlmRuntime, ModelIdentifier};
use fleetmind_core::reasoning::{
    ApiCallDraft, ReasoningResult, ReasoningStep, STEP_API_MAPPING, STEP_ENTITY_EXTRACTION,
};
use fleetmind_core::template::ConfidenceBand;
use fleetmind_core::{CoreError, ValidationFinding};

use crate::envelope::{self, Envelope, ModelOutput};
use crate::prompt::{self, EntityValidation, PromptBuilder};
use crate::stream::{StreamOutcome, StreamProcessor, UiUpdate};

/// History ring capacity.
const HISTORY_CAPACITY: usize = 1000;
/// Entries kept when the ring overflows.
const HISTORY_TRIM_TO: usize = 500;
/// Worker permits: one streaming plus one blocking call.
const WORKER_PERMITS: usize = 2;

/// Engine processing states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Processing,
    Streaming,
    Completed,
    Error,
}

impl EngineState {
    /// State label.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Idle => "idle",
            EngineState::Processing => "processing",
            EngineState::Streaming => "streaming",
            EngineState::Completed => "completed",
            EngineState::Error => "error",
        }
    }
}

/// Options for one submitted request.
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    /// Labeled context lines added to the user prompt.
    pub context: Option<BTreeMap<String, String>>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Token budget.
    pub max_tokens: u32,
    /// Stream the response.
    pub streaming: bool,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            context: None,
            temperature: 0.1,
            max_tokens: 2048,
            streaming: true,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Model used for reasoning requests.
    pub model: ModelIdentifier,
    /// Deadline for streaming requests, in seconds.
    pub generate_timeout_secs: u64,
    /// Deadline for blocking requests, in seconds.
    pub blocking_timeout_secs: u64,
    /// Stream processor settings.
    pub stream: StreamConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: ModelIdentifier::new(fleetmind_core::config::models::DEFAULT),
            generate_timeout_secs: 120,
            blocking_timeout_secs: 30,
            stream: StreamConfig::default(),
        }
    }
}

/// Result lookup outcome.
#[derive(Debug, Clone)]
pub enum ResultQuery {
    /// The request finished.
    Ready(ReasoningResult),
    /// The request is still in flight.
    NotReady,
    /// No such request.
    NotFound,
}

/// Validation report for a reasoning result.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    /// Aggregate score in `[0, 1]`.
    pub overall_score: f32,
    /// Band containing the result confidence.
    pub confidence_band: ConfidenceBand,
    /// Entity regex validation outcome.
    pub entity_validation: EntityValidation,
    /// API draft validation outcome.
    pub api_validation: ApiValidation,
    /// Actionable recommendations.
    pub recommendations: Vec<String>,
}

/// API draft validation outcome.
#[derive(Debug, Clone, Default)]
pub struct ApiValidation {
    /// Number of drafts.
    pub count: usize,
    /// Whether every draft has both method and endpoint.
    pub has_required_fields: bool,
}

/// Engine statistics snapshot.
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// Requests submitted.
    pub total: u64,
    /// Requests that produced a usable result.
    pub successful: u64,
    /// successful / total.
    pub success_rate: f64,
    /// Mean processing time of successful requests, in milliseconds.
    pub average_processing_ms: f64,
    /// Current engine state.
    pub state: EngineState,
}

#[derive(Default)]
struct Metrics {
    total: u64,
    successful: u64,
    average_processing_ms: f64,
}

impl Metrics {
    fn record(&mut self, processing: Duration, success: bool) {
        if success {
            self.successful += 1;
            let n = self.successful as f64;
            self.average_processing_ms =
                (self.average_processing_ms * (n - 1.0) + processing.as_millis() as f64) / n;
        }
    }
}

/// Chain-of-thought reasoning engine.
pub struct ReasoningEngine {
    runtime: Arc<dyn LlmRuntime>,
    config: EngineConfig,
    prompts: PromptBuilder,
    state: RwLock<EngineState>,
    pending: Mutex<HashSet<String>>,
    history: Mutex<VecDeque<ReasoningResult>>,
    workers: Arc<Semaphore>,
    metrics: Mutex<Metrics>,
    ui_events: broadcast::Sender<UiUpdate>,
}

impl ReasoningEngine {
    /// Create an engine over the given runtime.
    pub fn new(runtime: Arc<dyn LlmRuntime>, config: EngineConfig) -> Arc<Self> {
        let (ui_events, _) = broadcast::channel(512);
        Arc::new(Self {
            runtime,
            config,
            prompts: PromptBuilder::new(),
            state: RwLock::new(EngineState::Idle),
            pending: Mutex::new(HashSet::new()),
            history: Mutex::new(VecDeque::with_capacity(64)),
            workers: Arc::new(Semaphore::new(WORKER_PERMITS)),
            metrics: Mutex::new(Metrics::default()),
            ui_events,
        })
    }

    /// Current engine state.
    pub fn state(&self) -> EngineState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: EngineState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Subscribe to UI updates forwarded from live streams.
    pub fn subscribe_ui(&self) -> broadcast::Receiver<UiUpdate> {
        self.ui_events.subscribe()
    }

    /// Submit a request. Returns the request id immediately.
    ///
    /// Empty input is rejected before any model call.
    pub fn submit(
        self: &Arc<Self>,
        text: impl Into<String>,
        options: SubmitOptions,
    ) -> Result<String, CoreError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(CoreError::ValidationBlocked {
                findings: vec![ValidationFinding::error("input", "input text is empty")],
            });
        }

        let request_id = Uuid::new_v4().to_string()[..8].to_string();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request_id.clone());
        self.metrics.lock().unwrap_or_else(|e| e.into_inner()).total += 1;
        self.set_state(if options.streaming {
            EngineState::Streaming
        } else {
            EngineState::Processing
        });

        tracing::info!(target: "fleetmind::engine", %request_id, streaming = options.streaming, "processing reasoning request");

        let engine = Arc::clone(self);
        let id = request_id.clone();
        tokio::spawn(async move {
            let _permit = engine.workers.acquire().await;
            let result = if options.streaming {
                engine.run_streaming(&id, &text, &options).await
            } else {
                engine.run_blocking(&id, &text, &options).await
            };

            let result = match result {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(target: "fleetmind::engine", request_id = %id, error = %e, "reasoning request failed");
                    engine.set_state(EngineState::Error);
                    ReasoningResult::failed(&id, e.to_string())
                }
            };

            if result.is_success() {
                engine.set_state(EngineState::Completed);
            }
            engine
                .metrics
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .record(result.processing_time, result.is_success());
            engine.record_result(result);
            engine
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
        });

        Ok(request_id)
    }

    /// Look up a result by request id.
    pub fn result(&self, request_id: &str) -> ResultQuery {
        if self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(request_id)
        {
            return ResultQuery::NotReady;
        }
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        match history.iter().rev().find(|r| r.request_id == request_id) {
            Some(result) => ResultQuery::Ready(result.clone()),
            None => ResultQuery::NotFound,
        }
    }

    /// The most recent result, if any.
    pub fn latest(&self) -> Option<ReasoningResult> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .back()
            .cloned()
    }

    /// Wait until the given request leaves the pending set, then return
    /// its result.
    pub async fn wait_for(&self, request_id: &str) -> ResultQuery {
        loop {
            match self.result(request_id) {
                ResultQuery::NotReady => tokio::time::sleep(Duration::from_millis(20)).await,
                ready => return ready,
            }
        }
    }

    /// Run an arbitrary prompt in blocking mode and return the raw
    /// model text. Used by the template selector.
    pub async fn complete_raw(
        &self,
        system: &str,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, CoreError> {
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| CoreError::Cancelled)?;
        let request = GenerateRequest::new(self.config.model.clone(), system, prompt)
            .with_temperature(temperature)
            .with_max_tokens(max_tokens);

        let deadline = Duration::from_secs(self.config.blocking_timeout_secs);
        match tokio::time::timeout(deadline, self.runtime.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::LlmTimeout {
                seconds: self.config.blocking_timeout_secs,
            }),
        }
    }

    async fn run_streaming(
        &self,
        request_id: &str,
        text: &str,
        options: &SubmitOptions,
    ) -> Result<ReasoningResult, CoreError> {
        let started = std::time::Instant::now();

        let system = self.prompts.system_prompt();
        let user = self
            .prompts
            .user_prompt(text, options.context.as_ref(), Utc::now());

        let processor = StreamProcessor::new(self.config.stream.clone());
        let mut handle = processor.start(request_id)?;

        // Drain the step and UI channels on their own tasks so the
        // parser never waits on a full channel.
        if let Some(mut steps_rx) = handle.take_steps() {
            tokio::spawn(async move { while steps_rx.recv().await.is_some() {} });
        }
        if let Some(mut ui_rx) = handle.take_ui_updates() {
            let ui_events = self.ui_events.clone();
            tokio::spawn(async move {
                while let Some(update) = ui_rx.recv().await {
                    let _ = ui_events.send(update);
                }
            });
        }
        if let Some(mut errors_rx) = handle.take_errors() {
            let id = request_id.to_string();
            tokio::spawn(async move {
                while let Some(message) = errors_rx.recv().await {
                    tracing::warn!(target: "fleetmind::engine", request_id = %id, %message, "stream diagnostic");
                }
            });
        }

        let request = GenerateRequest::new(self.config.model.clone(), system, user)
            .with_temperature(options.temperature)
            .with_max_tokens(options.max_tokens);

        let deadline = Duration::from_secs(self.config.generate_timeout_secs);
        let outcome = tokio::time::timeout(deadline, async {
            let mut tokens = self.runtime.generate_stream(request).await?;
            let mut saw_done = false;
            while let Some(chunk) = tokens.next().await {
                let chunk = chunk?;
                saw_done = chunk.done;
                handle.push_chunk(chunk.content, chunk.done);
                if saw_done {
                    break;
                }
            }
            if !saw_done {
                // Premature stream close still finalizes the parse.
                handle.push_chunk("", true);
            }
            Ok::<_, CoreError>(handle.completion().await)
        })
        .await;

        let outcome = match outcome {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                handle.stop();
                return Err(e);
            }
            Err(_) => {
                // Deadline expiry cancels the in-flight stream.
                handle.stop();
                return Err(CoreError::LlmTimeout {
                    seconds: self.config.generate_timeout_secs,
                });
            }
        };

        let elapsed = started.elapsed();
        match outcome {
            StreamOutcome::Completed { envelope, raw } => {
                Ok(self.result_from_envelope(request_id, envelope, raw, elapsed))
            }
            StreamOutcome::ParseFailed { raw } => {
                tracing::warn!(target: "fleetmind::engine", %request_id, "stream never parsed, falling back to heuristic confidence");
                Ok(self.result_from_text(request_id, raw, elapsed))
            }
            StreamOutcome::Cancelled => Err(CoreError::Cancelled),
        }
    }

    async fn run_blocking(
        &self,
        request_id: &str,
        text: &str,
        options: &SubmitOptions,
    ) -> Result<ReasoningResult, CoreError> {
        let started = std::time::Instant::now();

        let system = self.prompts.system_prompt();
        let user = self
            .prompts
            .user_prompt(text, options.context.as_ref(), Utc::now());
        let request = GenerateRequest::new(self.config.model.clone(), system, user)
            .with_temperature(options.temperature)
            .with_max_tokens(options.max_tokens);

        let deadline = Duration::from_secs(self.config.blocking_timeout_secs);
        let response = match tokio::time::timeout(deadline, self.runtime.generate(request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(CoreError::LlmTimeout {
                    seconds: self.config.blocking_timeout_secs,
                });
            }
        };

        let elapsed = started.elapsed();
        match envelope::parse_model_output(&response) {
            ModelOutput::Envelope(envelope) => {
                Ok(self.result_from_envelope(request_id, envelope, response, elapsed))
            }
            ModelOutput::Unknown(raw) => Ok(self.result_from_text(request_id, raw, elapsed)),
        }
    }

    fn result_from_envelope(
        &self,
        request_id: &str,
        envelope: Envelope,
        raw: String,
        processing_time: Duration,
    ) -> ReasoningResult {
        let entities = envelope
            .chain_of_thought
            .iter()
            .find(|step| step.name == STEP_ENTITY_EXTRACTION)
            .and_then(|step| step.entities.clone());
        let api_calls = envelope
            .chain_of_thought
            .iter()
            .find(|step| step.name == STEP_API_MAPPING)
            .and_then(|step| step.api_calls.clone());

        ReasoningResult {
            request_id: request_id.to_string(),
            intent: Some(IntentTag::parse(&envelope.summary.intent)),
            entities,
            api_calls,
            confidence: envelope.summary.confidence.clamp(0.0, 1.0),
            steps: envelope.chain_of_thought,
            processing_time,
            error: None,
            raw_response: raw,
        }
    }

    fn result_from_text(
        &self,
        request_id: &str,
        raw: String,
        processing_time: Duration,
    ) -> ReasoningResult {
        ReasoningResult {
            request_id: request_id.to_string(),
            intent: None,
            entities: None,
            api_calls: None,
            confidence: estimate_confidence_from_text(&raw),
            steps: Vec::new(),
            processing_time,
            error: None,
            raw_response: raw,
        }
    }

    fn record_result(&self, result: ReasoningResult) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        if history.len() >= HISTORY_CAPACITY {
            let excess = history.len() - HISTORY_TRIM_TO + 1;
            history.drain(..excess);
        }
        history.push_back(result);
    }

    /// Validate a result's quality.
    pub fn validate(&self, result: &ReasoningResult) -> ValidationReport {
        let mut report = ValidationReport {
            overall_score: 0.0,
            confidence_band: ConfidenceBand::from_confidence(result.confidence),
            entity_validation: EntityValidation::default(),
            api_validation: ApiValidation::default(),
            recommendations: Vec::new(),
        };

        if result.confidence >= 0.8 {
            report.overall_score += 0.4;
        } else if result.confidence >= 0.6 {
            report.overall_score += 0.2;
        } else {
            report
                .recommendations
                .push("Consider requesting clarification".to_string());
        }

        if let Some(entities) = &result.entities {
            report.entity_validation = prompt::validate_entities(entities);
            if report.entity_validation.is_clean() {
                report.overall_score += 0.3;
            } else {
                report
                    .recommendations
                    .push("Fix entity extraction errors".to_string());
            }
        }

        if let Some(api_calls) = &result.api_calls {
            report.api_validation.count = api_calls.len();
            report.api_validation.has_required_fields =
                api_calls.iter().all(ApiCallDraft::has_required_fields);
            if report.api_validation.has_required_fields {
                report.overall_score += 0.3;
            } else {
                report
                    .recommendations
                    .push("API calls missing required fields".to_string());
            }
        }

        report
    }

    /// Missing required entity kinds for a result, used to build
    /// clarification prompts.
    pub fn missing_entities(
        result: &ReasoningResult,
        required: &[fleetmind_core::EntityKind],
    ) -> Vec<fleetmind_core::EntityKind> {
        let present: HashSet<fleetmind_core::EntityKind> = result
            .entities
            .as_ref()
            .map(|groups| {
                groups
                    .iter()
                    .filter(|(_, values)| !values.is_empty())
                    .filter_map(|(key, _)| fleetmind_core::EntityKind::from_envelope_key(key))
                    .collect()
            })
            .unwrap_or_default();
        required
            .iter()
            .copied()
            .filter(|kind| !present.contains(kind))
            .collect()
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> EngineStats {
        let metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        EngineStats {
            total: metrics.total,
            successful: metrics.successful,
            success_rate: metrics.successful as f64 / metrics.total.max(1) as f64,
            average_processing_ms: metrics.average_processing_ms,
            state: self.state(),
        }
    }

    /// Entity groups as a canonical-kind map, for slot filling.
    pub fn canonical_entities(
        result: &ReasoningResult,
    ) -> HashMap<fleetmind_core::EntityKind, Vec<String>> {
        let mut canonical: HashMap<fleetmind_core::EntityKind, Vec<String>> = HashMap::new();
        if let Some(groups) = &result.entities {
            for (key, values) in groups {
                if let Some(kind) = fleetmind_core::EntityKind::from_envelope_key(key) {
                    canonical.entry(kind).or_default().extend(values.clone());
                }
            }
        }
        canonical
    }
}

/// Heuristic confidence for non-JSON model output.
///
/// Base 0.3; +0.2 when "API" appears (any case); +0.2 when a domain
/// keyword appears; +0.1 when the text is longer than 100 chars;
/// capped at 1.0.
pub fn estimate_confidence_from_text(text: &str) -> f32 {
    let mut confidence: f32 = 0.3;

    if text.to_uppercase().contains("API") {
        confidence += 0.2;
    }
    let lower = text.to_lowercase();
    if ["vehicle", "reservation", "maintenance"]
        .iter()
        .any(|keyword| lower.contains(keyword))
    {
        confidence += 0.2;
    }
    if text.len() > 100 {
        confidence += 0.1;
    }

    confidence.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_confidence() {
        assert!((estimate_confidence_from_text("??") - 0.3).abs() < f32::EPSILON);
        assert!((estimate_confidence_from_text("call the API") - 0.5).abs() < f32::EPSILON);
        assert!(
            (estimate_confidence_from_text("the vehicle needs an API call") - 0.7).abs()
                < f32::EPSILON
        );
        let long = format!("the vehicle needs an API call {}", "x".repeat(100));
        assert!((estimate_confidence_from_text(&long) - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_heuristic_confidence_capped() {
        let text = format!(
            "API API vehicle reservation maintenance {}",
            "detail ".repeat(50)
        );
        assert!(estimate_confidence_from_text(&text) <= 1.0);
    }

    #[test]
    fn test_metrics_average() {
        let mut metrics = Metrics::default();
        metrics.total = 2;
        metrics.record(Duration::from_millis(100), true);
        metrics.record(Duration::from_millis(300), true);
        assert!((metrics.average_processing_ms - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_entities() {
        let mut result = ReasoningResult::failed("r1", "n/a");
        result.error = None;
        let mut groups = HashMap::new();
        groups.insert("resource_ids".to_string(), vec!["RES-1".to_string()]);
        groups.insert("dates".to_string(), Vec::new());
        result.entities = Some(groups);

        let missing = ReasoningEngine::missing_entities(
            &result,
            &[
                fleetmind_core::EntityKind::ResourceId,
                fleetmind_core::EntityKind::Date,
                fleetmind_core::EntityKind::Time,
            ],
        );
        assert_eq!(
            missing,
            vec![
                fleetmind_core::EntityKind::Date,
                fleetmind_core::EntityKind::Time
            ]
        );
    }
}
