//! Reasoning engine tests against a scripted runtime.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_stream::wrappers::ReceiverStream;

use fleetmind_core::llm::{
    GenerateRequest, LlmRuntime, ModelIdentifier, ModelRecord, ProgressStream, TokenChunk,
    TokenStream,
};
use fleetmind_core::template::ConfidenceBand;
use fleetmind_core::{CoreError, EntityKind, IntentTag};
use fleetmind_reasoning::{EngineConfig, PromptBuilder, ReasoningEngine, ResultQuery, SubmitOptions};

/// Runtime that replays a fixed response, chunked for streaming.
struct ScriptedRuntime {
    response: String,
    chunk_size: usize,
}

impl ScriptedRuntime {
    fn new(response: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            response: response.into(),
            chunk_size: 24,
        })
    }
}

#[async_trait]
impl LlmRuntime for ScriptedRuntime {
    async fn is_responsive(&self) -> bool {
        true
    }

    async fn list_models(&self) -> Result<Vec<ModelRecord>, CoreError> {
        Ok(Vec::new())
    }

    async fn pull_model(&self, _model: &ModelIdentifier) -> Result<ProgressStream, CoreError> {
        Err(CoreError::internal("not scripted"))
    }

    async fn generate(&self, _request: GenerateRequest) -> Result<String, CoreError> {
        Ok(self.response.clone())
    }

    async fn generate_stream(&self, _request: GenerateRequest) -> Result<TokenStream, CoreError> {
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let response = self.response.clone();
        let chunk_size = self.chunk_size;
        tokio::spawn(async move {
            let chars: Vec<char> = response.chars().collect();
            for window in chars.chunks(chunk_size) {
                let _ = tx
                    .send(Ok(TokenChunk {
                        content: window.iter().collect(),
                        done: false,
                    }))
                    .await;
            }
            let _ = tx
                .send(Ok(TokenChunk {
                    content: String::new(),
                    done: true,
                }))
                .await;
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

const HAPPY_ENVELOPE: &str = r#"{
  "chain_of_thought": [
    {"step": "Input Analysis", "reasoning": "reservation email", "findings": ["direct request"]},
    {"step": "Intent Recognition", "reasoning": "booking keywords", "confidence": 0.87},
    {"step": "Entity Extraction", "reasoning": "ids and times found", "entities": {
      "resource_ids": ["RES-1234"],
      "dates": ["tomorrow"],
      "times": ["14:00-16:00"],
      "users": ["alice@example.com"]
    }},
    {"step": "API Mapping", "reasoning": "maps to reservations", "api_calls": [
      {"method": "POST", "endpoint": "/reservations", "body": {"resource_id": "RES-1234"}, "purpose": "Create reservation"}
    ]}
  ],
  "summary": {"intent": "resource_reservation", "confidence": 0.87}
}"#;

fn engine_with(response: &str) -> Arc<ReasoningEngine> {
    ReasoningEngine::new(ScriptedRuntime::new(response), EngineConfig::default())
}

#[tokio::test]
async fn test_streaming_happy_path() {
    let engine = engine_with(HAPPY_ENVELOPE);
    let id = engine
        .submit(
            "Please reserve vehicle RES-1234 tomorrow from 14:00 to 16:00 for alice@example.com.",
            SubmitOptions::default(),
        )
        .unwrap();

    let result = match engine.wait_for(&id).await {
        ResultQuery::Ready(result) => result,
        other => panic!("expected result, got {other:?}"),
    };

    assert_eq!(result.intent, Some(IntentTag::ResourceReservation));
    assert!((result.confidence - 0.87).abs() < f32::EPSILON);
    assert_eq!(result.steps.len(), 4);

    let entities = result.entities.as_ref().unwrap();
    assert_eq!(entities["resource_ids"], vec!["RES-1234"]);
    assert_eq!(entities["users"], vec!["alice@example.com"]);

    let api_calls = result.api_calls.as_ref().unwrap();
    assert_eq!(api_calls[0].method, "POST");
    assert_eq!(api_calls[0].endpoint, "/reservations");
}

#[tokio::test]
async fn test_blocking_path_parses_once() {
    let engine = engine_with(HAPPY_ENVELOPE);
    let id = engine
        .submit(
            "Reserve RES-1234",
            SubmitOptions {
                streaming: false,
                ..SubmitOptions::default()
            },
        )
        .unwrap();

    let result = match engine.wait_for(&id).await {
        ResultQuery::Ready(result) => result,
        other => panic!("expected result, got {other:?}"),
    };
    assert_eq!(result.intent, Some(IntentTag::ResourceReservation));
}

#[tokio::test]
async fn test_empty_input_blocked_before_llm_call() {
    let engine = engine_with(HAPPY_ENVELOPE);
    let result = engine.submit("   ", SubmitOptions::default());
    assert!(matches!(
        result,
        Err(CoreError::ValidationBlocked { findings }) if findings.len() == 1
    ));
}

#[tokio::test]
async fn test_non_json_output_gets_heuristic_confidence() {
    let engine = engine_with("The vehicle seems to need an API call but I am not sure.");
    let id = engine
        .submit("Fix that one soon.", SubmitOptions::default())
        .unwrap();

    let result = match engine.wait_for(&id).await {
        ResultQuery::Ready(result) => result,
        other => panic!("expected result, got {other:?}"),
    };

    assert_eq!(result.intent, None);
    // base 0.3 + API 0.2 + vehicle 0.2 = 0.7 (length <= 100).
    assert!((result.confidence - 0.7).abs() < 1e-6);
}

#[tokio::test]
async fn test_low_confidence_validation_recommends_clarification() {
    let low = r#"{"chain_of_thought":[{"step":"Input Analysis","reasoning":"vague"}],"summary":{"intent":"unknown","confidence":0.25}}"#;
    let engine = engine_with(low);
    let id = engine
        .submit("Fix that one soon.", SubmitOptions::default())
        .unwrap();

    let result = match engine.wait_for(&id).await {
        ResultQuery::Ready(result) => result,
        other => panic!("expected result, got {other:?}"),
    };
    assert!(result.confidence < 0.4);

    let report = engine.validate(&result);
    assert!(report
        .recommendations
        .iter()
        .any(|r| r == "Consider requesting clarification"));

    // The clarification prompt carries a bullet per missing entity.
    let missing = ReasoningEngine::missing_entities(
        &result,
        &[EntityKind::ResourceId, EntityKind::Date, EntityKind::Time],
    );
    assert_eq!(missing.len(), 3);
    let prompt = PromptBuilder::new().clarification_prompt("Fix that one soon.", &missing);
    assert!(prompt.contains("Which specific resource?"));
    assert!(prompt.contains("What date?"));
    assert!(prompt.contains("What time or time range?"));
}

#[tokio::test]
async fn test_validation_scores_full_result() {
    let engine = engine_with(HAPPY_ENVELOPE);
    let id = engine.submit("Reserve RES-1234", SubmitOptions::default()).unwrap();
    let result = match engine.wait_for(&id).await {
        ResultQuery::Ready(result) => result,
        other => panic!("expected result, got {other:?}"),
    };

    let report = engine.validate(&result);
    assert_eq!(report.confidence_band, ConfidenceBand::High);
    // 0.4 confidence + 0.3 clean drafts; "tomorrow" fails the date
    // regex so the entity bonus is withheld.
    assert!((report.overall_score - 0.7).abs() < 1e-6);
    assert!(report.api_validation.has_required_fields);
    assert!(!report.entity_validation.is_clean());
}

#[tokio::test]
async fn test_unknown_result_id() {
    let engine = engine_with(HAPPY_ENVELOPE);
    assert!(matches!(engine.result("missing"), ResultQuery::NotFound));
}

#[tokio::test]
async fn test_stats_track_success() {
    let engine = engine_with(HAPPY_ENVELOPE);
    let id = engine.submit("Reserve RES-1234", SubmitOptions::default()).unwrap();
    let _ = engine.wait_for(&id).await;

    let stats = engine.stats();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.successful, 1);
    assert!((stats.success_rate - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_complete_raw_returns_model_text() {
    let engine = engine_with("{\"selected_template\": \"create_reservation\"}");
    let raw = engine
        .complete_raw("selector system", "selector prompt", 0.3, 1000)
        .await
        .unwrap();
    assert!(raw.contains("create_reservation"));
}
