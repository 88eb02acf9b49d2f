//! End-to-end pipeline: text → reasoning → template → approval → audit.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use fleetmind_approval::{ApprovalAction, ApprovalFlow, ApprovalState};
use fleetmind_core::llm::{
    GenerateRequest, LlmRuntime, ModelIdentifier, ModelRecord, ProgressStream, TokenChunk,
    TokenStream,
};
use fleetmind_core::{CoreError, IntentTag, Interpretation};
use fleetmind_reasoning::{EngineConfig, ReasoningEngine, ResultQuery, SubmitOptions};
use fleetmind_templates::{AiSelector, TemplateDocument, TemplateStore};

/// Replays one response for reasoning and one for selection.
struct ScriptedRuntime {
    reasoning: String,
    selection: String,
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

    async fn generate(&self, request: GenerateRequest) -> Result<String, CoreError> {
        // The selection prompt is self-contained (no system prompt).
        if request.system.is_empty() {
            Ok(self.selection.clone())
        } else {
            Ok(self.reasoning.clone())
        }
    }

    async fn generate_stream(&self, _request: GenerateRequest) -> Result<TokenStream, CoreError> {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let response = self.reasoning.clone();
        tokio::spawn(async move {
            let _ = tx
                .send(Ok(TokenChunk {
                    content: response,
                    done: true,
                }))
                .await;
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

const REASONING: &str = r#"{
  "chain_of_thought": [
    {"step": "Input Analysis", "reasoning": "direct reservation request"},
    {"step": "Intent Recognition", "reasoning": "booking keywords", "confidence": 0.87},
    {"step": "Entity Extraction", "reasoning": "ids, window, user", "confidence": 0.8, "entities": {
      "resource_ids": ["RES-1234"],
      "dates": ["2024-05-03"],
      "times": ["14:00"],
      "users": ["alice@example.com"]
    }},
    {"step": "API Mapping", "reasoning": "reservation endpoint", "api_calls": [
      {"method": "POST", "endpoint": "/reservations", "body": {"resource_id": "RES-1234"}, "purpose": "Create reservation"}
    ]}
  ],
  "summary": {"intent": "resource_reservation", "confidence": 0.87}
}"#;

const SELECTION: &str = r#"{"selected_template": "create_reservation", "confidence": 0.9,
  "reasoning": "reservation with full window", "key_factors": ["booking verb"],
  "alternatives": [], "matched_examples": []}"#;

fn template_store() -> Arc<TemplateStore> {
    let text = r#"
template_metadata:
  name: create_reservation
  category: reservation_booking
  description: Reserve a fleet resource
  required_entities: [resource_id, date, time]
  optional_entities: [user]
  api_endpoint: /reservations
  http_method: POST
body:
  resource_id: "{{resource_id}}"
  date: "{{date}}"
  start_time: "2024-05-03T14:00:00"
  end_time: "2024-05-03T16:00:00"
  user: "{{user}}"
"#;
    Arc::new(TemplateStore::from_documents(vec![
        TemplateDocument::parse(text).unwrap(),
    ]))
}

#[tokio::test]
async fn test_happy_path_reservation_flow() {
    let input = "Please reserve vehicle RES-1234 tomorrow from 14:00 to 16:00 for alice@example.com.";

    let runtime = Arc::new(ScriptedRuntime {
        reasoning: REASONING.to_string(),
        selection: SELECTION.to_string(),
    });

    let engine = ReasoningEngine::new(
        Arc::clone(&runtime) as Arc<dyn LlmRuntime>,
        EngineConfig::default(),
    );
    let store = template_store();
    let selector = AiSelector::new(Arc::clone(&store), Arc::clone(&engine), HashMap::new());

    // Reasoning (streaming).
    let request_id = engine.submit(input, SubmitOptions::default()).unwrap();
    let result = match engine.wait_for(&request_id).await {
        ResultQuery::Ready(result) => result,
        other => panic!("expected a result, got {other:?}"),
    };
    assert_eq!(result.intent, Some(IntentTag::ResourceReservation));
    assert!((result.confidence - 0.87).abs() < f32::EPSILON);

    // Template selection and slot filling.
    let choice = selector.select(input).await;
    assert_eq!(choice.template_name, "create_reservation");

    let entities = ReasoningEngine::canonical_entities(&result);
    let request = store.fill(&choice.template_name, &entities, input).unwrap();
    assert_eq!(request["resource_id"], "RES-1234");
    assert_eq!(request["user"], "alice@example.com");
    assert_eq!(request["_meta"]["source"], "user_input");

    // Approval.
    let interpretation = Interpretation {
        id: Uuid::new_v4(),
        input_text: input.to_string(),
        intent: IntentTag::ResourceReservation,
        entities,
        template_name: choice.template_name.clone(),
        request,
        intent_confidence: Some(0.87),
        entity_confidence: Some(0.8),
    };
    assert!((interpretation.overall_confidence() - 0.835).abs() < 1e-6);

    let mut flow = ApprovalFlow::new();
    let findings = flow.load(interpretation);
    assert!(
        !findings.iter().any(|f| f.is_blocking()),
        "unexpected blocking findings: {findings:?}"
    );

    flow.approve("alice").unwrap();
    assert_eq!(flow.state(), Some(ApprovalState::Approved));

    let audit = flow.audit_log();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, ApprovalAction::Approve);
    assert_eq!(audit[0].user_id, "alice");
}
