//! Reasoning output types: steps, API call drafts, final results.
//!
//! These mirror the JSON envelope the model is instructed to emit
//! (`chain_of_thought` + `summary`). Wire names follow the envelope;
//! Rust names say what the field is.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::interpretation::IntentTag;

/// A draft API call proposed by the model's "API Mapping" step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiCallDraft {
    /// HTTP method.
    #[serde(default)]
    pub method: String,
    /// Endpoint path.
    #[serde(default)]
    pub endpoint: String,
    /// Request body.
    #[serde(default)]
    pub body: serde_json::Value,
    /// Why the model proposed this call.
    #[serde(default)]
    pub purpose: String,
}

impl ApiCallDraft {
    /// A draft is executable only with both method and endpoint present.
    pub fn has_required_fields(&self) -> bool {
        !self.method.is_empty() && !self.endpoint.is_empty()
    }
}

/// One parsed step of the model's chain of thought.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReasoningStep {
    /// Phase name ("Input Analysis", "Intent Recognition", ...).
    #[serde(rename = "step", default)]
    pub name: String,
    /// The model's narrative for this phase.
    #[serde(rename = "reasoning", default)]
    pub narrative: String,
    /// Specific observations, when the phase lists any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub findings: Option<Vec<String>>,
    /// Phase-local confidence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Entity groups, present on the extraction step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities: Option<HashMap<String, Vec<String>>>,
    /// Draft API calls, present on the mapping step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_calls: Option<Vec<ApiCallDraft>>,
}

/// Step name the engine pulls entities from.
pub const STEP_ENTITY_EXTRACTION: &str = "Entity Extraction";
/// Step name the engine pulls API call drafts from.
pub const STEP_API_MAPPING: &str = "API Mapping";

/// Final result of one reasoning request.
#[derive(Debug, Clone)]
pub struct ReasoningResult {
    /// Request identifier returned by `submit`.
    pub request_id: String,
    /// Classified intent, when the envelope parsed.
    pub intent: Option<IntentTag>,
    /// Entity groups from the extraction step.
    pub entities: Option<HashMap<String, Vec<String>>>,
    /// API call drafts from the mapping step.
    pub api_calls: Option<Vec<ApiCallDraft>>,
    /// Overall confidence in `[0, 1]`.
    pub confidence: f32,
    /// All parsed reasoning steps, in envelope order.
    pub steps: Vec<ReasoningStep>,
    /// Wall-clock processing time.
    pub processing_time: Duration,
    /// Error description for failed requests.
    pub error: Option<String>,
    /// Raw model output, kept for diagnostics.
    pub raw_response: String,
}

impl ReasoningResult {
    /// Create an empty failed result.
    pub fn failed(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            intent: None,
            entities: None,
            api_calls: None,
            confidence: 0.0,
            steps: Vec::new(),
            processing_time: Duration::ZERO,
            error: Some(error.into()),
            raw_response: String::new(),
        }
    }

    /// Whether the request produced a usable interpretation.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_wire_names() {
        let json = r#"{"step":"Intent Recognition","reasoning":"keyword match","confidence":0.85}"#;
        let step: ReasoningStep = serde_json::from_str(json).unwrap();
        assert_eq!(step.name, "Intent Recognition");
        assert_eq!(step.narrative, "keyword match");
        assert_eq!(step.confidence, Some(0.85));
    }

    #[test]
    fn test_draft_required_fields() {
        let full = ApiCallDraft {
            method: "POST".into(),
            endpoint: "/reservations".into(),
            body: serde_json::json!({}),
            purpose: "create".into(),
        };
        assert!(full.has_required_fields());

        let partial = ApiCallDraft {
            method: String::new(),
            ..full
        };
        assert!(!partial.has_required_fields());
    }
}
