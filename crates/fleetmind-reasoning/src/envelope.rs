//! Tolerant parsing of the model's reasoning envelope.
//!
//! The envelope shape is `{"chain_of_thought": [...], "summary": {...}}`.
//! Model output is schema-bearing but unreliable: it may arrive wrapped
//! in code fences, preceded by prose, or truncated mid-object. Output is
//! parsed into a tagged [`ModelOutput`] and the raw text is carried for
//! diagnostics.

use serde::{Deserialize, Serialize};

use fleetmind_core::reasoning::ReasoningStep;

/// The `summary` object of an envelope.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Summary {
    /// Classified intent label.
    #[serde(default)]
    pub intent: String,
    /// Overall confidence in `[0, 1]`.
    #[serde(default)]
    pub confidence: f32,
    /// Number of proposed API calls.
    #[serde(default)]
    pub api_calls_count: Option<u32>,
    /// Whether the model flagged the operation for approval.
    #[serde(default)]
    pub requires_approval: Option<bool>,
    /// Model-assessed risk level.
    #[serde(default)]
    pub risk_level: Option<String>,
}

/// A complete parsed reasoning envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Ordered reasoning steps.
    pub chain_of_thought: Vec<ReasoningStep>,
    /// Summary block.
    pub summary: Summary,
}

/// Parsed model output: either a recognized envelope or raw text.
#[derive(Debug, Clone)]
pub enum ModelOutput {
    /// A structurally valid envelope.
    Envelope(Envelope),
    /// Anything else, carried verbatim.
    Unknown(String),
}

/// Both keys must be present for a candidate object to be an envelope.
pub fn is_envelope_value(value: &serde_json::Value) -> bool {
    value.get("chain_of_thought").is_some() && value.get("summary").is_some()
}

/// Parse complete model output, tolerating code-fence decoration and
/// surrounding prose.
pub fn parse_model_output(raw: &str) -> ModelOutput {
    let trimmed = strip_code_fences(raw);

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if is_envelope_value(&value) {
            if let Ok(envelope) = serde_json::from_value::<Envelope>(value) {
                return ModelOutput::Envelope(envelope);
            }
        }
    }

    // The envelope may be embedded in trailing noise.
    for candidate in balanced_objects(trimmed) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate) {
            if is_envelope_value(&value) {
                if let Ok(envelope) = serde_json::from_value::<Envelope>(value) {
                    return ModelOutput::Envelope(envelope);
                }
            }
        }
    }

    ModelOutput::Unknown(raw.to_string())
}

/// Strip a surrounding markdown code fence, if present.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the fence line.
    let rest = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    rest.strip_suffix("```").map_or(rest, str::trim).trim()
}

/// Find every outermost balanced `{...}` substring.
///
/// Tracks string literals and escapes so braces inside JSON strings do
/// not confuse the depth count. Unterminated objects are ignored.
pub fn balanced_objects(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        objects.push(&text[start..=i]);
                    }
                }
            }
            _ => {}
        }
    }

    objects
}

/// Longest-valid-prefix recovery for truncated streams.
///
/// Scans from the end backwards for positions where the text ends with
/// `}` and tries to parse the prefix as an envelope. The first success
/// wins.
pub fn recover_envelope(text: &str) -> Option<Envelope> {
    let bytes = text.as_bytes();
    for end in (1..=bytes.len()).rev() {
        if bytes[end - 1] != b'}' {
            continue;
        }
        let Some(prefix) = text.get(..end) else {
            continue;
        };
        let candidate = prefix.trim_start();
        let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate) else {
            continue;
        };
        if !is_envelope_value(&value) {
            continue;
        }
        if let Ok(envelope) = serde_json::from_value::<Envelope>(value) {
            return Some(envelope);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENVELOPE: &str = r#"{"chain_of_thought":[{"step":"Input Analysis","reasoning":"short command"}],"summary":{"intent":"status_query","confidence":0.72}}"#;

    #[test]
    fn test_parse_plain_envelope() {
        match parse_model_output(ENVELOPE) {
            ModelOutput::Envelope(envelope) => {
                assert_eq!(envelope.summary.intent, "status_query");
                assert_eq!(envelope.chain_of_thought.len(), 1);
            }
            ModelOutput::Unknown(_) => panic!("expected envelope"),
        }
    }

    #[test]
    fn test_parse_fenced_envelope() {
        let fenced = format!("```json\n{ENVELOPE}\n```");
        assert!(matches!(
            parse_model_output(&fenced),
            ModelOutput::Envelope(_)
        ));
    }

    #[test]
    fn test_parse_envelope_with_trailing_noise() {
        let noisy = format!("Here is my analysis:\n{ENVELOPE}\nLet me know!");
        assert!(matches!(
            parse_model_output(&noisy),
            ModelOutput::Envelope(_)
        ));
    }

    #[test]
    fn test_parse_prose_is_unknown() {
        let output = parse_model_output("I could not analyze this request.");
        match output {
            ModelOutput::Unknown(raw) => assert!(raw.contains("could not")),
            ModelOutput::Envelope(_) => panic!("expected unknown"),
        }
    }

    #[test]
    fn test_object_without_both_keys_is_unknown() {
        assert!(matches!(
            parse_model_output(r#"{"chain_of_thought":[]}"#),
            ModelOutput::Unknown(_)
        ));
    }

    #[test]
    fn test_balanced_objects_skips_braces_in_strings() {
        let text = r#"{"a":"b{c}d"} trailing {"e":1}"#;
        let objects = balanced_objects(text);
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0], r#"{"a":"b{c}d"}"#);
        assert_eq!(objects[1], r#"{"e":1}"#);
    }

    #[test]
    fn test_balanced_objects_ignores_unterminated() {
        assert!(balanced_objects(r#"{"a": {"b": 1}"#).is_empty());
    }

    #[test]
    fn test_recover_envelope_with_trailing_garbage() {
        let truncated = format!("{ENVELOPE}{{\"partial\":");
        let envelope = recover_envelope(&truncated).expect("recovery should succeed");
        assert_eq!(envelope.summary.intent, "status_query");
    }

    #[test]
    fn test_recover_envelope_fails_on_prose() {
        assert!(recover_envelope("no json here").is_none());
    }
}
