//! Request template metadata and AI selection results.

use serde::{Deserialize, Serialize};

use crate::interpretation::EntityKind;

/// Coarse bucketing of a scalar confidence in `[0, 1]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ConfidenceBand {
    /// Band boundaries: [0,0.4) very_low, [0.4,0.6) low, [0.6,0.8) medium,
    /// [0.8,0.9) high, [0.9,1.0] very_high.
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence >= 0.9 {
            ConfidenceBand::VeryHigh
        } else if confidence >= 0.8 {
            ConfidenceBand::High
        } else if confidence >= 0.6 {
            ConfidenceBand::Medium
        } else if confidence >= 0.4 {
            ConfidenceBand::Low
        } else {
            ConfidenceBand::VeryLow
        }
    }

    /// Band label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceBand::VeryLow => "very_low",
            ConfidenceBand::Low => "low",
            ConfidenceBand::Medium => "medium",
            ConfidenceBand::High => "high",
            ConfidenceBand::VeryHigh => "very_high",
        }
    }
}

impl std::fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metadata describing one request template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateMetadata {
    /// Unique template name.
    pub name: String,
    /// Category used to group few-shot examples.
    pub category: String,
    /// Human-readable description.
    pub description: String,
    /// Entity kinds the template cannot be filled without.
    #[serde(default)]
    pub required_entities: Vec<EntityKind>,
    /// Entity kinds the template uses when present.
    #[serde(default)]
    pub optional_entities: Vec<EntityKind>,
    /// Endpoint path the filled request targets.
    pub api_endpoint: String,
    /// HTTP method for the filled request.
    pub http_method: String,
    /// How often this template has been selected.
    #[serde(default)]
    pub usage_count: u64,
    /// Fraction of uses that executed successfully, in `[0, 1]`.
    #[serde(default)]
    pub success_rate: f32,
}

/// The AI selector's choice of template, with its reasoning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateChoice {
    /// Name of the chosen template.
    pub template_name: String,
    /// Selector confidence in `[0, 1]`.
    pub confidence: f32,
    /// Band containing `confidence`.
    pub confidence_band: ConfidenceBand,
    /// The selector's explanation.
    pub reasoning: String,
    /// Up to two alternative template names.
    #[serde(default)]
    pub alternatives: Vec<String>,
    /// Factors the selector weighed.
    #[serde(default)]
    pub key_factors: Vec<String>,
    /// Few-shot examples the selector matched against.
    #[serde(default)]
    pub matched_examples: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_boundaries() {
        assert_eq!(ConfidenceBand::from_confidence(0.0), ConfidenceBand::VeryLow);
        assert_eq!(ConfidenceBand::from_confidence(0.39), ConfidenceBand::VeryLow);
        assert_eq!(ConfidenceBand::from_confidence(0.4), ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::from_confidence(0.6), ConfidenceBand::Medium);
        // Exactly 0.8 lands in high, exactly 0.9 in very_high.
        assert_eq!(ConfidenceBand::from_confidence(0.8), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_confidence(0.9), ConfidenceBand::VeryHigh);
        assert_eq!(ConfidenceBand::from_confidence(1.0), ConfidenceBand::VeryHigh);
    }
}
