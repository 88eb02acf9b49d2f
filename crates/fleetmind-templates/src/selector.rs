//! AI-driven template selection.
//!
//! The selector asks the reasoning engine (blocking mode, temperature
//! 0.3, 1000-token budget) which template fits an input, then defends
//! against the model's failure modes: fenced or noisy JSON, template
//! names that do not exist, and responses that do not parse at all.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use fleetmind_core::template::{ConfidenceBand, TemplateChoice, TemplateMetadata};
use fleetmind_reasoning::envelope::{balanced_objects, strip_code_fences};
use fleetmind_reasoning::{PromptBuilder, ReasoningEngine};

use crate::store::TemplateStore;

/// Selection temperature: lower than reasoning for determinism.
const SELECTION_TEMPERATURE: f32 = 0.3;
/// Selection token budget.
const SELECTION_MAX_TOKENS: u32 = 1000;
/// Selection history capacity.
const HISTORY_CAPACITY: usize = 1000;
/// Entries kept when history overflows.
const HISTORY_TRIM_TO: usize = 500;

/// One recorded selection.
#[derive(Debug, Clone)]
pub struct SelectionRecord {
    /// When the selection happened.
    pub timestamp: DateTime<Utc>,
    /// The user input.
    pub user_input: String,
    /// Chosen template name.
    pub selected_template: String,
    /// Selector confidence.
    pub confidence: f32,
    /// Selector reasoning.
    pub reasoning: String,
    /// Raw model response.
    pub raw_response: String,
}

/// Selection analytics snapshot.
#[derive(Debug, Clone, Default)]
pub struct SelectionAnalytics {
    /// Total recorded selections.
    pub total: usize,
    /// Mean confidence across selections.
    pub average_confidence: f32,
    /// The five most-selected templates with their counts.
    pub most_selected: Vec<(String, usize)>,
    /// Selections per confidence band.
    pub band_distribution: HashMap<ConfidenceBand, usize>,
}

#[derive(Debug, Deserialize)]
struct SelectionJson {
    #[serde(default)]
    selected_template: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    key_factors: Vec<String>,
    #[serde(default)]
    alternatives: Vec<String>,
    #[serde(default)]
    matched_examples: Vec<String>,
}

/// AI-powered template selector.
pub struct AiSelector {
    store: Arc<TemplateStore>,
    engine: Arc<ReasoningEngine>,
    prompts: PromptBuilder,
    examples: HashMap<String, Vec<String>>,
    history: Mutex<VecDeque<SelectionRecord>>,
}

impl AiSelector {
    /// Create a selector over a store and engine.
    pub fn new(
        store: Arc<TemplateStore>,
        engine: Arc<ReasoningEngine>,
        examples: HashMap<String, Vec<String>>,
    ) -> Self {
        Self {
            store,
            engine,
            prompts: PromptBuilder::new(),
            examples,
            history: Mutex::new(VecDeque::with_capacity(64)),
        }
    }

    /// Select the best template for the input.
    pub async fn select(&self, user_input: &str) -> TemplateChoice {
        let templates = self.store.all_metadata();
        if templates.is_empty() {
            return self.fallback_choice(&templates, "No templates available");
        }

        let prompt = self
            .prompts
            .template_selection_prompt(user_input, &templates, &self.examples);

        let response = match self
            .engine
            .complete_raw("", &prompt, SELECTION_TEMPERATURE, SELECTION_MAX_TOKENS)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(target: "fleetmind::templates", error = %e, "selection query failed");
                return self.fallback_choice(&templates, &format!("AI selection error: {e}"));
            }
        };

        let choice = self.parse_response(&response, &templates);
        self.record(user_input, &choice, &response);
        choice
    }

    /// Parse the model's selection JSON, tolerating fence decoration
    /// and surrounding noise.
    fn parse_response(&self, response: &str, templates: &[TemplateMetadata]) -> TemplateChoice {
        let cleaned = strip_code_fences(response);
        let candidate = balanced_objects(cleaned)
            .into_iter()
            .next()
            .unwrap_or(cleaned);

        let parsed: SelectionJson = match serde_json::from_str(candidate) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::error!(target: "fleetmind::templates", error = %e, "selection response did not parse");
                return self.fallback_choice(templates, &format!("Response parsing error: {e}"));
            }
        };

        let names: Vec<&str> = templates.iter().map(|t| t.name.as_str()).collect();
        let selected = if names.contains(&parsed.selected_template.as_str()) {
            parsed.selected_template.clone()
        } else {
            let closest = closest_template(&parsed.selected_template, &names);
            tracing::warn!(
                target: "fleetmind::templates",
                requested = %parsed.selected_template,
                using = %closest,
                "model selected a template not in the store, using closest match"
            );
            closest
        };

        let alternatives = parsed
            .alternatives
            .into_iter()
            .filter(|alt| names.contains(&alt.as_str()))
            .collect();

        let confidence = parsed.confidence.clamp(0.0, 1.0);
        TemplateChoice {
            template_name: selected,
            confidence,
            confidence_band: ConfidenceBand::from_confidence(confidence),
            reasoning: if parsed.reasoning.is_empty() {
                "No reasoning provided".to_string()
            } else {
                parsed.reasoning
            },
            alternatives,
            key_factors: parsed.key_factors,
            matched_examples: parsed.matched_examples,
        }
    }

    /// Deterministic fallback: the template with the highest
    /// `(usage_count, success_rate)` ordering, confidence 0.1.
    fn fallback_choice(&self, templates: &[TemplateMetadata], reason: &str) -> TemplateChoice {
        let template_name = templates
            .iter()
            .max_by(|a, b| {
                a.usage_count.cmp(&b.usage_count).then(
                    a.success_rate
                        .partial_cmp(&b.success_rate)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
            })
            .map(|t| t.name.clone())
            .unwrap_or_else(|| "create_reservation".to_string());

        TemplateChoice {
            template_name,
            confidence: 0.1,
            confidence_band: ConfidenceBand::VeryLow,
            reasoning: format!("Fallback selection due to: {reason}"),
            alternatives: Vec::new(),
            key_factors: vec!["fallback_selection".to_string()],
            matched_examples: Vec::new(),
        }
    }

    fn record(&self, user_input: &str, choice: &TemplateChoice, raw_response: &str) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        if history.len() >= HISTORY_CAPACITY {
            let excess = history.len() - HISTORY_TRIM_TO + 1;
            history.drain(..excess);
        }
        history.push_back(SelectionRecord {
            timestamp: Utc::now(),
            user_input: user_input.to_string(),
            selected_template: choice.template_name.clone(),
            confidence: choice.confidence,
            reasoning: choice.reasoning.clone(),
            raw_response: raw_response.to_string(),
        });
    }

    /// Analytics over the selection history.
    pub fn analytics(&self) -> SelectionAnalytics {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        if history.is_empty() {
            return SelectionAnalytics::default();
        }

        let total = history.len();
        let average_confidence =
            history.iter().map(|r| r.confidence).sum::<f32>() / total as f32;

        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut bands: HashMap<ConfidenceBand, usize> = HashMap::new();
        for record in history.iter() {
            *counts.entry(record.selected_template.as_str()).or_default() += 1;
            *bands
                .entry(ConfidenceBand::from_confidence(record.confidence))
                .or_default() += 1;
        }

        let mut most_selected: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(name, count)| (name.to_string(), count))
            .collect();
        most_selected.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        most_selected.truncate(5);

        SelectionAnalytics {
            total,
            average_confidence,
            most_selected,
            band_distribution: bands,
        }
    }
}

/// Closest template by Jaccard similarity over space-separated tokens
/// of the lowercased, underscore-stripped names.
fn closest_template(target: &str, names: &[&str]) -> String {
    if names.is_empty() {
        return "unknown".to_string();
    }

    let target_tokens = tokenize(target);
    let mut best = names[0];
    let mut best_score = 0.0f32;

    for name in names {
        let tokens = tokenize(name);
        let intersection = target_tokens.intersection(&tokens).count();
        let union = target_tokens.union(&tokens).count();
        let score = if union == 0 {
            0.0
        } else {
            intersection as f32 / union as f32
        };
        if score > best_score {
            best_score = score;
            best = name;
        }
    }

    best.to_string()
}

fn tokenize(name: &str) -> std::collections::HashSet<String> {
    name.to_lowercase()
        .replace('_', " ")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}
