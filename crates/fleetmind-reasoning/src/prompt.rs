//! Deterministic prompt construction and pure entity validators.
//!
//! Same inputs always produce the same prompt string; anything
//! time-dependent is passed in by the caller.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use fleetmind_core::interpretation::EntityKind;
use fleetmind_core::template::TemplateMetadata;

/// An intent category the classifier maps input onto.
#[derive(Debug, Clone)]
pub struct IntentCategory {
    /// Canonical intent label.
    pub name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// Keywords that signal the intent.
    pub keywords: &'static [&'static str],
    /// API endpoint patterns the intent usually maps to.
    pub api_patterns: &'static [&'static str],
    /// Minimum confidence for auto-acceptance.
    pub confidence_threshold: f32,
}

/// The fixed intent taxonomy.
pub const INTENT_CATEGORIES: &[IntentCategory] = &[
    IntentCategory {
        name: "resource_reservation",
        description: "Reserving or booking resources for specific times and purposes",
        keywords: &["reserve", "book", "schedule", "assign", "allocate", "need"],
        api_patterns: &["POST /reservations", "PUT /resources/{id}/reserve"],
        confidence_threshold: 0.8,
    },
    IntentCategory {
        name: "task_scheduling",
        description: "Scheduling tasks, appointments, or service requests",
        keywords: &["schedule", "appointment", "task", "service", "plan", "arrange"],
        api_patterns: &["POST /tasks", "PUT /schedule/{id}"],
        confidence_threshold: 0.8,
    },
    IntentCategory {
        name: "status_query",
        description: "Checking resource availability, location, or current status",
        keywords: &["status", "available", "location", "where", "check", "find"],
        api_patterns: &["GET /resources/{id}/status", "GET /resources/search"],
        confidence_threshold: 0.7,
    },
    IntentCategory {
        name: "inventory_management",
        description: "Managing inventory, assignments, and availability",
        keywords: &["inventory", "stock", "items", "manage", "track", "assign"],
        api_patterns: &["POST /inventory/assignments", "GET /inventory/availability"],
        confidence_threshold: 0.75,
    },
    IntentCategory {
        name: "reporting_analytics",
        description: "Generating reports, analytics, or data summaries",
        keywords: &["report", "analytics", "summary", "data", "statistics", "usage"],
        api_patterns: &["GET /reports/{type}", "POST /analytics/query"],
        confidence_threshold: 0.7,
    },
    IntentCategory {
        name: "user_management",
        description: "Managing user permissions, access, and assignments",
        keywords: &["user", "access", "permission", "assign", "authorize", "driver"],
        api_patterns: &["POST /users", "PUT /users/{id}/permissions"],
        confidence_threshold: 0.75,
    },
];

/// Builds the prompts that drive the reasoning pipeline.
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    /// Create a prompt builder.
    pub fn new() -> Self {
        Self
    }

    /// Fixed system prompt: taxonomy plus the strict JSON envelope.
    pub fn system_prompt(&self) -> String {
        let mut sections = Vec::new();

        sections.push(
            "You are FleetMind, an intelligent NLP to API conversion system for fleet \
             management operations. Your role is to analyze natural language input (emails, \
             commands, requests) and convert them into structured API calls with clear Chain \
             of Thought reasoning."
                .to_string(),
        );

        sections.push(
            "## Core Responsibilities:\n\
             1. **Intent Recognition**: Identify what the user wants to accomplish\n\
             2. **Entity Extraction**: Extract specific details like resource IDs, dates, times, locations\n\
             3. **API Mapping**: Convert intent and entities into appropriate API endpoint calls\n\
             4. **Chain of Thought**: Provide step-by-step reasoning for your decisions"
                .to_string(),
        );

        let mut taxonomy = String::from("## Available Intent Categories:\n");
        for category in INTENT_CATEGORIES {
            taxonomy.push_str(&format!("- **{}**: {}\n", category.name, category.description));
        }
        sections.push(taxonomy.trim_end().to_string());

        sections.push(
            r#"## Response Format:
Always respond in JSON format with the following structure:
```json
{
  "chain_of_thought": [
    {
      "step": "Input Analysis",
      "reasoning": "Detailed analysis of the input text",
      "findings": ["specific observations"]
    },
    {
      "step": "Intent Recognition",
      "reasoning": "How I identified the primary intent",
      "intent": "category_name",
      "confidence": 0.85
    },
    {
      "step": "Entity Extraction",
      "reasoning": "What entities I found and how",
      "entities": {
        "resource_ids": ["RES-1234"],
        "dates": ["2024-01-15"],
        "times": ["14:00-16:00"],
        "locations": ["Building A"],
        "users": ["john.doe@company.com"]
      }
    },
    {
      "step": "API Mapping",
      "reasoning": "How I mapped to API endpoints",
      "api_calls": [
        {
          "method": "POST",
          "endpoint": "/reservations",
          "body": {
            "resource_id": "RES-1234",
            "start_time": "2024-01-15T14:00:00Z",
            "end_time": "2024-01-15T16:00:00Z",
            "user": "john.doe@company.com"
          },
          "purpose": "Create resource reservation"
        }
      ]
    }
  ],
  "summary": {
    "intent": "resource_reservation",
    "confidence": 0.85,
    "api_calls_count": 1,
    "requires_approval": true,
    "risk_level": "low"
  }
}
```"#
                .to_string(),
        );

        sections.push(
            "## Processing Guidelines:\n\
             - Extract all resource IDs (patterns like: RES-1234, ITEM-001, etc.)\n\
             - Parse dates and times in ISO format when possible\n\
             - Identify email addresses and user references\n\
             - Calculate confidence scores based on keyword matches and context clarity\n\
             - Flag high-risk operations (deletions, bulk changes) for approval\n\
             - Provide clear reasoning for each step"
                .to_string(),
        );

        sections.push(
            "## Error Handling:\n\
             - If input is unclear, ask for clarification\n\
             - If multiple intents detected, prioritize and explain\n\
             - If missing critical information, specify what's needed\n\n\
             Be thorough, accurate, and always explain your reasoning process."
                .to_string(),
        );

        sections.join("\n\n")
    }

    /// Per-request prompt: timestamp, optional labeled context, the
    /// input, and the trailing instruction to analyze.
    pub fn user_prompt(
        &self,
        user_input: &str,
        context: Option<&BTreeMap<String, String>>,
        timestamp: DateTime<Utc>,
    ) -> String {
        let mut parts = Vec::new();

        parts.push(format!("Timestamp: {}", timestamp.to_rfc3339()));

        if let Some(context) = context {
            if !context.is_empty() {
                parts.push("\n## Context Information:".to_string());
                for (key, value) in context {
                    parts.push(format!("- {key}: {value}"));
                }
            }
        }

        parts.push(format!("\n## User Input:\n{user_input}"));
        parts.push("\n## Task:".to_string());
        parts.push(
            "Analyze the above input and provide a complete Chain of Thought analysis with API \
             mapping in the specified JSON format."
                .to_string(),
        );

        parts.join("\n")
    }

    /// Clarification prompt: the original input plus one bullet per
    /// missing entity kind, each with its canonical question.
    pub fn clarification_prompt(&self, original_input: &str, missing: &[EntityKind]) -> String {
        let mut parts = vec![
            "I need clarification to process your request accurately.".to_string(),
            format!("\nOriginal request: {original_input}"),
            "\nMissing information:".to_string(),
        ];

        for kind in missing {
            let bullet = match kind {
                EntityKind::ResourceId => {
                    "- Which specific resource? (e.g., RES-1234, ITEM-001)".to_string()
                }
                EntityKind::Date => {
                    "- What date? (e.g., today, tomorrow, 2024-01-15)".to_string()
                }
                EntityKind::Time => {
                    "- What time or time range? (e.g., 2-4pm, 14:00-16:00)".to_string()
                }
                EntityKind::Location => "- Which location or building?".to_string(),
                EntityKind::User => "- For which user or driver?".to_string(),
                other => format!("- {}", title_case(other.as_str())),
            };
            parts.push(bullet);
        }

        parts.push(
            "\nPlease provide the missing details so I can create the appropriate API calls."
                .to_string(),
        );

        parts.join("\n")
    }

    /// Template-selection prompt: the input, a fixed-format template
    /// list with up to three few-shot examples per category, and the
    /// strict JSON response instruction.
    pub fn template_selection_prompt(
        &self,
        user_input: &str,
        templates: &[TemplateMetadata],
        examples: &HashMap<String, Vec<String>>,
    ) -> String {
        let mut descriptions = String::new();
        for template in templates {
            let category_examples = examples
                .get(&template.category)
                .map(|list| {
                    list.iter()
                        .take(3)
                        .map(|example| format!("  - {example}"))
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .unwrap_or_default();

            let required: Vec<&str> = template.required_entities.iter().map(|e| e.as_str()).collect();
            let optional: Vec<&str> = template.optional_entities.iter().map(|e| e.as_str()).collect();

            descriptions.push_str(&format!(
                "\nTemplate: {}\nCategory: {}\nDescription: {}\nRequired Entities: {}\n\
                 Optional Entities: {}\nAPI Endpoint: {}\nUsage Count: {}\nSuccess Rate: {:.1}%\n\
                 Example Commands:\n{}\n---",
                template.name,
                template.category,
                template.description,
                required.join(", "),
                optional.join(", "),
                template.api_endpoint,
                template.usage_count,
                template.success_rate * 100.0,
                category_examples,
            ));
        }

        format!(
            r#"You are an AI template selector for an API request system. Your job is to analyze user input and select the most appropriate template.

USER INPUT: "{user_input}"

AVAILABLE TEMPLATES:
{descriptions}

INSTRUCTIONS:
1. Analyze the user input to understand their intent
2. Match the intent to the most appropriate template based on:
   - Description similarity
   - Required entities availability in the input
   - Example command similarity
   - Usage success rates
3. Provide a confidence score (0.0 to 1.0)
4. Explain your reasoning clearly
5. Suggest up to 2 alternative templates if confidence < 0.8

RESPONSE FORMAT (JSON):
{{
  "selected_template": "template_name",
  "confidence": 0.85,
  "reasoning": "Detailed explanation of why this template was chosen",
  "key_factors": ["factor1", "factor2", "factor3"],
  "alternatives": ["alt_template1", "alt_template2"],
  "matched_examples": ["example1", "example2"]
}}

Respond with valid JSON only. No additional text."#
        )
    }
}

fn title_case(label: &str) -> String {
    label
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// Entity validators.
//
// Pure regex/format checks used to annotate extracted entities without
// another model round trip.

static RESOURCE_ID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"^[A-Z]{2,4}-\d{3,4}$").unwrap(),
        Regex::new(r"^[A-Z]{3,4}\d{3}$").unwrap(),
        Regex::new(r"^[A-Z]\d{3,4}$").unwrap(),
        Regex::new(r"^\d{3,4}$").unwrap(),
    ]
});

static TIME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"^\d{1,2}:\d{2}$").unwrap(),
        Regex::new(r"^\d{1,2}:\d{2}:\d{2}$").unwrap(),
        Regex::new(r"^\d{1,2}(am|pm)$").unwrap(),
        Regex::new(r"^\d{1,2}:\d{2}(am|pm)$").unwrap(),
        Regex::new(r"^\d{1,2}-\d{1,2}(am|pm)$").unwrap(),
    ]
});

static VIN_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-HJ-NPR-Z0-9]{17}$").unwrap());

/// Check a resource ID against the accepted pattern set.
pub fn validate_resource_id(resource_id: &str) -> bool {
    let upper = resource_id.to_uppercase();
    RESOURCE_ID_PATTERNS.iter().any(|p| p.is_match(&upper))
}

/// Check a date string against the accepted formats.
pub fn validate_date(date: &str) -> bool {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d.%m.%Y"];
    const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%SZ"];

    DATE_FORMATS
        .iter()
        .any(|fmt| NaiveDate::parse_from_str(date, fmt).is_ok())
        || DATETIME_FORMATS
            .iter()
            .any(|fmt| NaiveDateTime::parse_from_str(date, fmt).is_ok())
}

/// Check a time string against the accepted formats.
pub fn validate_time(time: &str) -> bool {
    let lower = time.to_lowercase();
    TIME_PATTERNS.iter().any(|p| p.is_match(&lower))
}

/// VIN structure check: 17 characters, no `I`, `O`, or `Q`.
pub fn validate_vin(vin: &str) -> bool {
    VIN_PATTERN.is_match(&vin.to_uppercase())
}

/// VIN check digit per the ISO 3779 schedule.
///
/// Position 9 (index 8) must equal the weighted transliteration sum
/// modulo 11, with remainder 10 written as `X`.
pub fn validate_vin_check_digit(vin: &str) -> bool {
    const WEIGHTS: [u32; 17] = [8, 7, 6, 5, 4, 3, 2, 10, 0, 9, 8, 7, 6, 5, 4, 3, 2];

    let vin = vin.to_uppercase();
    if !validate_vin(&vin) {
        return false;
    }

    let mut sum = 0u32;
    for (i, c) in vin.chars().enumerate() {
        let Some(value) = transliterate_vin_char(c) else {
            return false;
        };
        sum += value * WEIGHTS[i];
    }

    let expected = match sum % 11 {
        10 => 'X',
        digit => char::from_digit(digit, 10).unwrap_or('0'),
    };
    vin.chars().nth(8) == Some(expected)
}

/// ISO 3779 transliteration schedule.
fn transliterate_vin_char(c: char) -> Option<u32> {
    match c {
        '0'..='9' => c.to_digit(10),
        'A' | 'J' => Some(1),
        'B' | 'K' | 'S' => Some(2),
        'C' | 'L' | 'T' => Some(3),
        'D' | 'M' | 'U' => Some(4),
        'E' | 'N' | 'V' => Some(5),
        'F' | 'W' => Some(6),
        'G' | 'P' | 'X' => Some(7),
        'H' | 'Y' => Some(8),
        'R' | 'Z' => Some(9),
        _ => None,
    }
}

/// Result of validating one batch of extracted entities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityValidation {
    /// Entities that passed.
    pub valid: Vec<String>,
    /// Entities that failed hard.
    pub errors: Vec<String>,
    /// Entities that are ambiguous but usable.
    pub warnings: Vec<String>,
}

impl EntityValidation {
    /// Whether no hard errors were found.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate entity groups as emitted by the extraction step.
pub fn validate_entities(entities: &HashMap<String, Vec<String>>) -> EntityValidation {
    let mut result = EntityValidation::default();

    for (group, values) in entities {
        match EntityKind::from_envelope_key(group) {
            Some(EntityKind::ResourceId) => {
                for value in values {
                    if validate_resource_id(value) {
                        result.valid.push(format!("Resource ID: {value}"));
                    } else {
                        result.errors.push(format!("Invalid resource ID format: {value}"));
                    }
                }
            }
            Some(EntityKind::Date) => {
                for value in values {
                    if validate_date(value) {
                        result.valid.push(format!("Date: {value}"));
                    } else {
                        result.errors.push(format!("Invalid date format: {value}"));
                    }
                }
            }
            Some(EntityKind::Time) => {
                for value in values {
                    if validate_time(value) {
                        result.valid.push(format!("Time: {value}"));
                    } else {
                        result
                            .warnings
                            .push(format!("Time format may be ambiguous: {value}"));
                    }
                }
            }
            _ => {
                // Other groups carry free-form values; nothing to check.
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_is_deterministic() {
        let builder = PromptBuilder::new();
        assert_eq!(builder.system_prompt(), builder.system_prompt());
        assert!(builder.system_prompt().contains("resource_reservation"));
        assert!(builder.system_prompt().contains("chain_of_thought"));
    }

    #[test]
    fn test_user_prompt_contains_all_sections() {
        let builder = PromptBuilder::new();
        let timestamp = DateTime::parse_from_rfc3339("2024-05-03T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut context = BTreeMap::new();
        context.insert("sender".to_string(), "alice@example.com".to_string());

        let prompt = builder.user_prompt("Reserve RES-1234 tomorrow", Some(&context), timestamp);
        assert!(prompt.starts_with("Timestamp: 2024-05-03T12:00:00+00:00"));
        assert!(prompt.contains("- sender: alice@example.com"));
        assert!(prompt.contains("Reserve RES-1234 tomorrow"));
        assert!(prompt.ends_with("in the specified JSON format."));
    }

    #[test]
    fn test_clarification_prompt_bullets() {
        let builder = PromptBuilder::new();
        let prompt = builder.clarification_prompt(
            "Fix that one soon.",
            &[EntityKind::ResourceId, EntityKind::Date, EntityKind::Time],
        );
        assert!(prompt.contains("Original request: Fix that one soon."));
        assert!(prompt.contains("Which specific resource?"));
        assert!(prompt.contains("What date?"));
        assert!(prompt.contains("What time or time range?"));
    }

    #[test]
    fn test_resource_id_patterns() {
        for valid in ["RES-1234", "ITEM-001", "PROD123", "R1234", "1234"] {
            assert!(validate_resource_id(valid), "{valid} should validate");
        }
        for invalid in ["res 1234", "TOOLONGPREFIX-1", "12", "A-1"] {
            assert!(!validate_resource_id(invalid), "{invalid} should fail");
        }
    }

    #[test]
    fn test_date_formats() {
        assert!(validate_date("2024-01-15"));
        assert!(validate_date("01/15/2024"));
        assert!(validate_date("2024-01-15T14:00:00Z"));
        assert!(!validate_date("tomorrow"));
        assert!(!validate_date("2024-13-40"));
    }

    #[test]
    fn test_time_formats() {
        for valid in ["14:30", "14:30:00", "2pm", "2:30pm", "2-4pm"] {
            assert!(validate_time(valid), "{valid} should validate");
        }
        assert!(!validate_time("half past two"));
    }

    #[test]
    fn test_vin_structure() {
        assert!(validate_vin("1HGBH41JXMN109186"));
        // I, O, Q are excluded from the alphabet.
        assert!(!validate_vin("1HGBH41JXMN10918I"));
        assert!(!validate_vin("SHORT"));
    }

    #[test]
    fn test_vin_check_digit() {
        // Well-known valid check digit example.
        assert!(validate_vin_check_digit("1M8GDM9AXKP042788"));
        assert!(validate_vin_check_digit("1HGBH41JXMN109186"));
        // Same VIN with a corrupted serial fails.
        assert!(!validate_vin_check_digit("1M8GDM9AXKP042789"));
    }

    #[test]
    fn test_validate_entities_mixed() {
        let mut entities = HashMap::new();
        entities.insert("resource_ids".to_string(), vec!["RES-1234".to_string(), "!!".to_string()]);
        entities.insert("times".to_string(), vec!["garbled".to_string()]);

        let result = validate_entities(&entities);
        assert_eq!(result.valid.len(), 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.warnings.len(), 1);
        assert!(!result.is_clean());
    }
}
