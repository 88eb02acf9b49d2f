//! Field-level validation rules for filled requests.
//!
//! The validator is a registry mapping field names to rules. A slot the
//! template declared but no entity filled arrives as `null` and is
//! flagged as an error here, never by the template store.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

use fleetmind_core::{Severity, ValidationFinding};

static RESOURCE_ID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"^[A-Z]{2,4}-\d{3,4}$").unwrap(),
        Regex::new(r"^[A-Z]{3,4}\d{3}$").unwrap(),
        Regex::new(r"^[A-Z]\d{3,4}$").unwrap(),
        Regex::new(r"^\d{3,4}$").unwrap(),
    ]
});

/// Expected value type for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Any string.
    String,
    /// Integer or float.
    Number,
    /// Boolean.
    Boolean,
    /// ISO-8601 date (`%Y-%m-%d`).
    Date,
    /// ISO-8601 date-time.
    DateTime,
    /// A resource identifier matching the fixed pattern set.
    ResourceId,
}

/// Validation rule for one field.
#[derive(Debug, Clone)]
pub struct FieldRule {
    /// Whether the field must be present.
    pub required: bool,
    /// Expected type.
    pub field_type: FieldType,
    /// Optional pattern the string value must match.
    pub pattern: Option<&'static str>,
    /// Optional closed set of accepted values.
    pub enumeration: Option<Vec<&'static str>>,
    /// Optional numeric lower bound, inclusive.
    pub min: Option<f64>,
    /// Optional numeric upper bound, inclusive.
    pub max: Option<f64>,
}

impl FieldRule {
    fn of_type(field_type: FieldType) -> Self {
        Self {
            required: false,
            field_type,
            pattern: None,
            enumeration: None,
            min: None,
            max: None,
        }
    }

    fn with_enum(values: Vec<&'static str>) -> Self {
        Self {
            enumeration: Some(values),
            ..Self::of_type(FieldType::String)
        }
    }

    fn with_range(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            ..Self::of_type(FieldType::Number)
        }
    }
}

/// Registry of field rules plus cross-field checks.
pub struct FieldValidator {
    rules: HashMap<String, FieldRule>,
}

impl FieldValidator {
    /// The standard fleet-request rule set.
    pub fn new() -> Self {
        let mut rules = HashMap::new();

        rules.insert("resource_id".to_string(), FieldRule::of_type(FieldType::ResourceId));
        rules.insert("vehicle_id".to_string(), FieldRule::of_type(FieldType::ResourceId));
        rules.insert("date".to_string(), FieldRule::of_type(FieldType::Date));
        rules.insert("start_time".to_string(), FieldRule::of_type(FieldType::DateTime));
        rules.insert("end_time".to_string(), FieldRule::of_type(FieldType::DateTime));
        rules.insert("scheduled_at".to_string(), FieldRule::of_type(FieldType::DateTime));
        rules.insert(
            "priority".to_string(),
            FieldRule::with_enum(vec!["low", "normal", "high", "urgent"]),
        );
        rules.insert(
            "status".to_string(),
            FieldRule::with_enum(vec!["active", "inactive", "maintenance", "retired"]),
        );
        rules.insert(
            "maintenance_type".to_string(),
            FieldRule::with_enum(vec!["preventive", "corrective", "inspection", "recall"]),
        );
        rules.insert("year".to_string(), FieldRule::with_range(2000.0, 2025.0));
        rules.insert(
            "passenger_count".to_string(),
            FieldRule::with_range(1.0, 8.0),
        );

        Self { rules }
    }

    /// Add or replace a rule.
    pub fn set_rule(&mut self, field: impl Into<String>, rule: FieldRule) {
        self.rules.insert(field.into(), rule);
    }

    /// Validate a filled request object.
    pub fn validate(&self, request: &serde_json::Value) -> Vec<ValidationFinding> {
        let mut findings = Vec::new();

        let Some(object) = request.as_object() else {
            findings.push(ValidationFinding::error("request", "request is not an object"));
            return findings;
        };

        for (field, rule) in &self.rules {
            match object.get(field) {
                None => {
                    if rule.required {
                        findings.push(ValidationFinding::error(
                            field,
                            "required field is missing",
                        ));
                    }
                }
                Some(serde_json::Value::Null) => {
                    // A declared slot nothing filled.
                    findings.push(
                        ValidationFinding::error(field, "no value extracted for this field")
                            .with_suggestion("provide the missing detail and regenerate"),
                    );
                }
                Some(value) => {
                    self.check_value(field, rule, value, &mut findings);
                }
            }
        }

        self.check_cross_field(object, &mut findings);
        findings
    }

    fn check_value(
        &self,
        field: &str,
        rule: &FieldRule,
        value: &serde_json::Value,
        findings: &mut Vec<ValidationFinding>,
    ) {
        match rule.field_type {
            FieldType::String => {
                let Some(text) = value.as_str() else {
                    findings.push(ValidationFinding::error(field, "expected a string"));
                    return;
                };
                if let Some(pattern) = rule.pattern {
                    match Regex::new(pattern) {
                        Ok(regex) if !regex.is_match(text) => {
                            findings.push(ValidationFinding::error(
                                field,
                                format!("value does not match expected format: {text}"),
                            ));
                        }
                        Ok(_) => {}
                        Err(_) => {
                            findings.push(ValidationFinding::warning(
                                field,
                                "rule pattern did not compile, skipping check",
                            ));
                        }
                    }
                }
                if let Some(enumeration) = &rule.enumeration {
                    if !enumeration.contains(&text.to_lowercase().as_str()) {
                        findings.push(
                            ValidationFinding::error(
                                field,
                                format!("value must be one of: {}", enumeration.join(", ")),
                            )
                            .with_suggestion(format!("got {text:?}")),
                        );
                    }
                }
            }
            FieldType::Number => {
                let Some(number) = value.as_f64() else {
                    findings.push(ValidationFinding::error(field, "expected a number"));
                    return;
                };
                if let Some(min) = rule.min {
                    if number < min {
                        findings.push(ValidationFinding::error(
                            field,
                            format!("value {number} below minimum {min}"),
                        ));
                    }
                }
                if let Some(max) = rule.max {
                    if number > max {
                        findings.push(ValidationFinding::error(
                            field,
                            format!("value {number} above maximum {max}"),
                        ));
                    }
                }
            }
            FieldType::Boolean => {
                if !value.is_boolean() {
                    findings.push(ValidationFinding::error(field, "expected a boolean"));
                }
            }
            FieldType::Date => {
                let Some(text) = value.as_str() else {
                    findings.push(ValidationFinding::error(field, "expected a date string"));
                    return;
                };
                if NaiveDate::parse_from_str(text, "%Y-%m-%d").is_err() {
                    findings.push(
                        ValidationFinding::error(
                            field,
                            format!("not an ISO-8601 date: {text}"),
                        )
                        .with_suggestion("use YYYY-MM-DD"),
                    );
                }
            }
            FieldType::DateTime => {
                let Some(text) = value.as_str() else {
                    findings.push(ValidationFinding::error(field, "expected a date-time string"));
                    return;
                };
                if parse_datetime(text).is_none() {
                    findings.push(
                        ValidationFinding::error(
                            field,
                            format!("not an ISO-8601 date-time: {text}"),
                        )
                        .with_suggestion("use YYYY-MM-DDTHH:MM:SS"),
                    );
                }
            }
            FieldType::ResourceId => {
                let Some(text) = value.as_str() else {
                    findings.push(ValidationFinding::error(field, "expected a resource id"));
                    return;
                };
                let upper = text.to_uppercase();
                if !RESOURCE_ID_PATTERNS.iter().any(|p| p.is_match(&upper)) {
                    findings.push(
                        ValidationFinding::error(
                            field,
                            format!("invalid resource id format: {text}"),
                        )
                        .with_suggestion("expected formats like RES-1234, PROD123, R1234 or 1234"),
                    );
                }
            }
        }
    }

    /// Cross-field checks: a reservation window must end after it starts.
    fn check_cross_field(
        &self,
        object: &serde_json::Map<String, serde_json::Value>,
        findings: &mut Vec<ValidationFinding>,
    ) {
        let start = object
            .get("start_time")
            .and_then(|v| v.as_str())
            .and_then(parse_datetime);
        let end = object
            .get("end_time")
            .and_then(|v| v.as_str())
            .and_then(parse_datetime);

        if let (Some(start), Some(end)) = (start, end) {
            if end <= start {
                findings.push(
                    ValidationFinding::error("end_time", "end before start")
                        .with_suggestion("the reservation must end after it starts"),
                );
            }
        }
    }

    /// Whether a finding list has no blocking errors.
    pub fn is_approvable(findings: &[ValidationFinding]) -> bool {
        !findings.iter().any(|f| f.severity == Severity::Error)
    }
}

impl Default for FieldValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    const FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%SZ", "%Y-%m-%d %H:%M:%S"];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_reservation_passes() {
        let validator = FieldValidator::new();
        let findings = validator.validate(&serde_json::json!({
            "resource_id": "RES-1234",
            "start_time": "2024-05-03T14:00:00",
            "end_time": "2024-05-03T16:00:00",
            "priority": "normal",
        }));
        assert!(FieldValidator::is_approvable(&findings), "{findings:?}");
    }

    #[test]
    fn test_end_before_start_is_error() {
        let validator = FieldValidator::new();
        let findings = validator.validate(&serde_json::json!({
            "resource_id": "RES-1234",
            "start_time": "2024-05-03T14:00:00",
            "end_time": "2024-05-03T10:00:00",
        }));
        let finding = findings
            .iter()
            .find(|f| f.field == "end_time")
            .expect("end_time finding");
        assert_eq!(finding.severity, Severity::Error);
        assert_eq!(finding.message, "end before start");
    }

    #[test]
    fn test_null_slot_is_error() {
        let validator = FieldValidator::new();
        let findings = validator.validate(&serde_json::json!({
            "resource_id": serde_json::Value::Null,
        }));
        assert!(!FieldValidator::is_approvable(&findings));
    }

    #[test]
    fn test_bad_resource_id_format() {
        let validator = FieldValidator::new();
        let findings = validator.validate(&serde_json::json!({"resource_id": "not an id"}));
        assert!(findings.iter().any(|f| f.field == "resource_id"));
    }

    #[test]
    fn test_enumerations() {
        let validator = FieldValidator::new();
        let ok = validator.validate(&serde_json::json!({"priority": "high"}));
        assert!(FieldValidator::is_approvable(&ok));

        let bad = validator.validate(&serde_json::json!({"priority": "whenever"}));
        assert!(!FieldValidator::is_approvable(&bad));
    }

    #[test]
    fn test_numeric_ranges() {
        let validator = FieldValidator::new();
        assert!(FieldValidator::is_approvable(
            &validator.validate(&serde_json::json!({"year": 2024, "passenger_count": 4}))
        ));
        assert!(!FieldValidator::is_approvable(
            &validator.validate(&serde_json::json!({"year": 1999}))
        ));
        assert!(!FieldValidator::is_approvable(
            &validator.validate(&serde_json::json!({"passenger_count": 9}))
        ));
    }

    #[test]
    fn test_date_formats() {
        let validator = FieldValidator::new();
        assert!(FieldValidator::is_approvable(
            &validator.validate(&serde_json::json!({"date": "2024-05-03"}))
        ));
        assert!(!FieldValidator::is_approvable(
            &validator.validate(&serde_json::json!({"date": "05/03/2024"}))
        ));
    }

    #[test]
    fn test_non_object_request() {
        let validator = FieldValidator::new();
        let findings = validator.validate(&serde_json::json!([1, 2, 3]));
        assert!(!FieldValidator::is_approvable(&findings));
    }
}
