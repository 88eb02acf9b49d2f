//! Validation findings produced by field rules and entity checks.

use serde::{Deserialize, Serialize};

/// Severity of a validation finding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Blocks approval until fixed.
    Error,
    /// Worth surfacing, does not block.
    Warning,
    /// Informational only.
    Info,
}

/// A single per-field validation finding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationFinding {
    /// Field the finding applies to.
    pub field: String,
    /// Finding severity.
    pub severity: Severity,
    /// Human-readable description of the problem.
    pub message: String,
    /// Optional suggested fix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationFinding {
    /// Create an error-severity finding.
    pub fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            severity: Severity::Error,
            message: message.into(),
            suggestion: None,
        }
    }

    /// Create a warning-severity finding.
    pub fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            severity: Severity::Warning,
            message: message.into(),
            suggestion: None,
        }
    }

    /// Create an info-severity finding.
    pub fn info(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            severity: Severity::Info,
            message: message.into(),
            suggestion: None,
        }
    }

    /// Attach a suggested fix.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Whether this finding blocks approval.
    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking() {
        assert!(ValidationFinding::error("vehicle_id", "bad format").is_blocking());
        assert!(!ValidationFinding::warning("time", "ambiguous").is_blocking());
        assert!(!ValidationFinding::info("note", "filled from context").is_blocking());
    }
}
