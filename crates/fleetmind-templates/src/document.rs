//! Template document format.
//!
//! Each template is a structured document, YAML or JSON, with two
//! top-level keys:
//!
//! ```yaml
//! template_metadata:
//!   name: create_reservation
//!   category: reservation_booking
//!   description: Create a resource reservation
//!   required_entities: [resource_id, date, time]
//!   optional_entities: [user]
//!   api_endpoint: /reservations
//!   http_method: POST
//! body:
//!   resource_id: "{{resource_id}}"
//!   start_time: "{{time}}"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use fleetmind_core::template::TemplateMetadata;
use fleetmind_core::CoreError;

/// One template document: metadata plus a slotted body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDocument {
    /// Template metadata.
    pub template_metadata: TemplateMetadata,
    /// Request body skeleton with `{{entity_kind}}` slot markers.
    pub body: serde_json::Value,
}

impl TemplateDocument {
    /// Parse a document, accepting JSON first and YAML as fallback.
    pub fn parse(text: &str) -> Result<Self, CoreError> {
        if let Ok(document) = serde_json::from_str::<TemplateDocument>(text) {
            return Ok(document);
        }
        serde_yaml::from_str::<TemplateDocument>(text)
            .map_err(|e| CoreError::internal(format!("template document did not parse: {e}")))
    }

    /// Load a document from a file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text).map_err(|e| {
            CoreError::internal(format!("{}: {e}", path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_document() {
        let text = r#"{
            "template_metadata": {
                "name": "create_reservation",
                "category": "reservation_booking",
                "description": "Create a resource reservation",
                "required_entities": ["resource_id", "date"],
                "optional_entities": ["user"],
                "api_endpoint": "/reservations",
                "http_method": "POST"
            },
            "body": {"resource_id": "{{resource_id}}"}
        }"#;
        let document = TemplateDocument::parse(text).unwrap();
        assert_eq!(document.template_metadata.name, "create_reservation");
        assert_eq!(document.template_metadata.http_method, "POST");
    }

    #[test]
    fn test_parse_yaml_document() {
        let text = r#"
template_metadata:
  name: query_status
  category: status_check
  description: Query resource status
  required_entities: [resource_id]
  optional_entities: []
  api_endpoint: /resources/{id}/status
  http_method: GET
body:
  resource_id: "{{resource_id}}"
"#;
        let document = TemplateDocument::parse(text).unwrap();
        assert_eq!(document.template_metadata.name, "query_status");
        assert_eq!(document.template_metadata.required_entities.len(), 1);
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(TemplateDocument::parse(": not a document :").is_err());
    }
}
