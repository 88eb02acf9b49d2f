//! Few-shot example loading for the selection prompt.
//!
//! Examples live in a plain text document grouped by category:
//!
//! ```text
//! ## RESERVATION_BOOKING Examples
//! Input: "Reserve vehicle RES-1234 for tomorrow"
//! Input: "Book the van for the 2pm site visit"
//! ```

use std::collections::HashMap;
use std::path::Path;

use fleetmind_core::CoreError;

/// Parse example text into a category → examples map.
///
/// Category headers are `##` lines containing `Examples`; the category
/// name is what remains, lowercased. Example lines start with `Input:`
/// and surrounding quotes are stripped.
pub fn parse_examples(content: &str) -> HashMap<String, Vec<String>> {
    let mut examples: HashMap<String, Vec<String>> = HashMap::new();
    let mut current_category: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();

        if line.starts_with("##") && line.contains("Examples") {
            let category = line
                .trim_start_matches('#')
                .replace("Examples", "")
                .trim()
                .to_lowercase();
            current_category = Some(category);
            continue;
        }

        if let Some(example) = line.strip_prefix("Input:") {
            let example = example.trim().trim_matches('"');
            if example.is_empty() {
                continue;
            }
            if let Some(category) = &current_category {
                examples
                    .entry(category.clone())
                    .or_default()
                    .push(example.to_string());
            }
        }
    }

    examples
}

/// Load examples from a file.
pub fn load_examples(path: &Path) -> Result<HashMap<String, Vec<String>>, CoreError> {
    let content = std::fs::read_to_string(path)?;
    let examples = parse_examples(&content);
    tracing::info!(
        target: "fleetmind::templates",
        categories = examples.len(),
        "loaded few-shot examples"
    );
    Ok(examples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_categories_and_inputs() {
        let content = r#"
## RESERVATION_BOOKING Examples
Input: "Reserve vehicle RES-1234 for tomorrow"
Input: "Book the van for the 2pm site visit"

## STATUS_CHECK Examples
Input: "Where is VAN-002 right now?"
"#;
        let examples = parse_examples(content);
        assert_eq!(examples.len(), 2);
        assert_eq!(examples["reservation_booking"].len(), 2);
        assert_eq!(
            examples["status_check"][0],
            "Where is VAN-002 right now?"
        );
    }

    #[test]
    fn test_inputs_before_any_header_are_dropped() {
        let examples = parse_examples("Input: \"orphan line\"\n");
        assert!(examples.is_empty());
    }

    #[test]
    fn test_empty_content() {
        assert!(parse_examples("").is_empty());
    }
}
