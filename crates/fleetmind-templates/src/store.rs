//! Template store: lookup, slot filling, usage accounting.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use fleetmind_core::interpretation::EntityKind;
use fleetmind_core::template::TemplateMetadata;
use fleetmind_core::CoreError;

use crate::document::TemplateDocument;

struct StoredTemplate {
    metadata: TemplateMetadata,
    body: serde_json::Value,
    usage_count: AtomicU64,
    success_count: AtomicU64,
}

impl StoredTemplate {
    fn new(document: TemplateDocument) -> Self {
        let usage = document.template_metadata.usage_count;
        let successes =
            (document.template_metadata.success_rate * usage as f32).round() as u64;
        Self {
            metadata: document.template_metadata,
            body: document.body,
            usage_count: AtomicU64::new(usage),
            success_count: AtomicU64::new(successes.min(usage)),
        }
    }

    /// Metadata with live counters folded in.
    fn snapshot(&self) -> TemplateMetadata {
        let usage = self.usage_count.load(Ordering::Relaxed);
        let successes = self.success_count.load(Ordering::Relaxed);
        let mut metadata = self.metadata.clone();
        metadata.usage_count = usage;
        metadata.success_rate = if usage > 0 {
            successes as f32 / usage as f32
        } else {
            self.metadata.success_rate
        };
        metadata
    }
}

/// The template library.
///
/// Metadata is read-mostly; counter updates go through atomics so
/// readers never block on writers.
pub struct TemplateStore {
    templates: RwLock<BTreeMap<String, StoredTemplate>>,
}

impl TemplateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            templates: RwLock::new(BTreeMap::new()),
        }
    }

    /// Build a store from parsed documents.
    pub fn from_documents(documents: Vec<TemplateDocument>) -> Self {
        let store = Self::new();
        for document in documents {
            store.insert(document);
        }
        store
    }

    /// Load every `.yaml`/`.yml`/`.json` document in a directory.
    pub fn load_dir(dir: &Path) -> Result<Self, CoreError> {
        let store = Self::new();
        let mut loaded = 0usize;

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if !matches!(extension, "yaml" | "yml" | "json") {
                continue;
            }
            match TemplateDocument::load(&path) {
                Ok(document) => {
                    store.insert(document);
                    loaded += 1;
                }
                Err(e) => {
                    tracing::warn!(target: "fleetmind::templates", path = %path.display(), error = %e, "skipping unparsable template");
                }
            }
        }

        tracing::info!(target: "fleetmind::templates", loaded, "loaded template library");
        Ok(store)
    }

    /// Add one document to the store.
    pub fn insert(&self, document: TemplateDocument) {
        let name = document.template_metadata.name.clone();
        self.templates
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, StoredTemplate::new(document));
    }

    /// Number of templates.
    pub fn len(&self) -> usize {
        self.templates
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Metadata for one template.
    pub fn metadata(&self, name: &str) -> Option<TemplateMetadata> {
        self.templates
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .map(StoredTemplate::snapshot)
    }

    /// Metadata for every template, in stable name order.
    pub fn all_metadata(&self) -> Vec<TemplateMetadata> {
        self.templates
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(StoredTemplate::snapshot)
            .collect()
    }

    /// Record one use of a template.
    pub fn record_usage(&self, name: &str, success: bool) {
        let templates = self.templates.read().unwrap_or_else(|e| e.into_inner());
        if let Some(template) = templates.get(name) {
            template.usage_count.fetch_add(1, Ordering::Relaxed);
            if success {
                template.success_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Fill a template's slots from extracted entities.
    ///
    /// Each `{{entity_kind}}` marker is replaced with the first value of
    /// the corresponding entity group. Missing groups leave `null` so
    /// the field validator flags required gaps; the store itself never
    /// rejects. A `_meta` subobject records provenance.
    pub fn fill(
        &self,
        name: &str,
        entities: &HashMap<EntityKind, Vec<String>>,
        original_text: &str,
    ) -> Result<serde_json::Value, CoreError> {
        let body = {
            let templates = self.templates.read().unwrap_or_else(|e| e.into_inner());
            let template = templates
                .get(name)
                .ok_or_else(|| CoreError::TemplateNotFound(name.to_string()))?;
            template.body.clone()
        };

        let mut filled = fill_value(body, entities);
        if let serde_json::Value::Object(map) = &mut filled {
            map.insert(
                "_meta".to_string(),
                serde_json::json!({
                    "source": "user_input",
                    "original_text": original_text,
                }),
            );
        }
        Ok(filled)
    }
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn fill_value(
    value: serde_json::Value,
    entities: &HashMap<EntityKind, Vec<String>>,
) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .map(|(key, child)| (key, fill_value(child, entities)))
                .collect(),
        ),
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items
                .into_iter()
                .map(|child| fill_value(child, entities))
                .collect(),
        ),
        serde_json::Value::String(text) => fill_string(text, entities),
        other => other,
    }
}

/// Replace slot markers in one string leaf.
///
/// A leaf that is exactly one marker becomes the entity value or null;
/// markers embedded in longer strings are interpolated.
fn fill_string(
    text: String,
    entities: &HashMap<EntityKind, Vec<String>>,
) -> serde_json::Value {
    if let Some(kind) = as_single_marker(&text) {
        return match first_value(entities, kind) {
            Some(value) => serde_json::Value::String(value.to_string()),
            None => serde_json::Value::Null,
        };
    }

    let mut result = text;
    for (kind, values) in entities {
        if let Some(first) = values.first() {
            result = result.replace(&format!("{{{{{}}}}}", kind.as_str()), first);
        }
    }
    serde_json::Value::String(result)
}

fn as_single_marker(text: &str) -> Option<EntityKind> {
    let inner = text.strip_prefix("{{")?.strip_suffix("}}")?;
    EntityKind::parse(inner.trim())
}

fn first_value<'a>(
    entities: &'a HashMap<EntityKind, Vec<String>>,
    kind: EntityKind,
) -> Option<&'a String> {
    entities.get(&kind).and_then(|values| values.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(name: &str, body: serde_json::Value) -> TemplateDocument {
        TemplateDocument {
            template_metadata: TemplateMetadata {
                name: name.to_string(),
                category: "reservation_booking".to_string(),
                description: "test".to_string(),
                required_entities: vec![EntityKind::ResourceId],
                optional_entities: Vec::new(),
                api_endpoint: "/reservations".to_string(),
                http_method: "POST".to_string(),
                usage_count: 0,
                success_rate: 0.0,
            },
            body,
        }
    }

    fn entities() -> HashMap<EntityKind, Vec<String>> {
        let mut map = HashMap::new();
        map.insert(
            EntityKind::ResourceId,
            vec!["RES-1234".to_string(), "RES-9999".to_string()],
        );
        map.insert(EntityKind::Time, vec!["14:00".to_string()]);
        map
    }

    #[test]
    fn test_fill_replaces_first_entity_value() {
        let store = TemplateStore::from_documents(vec![document(
            "create_reservation",
            serde_json::json!({"resource_id": "{{resource_id}}", "start": "{{time}}"}),
        )]);

        let filled = store
            .fill("create_reservation", &entities(), "reserve RES-1234")
            .unwrap();
        assert_eq!(filled["resource_id"], "RES-1234");
        assert_eq!(filled["start"], "14:00");
    }

    #[test]
    fn test_fill_adds_meta_provenance() {
        let store = TemplateStore::from_documents(vec![document(
            "create_reservation",
            serde_json::json!({"resource_id": "{{resource_id}}"}),
        )]);

        let filled = store
            .fill("create_reservation", &entities(), "reserve RES-1234")
            .unwrap();
        assert_eq!(filled["_meta"]["source"], "user_input");
        assert_eq!(filled["_meta"]["original_text"], "reserve RES-1234");
    }

    #[test]
    fn test_fill_missing_entity_leaves_null() {
        let store = TemplateStore::from_documents(vec![document(
            "create_reservation",
            serde_json::json!({"user": "{{user}}"}),
        )]);

        let filled = store
            .fill("create_reservation", &entities(), "text")
            .unwrap();
        assert!(filled["user"].is_null());
    }

    #[test]
    fn test_fill_interpolates_embedded_markers() {
        let store = TemplateStore::from_documents(vec![document(
            "create_reservation",
            serde_json::json!({"note": "booked {{resource_id}} at {{time}}"}),
        )]);

        let filled = store
            .fill("create_reservation", &entities(), "text")
            .unwrap();
        assert_eq!(filled["note"], "booked RES-1234 at 14:00");
    }

    #[test]
    fn test_fill_unknown_template() {
        let store = TemplateStore::new();
        assert!(matches!(
            store.fill("nope", &entities(), "text"),
            Err(CoreError::TemplateNotFound(_))
        ));
    }

    #[test]
    fn test_usage_counters() {
        let store = TemplateStore::from_documents(vec![document(
            "create_reservation",
            serde_json::json!({}),
        )]);

        store.record_usage("create_reservation", true);
        store.record_usage("create_reservation", false);

        let metadata = store.metadata("create_reservation").unwrap();
        assert_eq!(metadata.usage_count, 2);
        assert!((metadata.success_rate - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_all_metadata_stable_order() {
        let store = TemplateStore::from_documents(vec![
            document("zeta", serde_json::json!({})),
            document("alpha", serde_json::json!({})),
        ]);
        let names: Vec<String> = store.all_metadata().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
