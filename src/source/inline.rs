//! # Inline Source
//!
//! Normalizes the file map embedded in a Decofile into a single JSON object.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

use super::{ContentSource, SourceDocument, SourceError, SourceKind};

/// Content source backed by the Decofile's own `spec.source.inline.files`
pub struct InlineContentSource {
    files: BTreeMap<String, Value>,
}

impl InlineContentSource {
    pub fn new(files: BTreeMap<String, Value>) -> Self {
        Self { files }
    }
}

impl std::fmt::Debug for InlineContentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlineContentSource")
            .field("files", &self.files.len())
            .finish()
    }
}

#[async_trait]
impl ContentSource for InlineContentSource {
    async fn retrieve(&self) -> Result<SourceDocument, SourceError> {
        let mut document = serde_json::Map::new();

        for (filename, value) in &self.files {
            if is_empty_value(value) {
                return Err(SourceError::InvalidSpec(format!(
                    "inline file '{filename}' has an empty value"
                )));
            }
            document.insert(canonical_key(filename), value.clone());
        }

        // serde_json emits `&`, `<` and `>` verbatim; nothing to configure
        let json = serde_json::to_string(&Value::Object(document))
            .map_err(|e| SourceError::Parse(format!("failed to serialize inline files: {e}")))?;

        Ok(SourceDocument {
            json,
            revision: None,
        })
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Inline
    }
}

/// Strip a trailing `.json` so keys are file basenames without the extension
pub fn canonical_key(filename: &str) -> String {
    filename
        .strip_suffix(".json")
        .unwrap_or(filename)
        .to_string()
}

/// After CRD deserialization the only observable empty values are JSON null
/// and the empty string
fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn retrieve(files: BTreeMap<String, Value>) -> Result<SourceDocument, SourceError> {
        futures::executor::block_on(InlineContentSource::new(files).retrieve())
    }

    #[test]
    fn strips_json_suffix_from_keys() {
        let files = BTreeMap::from([
            ("a.json".to_string(), json!({ "x": 1 })),
            ("b".to_string(), json!([1, 2])),
        ]);
        let document = retrieve(files).expect("retrieve");
        let parsed: Value = serde_json::from_str(&document.json).expect("valid json");
        assert_eq!(parsed, json!({ "a": { "x": 1 }, "b": [1, 2] }));
        assert_eq!(document.revision, None);
    }

    #[test]
    fn only_trailing_json_suffix_is_stripped() {
        assert_eq!(canonical_key("a.json"), "a");
        assert_eq!(canonical_key("a.json.bak"), "a.json.bak");
        assert_eq!(canonical_key("plain"), "plain");
    }

    #[test]
    fn reserved_characters_are_not_html_escaped() {
        let files = BTreeMap::from([(
            "page.json".to_string(),
            json!({ "html": "<a href=\"?x=1&y=2\">go</a>" }),
        )]);
        let document = retrieve(files).expect("retrieve");
        assert!(document.json.contains('&'));
        assert!(document.json.contains('<'));
        assert!(document.json.contains('>'));
        assert!(!document.json.contains("\\u003c"));
        assert!(!document.json.contains("\\u0026"));
    }

    #[test]
    fn null_value_fails_as_invalid_spec() {
        let files = BTreeMap::from([("a.json".to_string(), Value::Null)]);
        match retrieve(files) {
            Err(SourceError::InvalidSpec(message)) => assert!(message.contains("a.json")),
            other => panic!("expected InvalidSpec, got {other:?}"),
        }
    }

    #[test]
    fn empty_string_value_fails_as_invalid_spec() {
        let files = BTreeMap::from([("a.json".to_string(), json!(""))]);
        assert!(matches!(retrieve(files), Err(SourceError::InvalidSpec(_))));
    }

    #[test]
    fn empty_file_map_yields_empty_object() {
        let document = retrieve(BTreeMap::new()).expect("retrieve");
        assert_eq!(document.json, "{}");
    }
}
