use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type Metadata = BTreeMap<String, String>;

pub const SOURCE_KEY: &str = "source";
pub const TYPE_KEY: &str = "type";
pub const TEXT_KEY: &str = "text";

/// A bounded piece of a source document, the unit of indexing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: Metadata,
}

impl Chunk {
    pub fn new(text: impl Into<String>, source: &str, doc_type: &str) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(SOURCE_KEY.to_string(), source.to_string());
        metadata.insert(TYPE_KEY.to_string(), doc_type.to_string());
        Self {
            text: text.into(),
            metadata,
        }
    }

    pub fn with_metadata(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }

    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).map(String::as_str)
    }
}

/// One row of the metadata sidecar. Serialized flat: the chunk metadata keys
/// sit next to `text` in a single JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub text: String,
    #[serde(flatten)]
    pub metadata: Metadata,
}

impl From<Chunk> for IndexEntry {
    fn from(chunk: Chunk) -> Self {
        let mut metadata = chunk.metadata;
        metadata.remove(TEXT_KEY);
        Self {
            text: chunk.text,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_serializes_flat() {
        let entry = IndexEntry::from(Chunk::new("Free shipping over $50.", "specs.md", "md"));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "text": "Free shipping over $50.",
                "source": "specs.md",
                "type": "md",
            })
        );

        let back: IndexEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn text_key_in_metadata_does_not_shadow_chunk_text() {
        let mut metadata = Metadata::new();
        metadata.insert(TEXT_KEY.to_string(), "stale".to_string());
        metadata.insert(SOURCE_KEY.to_string(), "a.txt".to_string());
        let entry = IndexEntry::from(Chunk::with_metadata("fresh", metadata));
        assert_eq!(entry.text, "fresh");
        assert!(!entry.metadata.contains_key(TEXT_KEY));
    }
}
