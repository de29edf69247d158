//! Document structures shared by the committed index and transaction
//! overlays.
//!
//! A document represents one indexed entity: a reserved id field plus one
//! field per indexed (key, value) pair. Exact fields are stored not-analyzed;
//! fulltext fields are stored twice, as an analyzed field under the property
//! key and as a not-analyzed field under the exact-key variant used for
//! deletion targeting.

use serde::{Deserialize, Serialize};

/// Reserved field name carrying the entity id.
pub const ENTITY_ID_FIELD: &str = "_id_";

/// How a field's value is matched at search time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldIndexing {
    /// The stored value is a single opaque term.
    NotAnalyzed,
    /// The stored value is tokenized with the index's analyzer.
    Analyzed,
}

/// One named value on a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: String,
    pub indexing: FieldIndexing,
}

/// A flexible collection of fields, keyed by name, allowing duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    fields: Vec<Field>,
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Document::default()
    }

    /// Create a document carrying only the reserved entity id field.
    pub fn with_entity_id(entity_id: i64) -> Self {
        let mut doc = Document::new();
        doc.add_field(ENTITY_ID_FIELD, &entity_id.to_string(), FieldIndexing::NotAnalyzed);
        doc
    }

    /// Append a field. Duplicate names are allowed; a key with several values
    /// is stored as several fields.
    pub fn add_field(&mut self, name: &str, value: &str, indexing: FieldIndexing) {
        self.fields.push(Field {
            name: name.to_string(),
            value: value.to_string(),
            indexing,
        });
    }

    /// The entity id this document represents, if the id field is present
    /// and well-formed.
    pub fn entity_id(&self) -> Option<i64> {
        self.fields
            .iter()
            .find(|f| f.name == ENTITY_ID_FIELD)
            .and_then(|f| f.value.parse().ok())
    }

    /// All values stored under the given field name, in insertion order.
    pub fn values(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.name == name)
            .map(|f| f.value.as_str())
            .collect()
    }

    /// Remove every field with the given name.
    pub fn remove_fields(&mut self, name: &str) {
        self.fields.retain(|f| f.name != name);
    }

    /// Whether nothing but the reserved id field remains. A document in this
    /// state no longer indexes anything and should be deleted outright.
    pub fn is_empty_besides_id(&self) -> bool {
        self.fields.iter().all(|f| f.name == ENTITY_ID_FIELD)
    }

    /// All fields, in insertion order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_field() {
        let doc = Document::with_entity_id(42);
        assert_eq!(doc.entity_id(), Some(42));
        assert!(doc.is_empty_besides_id());
    }

    #[test]
    fn test_multi_valued_fields() {
        let mut doc = Document::with_entity_id(1);
        doc.add_field("name", "alice", FieldIndexing::NotAnalyzed);
        doc.add_field("name", "alison", FieldIndexing::NotAnalyzed);

        assert_eq!(doc.values("name"), vec!["alice", "alison"]);
        assert!(!doc.is_empty_besides_id());

        doc.remove_fields("name");
        assert!(doc.is_empty_besides_id());
    }
}
