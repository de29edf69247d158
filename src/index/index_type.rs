//! Index type strategies: document shape and query construction.
//!
//! An index is either exact or fulltext. Exact indexes store one
//! not-analyzed field per (key, value) pair. Fulltext indexes store two
//! fields per pair: an analyzed one under the property key for token search,
//! and a not-analyzed one under `key + "_e"` so deletion and equality lookups
//! can target the precise original value.

use std::collections::HashMap;

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::analysis::Analyzer;
use crate::document::{Document, ENTITY_ID_FIELD, FieldIndexing};
use crate::error::{MuninnError, Result};
use crate::query::Query;

use super::identifier::IndexIdentifier;

/// Per-index configuration: the index type name.
pub const CONFIG_TYPE: &str = "type";
/// Per-index configuration: the analyzer name for fulltext indexes.
pub const CONFIG_ANALYZER: &str = "analyzer";
/// Per-index configuration: whether fulltext tokens are case-folded.
pub const CONFIG_TO_LOWER_CASE: &str = "to_lower_case";

/// Type name of exact indexes.
pub const TYPE_EXACT: &str = "exact";
/// Type name of fulltext indexes.
pub const TYPE_FULLTEXT: &str = "fulltext";

/// The matching strategy of one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexType {
    /// Values are opaque terms, matched whole.
    Exact,
    /// Values are tokenized for partial text search.
    Fulltext { analyzer: Analyzer },
}

impl IndexType {
    /// Resolve the type from per-index configuration.
    ///
    /// A missing type defaults to exact. An unknown type name or analyzer
    /// name is a configuration error surfaced to the caller that triggered
    /// resolution.
    pub fn resolve(index_name: &str, config: &HashMap<String, String>) -> Result<IndexType> {
        match config.get(CONFIG_TYPE).map(String::as_str) {
            None | Some(TYPE_EXACT) => Ok(IndexType::Exact),
            Some(TYPE_FULLTEXT) => {
                let to_lower_case = config
                    .get(CONFIG_TO_LOWER_CASE)
                    .map(|v| v == "true")
                    .unwrap_or(true);
                let analyzer =
                    Analyzer::resolve(config.get(CONFIG_ANALYZER).map(String::as_str), to_lower_case)?;
                Ok(IndexType::Fulltext { analyzer })
            }
            Some(other) => Err(MuninnError::configuration(format!(
                "unknown type '{other}' for index '{index_name}'"
            ))),
        }
    }

    /// The analyzer used for this index's documents and free-text queries.
    pub fn analyzer(&self) -> Analyzer {
        match self {
            IndexType::Exact => Analyzer::Keyword,
            IndexType::Fulltext { analyzer } => *analyzer,
        }
    }

    fn exact_key(key: &str) -> String {
        format!("{key}_e")
    }

    /// Create a document carrying only the entity id.
    pub fn new_document(entity_id: i64) -> Document {
        Document::with_entity_id(entity_id)
    }

    /// Create a document for one (entity, key, value) triple.
    pub fn fill_document(&self, entity_id: i64, key: &str, value: &str) -> Document {
        let mut document = Self::new_document(entity_id);
        self.add_to_document(&mut document, key, value);
        document
    }

    /// Add one (key, value) pair to an existing document.
    pub fn add_to_document(&self, document: &mut Document, key: &str, value: &str) {
        match self {
            IndexType::Exact => {
                document.add_field(key, value, FieldIndexing::NotAnalyzed);
            }
            IndexType::Fulltext { .. } => {
                document.add_field(&Self::exact_key(key), value, FieldIndexing::NotAnalyzed);
                document.add_field(key, value, FieldIndexing::Analyzed);
            }
        }
    }

    /// Remove one (key, value) pair from an existing document, keeping any
    /// other values stored under the same key.
    pub fn remove_from_document(&self, document: &mut Document, key: &str, value: &str) {
        let target = match self {
            IndexType::Exact => key.to_string(),
            IndexType::Fulltext { .. } => Self::exact_key(key),
        };

        let mut remaining: Vec<String> = Vec::new();
        let mut found = false;
        for existing in document.values(&target) {
            if existing == value {
                found = true;
            } else if !remaining.iter().any(|v| v == existing) {
                remaining.push(existing.to_string());
            }
        }
        if !found {
            return;
        }

        document.remove_fields(&target);
        if matches!(self, IndexType::Fulltext { .. }) {
            document.remove_fields(key);
        }
        for existing in remaining {
            self.add_to_document(document, key, &existing);
        }
    }

    /// Query matching exactly the documents representing one
    /// (entity, key, value) triple — never a superset.
    pub fn deletion_query(&self, entity_id: i64, key: &str, value: &str) -> Query {
        let value_field = match self {
            IndexType::Exact => key.to_string(),
            IndexType::Fulltext { .. } => Self::exact_key(key),
        };
        Query::must_all(vec![
            Self::id_term_query(entity_id),
            Query::term(value_field, value),
        ])
    }

    /// Equality-lookup query for `get(key, value)`.
    pub fn get_query(&self, key: &str, value: &str) -> Query {
        match self {
            IndexType::Exact => Query::term(key, value),
            IndexType::Fulltext { .. } => Query::term(Self::exact_key(key), value),
        }
    }

    /// Parse a free-text or boolean query expression.
    pub fn query(&self, key: Option<&str>, input: &str) -> Result<Query> {
        Query::parse_with_analyzer(key, input, &self.analyzer())
    }

    /// Query matching every document of one entity.
    pub fn id_term_query(entity_id: i64) -> Query {
        Query::term(ENTITY_ID_FIELD, entity_id.to_string())
    }

    /// Query matching one entity's documents, optionally narrowed further.
    pub fn combine(&self, entity_id: i64, narrower: Option<Query>) -> Query {
        let mut queries = vec![Self::id_term_query(entity_id)];
        if let Some(query) = narrower {
            queries.push(query);
        }
        Query::must_all(queries)
    }
}

/// Process-wide cache of resolved index types, keyed by identifier.
///
/// Resolution is a pure function of immutable configuration, so concurrent
/// first-resolution by several threads is tolerated: every contender computes
/// the same value and the first insert wins.
#[derive(Debug, Default)]
pub struct IndexTypeCache {
    types: Mutex<AHashMap<IndexIdentifier, IndexType>>,
}

impl IndexTypeCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        IndexTypeCache::default()
    }

    /// Get the cached type for an identifier, resolving from `config` on
    /// first access.
    pub fn get(
        &self,
        identifier: &IndexIdentifier,
        config: &HashMap<String, String>,
    ) -> Result<IndexType> {
        if let Some(index_type) = self.types.lock().get(identifier) {
            return Ok(index_type.clone());
        }
        let resolved = IndexType::resolve(&identifier.name, config)?;
        Ok(self
            .types
            .lock()
            .entry(identifier.clone())
            .or_insert(resolved)
            .clone())
    }
}
