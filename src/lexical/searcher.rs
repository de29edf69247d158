//! Index searcher: an immutable view over one committed segment generation.

use crate::analysis::Analyzer;
use crate::document::Document;
use crate::error::{MuninnError, Result};
use crate::query::{Query, TermSets};
use crate::storage::Directory;

use super::{SEGMENTS_FILE, Segment, extract_terms};

/// A read-only searcher over one index segment.
///
/// The searcher materializes per-document term sets at open time, so query
/// evaluation never touches storage. It stays consistent with the generation
/// it was opened against even while newer generations are committed.
#[derive(Debug)]
pub struct IndexSearcher {
    documents: Vec<Document>,
    terms: Vec<TermSets>,
    generation: u64,
}

impl IndexSearcher {
    /// Open a searcher over the current segment.
    ///
    /// Returns `None` when the index directory has never been committed to,
    /// distinguishing "not yet created" from an empty result set.
    pub fn open(directory: &dyn Directory, analyzer: &Analyzer) -> Result<Option<Self>> {
        let bytes = match directory.read_file(SEGMENTS_FILE)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let segment: Segment = bincode::deserialize(&bytes)
            .map_err(|e| MuninnError::serialization(format!("corrupt segment file: {e}")))?;

        let terms = segment
            .documents
            .iter()
            .map(|doc| extract_terms(doc, analyzer))
            .collect();

        Ok(Some(IndexSearcher {
            documents: segment.documents,
            terms,
            generation: segment.generation,
        }))
    }

    /// Evaluate a query, returning matching document ordinals in index order.
    pub fn search(&self, query: &Query) -> Vec<usize> {
        self.terms
            .iter()
            .enumerate()
            .filter(|(_, terms)| query.matches(terms))
            .map(|(ordinal, _)| ordinal)
            .collect()
    }

    /// The entity id stored in the document at `ordinal`.
    pub fn entity_id_of(&self, ordinal: usize) -> Option<i64> {
        self.documents.get(ordinal).and_then(Document::entity_id)
    }

    /// The document at `ordinal`.
    pub fn doc(&self, ordinal: usize) -> &Document {
        &self.documents[ordinal]
    }

    /// Number of documents in this view.
    pub fn doc_count(&self) -> usize {
        self.documents.len()
    }

    /// The segment generation this searcher was opened against.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
