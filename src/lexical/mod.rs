//! The lexical index layer: segment persistence, writer and searcher.
//!
//! One index directory holds a single segment: the serialized document list
//! plus a generation marker. Writers load the segment, mutate it in memory
//! and persist it on commit; searchers are immutable views of one committed
//! generation. The generation marker lets callers detect staleness without
//! deserializing the whole segment.

pub mod searcher;
pub mod writer;

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

use crate::analysis::Analyzer;
use crate::document::{Document, FieldIndexing};
use crate::error::{MuninnError, Result};
use crate::query::TermSets;
use crate::storage::Directory;

pub use searcher::IndexSearcher;
pub use writer::IndexWriter;

/// Serialized document list for one index.
pub const SEGMENTS_FILE: &str = "segments.bin";
/// Current segment generation, 8 bytes big-endian.
pub const GENERATION_FILE: &str = "segments.gen";
/// Human-readable index metadata.
pub const METADATA_FILE: &str = "metadata.json";
/// Marker file present while a writer holds the index.
pub const WRITE_LOCK_FILE: &str = "write.lock";

#[derive(Debug, Serialize, Deserialize)]
struct Segment {
    generation: u64,
    documents: Vec<Document>,
}

/// Metadata about an index, stored alongside the segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Number of documents in the current segment.
    pub doc_count: u64,
    /// Generation of the current segment.
    pub generation: u64,
}

/// Read the current on-disk generation, or `None` if the index has never
/// been committed to.
pub fn read_generation(directory: &dyn Directory) -> Result<Option<u64>> {
    match directory.read_file(GENERATION_FILE)? {
        Some(bytes) if bytes.len() == 8 => Ok(Some(BigEndian::read_u64(&bytes))),
        Some(_) => Err(MuninnError::storage("malformed generation marker")),
        None => Ok(None),
    }
}

/// Extract the searchable term sets of one document.
///
/// Not-analyzed fields contribute their value as a single term; analyzed
/// fields contribute the analyzer's tokens. The id field is always a single
/// exact term so id lookups behave the same for every index type.
pub fn extract_terms(document: &Document, analyzer: &Analyzer) -> TermSets {
    let mut terms = TermSets::new();
    for field in document.fields() {
        let entry = terms.entry(field.name.clone()).or_default();
        match field.indexing {
            FieldIndexing::NotAnalyzed => {
                entry.insert(field.value.clone());
            }
            FieldIndexing::Analyzed => {
                for token in analyzer.analyze(&field.value) {
                    entry.insert(token);
                }
            }
        }
    }
    terms
}
