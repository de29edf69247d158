//! Index writer: load, mutate and commit one index segment.

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};

use crate::analysis::Analyzer;
use crate::document::Document;
use crate::error::{MuninnError, Result};
use crate::query::Query;
use crate::storage::Directory;

use super::{
    GENERATION_FILE, IndexMetadata, METADATA_FILE, SEGMENTS_FILE, Segment, WRITE_LOCK_FILE,
    extract_terms,
};

/// A writer over one index directory.
///
/// Exactly one writer may hold an index at a time; the `write.lock` marker
/// enforces this across processes and is removed again on close. Writers are
/// opened per commit and never cached.
#[derive(Debug)]
pub struct IndexWriter {
    directory: Arc<dyn Directory>,
    analyzer: Analyzer,
    documents: Vec<Document>,
    generation: u64,
    dirty: bool,
    lock_released: bool,
}

impl IndexWriter {
    /// Open a writer, taking the index write lock.
    ///
    /// Fails if another writer currently holds the index. A lock left behind
    /// by a crashed process is cleaned up at data-source startup, before any
    /// writer is opened.
    pub fn open(directory: Arc<dyn Directory>, analyzer: Analyzer) -> Result<Self> {
        if directory.file_exists(WRITE_LOCK_FILE) {
            return Err(MuninnError::storage(
                "index is locked by another writer (write.lock exists)",
            ));
        }
        directory.write_file(WRITE_LOCK_FILE, b"locked")?;

        let (documents, generation) = match directory.read_file(SEGMENTS_FILE)? {
            Some(bytes) => {
                let segment: Segment = bincode::deserialize(&bytes).map_err(|e| {
                    MuninnError::serialization(format!("corrupt segment file: {e}"))
                })?;
                (segment.documents, segment.generation)
            }
            None => (Vec::new(), 0),
        };

        Ok(IndexWriter {
            directory,
            analyzer,
            documents,
            generation,
            dirty: false,
            lock_released: false,
        })
    }

    /// Pre-size the document buffer ahead of a batch of additions.
    pub fn reserve(&mut self, additional: usize) {
        self.documents.reserve(additional);
    }

    /// Number of documents currently buffered.
    pub fn doc_count(&self) -> usize {
        self.documents.len()
    }

    /// Append a document.
    pub fn add_document(&mut self, document: Document) {
        self.documents.push(document);
        self.dirty = true;
    }

    /// Replace every document carrying the given entity id with `document`.
    pub fn update_document(&mut self, entity_id: i64, document: Document) {
        self.delete_by_entity_id(entity_id);
        self.add_document(document);
    }

    /// Find the buffered document for an entity, if any.
    pub fn find_by_entity_id(&self, entity_id: i64) -> Option<&Document> {
        self.documents
            .iter()
            .find(|doc| doc.entity_id() == Some(entity_id))
    }

    /// Delete every document carrying the given entity id.
    pub fn delete_by_entity_id(&mut self, entity_id: i64) {
        let before = self.documents.len();
        self.documents
            .retain(|doc| doc.entity_id() != Some(entity_id));
        if self.documents.len() != before {
            self.dirty = true;
        }
    }

    /// Delete every document matching the query.
    pub fn delete_documents(&mut self, query: &Query) {
        let analyzer = self.analyzer;
        let before = self.documents.len();
        self.documents
            .retain(|doc| !query.matches(&extract_terms(doc, &analyzer)));
        if self.documents.len() != before {
            self.dirty = true;
        }
    }

    /// Persist buffered changes and advance the generation.
    ///
    /// A commit with no changes leaves the on-disk state untouched, so
    /// cached searchers stay valid for indexes a transaction never wrote.
    pub fn commit(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.generation += 1;

        let segment = Segment {
            generation: self.generation,
            documents: std::mem::take(&mut self.documents),
        };
        let bytes = bincode::serialize(&segment)
            .map_err(|e| MuninnError::serialization(format!("segment encoding failed: {e}")))?;
        self.directory.write_file(SEGMENTS_FILE, &bytes)?;
        self.documents = segment.documents;

        let mut gen_bytes = [0u8; 8];
        BigEndian::write_u64(&mut gen_bytes, self.generation);
        self.directory.write_file(GENERATION_FILE, &gen_bytes)?;

        let metadata = IndexMetadata {
            doc_count: self.documents.len() as u64,
            generation: self.generation,
        };
        self.directory
            .write_file(METADATA_FILE, serde_json::to_string_pretty(&metadata)?.as_bytes())?;

        self.dirty = false;
        Ok(())
    }

    /// Commit pending changes and release the write lock.
    pub fn close(mut self) -> Result<()> {
        self.commit()?;
        self.directory.delete_file(WRITE_LOCK_FILE)?;
        self.lock_released = true;
        Ok(())
    }
}

impl Drop for IndexWriter {
    fn drop(&mut self) {
        // Uncommitted changes are discarded, but the lock must not outlive
        // the writer on the error path.
        if !self.lock_released {
            let _ = self.directory.delete_file(WRITE_LOCK_FILE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::FieldIndexing;
    use crate::storage::RamDirectory;

    fn doc(entity_id: i64, key: &str, value: &str) -> Document {
        let mut d = Document::with_entity_id(entity_id);
        d.add_field(key, value, FieldIndexing::NotAnalyzed);
        d
    }

    #[test]
    fn test_commit_bumps_generation() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());

        let mut writer = IndexWriter::open(dir.clone(), Analyzer::Keyword).unwrap();
        writer.add_document(doc(1, "name", "alice"));
        writer.close().unwrap();
        assert_eq!(super::super::read_generation(dir.as_ref()).unwrap(), Some(1));

        let mut writer = IndexWriter::open(dir.clone(), Analyzer::Keyword).unwrap();
        assert_eq!(writer.doc_count(), 1);
        writer.add_document(doc(2, "name", "bob"));
        writer.close().unwrap();
        assert_eq!(super::super::read_generation(dir.as_ref()).unwrap(), Some(2));
    }

    #[test]
    fn test_empty_commit_is_noop() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let writer = IndexWriter::open(dir.clone(), Analyzer::Keyword).unwrap();
        writer.close().unwrap();
        assert_eq!(super::super::read_generation(dir.as_ref()).unwrap(), None);
    }

    #[test]
    fn test_delete_by_query() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let mut writer = IndexWriter::open(dir, Analyzer::Keyword).unwrap();
        writer.add_document(doc(1, "name", "alice"));
        writer.add_document(doc(2, "name", "bob"));

        writer.delete_documents(&Query::term("name", "alice"));
        assert_eq!(writer.doc_count(), 1);
        assert!(writer.find_by_entity_id(1).is_none());
        assert!(writer.find_by_entity_id(2).is_some());
    }

    #[test]
    fn test_write_lock_is_exclusive() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let writer = IndexWriter::open(dir.clone(), Analyzer::Keyword).unwrap();
        assert!(IndexWriter::open(dir.clone(), Analyzer::Keyword).is_err());
        writer.close().unwrap();
        assert!(IndexWriter::open(dir, Analyzer::Keyword).is_ok());
    }
}
