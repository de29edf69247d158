//! Transaction-scoped overlay indexes.
//!
//! A `TxData` holds the uncommitted mutations of one index in one direction
//! (added or removed) for one transaction, backed by its own ephemeral
//! in-memory index so the overlay is queryable independently of the
//! committed store. The backing index is materialized lazily on the first
//! write; a transaction that only reads never allocates one.
//!
//! Overlay operations consume the current state and return the next one;
//! [`TxDataHolder`] is the single mutable cell that swaps states, keeping
//! the replacement explicit instead of aliasing live instances.

use std::sync::Arc;

use ahash::AHashSet;

use crate::error::{MuninnError, Result};
use crate::lexical::{IndexSearcher, IndexWriter};
use crate::query::Query;
use crate::storage::{Directory, RamDirectory};

use super::index_type::IndexType;

#[derive(Debug)]
struct Backing {
    directory: Arc<dyn Directory>,
    writer: IndexWriter,
    searcher: Option<IndexSearcher>,
}

/// Uncommitted mutations of one (index, transaction, direction) triple.
#[derive(Debug)]
pub struct TxData {
    index_type: IndexType,
    backing: Option<Backing>,
    extra_queries: Vec<Query>,
}

impl TxData {
    /// Create an empty overlay.
    pub fn new(index_type: IndexType) -> Self {
        TxData {
            index_type,
            backing: None,
            extra_queries: Vec::new(),
        }
    }

    fn ensure_backing(&mut self) -> Result<&mut Backing> {
        if self.backing.is_none() {
            let directory: Arc<dyn Directory> = Arc::new(RamDirectory::new());
            let writer = IndexWriter::open(directory.clone(), self.index_type.analyzer())?;
            return Ok(self.backing.insert(Backing {
                directory,
                writer,
                searcher: None,
            }));
        }
        self.backing
            .as_mut()
            .ok_or_else(|| MuninnError::storage("overlay backing unavailable"))
    }

    /// Insert one (entity, key, value) triple into the overlay.
    pub fn add(mut self, entity_id: i64, key: &str, value: &str) -> Result<TxData> {
        let document = self.index_type.fill_document(entity_id, key, value);
        let backing = self.ensure_backing()?;
        backing.writer.add_document(document);
        backing.searcher = None;
        Ok(self)
    }

    /// Record a bulk-removal query, applied against committed results at
    /// merge time. Only meaningful on the removal-direction overlay.
    pub fn add_query(mut self, query: Query) -> TxData {
        self.extra_queries.push(query);
        self
    }

    /// Delete one (entity, key, value) triple from the overlay.
    pub fn remove(self, entity_id: i64, key: &str, value: &str) -> Result<TxData> {
        let query = self.index_type.deletion_query(entity_id, key, value);
        self.remove_query(&query)
    }

    /// Delete everything matching the query from the overlay.
    pub fn remove_query(mut self, query: &Query) -> Result<TxData> {
        if let Some(backing) = self.backing.as_mut() {
            backing.writer.delete_documents(query);
            backing.searcher = None;
        }
        Ok(self)
    }

    /// Entity ids in the overlay matching the query.
    pub fn entity_ids(mut self, query: &Query) -> Result<(AHashSet<i64>, TxData)> {
        let analyzer = self.index_type.analyzer();
        let mut ids = AHashSet::new();
        if let Some(backing) = self.backing.as_mut() {
            if backing.searcher.is_none() {
                backing.writer.commit()?;
                backing.searcher = IndexSearcher::open(backing.directory.as_ref(), &analyzer)?;
            }
            if let Some(searcher) = backing.searcher.as_ref() {
                for ordinal in searcher.search(query) {
                    if let Some(entity_id) = searcher.entity_id_of(ordinal) {
                        ids.insert(entity_id);
                    }
                }
            }
        }
        Ok((ids, self))
    }

    /// The combined bulk-removal query, if any were recorded.
    pub fn extra_query(&self) -> Option<Query> {
        match self.extra_queries.len() {
            0 => None,
            1 => Some(self.extra_queries[0].clone()),
            _ => Some(Query::any_of(self.extra_queries.clone())),
        }
    }

    /// Release the ephemeral backing index. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.backing = None;
    }
}

/// The mutable cell holding one overlay's current state.
#[derive(Debug)]
pub struct TxDataHolder {
    data: Option<TxData>,
}

impl TxDataHolder {
    /// Wrap an initial overlay state.
    pub fn new(data: TxData) -> Self {
        TxDataHolder { data: Some(data) }
    }

    fn swap<F>(&mut self, op: F) -> Result<()>
    where
        F: FnOnce(TxData) -> Result<TxData>,
    {
        match self.data.take() {
            Some(data) => {
                self.data = Some(op(data)?);
                Ok(())
            }
            None => Err(MuninnError::transaction("overlay used after close")),
        }
    }

    /// See [`TxData::add`].
    pub fn add(&mut self, entity_id: i64, key: &str, value: &str) -> Result<()> {
        self.swap(|data| data.add(entity_id, key, value))
    }

    /// See [`TxData::add_query`].
    pub fn add_query(&mut self, query: Query) -> Result<()> {
        self.swap(|data| Ok(data.add_query(query)))
    }

    /// See [`TxData::remove`].
    pub fn remove(&mut self, entity_id: i64, key: &str, value: &str) -> Result<()> {
        self.swap(|data| data.remove(entity_id, key, value))
    }

    /// See [`TxData::remove_query`].
    pub fn remove_query(&mut self, query: &Query) -> Result<()> {
        self.swap(|data| data.remove_query(query))
    }

    /// See [`TxData::entity_ids`].
    pub fn entity_ids(&mut self, query: &Query) -> Result<AHashSet<i64>> {
        match self.data.take() {
            Some(data) => {
                let (ids, next) = data.entity_ids(query)?;
                self.data = Some(next);
                Ok(ids)
            }
            None => Err(MuninnError::transaction("overlay used after close")),
        }
    }

    /// See [`TxData::extra_query`].
    pub fn extra_query(&self) -> Option<Query> {
        self.data.as_ref().and_then(TxData::extra_query)
    }

    /// Close the held overlay. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(data) = self.data.as_mut() {
            data.close();
        }
        self.data = None;
    }
}
