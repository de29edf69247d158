//! The public per-index facade: add, remove and query with overlay merging.
//!
//! Queries combine three sources: ids added by the active transaction
//! (always included), ids removed by it (always excluded), and hits from the
//! committed index. Transaction-local state takes precedence over committed
//! state for the same entity, and an entity id never appears twice in one
//! result.

use std::sync::Arc;

use ahash::AHashSet;

use crate::error::{MuninnError, Result};
use crate::query::Query;

use super::data_source::IndexDataSource;
use super::identifier::{EntityKind, IndexIdentifier};
use super::index_type::IndexType;
use super::searcher_ref::SearcherGuard;
use super::transaction::IndexTransaction;

/// One logical index of a graph database.
#[derive(Debug)]
pub struct Index {
    data_source: Arc<IndexDataSource>,
    identifier: IndexIdentifier,
    index_type: IndexType,
    lazy_threshold: usize,
    writable: bool,
}

impl Index {
    pub(crate) fn new(
        data_source: Arc<IndexDataSource>,
        identifier: IndexIdentifier,
        index_type: IndexType,
        lazy_threshold: usize,
        writable: bool,
    ) -> Self {
        Index {
            data_source,
            identifier,
            index_type,
            lazy_threshold,
            writable,
        }
    }

    /// The identity of this index.
    pub fn identifier(&self) -> &IndexIdentifier {
        &self.identifier
    }

    /// The name of this index.
    pub fn name(&self) -> &str {
        &self.identifier.name
    }

    /// The entity kind this index covers.
    pub fn entity_kind(&self) -> EntityKind {
        self.identifier.kind
    }

    fn check_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(MuninnError::read_only(format!(
                "index '{}' belongs to a read-only provider",
                self.identifier
            )))
        }
    }

    /// Add one (entity, key, value) triple within a transaction.
    pub fn add(
        &self,
        tx: &mut IndexTransaction,
        entity_id: i64,
        key: &str,
        value: &str,
    ) -> Result<()> {
        self.check_writable()?;
        tx.add(&self.identifier, &self.index_type, entity_id, key, value)
    }

    /// Remove one (entity, key, value) triple within a transaction.
    pub fn remove(
        &self,
        tx: &mut IndexTransaction,
        entity_id: i64,
        key: &str,
        value: &str,
    ) -> Result<()> {
        self.check_writable()?;
        tx.remove(&self.identifier, &self.index_type, entity_id, key, value)
    }

    /// Remove everything matching a query expression within a transaction.
    pub fn remove_by_query(&self, tx: &mut IndexTransaction, expression: &str) -> Result<()> {
        self.check_writable()?;
        let query = self.index_type.query(None, expression)?;
        tx.remove_by_query(&self.identifier, &self.index_type, query)
    }

    /// Remove every entry of one entity within a transaction.
    pub fn remove_entity(&self, tx: &mut IndexTransaction, entity_id: i64) -> Result<()> {
        self.check_writable()?;
        let query = self.index_type.combine(entity_id, None);
        tx.remove_by_query(&self.identifier, &self.index_type, query)
    }

    /// Equality lookup: entities indexed with exactly this (key, value).
    pub fn get(
        &self,
        tx: Option<&mut IndexTransaction>,
        key: &str,
        value: &str,
    ) -> Result<IndexHits> {
        self.run_query(tx, self.index_type.get_query(key, value))
    }

    /// Free-text or boolean lookup against one key.
    pub fn query(
        &self,
        tx: Option<&mut IndexTransaction>,
        key: &str,
        expression: &str,
    ) -> Result<IndexHits> {
        let query = self.index_type.query(Some(key), expression)?;
        self.run_query(tx, query)
    }

    /// Lookup with an expression carrying its own field qualifiers.
    pub fn query_expression(
        &self,
        tx: Option<&mut IndexTransaction>,
        expression: &str,
    ) -> Result<IndexHits> {
        let query = self.index_type.query(None, expression)?;
        self.run_query(tx, query)
    }

    fn run_query(&self, tx: Option<&mut IndexTransaction>, query: Query) -> Result<IndexHits> {
        let mut added_ids: Vec<i64> = Vec::new();
        let mut removed_ids: AHashSet<i64> = AHashSet::new();
        let mut extra_remove: Option<Query> = None;
        if let Some(tx) = tx {
            let mut added: Vec<i64> = tx.added_ids(&self.identifier, &query)?.into_iter().collect();
            added.sort_unstable();
            added_ids = added;
            removed_ids = tx.removed_ids(&self.identifier, &query)?;
            extra_remove = tx.extra_remove_query(&self.identifier);
        }

        // The read lock covers searcher acquisition and the initial scan
        // only; the guard keeps the view alive for lazy iteration.
        let read_guard = self.data_source.read_lock();
        let searcher_ref = self.data_source.index_searcher(&self.identifier)?;

        let Some(searcher_ref) = searcher_ref else {
            drop(read_guard);
            return Ok(IndexHits::eager(added_ids));
        };

        let searcher = searcher_ref.acquire();
        if let Some(extra) = &extra_remove {
            for ordinal in searcher.search(extra) {
                if let Some(entity_id) = searcher.entity_id_of(ordinal) {
                    removed_ids.insert(entity_id);
                }
            }
        }
        let ordinals = searcher.search(&query);
        let committed_count = ordinals.len();
        drop(read_guard);

        let mut seen = removed_ids;
        seen.extend(added_ids.iter().copied());

        if committed_count >= self.lazy_threshold {
            Ok(IndexHits::lazy(added_ids, searcher, ordinals, seen))
        } else {
            let mut ids = added_ids;
            for ordinal in ordinals {
                if let Some(entity_id) = searcher.entity_id_of(ordinal) {
                    if seen.insert(entity_id) {
                        ids.push(entity_id);
                    }
                }
            }
            Ok(IndexHits::eager(ids))
        }
    }
}

#[derive(Debug)]
enum HitsInner {
    Eager(std::vec::IntoIter<i64>),
    Lazy {
        added: std::vec::IntoIter<i64>,
        searcher: SearcherGuard,
        ordinals: std::vec::IntoIter<usize>,
        seen: AHashSet<i64>,
    },
}

/// Entity ids matching one query.
///
/// Small results are materialized eagerly. Results whose committed hit count
/// reaches the provider's laziness threshold are streamed: ids are resolved,
/// deduplicated and filtered during iteration, with the underlying searcher
/// view kept alive by its reference count for the iterator's lifetime.
#[derive(Debug)]
pub struct IndexHits {
    inner: HitsInner,
    size: usize,
}

impl IndexHits {
    fn eager(ids: Vec<i64>) -> Self {
        IndexHits {
            size: ids.len(),
            inner: HitsInner::Eager(ids.into_iter()),
        }
    }

    fn lazy(
        added: Vec<i64>,
        searcher: SearcherGuard,
        ordinals: Vec<usize>,
        seen: AHashSet<i64>,
    ) -> Self {
        IndexHits {
            size: added.len() + ordinals.len(),
            inner: HitsInner::Lazy {
                added: added.into_iter(),
                searcher,
                ordinals: ordinals.into_iter(),
                seen,
            },
        }
    }

    /// The result size. Exact for eager results; for lazy results an upper
    /// bound counted before filtering.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether this result streams lazily.
    pub fn is_lazy(&self) -> bool {
        matches!(self.inner, HitsInner::Lazy { .. })
    }
}

impl Iterator for IndexHits {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        match &mut self.inner {
            HitsInner::Eager(ids) => ids.next(),
            HitsInner::Lazy {
                added,
                searcher,
                ordinals,
                seen,
            } => {
                if let Some(entity_id) = added.next() {
                    return Some(entity_id);
                }
                while let Some(ordinal) = ordinals.next() {
                    let Some(entity_id) = searcher.entity_id_of(ordinal) else {
                        continue;
                    };
                    if seen.insert(entity_id) {
                        return Some(entity_id);
                    }
                }
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.size))
    }
}
