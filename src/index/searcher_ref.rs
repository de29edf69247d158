//! Reference-counted handles to committed-index searchers.
//!
//! A searcher stays usable for as long as any reader holds a guard on it,
//! even after a commit installed a fresher searcher in the cache. The old
//! view is detached and closes itself once the last guard is dropped.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::lexical::IndexSearcher;

use super::identifier::IndexIdentifier;

/// A shared, reference-counted committed-index view.
#[derive(Debug)]
pub struct SearcherRef {
    identifier: IndexIdentifier,
    searcher: IndexSearcher,
    refs: AtomicUsize,
    detached: AtomicBool,
    closed: AtomicBool,
}

impl SearcherRef {
    /// Wrap a freshly opened searcher.
    pub fn new(identifier: IndexIdentifier, searcher: IndexSearcher) -> Self {
        SearcherRef {
            identifier,
            searcher,
            refs: AtomicUsize::new(0),
            detached: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// The index this searcher belongs to.
    pub fn identifier(&self) -> &IndexIdentifier {
        &self.identifier
    }

    /// The segment generation of the underlying view.
    pub fn generation(&self) -> u64 {
        self.searcher.generation()
    }

    /// Acquire a guard keeping the searcher open. Every acquisition is
    /// paired with a release when the guard drops, on all exit paths.
    pub fn acquire(self: Arc<Self>) -> SearcherGuard {
        self.refs.fetch_add(1, Ordering::SeqCst);
        SearcherGuard { searcher_ref: self }
    }

    /// Detach this searcher from the cache: close now if no guard holds it,
    /// otherwise close when the last guard drops.
    pub fn detach_or_close(&self) {
        self.detached.store(true, Ordering::SeqCst);
        if self.refs.load(Ordering::SeqCst) == 0 {
            self.close();
        }
    }

    /// Force-close at shutdown, regardless of outstanding guards.
    pub fn dispose(&self) {
        self.close();
    }

    /// Whether the searcher has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn release(&self) {
        if self.refs.fetch_sub(1, Ordering::SeqCst) == 1 && self.detached.load(Ordering::SeqCst) {
            self.close();
        }
    }
}

/// RAII guard over an acquired searcher.
#[derive(Debug)]
pub struct SearcherGuard {
    searcher_ref: Arc<SearcherRef>,
}

impl Deref for SearcherGuard {
    type Target = IndexSearcher;

    fn deref(&self) -> &IndexSearcher {
        &self.searcher_ref.searcher
    }
}

impl Drop for SearcherGuard {
    fn drop(&mut self) {
        self.searcher_ref.release();
    }
}
