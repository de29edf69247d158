//! # muninn
//!
//! A transactional full-text index engine for embedded graph databases.
//!
//! ## Features
//!
//! - Exact and fulltext secondary indexes over graph entities
//! - Transaction-scoped overlay indexes with read-your-writes semantics
//! - Two-phase-commit participation for an external transaction coordinator
//! - Write-ahead command log with idempotent crash recovery
//! - Reference-counted searcher views for safe concurrent reads
//!
//! ## Example
//!
//! ```no_run
//! use muninn::{IndexProvider, ProviderConfig, XaParticipant};
//!
//! # fn main() -> muninn::Result<()> {
//! let provider = IndexProvider::new(ProviderConfig::new("/tmp/db"))?;
//! let people = provider.node_index("people", Some(IndexProvider::exact_config()))?;
//!
//! let mut tx = provider.begin()?;
//! people.add(&mut tx, 1, "name", "alice")?;
//! tx.prepare()?;
//! tx.commit()?;
//!
//! let ids: Vec<i64> = people.get(None, "name", "alice")?.collect();
//! assert_eq!(ids, vec![1]);
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod document;
pub mod error;
pub mod index;
pub mod lexical;
pub mod query;
pub mod storage;

pub use error::{MuninnError, Result};
pub use index::{
    EntityKind, Index, IndexCommand, IndexHits, IndexIdentifier, IndexProvider, IndexTransaction,
    IndexType, ProviderConfig, XaParticipant,
};
pub use query::Query;

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
