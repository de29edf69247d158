//! The process-wide index provider.
//!
//! One provider binds a graph database instance's store directory to one
//! [`IndexDataSource`] and mints [`Index`] facades and transactions. A
//! read-only provider serves queries but refuses write transactions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{MuninnError, Result};

use super::data_source::{DataSourceConfig, IndexDataSource};
use super::identifier::{EntityKind, IndexIdentifier};
use super::index::Index;
use super::index_type::{CONFIG_TYPE, TYPE_EXACT, TYPE_FULLTEXT};
use super::transaction::IndexTransaction;

/// Committed hit count at which query results switch to lazy iteration.
pub const DEFAULT_LAZY_THRESHOLD: usize = 100;

/// Configuration of one provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base store directory of the owning graph database.
    pub store_dir: PathBuf,
    /// Serve queries only; refuse write transactions.
    pub read_only: bool,
    /// Archive retired recovery logs instead of deleting them.
    pub keep_logical_logs: bool,
    /// Committed hit count at which results stream lazily.
    pub lazy_threshold: usize,
}

impl ProviderConfig {
    /// Configuration with defaults: writable, logs not kept, threshold 100.
    pub fn new<P: Into<PathBuf>>(store_dir: P) -> Self {
        ProviderConfig {
            store_dir: store_dir.into(),
            read_only: false,
            keep_logical_logs: false,
            lazy_threshold: DEFAULT_LAZY_THRESHOLD,
        }
    }
}

/// The registry binding one database instance to its index engine.
#[derive(Debug)]
pub struct IndexProvider {
    data_source: Arc<IndexDataSource>,
    lazy_threshold: usize,
    writable: bool,
}

impl IndexProvider {
    /// Open the provider, running crash recovery if needed.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let data_source = IndexDataSource::new(DataSourceConfig {
            store_dir: config.store_dir,
            read_only: config.read_only,
            keep_logical_logs: config.keep_logical_logs,
        })?;
        Ok(IndexProvider {
            data_source,
            lazy_threshold: config.lazy_threshold,
            writable: !config.read_only,
        })
    }

    /// Index configuration selecting the exact type.
    pub fn exact_config() -> HashMap<String, String> {
        let mut config = HashMap::new();
        config.insert(CONFIG_TYPE.to_string(), TYPE_EXACT.to_string());
        config
    }

    /// Index configuration selecting the fulltext type with defaults.
    pub fn fulltext_config() -> HashMap<String, String> {
        let mut config = HashMap::new();
        config.insert(CONFIG_TYPE.to_string(), TYPE_FULLTEXT.to_string());
        config
    }

    /// Get (creating on first use) a node index.
    ///
    /// The supplied configuration is persisted the first time the index is
    /// seen; afterwards the persisted configuration wins.
    pub fn node_index(
        &self,
        name: &str,
        config: Option<HashMap<String, String>>,
    ) -> Result<Index> {
        self.index(EntityKind::Node, name, config)
    }

    /// Get (creating on first use) a relationship index.
    pub fn relationship_index(
        &self,
        name: &str,
        config: Option<HashMap<String, String>>,
    ) -> Result<Index> {
        self.index(EntityKind::Relationship, name, config)
    }

    fn index(
        &self,
        kind: EntityKind,
        name: &str,
        config: Option<HashMap<String, String>>,
    ) -> Result<Index> {
        let identifier = IndexIdentifier::new(kind, name);
        let index_type = self
            .data_source
            .index_type_with(&identifier, config.as_ref())?;
        self.data_source
            .ensure_index_config(&identifier, config.as_ref())?;
        Ok(Index::new(
            Arc::clone(&self.data_source),
            identifier,
            index_type,
            self.lazy_threshold,
            self.writable,
        ))
    }

    /// Begin a write transaction, to be driven through its
    /// [`XaParticipant`](super::transaction::XaParticipant) entry points by
    /// the surrounding coordinator.
    pub fn begin(&self) -> Result<IndexTransaction> {
        if !self.writable {
            return Err(MuninnError::read_only(
                "the graph database was opened read-only",
            ));
        }
        Ok(IndexTransaction::new(Arc::clone(&self.data_source)))
    }

    /// The shared data source.
    pub fn data_source(&self) -> &Arc<IndexDataSource> {
        &self.data_source
    }

    /// Shut down the underlying data source. Safe to call repeatedly.
    pub fn shutdown(&self) -> Result<()> {
        self.data_source.close()
    }
}
