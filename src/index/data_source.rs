//! The data source: owner of everything persistent in the index engine.
//!
//! One data source exists per graph database instance. It owns the on-disk
//! index directories, the store metadata file, the logical log, the searcher
//! cache and the process-wide read/write lock that serializes committed-index
//! mutation against concurrent reads.
//!
//! Startup removes stale `write.lock` markers left behind by a crashed
//! process, then replays any commands still sitting in the logical log, so
//! an unclean shutdown can neither wedge the index nor lose prepared work.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{MuninnError, Result};
use crate::lexical::{self, IndexSearcher, IndexWriter, WRITE_LOCK_FILE};
use crate::query::Query;
use crate::storage::{Directory, FsDirectory};

use super::command::{CommandData, IndexCommand};
use super::identifier::IndexIdentifier;
use super::index_type::{IndexType, IndexTypeCache};
use super::log::LogicalLog;
use super::searcher_ref::SearcherRef;
use super::store::IndexStore;
use super::transaction::{IndexTransaction, XaParticipant};

/// File name of the logical log.
pub const LOG_FILE: &str = "lucene.log";
/// File name of the store metadata file.
pub const STORE_FILE: &str = "lucene-store.db";

/// Configuration of one data source.
#[derive(Debug, Clone)]
pub struct DataSourceConfig {
    /// Base store directory of the owning graph database.
    pub store_dir: PathBuf,
    /// Open without a logical log and refuse write transactions.
    pub read_only: bool,
    /// Archive retired recovery logs instead of deleting them.
    pub keep_logical_logs: bool,
}

impl DataSourceConfig {
    /// Configuration with defaults: writable, logs not kept.
    pub fn new<P: Into<PathBuf>>(store_dir: P) -> Self {
        DataSourceConfig {
            store_dir: store_dir.into(),
            read_only: false,
            keep_logical_logs: false,
        }
    }
}

/// The persistent-index manager shared by every index of one database.
#[derive(Debug)]
pub struct IndexDataSource {
    base_path: PathBuf,
    lock: RwLock<()>,
    searchers: Mutex<AHashMap<IndexIdentifier, Arc<SearcherRef>>>,
    type_cache: IndexTypeCache,
    store: IndexStore,
    log: Option<LogicalLog>,
    keep_logical_logs: bool,
    read_only: bool,
    closed: AtomicBool,
}

impl IndexDataSource {
    /// Open the data source: create directories, clean stale write locks,
    /// open the store file and the logical log, then run crash recovery.
    pub fn new(config: DataSourceConfig) -> Result<Arc<Self>> {
        let base_path = config.store_dir.join("index");
        fs::create_dir_all(&base_path)?;
        clean_write_locks(&base_path)?;

        let store = IndexStore::open(base_path.join(STORE_FILE))?;
        let log = if config.read_only {
            None
        } else {
            Some(LogicalLog::open(base_path.join(LOG_FILE))?)
        };

        let data_source = Arc::new(IndexDataSource {
            base_path,
            lock: RwLock::new(()),
            searchers: Mutex::new(AHashMap::new()),
            type_cache: IndexTypeCache::new(),
            store,
            log,
            keep_logical_logs: config.keep_logical_logs,
            read_only: config.read_only,
            closed: AtomicBool::new(false),
        });
        data_source.recover()?;
        Ok(data_source)
    }

    /// Replay commands left in the logical log by a crashed process.
    fn recover(self: &Arc<Self>) -> Result<()> {
        let Some(log) = self.log.as_ref() else {
            return Ok(());
        };
        let commands = log.replay()?;
        if commands.is_empty() {
            return Ok(());
        }

        let mut transaction = IndexTransaction::new(Arc::clone(self));
        for command in commands {
            transaction.inject(command)?;
        }
        transaction.commit()?;

        let retired_version = self.store.increment_version()?;
        log.retire(retired_version, self.keep_logical_logs)?;
        Ok(())
    }

    /// The directory of one logical index, created on first access.
    pub fn index_directory(&self, identifier: &IndexIdentifier) -> Result<Arc<dyn Directory>> {
        let path = self
            .base_path
            .join("lucene")
            .join(identifier.kind.dir_name())
            .join(&identifier.name);
        Ok(Arc::new(FsDirectory::open(path)?))
    }

    /// Persist the supplied configuration for an index that has none yet.
    pub fn ensure_index_config(
        &self,
        identifier: &IndexIdentifier,
        supplied: Option<&HashMap<String, String>>,
    ) -> Result<()> {
        if self.store.index_config(&identifier.name).is_some() || self.read_only {
            return Ok(());
        }
        let config = supplied.cloned().unwrap_or_default();
        self.store.set_index_config(&identifier.name, config)
    }

    /// Resolve an index's type from its persisted configuration.
    pub fn index_type(&self, identifier: &IndexIdentifier) -> Result<IndexType> {
        self.index_type_with(identifier, None)
    }

    /// Resolve an index's type, falling back to the supplied configuration
    /// when none is persisted (read-only stores never persist).
    pub fn index_type_with(
        &self,
        identifier: &IndexIdentifier,
        supplied: Option<&HashMap<String, String>>,
    ) -> Result<IndexType> {
        let config = self
            .store
            .index_config(&identifier.name)
            .or_else(|| supplied.cloned())
            .unwrap_or_default();
        self.type_cache.get(identifier, &config)
    }

    /// Take the shared read lock, held while acquiring a searcher.
    pub fn read_lock(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read()
    }

    /// Take the exclusive write lock, held for a whole commit.
    pub fn write_lock(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write()
    }

    /// The cached searcher for an index, opening one on first access.
    ///
    /// Returns `None` for an index whose directory has never been written:
    /// an index that does not exist yet is not an error, just empty.
    pub fn index_searcher(
        &self,
        identifier: &IndexIdentifier,
    ) -> Result<Option<Arc<SearcherRef>>> {
        let mut searchers = self.searchers.lock();
        if let Some(searcher) = searchers.get(identifier) {
            return Ok(Some(Arc::clone(searcher)));
        }

        let directory = self.index_directory(identifier)?;
        let index_type = self.index_type(identifier)?;
        match IndexSearcher::open(directory.as_ref(), &index_type.analyzer())? {
            Some(searcher) => {
                let searcher = Arc::new(SearcherRef::new(identifier.clone(), searcher));
                searchers.insert(identifier.clone(), Arc::clone(&searcher));
                Ok(Some(searcher))
            }
            None => Ok(None),
        }
    }

    /// Refresh the cached searcher for an index if the on-disk state moved.
    ///
    /// When the generation underneath is unchanged the cached searcher is
    /// left untouched; otherwise a fresh view is installed and the old one
    /// detached, closing once its last outstanding reader finishes.
    pub fn invalidate_searcher(&self, identifier: &IndexIdentifier) -> Result<()> {
        let mut searchers = self.searchers.lock();
        let Some(current) = searchers.get(identifier) else {
            return Ok(());
        };

        let directory = self.index_directory(identifier)?;
        if lexical::read_generation(directory.as_ref())? == Some(current.generation()) {
            return Ok(());
        }

        let index_type = self.index_type(identifier)?;
        match IndexSearcher::open(directory.as_ref(), &index_type.analyzer())? {
            Some(fresh) => {
                let fresh = Arc::new(SearcherRef::new(identifier.clone(), fresh));
                if let Some(old) = searchers.insert(identifier.clone(), fresh) {
                    old.detach_or_close();
                }
            }
            None => {
                if let Some(old) = searchers.remove(identifier) {
                    old.detach_or_close();
                }
            }
        }
        Ok(())
    }

    /// Open a fresh writer for one commit's duration. Writers are never
    /// cached; callers open, apply and close per commit.
    pub fn index_writer(&self, identifier: &IndexIdentifier) -> Result<IndexWriter> {
        if self.read_only {
            return Err(MuninnError::read_only(
                "cannot open an index writer on a read-only store",
            ));
        }
        let directory = self.index_directory(identifier)?;
        let index_type = self.index_type(identifier)?;
        IndexWriter::open(directory, index_type.analyzer())
    }

    /// Apply one add command: merge the value into the entity's existing
    /// document, or insert a new document. Re-applying an identical triple
    /// leaves the document unchanged, keeping log replay idempotent.
    pub fn apply_add(&self, writer: &mut IndexWriter, index_type: &IndexType, data: &CommandData) {
        match writer.find_by_entity_id(data.entity_id) {
            Some(existing) => {
                let mut document = existing.clone();
                index_type.remove_from_document(&mut document, &data.key, &data.value);
                index_type.add_to_document(&mut document, &data.key, &data.value);
                writer.update_document(data.entity_id, document);
            }
            None => {
                writer.add_document(index_type.fill_document(data.entity_id, &data.key, &data.value));
            }
        }
    }

    /// Apply one remove command: drop the value from the entity's document,
    /// deleting the document outright once nothing but the id remains.
    pub fn apply_remove(
        &self,
        writer: &mut IndexWriter,
        index_type: &IndexType,
        data: &CommandData,
    ) {
        if let Some(existing) = writer.find_by_entity_id(data.entity_id) {
            let mut document = existing.clone();
            index_type.remove_from_document(&mut document, &data.key, &data.value);
            if document.is_empty_besides_id() {
                writer.delete_by_entity_id(data.entity_id);
            } else {
                writer.update_document(data.entity_id, document);
            }
        }
    }

    /// Apply one remove-by-query command.
    pub fn apply_remove_query(&self, writer: &mut IndexWriter, query: &Query) {
        writer.delete_documents(query);
    }

    /// Append one command to the logical log.
    pub fn log_command(&self, command: &IndexCommand) -> Result<()> {
        match self.log.as_ref() {
            Some(log) => log.append(command),
            None => Err(MuninnError::read_only(
                "no logical log on a read-only store",
            )),
        }
    }

    /// Force logged commands to durable storage.
    pub fn flush_log(&self) -> Result<()> {
        match self.log.as_ref() {
            Some(log) => log.flush(),
            None => Ok(()),
        }
    }

    /// Whether this data source was opened read-only.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Creation time of the store, milliseconds since the epoch.
    pub fn creation_time(&self) -> i64 {
        self.store.creation_time()
    }

    /// Random identifier of this store instance.
    pub fn random_identifier(&self) -> i64 {
        self.store.random_identifier()
    }

    /// Current logical log version.
    pub fn log_version(&self) -> u64 {
        self.store.version()
    }

    /// Shut down: dispose every cached searcher and retire the logical log,
    /// so the next start only replays after an unclean exit. Best-effort;
    /// repeated calls are no-ops.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for (_, searcher) in self.searchers.lock().drain() {
            searcher.dispose();
        }
        if let Some(log) = self.log.as_ref() {
            let retire = self
                .store
                .increment_version()
                .and_then(|version| log.retire(version, self.keep_logical_logs));
            if let Err(e) = retire {
                eprintln!("Warning: failed to retire logical log on close: {e}");
            }
        }
        Ok(())
    }
}

/// Remove stale `write.lock` marker files recursively. A crash while a
/// writer was open leaves the marker behind; without this sweep the index
/// would stay permanently locked.
fn clean_write_locks(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            clean_write_locks(&path)?;
        } else if entry.file_name() == WRITE_LOCK_FILE {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
