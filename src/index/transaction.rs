//! The transactional unit of work.
//!
//! A transaction buffers mutations in two places at once: per-index overlay
//! indexes, so reads inside the transaction observe its own writes
//! immediately, and per-index command lists, which become the durable log
//! records at prepare time and the committed-index mutations at commit time.
//!
//! The surrounding transaction coordinator drives the transaction through
//! [`XaParticipant`]: prepare persists the buffered commands, commit applies
//! them to the persistent index under the data source's write lock, rollback
//! discards everything, and inject re-enqueues commands during recovery
//! replay.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};

use crate::error::{MuninnError, Result};
use crate::query::Query;

use super::command::IndexCommand;
use super::data_source::IndexDataSource;
use super::identifier::IndexIdentifier;
use super::index_type::IndexType;
use super::tx_data::{TxData, TxDataHolder};

/// Two-phase-commit participation, driven by the external coordinator.
pub trait XaParticipant {
    /// Persist every buffered command to the durable log.
    fn prepare(&mut self) -> Result<()>;
    /// Apply buffered commands to the persistent index.
    fn commit(&mut self) -> Result<()>;
    /// Discard buffered commands and overlay state.
    fn rollback(&mut self) -> Result<()>;
    /// Re-enqueue a previously logged command during recovery replay.
    fn inject(&mut self, command: IndexCommand) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Active,
    Prepared,
    Committed,
    RolledBack,
}

/// The added/removed overlay pair of one index within one transaction.
#[derive(Debug)]
struct TxDataBoth {
    index_type: IndexType,
    added: Option<TxDataHolder>,
    removed: Option<TxDataHolder>,
}

impl TxDataBoth {
    fn new(index_type: IndexType) -> Self {
        TxDataBoth {
            index_type,
            added: None,
            removed: None,
        }
    }

    fn added(&mut self, create: bool) -> Option<&mut TxDataHolder> {
        if self.added.is_none() && create {
            self.added = Some(TxDataHolder::new(TxData::new(self.index_type.clone())));
        }
        self.added.as_mut()
    }

    fn removed(&mut self, create: bool) -> Option<&mut TxDataHolder> {
        if self.removed.is_none() && create {
            self.removed = Some(TxDataHolder::new(TxData::new(self.index_type.clone())));
        }
        self.removed.as_mut()
    }

    fn close(&mut self) {
        if let Some(added) = self.added.as_mut() {
            added.close();
        }
        if let Some(removed) = self.removed.as_mut() {
            removed.close();
        }
    }
}

/// One external transaction's view of the index engine.
#[derive(Debug)]
pub struct IndexTransaction {
    data_source: Arc<IndexDataSource>,
    tx_data: AHashMap<IndexIdentifier, TxDataBoth>,
    commands: AHashMap<IndexIdentifier, Vec<IndexCommand>>,
    state: TxState,
}

impl IndexTransaction {
    pub(crate) fn new(data_source: Arc<IndexDataSource>) -> Self {
        IndexTransaction {
            data_source,
            tx_data: AHashMap::new(),
            commands: AHashMap::new(),
            state: TxState::Active,
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state == TxState::Active {
            Ok(())
        } else {
            Err(MuninnError::transaction(format!(
                "operation requires an active transaction, state is {:?}",
                self.state
            )))
        }
    }

    fn both(&mut self, identifier: &IndexIdentifier, index_type: &IndexType) -> &mut TxDataBoth {
        self.tx_data
            .entry(identifier.clone())
            .or_insert_with(|| TxDataBoth::new(index_type.clone()))
    }

    fn queue(&mut self, command: IndexCommand) {
        self.commands
            .entry(command.identifier().clone())
            .or_default()
            .push(command);
    }

    /// Buffer an add. The overlay sees it immediately; the committed index
    /// only after commit.
    pub fn add(
        &mut self,
        identifier: &IndexIdentifier,
        index_type: &IndexType,
        entity_id: i64,
        key: &str,
        value: &str,
    ) -> Result<()> {
        self.ensure_active()?;
        let both = self.both(identifier, index_type);
        if let Some(removed) = both.removed(false) {
            removed.remove(entity_id, key, value)?;
        }
        if let Some(added) = both.added(true) {
            added.add(entity_id, key, value)?;
        }
        self.queue(IndexCommand::add(identifier.clone(), entity_id, key, value));
        Ok(())
    }

    /// Buffer a remove of one (entity, key, value) triple.
    pub fn remove(
        &mut self,
        identifier: &IndexIdentifier,
        index_type: &IndexType,
        entity_id: i64,
        key: &str,
        value: &str,
    ) -> Result<()> {
        self.ensure_active()?;
        let both = self.both(identifier, index_type);
        if let Some(added) = both.added(false) {
            added.remove(entity_id, key, value)?;
        }
        if let Some(removed) = both.removed(true) {
            removed.add(entity_id, key, value)?;
        }
        self.queue(IndexCommand::remove(
            identifier.clone(),
            entity_id,
            key,
            value,
        ));
        Ok(())
    }

    /// Buffer a bulk remove of everything matching a query.
    pub fn remove_by_query(
        &mut self,
        identifier: &IndexIdentifier,
        index_type: &IndexType,
        query: Query,
    ) -> Result<()> {
        self.ensure_active()?;
        let both = self.both(identifier, index_type);
        if let Some(added) = both.added(false) {
            added.remove_query(&query)?;
        }
        if let Some(removed) = both.removed(true) {
            removed.add_query(query.clone())?;
        }
        self.queue(IndexCommand::remove_query(identifier.clone(), &query));
        Ok(())
    }

    /// Entity ids added to an index by this transaction, matching `query`.
    pub fn added_ids(
        &mut self,
        identifier: &IndexIdentifier,
        query: &Query,
    ) -> Result<AHashSet<i64>> {
        match self
            .tx_data
            .get_mut(identifier)
            .and_then(|both| both.added(false))
        {
            Some(added) => added.entity_ids(query),
            None => Ok(AHashSet::new()),
        }
    }

    /// Entity ids removed from an index by this transaction, matching
    /// `query`.
    pub fn removed_ids(
        &mut self,
        identifier: &IndexIdentifier,
        query: &Query,
    ) -> Result<AHashSet<i64>> {
        match self
            .tx_data
            .get_mut(identifier)
            .and_then(|both| both.removed(false))
        {
            Some(removed) => removed.entity_ids(query),
            None => Ok(AHashSet::new()),
        }
    }

    /// The combined bulk-removal query recorded against an index, if any.
    pub fn extra_remove_query(&self, identifier: &IndexIdentifier) -> Option<Query> {
        self.tx_data
            .get(identifier)
            .and_then(|both| both.removed.as_ref())
            .and_then(TxDataHolder::extra_query)
    }

    /// Whether this transaction has buffered no mutations at all.
    pub fn is_read_only(&self) -> bool {
        self.commands.values().all(Vec::is_empty)
    }

    fn close_tx_data(&mut self) {
        for both in self.tx_data.values_mut() {
            both.close();
        }
        self.tx_data.clear();
    }

    fn do_prepare(&mut self) -> Result<()> {
        self.ensure_active()?;
        for commands in self.commands.values() {
            for command in commands {
                self.data_source.log_command(command)?;
            }
        }
        self.data_source.flush_log()?;
        self.state = TxState::Prepared;
        Ok(())
    }

    fn do_commit(&mut self) -> Result<()> {
        if self.state != TxState::Active && self.state != TxState::Prepared {
            return Err(MuninnError::transaction(format!(
                "cannot commit from state {:?}",
                self.state
            )));
        }

        let data_source = Arc::clone(&self.data_source);
        let _write_guard = data_source.write_lock();
        for (identifier, commands) in &self.commands {
            if commands.is_empty() {
                continue;
            }
            let index_type = data_source.index_type(identifier)?;
            let mut writer = data_source.index_writer(identifier)?;

            let adds = commands
                .iter()
                .filter(|command| matches!(command, IndexCommand::Add(_)))
                .count();
            writer.reserve(adds);

            for command in commands {
                match command {
                    IndexCommand::Add(data) => {
                        data_source.apply_add(&mut writer, &index_type, data);
                    }
                    IndexCommand::Remove(data) => {
                        data_source.apply_remove(&mut writer, &index_type, data);
                    }
                    IndexCommand::RemoveQuery(data) => {
                        let query = Query::parse(None, &data.value)?;
                        data_source.apply_remove_query(&mut writer, &query);
                    }
                }
            }
            writer.close()?;
            data_source.invalidate_searcher(identifier)?;
        }
        self.close_tx_data();
        self.commands.clear();
        self.state = TxState::Committed;
        Ok(())
    }

    fn do_rollback(&mut self) -> Result<()> {
        if self.state != TxState::Active && self.state != TxState::Prepared {
            return Err(MuninnError::transaction(format!(
                "cannot roll back from state {:?}",
                self.state
            )));
        }
        self.commands.clear();
        self.close_tx_data();
        self.state = TxState::RolledBack;
        Ok(())
    }

    fn do_inject(&mut self, command: IndexCommand) -> Result<()> {
        self.ensure_active()?;
        self.queue(command);
        Ok(())
    }
}

impl XaParticipant for IndexTransaction {
    fn prepare(&mut self) -> Result<()> {
        self.do_prepare()
    }

    fn commit(&mut self) -> Result<()> {
        self.do_commit()
    }

    fn rollback(&mut self) -> Result<()> {
        self.do_rollback()
    }

    fn inject(&mut self, command: IndexCommand) -> Result<()> {
        self.do_inject(command)
    }
}

impl Drop for IndexTransaction {
    fn drop(&mut self) {
        // Overlay resources must not outlive an abandoned transaction.
        self.close_tx_data();
    }
}
