//! Storage context: connection lifetime, command queue and registry.
//!
//! # Responsibility
//! - Open the connection lazily and keep it open while any caller holds it.
//! - Queue write commands until a unit of work flushes them.
//! - Expose the entity configuration registry built at construction.
//!
//! # Invariants
//! - `open_count == 0` exactly when no physical connection exists.
//! - `transaction_exists()` is true from `BEGIN` until commit or rollback.
//! - Guards only release the connection they were handed; a guard that
//!   outlives a forced close is inert.
//! - Not designed for concurrent use; state is plain `Cell`/`RefCell`.

use super::open::open_connection;
use super::transaction::TransactionScope;
use super::{CommandContext, StorageOptions, StoreError, StoreResult};
use crate::config::{EntityConfiguration, EntityConfigurationCollection, EntityMetadata};
use crate::model::Entity;
use crate::query::{Dialect, SqliteDialect};
use log::{debug, error, info, trace, warn};
use rusqlite::{Connection, Row};
use std::any::TypeId;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Instant;

const STORAGE_OBJECT: &str = "StorageContext";

/// Physical connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Open,
}

/// Lifetime counters of one storage context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub commands_executed: u64,
    pub transactions_committed: u64,
    pub transactions_rolled_back: u64,
}

/// Owner of the connection, the pending command queue and the entity
/// configuration registry.
pub struct StorageContext {
    options: StorageOptions,
    dialect: Box<dyn Dialect>,
    configurations: EntityConfigurationCollection,
    connection: RefCell<Option<Connection>>,
    open_count: Cell<usize>,
    generation: Cell<u64>,
    active_transaction: Cell<Option<Instant>>,
    pending: RefCell<Vec<CommandContext>>,
    stats: Cell<StorageStats>,
    disposed: Cell<bool>,
}

/// Keeps the storage context open; closes (non-forced) on drop.
pub struct OpenScope<'a> {
    storage: &'a StorageContext,
    generation: u64,
}

impl OpenScope<'_> {
    /// Whether the connection this scope opened is still the live one.
    pub(crate) fn is_current(&self) -> bool {
        self.storage.open_count.get() > 0 && self.storage.generation.get() == self.generation
    }
}

impl Drop for OpenScope<'_> {
    fn drop(&mut self) {
        if !self.is_current() {
            trace!("event=db_close_ref module=db status=skipped reason=stale_scope");
            return;
        }
        if let Err(err) = self.storage.close(false) {
            warn!("event=db_close module=db status=error error={err}");
        }
    }
}

impl StorageContext {
    pub fn new(options: StorageOptions, configurations: EntityConfigurationCollection) -> Self {
        Self::with_dialect(options, configurations, SqliteDialect)
    }

    pub fn with_dialect(
        options: StorageOptions,
        configurations: EntityConfigurationCollection,
        dialect: impl Dialect + 'static,
    ) -> Self {
        debug!(
            "event=storage_create module=db status=ok entities={} dialect={}",
            configurations.len(),
            dialect.name()
        );
        Self {
            options,
            dialect: Box::new(dialect),
            configurations,
            connection: RefCell::new(None),
            open_count: Cell::new(0),
            generation: Cell::new(0),
            active_transaction: Cell::new(None),
            pending: RefCell::new(Vec::new()),
            stats: Cell::new(StorageStats::default()),
            disposed: Cell::new(false),
        }
    }

    pub fn from_connection_string(
        connection_string: &str,
        configurations: EntityConfigurationCollection,
    ) -> StoreResult<Self> {
        let options = StorageOptions::from_connection_string(connection_string)?;
        Ok(Self::new(options, configurations))
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn configurations(&self) -> &EntityConfigurationCollection {
        &self.configurations
    }

    /// Configuration for `T`, or `None` when `T` is not mapped.
    pub fn entity_configuration<T: Entity>(&self) -> Option<Rc<EntityConfiguration<T>>> {
        self.configurations.get::<T>()
    }

    pub fn entity_configuration_by_type(&self, type_id: TypeId) -> Option<Rc<dyn EntityMetadata>> {
        self.configurations.get_by_type(type_id)
    }

    pub fn state(&self) -> ConnectionState {
        if self.open_count.get() == 0 {
            ConnectionState::Closed
        } else {
            ConnectionState::Open
        }
    }

    pub fn open_count(&self) -> usize {
        self.open_count.get()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    pub fn statistics(&self) -> StorageStats {
        self.stats.get()
    }

    /// Increments the open count, connecting on the 0 -> 1 transition.
    pub fn open(&self) -> StoreResult<()> {
        self.ensure_not_disposed()?;
        let count = self.open_count.get();
        if count == 0 {
            let conn = open_connection(&self.options)?;
            let mut slot = self.connection.try_borrow_mut().map_err(|_| connection_busy())?;
            *slot = Some(conn);
            self.generation.set(self.generation.get() + 1);
            self.record(|stats| stats.connections_opened += 1);
        }
        self.open_count.set(count + 1);
        trace!("event=db_open_ref module=db status=ok open_count={}", count + 1);
        Ok(())
    }

    /// Decrements the open count, disconnecting on the 1 -> 0 transition.
    ///
    /// `force_close` disconnects immediately whatever the count, rolling
    /// back an active transaction. Closing an already closed context is a
    /// no-op.
    pub fn close(&self, force_close: bool) -> StoreResult<()> {
        self.ensure_not_disposed()?;
        let count = self.open_count.get();
        if count == 0 {
            return Ok(());
        }
        if count > 1 && !force_close {
            self.open_count.set(count - 1);
            trace!("event=db_close_ref module=db status=ok open_count={}", count - 1);
            return Ok(());
        }
        self.close_connection(force_close)
    }

    /// Opens the context for the lifetime of the returned guard.
    pub fn open_scope(&self) -> StoreResult<OpenScope<'_>> {
        self.open()?;
        Ok(OpenScope {
            storage: self,
            generation: self.generation.get(),
        })
    }

    pub fn transaction_exists(&self) -> bool {
        self.active_transaction.get().is_some()
    }

    /// Starts a transaction, or joins the one already active.
    ///
    /// The returned scope keeps the connection open. Only the scope that
    /// started the transaction commits or rolls it back; dropping it
    /// without `commit` rolls back.
    pub fn transaction_context(&self) -> StoreResult<TransactionScope<'_>> {
        self.ensure_not_disposed()?;
        TransactionScope::begin(self)
    }

    pub fn create_command(&self, sql: impl Into<String>) -> StoreResult<CommandContext> {
        self.ensure_not_disposed()?;
        Ok(CommandContext::new(sql.into(), self.dialect.parameter_prefix()))
    }

    /// Queues a command for the next `execute_pending`.
    pub fn add_command(&self, command: CommandContext) -> StoreResult<()> {
        self.ensure_not_disposed()?;
        let mut pending = self.pending.try_borrow_mut().map_err(|_| queue_busy())?;
        trace!("event=command_queue module=db status=ok sql={}", command.sql());
        pending.push(command);
        Ok(())
    }

    pub fn pending_command_count(&self) -> usize {
        self.pending.try_borrow().map_or(0, |pending| pending.len())
    }

    /// Copy of the queued commands, oldest first.
    pub fn pending_commands(&self) -> StoreResult<Vec<CommandContext>> {
        let pending = self.pending.try_borrow().map_err(|_| queue_busy())?;
        Ok(pending.clone())
    }

    /// Drops every queued command; returns how many were dropped.
    pub fn discard_pending(&self) -> usize {
        match self.pending.try_borrow_mut() {
            Ok(mut pending) => {
                let dropped = pending.len();
                pending.clear();
                dropped
            }
            Err(_) => 0,
        }
    }

    /// Executes every queued command in queue order and empties the queue.
    ///
    /// The queue is emptied even when a command fails; the failing driver
    /// error is returned unmodified.
    pub fn execute_pending(&self) -> StoreResult<usize> {
        self.ensure_not_disposed()?;
        let commands = {
            let mut pending = self.pending.try_borrow_mut().map_err(|_| queue_busy())?;
            std::mem::take(&mut *pending)
        };
        if commands.is_empty() {
            return Ok(0);
        }

        self.with_connection(|conn| {
            let mut affected = 0;
            for command in &commands {
                trace!("event=command_execute module=db status=start sql={}", command.sql());
                affected += command.execute_on(conn)?;
                self.record(|stats| stats.commands_executed += 1);
            }
            debug!(
                "event=batch_execute module=db status=ok commands={} affected={}",
                commands.len(),
                affected
            );
            Ok(affected)
        })
    }

    /// Executes one command now and returns the affected-row count.
    pub fn execute(&self, command: &CommandContext) -> StoreResult<usize> {
        self.ensure_not_disposed()?;
        self.with_connection(|conn| {
            trace!("event=command_execute module=db status=start sql={}", command.sql());
            let affected = command.execute_on(conn)?;
            self.record(|stats| stats.commands_executed += 1);
            Ok(affected)
        })
    }

    /// Runs a query and maps every row, in a forward-only pass.
    pub fn query<R, F>(&self, command: &CommandContext, mut map: F) -> StoreResult<Vec<R>>
    where
        F: FnMut(&Row<'_>) -> StoreResult<R>,
    {
        self.ensure_not_disposed()?;
        self.with_connection(|conn| {
            let mut statement = command.prepare_on(conn)?;
            let mut rows = command.query_with(&mut statement)?;
            let mut mapped = Vec::new();
            while let Some(row) = rows.next()? {
                mapped.push(map(row)?);
            }
            self.record(|stats| stats.commands_executed += 1);
            Ok(mapped)
        })
    }

    /// Runs a query and maps only its first row.
    pub fn query_first<R, F>(&self, command: &CommandContext, map: F) -> StoreResult<Option<R>>
    where
        F: FnOnce(&Row<'_>) -> StoreResult<R>,
    {
        self.ensure_not_disposed()?;
        self.with_connection(|conn| {
            let mut statement = command.prepare_on(conn)?;
            let mut rows = command.query_with(&mut statement)?;
            let first = match rows.next()? {
                Some(row) => Some(map(row)?),
                None => None,
            };
            self.record(|stats| stats.commands_executed += 1);
            Ok(first)
        })
    }

    /// Runs a raw SQL script, e.g. caller-owned schema set-up.
    pub fn execute_batch(&self, sql: &str) -> StoreResult<()> {
        self.ensure_not_disposed()?;
        self.with_connection(|conn| {
            conn.execute_batch(sql)?;
            Ok(())
        })
    }

    pub fn last_insert_rowid(&self) -> StoreResult<i64> {
        self.with_connection(|conn| Ok(conn.last_insert_rowid()))
    }

    /// Force-closes the connection and marks the context disposed. Every
    /// later operation fails with `StoreError::Disposed`.
    pub fn dispose(&self) {
        if self.disposed.get() {
            return;
        }
        let dropped = self.discard_pending();
        if self.open_count.get() > 0 {
            if let Err(err) = self.close_connection(true) {
                warn!("event=storage_dispose module=db status=error error={err}");
            }
        }
        self.disposed.set(true);
        debug!("event=storage_dispose module=db status=ok dropped_commands={dropped}");
    }

    pub(crate) fn begin_transaction(&self) -> StoreResult<()> {
        self.with_connection(|conn| {
            conn.execute_batch(self.options.transaction_mode.begin_sql())?;
            Ok(())
        })?;
        self.active_transaction.set(Some(Instant::now()));
        debug!(
            "event=transaction_begin module=db status=ok mode={:?}",
            self.options.transaction_mode
        );
        Ok(())
    }

    pub(crate) fn commit_transaction(&self) -> StoreResult<()> {
        let Some(started_at) = self.active_transaction.get() else {
            return Ok(());
        };
        let committed = self.with_connection(|conn| {
            conn.execute_batch("COMMIT;")?;
            Ok(())
        });
        match committed {
            Ok(()) => {
                self.active_transaction.set(None);
                self.record(|stats| stats.transactions_committed += 1);
                info!(
                    "event=transaction_commit module=db status=ok duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=transaction_commit module=db status=error duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                if let Err(rollback_err) = self.rollback_transaction() {
                    warn!("event=transaction_rollback module=db status=error error={rollback_err}");
                }
                Err(err)
            }
        }
    }

    pub(crate) fn rollback_transaction(&self) -> StoreResult<()> {
        let Some(started_at) = self.active_transaction.take() else {
            return Ok(());
        };
        self.record(|stats| stats.transactions_rolled_back += 1);
        let result = self.with_connection(|conn| {
            // SQLite may already have rolled back on its own after some errors.
            if !conn.is_autocommit() {
                conn.execute_batch("ROLLBACK;")?;
            }
            Ok(())
        });
        warn!(
            "event=transaction_rollback module=db status={} duration_ms={}",
            if result.is_ok() { "ok" } else { "error" },
            started_at.elapsed().as_millis()
        );
        result
    }

    pub(crate) fn with_connection<R>(
        &self,
        run: impl FnOnce(&Connection) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let _scope = self.open_scope()?;
        let slot = self.connection.try_borrow().map_err(|_| connection_busy())?;
        let conn = slot
            .as_ref()
            .ok_or_else(|| StoreError::InvalidState("connection is not open".to_string()))?;
        let result = run(conn);
        drop(slot);
        result
    }

    fn close_connection(&self, forced: bool) -> StoreResult<()> {
        let mut slot = self.connection.try_borrow_mut().map_err(|_| connection_busy())?;
        let Some(conn) = slot.take() else {
            self.open_count.set(0);
            return Ok(());
        };
        self.open_count.set(0);

        if let Some(started_at) = self.active_transaction.take() {
            self.record(|stats| stats.transactions_rolled_back += 1);
            if !conn.is_autocommit() {
                if let Err(err) = conn.execute_batch("ROLLBACK;") {
                    warn!("event=transaction_rollback module=db status=error reason=connection_close error={err}");
                }
            }
            warn!(
                "event=transaction_rollback module=db status=ok reason=connection_close duration_ms={}",
                started_at.elapsed().as_millis()
            );
        }

        self.record(|stats| stats.connections_closed += 1);
        match conn.close() {
            Ok(()) => {
                debug!("event=db_close module=db status=ok forced={forced}");
                Ok(())
            }
            Err((_conn, err)) => {
                error!("event=db_close module=db status=error forced={forced} error={err}");
                Err(err.into())
            }
        }
    }

    fn ensure_not_disposed(&self) -> StoreResult<()> {
        if self.disposed.get() {
            return Err(StoreError::Disposed(STORAGE_OBJECT));
        }
        Ok(())
    }

    fn record(&self, update: impl FnOnce(&mut StorageStats)) {
        let mut stats = self.stats.get();
        update(&mut stats);
        self.stats.set(stats);
    }
}

impl Drop for StorageContext {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn connection_busy() -> StoreError {
    StoreError::InvalidState("connection is in use by an active command".to_string())
}

fn queue_busy() -> StoreError {
    StoreError::InvalidState("command queue is in use".to_string())
}
