//! Unit of work: pending adds, changes and removals saved together.
//!
//! # Responsibility
//! - Track registered items with the handler that persists each of them.
//! - Flush every registration in one transaction on `save_changes`.
//!
//! # Invariants
//! - Save order is all additions, then all changes, then all removals,
//!   each group in first-registration order.
//! - One entity identity lives in at most one registry.
//! - A failed save leaves every registry untouched and the pending
//!   command queue empty.

use crate::config::ConfigError;
use crate::db::{StorageContext, StoreError, StoreResult};
use crate::model::Entity;
use log::{debug, error, info};
use registry::{EntityIdentity, Registration, Registry};
use rusqlite::types::Value;
use std::cell::{Cell, RefCell, RefMut};
use std::rc::Rc;
use std::time::Instant;

mod registry;

const UNIT_OF_WORK_OBJECT: &str = "UnitOfWork";

/// Persists one entity type on behalf of a unit of work.
///
/// Implementations only queue commands on `storage`; the unit of work
/// executes the queue once every handler has run.
pub trait UnitOfWorkHandler<T> {
    fn save_added_item(&self, storage: &StorageContext, item: &T) -> StoreResult<()>;
    fn save_changed_item(&self, storage: &StorageContext, item: &T) -> StoreResult<()>;
    fn save_removed_item(&self, storage: &StorageContext, item: &T) -> StoreResult<()>;
}

/// Pending operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Changed => "changed",
            Self::Removed => "removed",
        }
    }
}

/// Batches writes against one storage context.
///
/// Registration rules when one entity identity is registered more than
/// once before a save:
/// - same kind again: item and handler are replaced (last wins)
/// - added, then changed: stays added with the latest item
/// - added, then removed: both registrations are dropped
/// - changed or removed, then added: becomes changed
/// - any other pair: the later registration replaces the earlier one
///
/// Entities with a database-generated key only get a key identity once
/// that key is assigned; changing or removing one before then is an
/// argument error.
pub struct UnitOfWork {
    storage: Rc<StorageContext>,
    owns_storage: bool,
    added: RefCell<Registry>,
    changed: RefCell<Registry>,
    removed: RefCell<Registry>,
    next_transient: Cell<u64>,
    disposed: Cell<bool>,
}

impl UnitOfWork {
    /// Creates a unit of work that owns `storage` and disposes it with
    /// itself.
    pub fn new(storage: StorageContext) -> Self {
        Self::build(Rc::new(storage), true)
    }

    /// Creates a unit of work over a storage context shared with other
    /// owners. Disposing the unit of work leaves the context alone.
    pub fn with_shared_storage(storage: Rc<StorageContext>) -> Self {
        Self::build(storage, false)
    }

    fn build(storage: Rc<StorageContext>, owns_storage: bool) -> Self {
        Self {
            storage,
            owns_storage,
            added: RefCell::new(Registry::default()),
            changed: RefCell::new(Registry::default()),
            removed: RefCell::new(Registry::default()),
            next_transient: Cell::new(0),
            disposed: Cell::new(false),
        }
    }

    pub fn storage(&self) -> &StorageContext {
        &self.storage
    }

    pub fn register_added<T: Entity>(
        &self,
        item: &T,
        handler: Rc<dyn UnitOfWorkHandler<T>>,
    ) -> StoreResult<()> {
        self.register(ChangeKind::Added, item, handler)
    }

    pub fn register_changed<T: Entity>(
        &self,
        item: &T,
        handler: Rc<dyn UnitOfWorkHandler<T>>,
    ) -> StoreResult<()> {
        self.register(ChangeKind::Changed, item, handler)
    }

    pub fn register_removed<T: Entity>(
        &self,
        item: &T,
        handler: Rc<dyn UnitOfWorkHandler<T>>,
    ) -> StoreResult<()> {
        self.register(ChangeKind::Removed, item, handler)
    }

    /// Number of registrations that the next save will process.
    pub fn pending_count(&self) -> usize {
        [ChangeKind::Added, ChangeKind::Changed, ChangeKind::Removed]
            .into_iter()
            .map(|kind| self.pending_of(kind))
            .sum()
    }

    pub fn pending_of(&self, kind: ChangeKind) -> usize {
        self.registry(kind).try_borrow().map_or(0, |registry| registry.len())
    }

    pub fn has_changes(&self) -> bool {
        self.pending_count() > 0
    }

    /// Saves every registration inside one transaction and returns how
    /// many registrations were processed.
    ///
    /// Joins a transaction the caller already started on the storage
    /// context instead of committing it. On failure the transaction is
    /// rolled back, queued commands are dropped and every registration is
    /// kept, so the caller can retry.
    pub fn save_changes(&self) -> StoreResult<usize> {
        self.ensure_not_disposed()?;
        let started_at = Instant::now();
        let _connection = self.storage.open_scope()?;

        let processed = self.pending_count();
        if processed == 0 && self.storage.pending_command_count() == 0 {
            debug!("event=save_changes module=uow status=ok processed=0 reason=no_changes");
            return Ok(0);
        }

        info!(
            "event=save_changes module=uow status=start added={} changed={} removed={}",
            self.pending_of(ChangeKind::Added),
            self.pending_of(ChangeKind::Changed),
            self.pending_of(ChangeKind::Removed)
        );
        match self.flush() {
            Ok(affected) => {
                self.clear_registries()?;
                info!(
                    "event=save_changes module=uow status=ok processed={} affected={} duration_ms={}",
                    processed,
                    affected,
                    started_at.elapsed().as_millis()
                );
                Ok(processed)
            }
            Err(err) => {
                let dropped = self.storage.discard_pending();
                error!(
                    "event=save_changes module=uow status=error dropped_commands={} duration_ms={} error={}",
                    dropped,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Abandons every registration without touching the database.
    pub fn clear(&self) -> StoreResult<()> {
        self.ensure_not_disposed()?;
        self.clear_registries()
    }

    /// Drops every registration and, when this unit of work owns its
    /// storage context, disposes that too.
    pub fn dispose(&self) {
        if self.disposed.get() {
            return;
        }
        let abandoned = self.pending_count();
        if let Err(err) = self.clear_registries() {
            error!("event=uow_dispose module=uow status=error error={err}");
        }
        if self.owns_storage {
            self.storage.dispose();
        }
        self.disposed.set(true);
        debug!("event=uow_dispose module=uow status=ok abandoned={abandoned}");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    fn register<T: Entity>(
        &self,
        kind: ChangeKind,
        item: &T,
        handler: Rc<dyn UnitOfWorkHandler<T>>,
    ) -> StoreResult<()> {
        self.ensure_not_disposed()?;
        let identity = self.identity_of(kind, item)?;
        let pending = Box::new(Registration::new(item.clone(), handler));

        let mut added = self.borrow_registry(ChangeKind::Added)?;
        let mut changed = self.borrow_registry(ChangeKind::Changed)?;
        let mut removed = self.borrow_registry(ChangeKind::Removed)?;

        let outcome = match kind {
            ChangeKind::Added => {
                let was_changed = changed.remove(&identity);
                let was_removed = removed.remove(&identity);
                if was_changed || was_removed {
                    changed.upsert(identity, pending);
                    "as_changed"
                } else if added.upsert(identity, pending) {
                    "replaced"
                } else {
                    "queued"
                }
            }
            ChangeKind::Changed => {
                if added.contains(&identity) {
                    added.upsert(identity, pending);
                    "merged_into_added"
                } else {
                    removed.remove(&identity);
                    if changed.upsert(identity, pending) {
                        "replaced"
                    } else {
                        "queued"
                    }
                }
            }
            ChangeKind::Removed => {
                if added.remove(&identity) {
                    "cancelled_add"
                } else {
                    changed.remove(&identity);
                    if removed.upsert(identity, pending) {
                        "replaced"
                    } else {
                        "queued"
                    }
                }
            }
        };
        debug!(
            "event=uow_register module=uow status=ok kind={} entity={} outcome={}",
            kind.as_str(),
            T::entity_name(),
            outcome
        );
        Ok(())
    }

    fn identity_of<T: Entity>(&self, kind: ChangeKind, item: &T) -> StoreResult<EntityIdentity> {
        let configuration =
            self.storage
                .entity_configuration::<T>()
                .ok_or(ConfigError::NotMapped {
                    entity: T::entity_name(),
                })?;
        let keys = configuration.key_values(item);
        let generated = keys.iter().any(|(property, _)| property.is_generated());
        if keys.is_empty() || (generated && kind == ChangeKind::Added) {
            let sequence = self.next_transient.get();
            self.next_transient.set(sequence + 1);
            return Ok(EntityIdentity::transient::<T>(sequence));
        }
        // An unassigned generated key names no row and cannot be matched
        // with the transient identity of its pending add.
        if let Some((property, _)) = keys.iter().find(|(property, value)| {
            property.is_generated()
                && (*value == Value::Null || value == property.default_value())
        }) {
            return Err(StoreError::Argument(format!(
                "cannot register `{}` as {}: generated key {} is unassigned until the entity is saved",
                T::entity_name(),
                kind.as_str(),
                property.property_name()
            )));
        }

        let names: Vec<&str> = keys.iter().map(|(property, _)| property.property_name()).collect();
        let values = keys.iter().map(|(_, value)| value.clone()).collect();
        EntityIdentity::from_key_values::<T>(values).ok_or_else(|| {
            StoreError::Argument(format!(
                "key {} of `{}` must not be null",
                names.join(", "),
                T::entity_name()
            ))
        })
    }

    fn flush(&self) -> StoreResult<usize> {
        let transaction = self.storage.transaction_context()?;
        for kind in [ChangeKind::Added, ChangeKind::Changed, ChangeKind::Removed] {
            let registry = self
                .registry(kind)
                .try_borrow()
                .map_err(|_| registry_busy())?;
            for pending in registry.iter() {
                pending.dispatch(kind, &self.storage)?;
            }
        }
        let affected = self.storage.execute_pending()?;
        transaction.commit()?;
        Ok(affected)
    }

    fn clear_registries(&self) -> StoreResult<()> {
        for kind in [ChangeKind::Added, ChangeKind::Changed, ChangeKind::Removed] {
            self.borrow_registry(kind)?.clear();
        }
        Ok(())
    }

    fn registry(&self, kind: ChangeKind) -> &RefCell<Registry> {
        match kind {
            ChangeKind::Added => &self.added,
            ChangeKind::Changed => &self.changed,
            ChangeKind::Removed => &self.removed,
        }
    }

    fn borrow_registry(&self, kind: ChangeKind) -> StoreResult<RefMut<'_, Registry>> {
        self.registry(kind).try_borrow_mut().map_err(|_| registry_busy())
    }

    fn ensure_not_disposed(&self) -> StoreResult<()> {
        if self.disposed.get() {
            return Err(StoreError::Disposed(UNIT_OF_WORK_OBJECT));
        }
        Ok(())
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn registry_busy() -> StoreError {
    StoreError::InvalidState("unit of work registries are in use by a save".to_string())
}

#[cfg(test)]
mod tests {
    use super::{ChangeKind, UnitOfWork, UnitOfWorkHandler};
    use crate::config::{EntityConfiguration, EntityConfigurationCollection};
    use crate::db::{StorageContext, StorageOptions, StoreError, StoreResult};
    use crate::model::Entity;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, Default)]
    struct Item {
        id: i64,
        label: String,
    }

    impl Entity for Item {}

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<String>>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl UnitOfWorkHandler<Item> for Recorder {
        fn save_added_item(&self, _storage: &StorageContext, item: &Item) -> StoreResult<()> {
            self.calls.borrow_mut().push(format!("add:{}", item.label));
            Ok(())
        }

        fn save_changed_item(&self, _storage: &StorageContext, item: &Item) -> StoreResult<()> {
            self.calls.borrow_mut().push(format!("change:{}", item.label));
            Ok(())
        }

        fn save_removed_item(&self, _storage: &StorageContext, item: &Item) -> StoreResult<()> {
            self.calls.borrow_mut().push(format!("remove:{}", item.label));
            Ok(())
        }
    }

    fn unit_of_work() -> UnitOfWork {
        let mut configurations = EntityConfigurationCollection::new();
        configurations.add(
            EntityConfiguration::<Item>::new(|entity| {
                entity.to_table("Items");
                entity.property("Id", |i: &Item| &i.id, |i, v| i.id = v);
                entity.property("Label", |i: &Item| &i.label, |i, v| i.label = v);
                entity.has_key(&["Id"]);
            })
            .expect("item configuration"),
        );
        UnitOfWork::new(StorageContext::new(StorageOptions::in_memory(), configurations))
    }

    fn item(id: i64, label: &str) -> Item {
        Item {
            id,
            label: label.to_string(),
        }
    }

    #[test]
    fn saves_in_kind_then_registration_order() {
        let uow = unit_of_work();
        let recorder = Rc::new(Recorder::default());
        uow.register_removed(&item(1, "r1"), recorder.clone()).unwrap();
        uow.register_changed(&item(2, "c2"), recorder.clone()).unwrap();
        uow.register_added(&item(3, "a3"), recorder.clone()).unwrap();
        uow.register_added(&item(4, "a4"), recorder.clone()).unwrap();

        assert_eq!(uow.save_changes().unwrap(), 4);
        assert_eq!(recorder.calls(), vec!["add:a3", "add:a4", "change:c2", "remove:r1"]);
        assert!(!uow.has_changes());
    }

    #[test]
    fn last_handler_wins_for_same_kind() {
        let uow = unit_of_work();
        let first = Rc::new(Recorder::default());
        let second = Rc::new(Recorder::default());
        uow.register_changed(&item(7, "old"), first.clone()).unwrap();
        uow.register_changed(&item(7, "new"), second.clone()).unwrap();

        assert_eq!(uow.pending_count(), 1);
        assert_eq!(uow.save_changes().unwrap(), 1);
        assert!(first.calls().is_empty());
        assert_eq!(second.calls(), vec!["change:new"]);
    }

    #[test]
    fn cross_kind_registrations_collapse() {
        let uow = unit_of_work();
        let recorder = Rc::new(Recorder::default());

        uow.register_added(&item(1, "draft"), recorder.clone()).unwrap();
        uow.register_changed(&item(1, "final"), recorder.clone()).unwrap();
        assert_eq!(uow.pending_of(ChangeKind::Added), 1);
        assert_eq!(uow.pending_of(ChangeKind::Changed), 0);

        uow.register_added(&item(2, "temp"), recorder.clone()).unwrap();
        uow.register_removed(&item(2, "temp"), recorder.clone()).unwrap();

        uow.register_removed(&item(3, "back"), recorder.clone()).unwrap();
        uow.register_added(&item(3, "back"), recorder.clone()).unwrap();

        uow.register_changed(&item(4, "gone"), recorder.clone()).unwrap();
        uow.register_removed(&item(4, "gone"), recorder.clone()).unwrap();

        assert_eq!(uow.pending_count(), 3);
        uow.save_changes().unwrap();
        assert_eq!(
            recorder.calls(),
            vec!["add:final", "change:back", "remove:gone"]
        );
    }

    #[test]
    fn empty_save_touches_nothing() {
        let uow = unit_of_work();
        assert_eq!(uow.save_changes().unwrap(), 0);
        let stats = uow.storage().statistics();
        assert_eq!(stats.connections_opened, 1);
        assert_eq!(stats.connections_closed, 1);
        assert_eq!(stats.commands_executed, 0);
        assert_eq!(stats.transactions_committed, 0);
    }

    #[test]
    fn unmapped_types_are_rejected() {
        #[derive(Debug, Clone, Default)]
        struct Stray;
        impl Entity for Stray {}
        struct Ignore;
        impl UnitOfWorkHandler<Stray> for Ignore {
            fn save_added_item(&self, _: &StorageContext, _: &Stray) -> StoreResult<()> {
                Ok(())
            }
            fn save_changed_item(&self, _: &StorageContext, _: &Stray) -> StoreResult<()> {
                Ok(())
            }
            fn save_removed_item(&self, _: &StorageContext, _: &Stray) -> StoreResult<()> {
                Ok(())
            }
        }

        let uow = unit_of_work();
        let err = uow.register_added(&Stray, Rc::new(Ignore)).unwrap_err();
        assert!(matches!(err, StoreError::Configuration(_)));
    }

    #[test]
    fn disposed_unit_of_work_fails_fast() {
        let uow = unit_of_work();
        let recorder = Rc::new(Recorder::default());
        uow.register_added(&item(1, "x"), recorder.clone()).unwrap();
        uow.dispose();

        assert!(uow.is_disposed());
        assert!(uow.storage().is_disposed());
        assert!(matches!(uow.save_changes(), Err(StoreError::Disposed("UnitOfWork"))));
        assert!(matches!(
            uow.register_added(&item(2, "y"), recorder),
            Err(StoreError::Disposed(_))
        ));
    }
}
