//! Generic repository over one mapped entity type.
//!
//! # Responsibility
//! - Turn add/change/remove calls into unit-of-work registrations.
//! - Queue one parameterized command per registration when saved.
//! - Run reads eagerly and materialize entities or scalar columns.
//!
//! # Invariants
//! - Writes never touch the database before `UnitOfWork::save_changes`.
//! - Reads never go through the pending command queue.
//! - Text lookups compare `LOWER(column)` with `LOWER(value)` in SQL.

use crate::config::{ConfigError, EntityConfiguration, PropertyConfiguration};
use crate::db::{CommandContext, ParameterCollection, StorageContext, StoreError, StoreResult};
use crate::model::{ColumnType, Entity};
use crate::query::QueryBuilder;
use crate::uow::{UnitOfWork, UnitOfWorkHandler};
use log::debug;
use rusqlite::types::{Type, Value, ValueRef};
use rusqlite::Row;
use std::rc::{Rc, Weak};
use std::time::Instant;

/// Property used by `find_by_name`.
pub const NAME_PROPERTY: &str = "Name";

const UNIT_OF_WORK_OBJECT: &str = "UnitOfWork";

/// Repository for `T`, bound to one unit of work.
///
/// Holds the unit of work weakly; once it is dropped every operation
/// fails with `StoreError::Disposed`.
pub struct Repository<T> {
    unit_of_work: Weak<UnitOfWork>,
    configuration: Rc<EntityConfiguration<T>>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            unit_of_work: self.unit_of_work.clone(),
            configuration: self.configuration.clone(),
        }
    }
}

impl<T: Entity> Repository<T> {
    /// # Errors
    /// - `NotMapped` when `T` has no configuration in the storage context.
    /// - `MissingKey` when the configuration declares no key.
    pub fn new(unit_of_work: &Rc<UnitOfWork>) -> StoreResult<Self> {
        let configuration = unit_of_work
            .storage()
            .entity_configuration::<T>()
            .ok_or(ConfigError::NotMapped {
                entity: T::entity_name(),
            })?;
        if !configuration.has_key() {
            return Err(ConfigError::MissingKey {
                entity: T::entity_name(),
            }
            .into());
        }
        Ok(Self {
            unit_of_work: Rc::downgrade(unit_of_work),
            configuration,
        })
    }

    pub fn configuration(&self) -> &EntityConfiguration<T> {
        &self.configuration
    }

    /// Registers `item` for insertion on the next save.
    pub fn add(&self, item: &T) -> StoreResult<()> {
        self.unit_of_work()?.register_added(item, Rc::new(self.clone()))
    }

    /// Registers `item` for update on the next save.
    ///
    /// # Errors
    /// - `NothingToUpdate` right away when every column is a key or
    ///   generated, instead of failing the later save.
    pub fn change(&self, item: &T) -> StoreResult<()> {
        let unit_of_work = self.unit_of_work()?;
        self.builder(unit_of_work.storage()).update()?;
        unit_of_work.register_changed(item, Rc::new(self.clone()))
    }

    /// Registers `item` for deletion on the next save.
    pub fn remove(&self, item: &T) -> StoreResult<()> {
        let unit_of_work = self.unit_of_work()?;
        self.builder(unit_of_work.storage()).delete()?;
        unit_of_work.register_removed(item, Rc::new(self.clone()))
    }

    /// Loads the entity whose single-column key equals `id`.
    pub fn find_by_id<K: ColumnType>(&self, id: &K) -> StoreResult<Option<T>> {
        let keys = self.configuration.key_properties();
        if keys.len() != 1 {
            return Err(ConfigError::CompositeKeyUnsupported {
                entity: T::entity_name(),
            }
            .into());
        }
        self.find_by_key(&[id.to_value()])
    }

    /// Loads the entity whose key equals `values`, given in key order.
    pub fn find_by_key(&self, values: &[Value]) -> StoreResult<Option<T>> {
        let keys = self.configuration.key_properties();
        if values.len() != keys.len() {
            return Err(StoreError::Argument(format!(
                "`{}` key has {} columns, got {} values",
                T::entity_name(),
                keys.len(),
                values.len()
            )));
        }
        let unit_of_work = self.unit_of_work()?;
        let storage = unit_of_work.storage();
        let mut command = storage.create_command(self.builder(storage).select_by_key()?)?;
        for (property, value) in keys.iter().zip(values) {
            command.bind(property.property_name(), value.clone());
        }
        self.query_one(storage, &command)
    }

    /// Loads the entity whose `Name` equals `name` ignoring ASCII case.
    ///
    /// `None` is answered with `None` without a database round trip.
    pub fn find_by_name(&self, name: Option<&str>) -> StoreResult<Option<T>> {
        match name {
            Some(name) => self.find_one_ignore_case(NAME_PROPERTY, name),
            None => Ok(None),
        }
    }

    /// First entity whose text `property` equals `value` ignoring case.
    ///
    /// Case folding is SQLite's `LOWER()`, which folds ASCII letters only:
    /// `"ADMIN"` finds `"admin"`, but `"ÉQUIPE"` does not find `"équipe"`.
    ///
    /// # Errors
    /// - `Argument` when `value` is empty or whitespace.
    pub fn find_one_ignore_case(&self, property: &str, value: &str) -> StoreResult<Option<T>> {
        if value.trim().is_empty() {
            return Err(StoreError::Argument(format!(
                "lookup value for `{property}` must not be blank"
            )));
        }
        let unit_of_work = self.unit_of_work()?;
        let storage = unit_of_work.storage();
        let sql = self
            .builder(storage)
            .select_where_equals_ignore_case(property)?;
        let mut command = storage.create_command(sql)?;
        command.bind(property, Value::Text(value.to_string()));
        self.query_one(storage, &command)
    }

    /// Every row, ordered by key.
    pub fn find_all(&self) -> StoreResult<Vec<T>> {
        let unit_of_work = self.unit_of_work()?;
        let storage = unit_of_work.storage();
        let command = storage.create_command(self.builder(storage).select_all())?;
        let items = storage.query(&command, |row| Ok(self.configuration.materialize(row)?))?;
        debug!(
            "event=repo_find_all module=repo status=ok entity={} rows={}",
            T::entity_name(),
            items.len()
        );
        Ok(items)
    }

    /// Values of `value_property` on rows whose `filter_property` equals
    /// `filter`, ordered by value.
    pub fn find_values_where<V: ColumnType>(
        &self,
        value_property: &str,
        filter_property: &str,
        filter: Value,
    ) -> StoreResult<Vec<V>> {
        let unit_of_work = self.unit_of_work()?;
        let storage = unit_of_work.storage();
        let sql = self
            .builder(storage)
            .select_values_where(value_property, filter_property)?;
        let mut command = storage.create_command(sql)?;
        command.bind(filter_property, filter);
        storage.query(&command, |row| Ok(read_scalar::<V>(row)?))
    }

    /// Values of `value_property` on rows referenced through link entity
    /// `L`: rows whose key equals `L.link_target` on link rows where
    /// `L.link_filter` equals `filter`.
    ///
    /// ```ignore
    /// // role names of one user through the UserRoles link table
    /// let names: Vec<String> =
    ///     roles.find_values_through::<UserRole, String>("Name", "RoleId", "UserId", user_id.to_value())?;
    /// ```
    pub fn find_values_through<L: Entity, V: ColumnType>(
        &self,
        value_property: &str,
        link_target: &str,
        link_filter: &str,
        filter: Value,
    ) -> StoreResult<Vec<V>> {
        let unit_of_work = self.unit_of_work()?;
        let storage = unit_of_work.storage();
        let link = storage
            .entity_configuration::<L>()
            .ok_or(ConfigError::NotMapped {
                entity: L::entity_name(),
            })?;
        let sql = self.builder(storage).select_values_through::<L>(
            value_property,
            &*link,
            link_target,
            link_filter,
        )?;
        let mut command = storage.create_command(sql)?;
        command.bind(link_filter, filter);
        storage.query(&command, |row| Ok(read_scalar::<V>(row)?))
    }

    /// Inserts `items` right away, one execution per item inside one
    /// transaction, bypassing the unit of work queue.
    ///
    /// When the key is database-generated, each item receives the row id
    /// produced by its insert.
    pub fn insert_now(&self, items: &mut [T]) -> StoreResult<usize> {
        let started_at = Instant::now();
        let unit_of_work = self.unit_of_work()?;
        let storage = unit_of_work.storage();
        let mut command = storage.create_command(self.builder(storage).insert())?;
        let insert_properties = self.configuration.insert_properties();
        let generated_key = self
            .configuration
            .key_properties()
            .into_iter()
            .find(|property| property.is_generated());

        let assign_key = |item: &mut T, row_id: i64| -> StoreResult<()> {
            let Some(key) = generated_key else {
                return Ok(());
            };
            self.configuration
                .assign(item, key.property_name(), ValueRef::Integer(row_id))?
                .map_err(|err| {
                    StoreError::Execution(rusqlite::Error::FromSqlConversionFailure(
                        0,
                        Type::Integer,
                        Box::new(err),
                    ))
                })
        };

        let transaction = storage.transaction_context()?;
        let affected = command.set_parameters_for_each(
            storage,
            items,
            |parameters, item| self.bind_properties(parameters, item, &insert_properties),
            generated_key.map(|_| &assign_key as &dyn Fn(&mut T, i64) -> StoreResult<()>),
        )?;
        transaction.commit()?;
        debug!(
            "event=repo_insert_now module=repo status=ok entity={} rows={} duration_ms={}",
            T::entity_name(),
            affected,
            started_at.elapsed().as_millis()
        );
        Ok(affected)
    }

    fn unit_of_work(&self) -> StoreResult<Rc<UnitOfWork>> {
        match self.unit_of_work.upgrade() {
            Some(unit_of_work) if !unit_of_work.is_disposed() => Ok(unit_of_work),
            _ => Err(StoreError::Disposed(UNIT_OF_WORK_OBJECT)),
        }
    }

    fn builder<'a>(&'a self, storage: &'a StorageContext) -> QueryBuilder<'a, T> {
        QueryBuilder::new(&self.configuration, storage.dialect())
    }

    fn query_one(&self, storage: &StorageContext, command: &CommandContext) -> StoreResult<Option<T>> {
        let item = storage.query_first(command, |row| Ok(self.configuration.materialize(row)?))?;
        debug!(
            "event=repo_find module=repo status=ok entity={} found={}",
            T::entity_name(),
            item.is_some()
        );
        Ok(item)
    }

    fn bind_properties(
        &self,
        parameters: &mut ParameterCollection,
        item: &T,
        properties: &[&PropertyConfiguration],
    ) -> StoreResult<()> {
        for property in properties {
            let value = self.configuration.value_of(item, property.property_name())?;
            parameters
                .get_or_create(property.property_name())
                .set_value(value);
        }
        Ok(())
    }

    fn queue(
        &self,
        storage: &StorageContext,
        sql: String,
        item: &T,
        properties: &[&PropertyConfiguration],
    ) -> StoreResult<()> {
        let mut command = storage.create_command(sql)?;
        self.bind_properties(command.parameters_mut(), item, properties)?;
        storage.add_command(command)
    }
}

impl<T: Entity> UnitOfWorkHandler<T> for Repository<T> {
    fn save_added_item(&self, storage: &StorageContext, item: &T) -> StoreResult<()> {
        let sql = self.builder(storage).insert();
        self.queue(storage, sql, item, &self.configuration.insert_properties())
    }

    fn save_changed_item(&self, storage: &StorageContext, item: &T) -> StoreResult<()> {
        let sql = self.builder(storage).update()?;
        let mut properties = self.configuration.key_properties();
        properties.extend(
            self.configuration
                .non_key_properties()
                .into_iter()
                .filter(|property| !property.is_generated()),
        );
        self.queue(storage, sql, item, &properties)
    }

    fn save_removed_item(&self, storage: &StorageContext, item: &T) -> StoreResult<()> {
        let sql = self.builder(storage).delete()?;
        self.queue(storage, sql, item, &self.configuration.key_properties())
    }
}

fn read_scalar<V: ColumnType>(row: &Row<'_>) -> rusqlite::Result<V> {
    let raw = row.get_ref(0)?;
    V::from_value(raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(0, raw.data_type(), Box::new(err)))
}
