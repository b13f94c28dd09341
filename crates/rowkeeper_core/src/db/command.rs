//! Command wrapper with named parameter binding.
//!
//! # Invariants
//! - A parameter is created on first access by field name and reused on
//!   every later access.
//! - Placeholders are the dialect prefix followed by the field name, so
//!   generated SQL and bound parameters resolve symmetrically.
//! - Parameter values are always bound, never spliced into SQL text.

use super::{StorageContext, StoreResult};
use crate::model::ColumnType;
use rusqlite::types::{ToSql, Value};
use rusqlite::{CachedStatement, Connection, Rows};
use std::collections::BTreeMap;

/// One named parameter of a command.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    field: String,
    placeholder: String,
    value: Value,
}

impl Parameter {
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Placeholder text as it appears in SQL, e.g. `:Name`.
    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn set_value(&mut self, value: Value) -> &mut Self {
        self.value = value;
        self
    }

    pub fn set<V: ColumnType>(&mut self, value: &V) -> &mut Self {
        self.set_value(value.to_value())
    }
}

/// Parameters of one command keyed by field name.
#[derive(Debug, Clone)]
pub struct ParameterCollection {
    prefix: char,
    items: BTreeMap<String, Parameter>,
}

impl ParameterCollection {
    pub(crate) fn new(prefix: char) -> Self {
        Self {
            prefix,
            items: BTreeMap::new(),
        }
    }

    /// Returns the parameter for `field`, creating it bound to NULL on
    /// first access.
    pub fn get_or_create(&mut self, field: &str) -> &mut Parameter {
        let prefix = self.prefix;
        self.items
            .entry(field.to_string())
            .or_insert_with(|| Parameter {
                field: field.to_string(),
                placeholder: format!("{prefix}{field}"),
                value: Value::Null,
            })
    }

    pub fn get(&self, field: &str) -> Option<&Parameter> {
        self.items.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.items.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.items.values()
    }

    fn named(&self) -> Vec<(&str, &dyn ToSql)> {
        self.items
            .values()
            .map(|parameter| (parameter.placeholder.as_str(), &parameter.value as &dyn ToSql))
            .collect()
    }
}

/// One SQL command plus its parameters.
///
/// The statement is prepared from the connection's statement cache each
/// time the command runs, so a context can be queued and executed later
/// without borrowing the connection.
#[derive(Debug, Clone)]
pub struct CommandContext {
    sql: String,
    parameters: ParameterCollection,
}

impl CommandContext {
    pub(crate) fn new(sql: String, prefix: char) -> Self {
        Self {
            sql,
            parameters: ParameterCollection::new(prefix),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameters(&self) -> &ParameterCollection {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut ParameterCollection {
        &mut self.parameters
    }

    /// Shorthand for `parameters_mut().get_or_create(field)`.
    pub fn parameter(&mut self, field: &str) -> &mut Parameter {
        self.parameters.get_or_create(field)
    }

    pub fn bind(&mut self, field: &str, value: Value) -> &mut Self {
        self.parameters.get_or_create(field).set_value(value);
        self
    }

    /// Binds and executes the command once per entity.
    ///
    /// `bind` refreshes the parameter values for each entity; N entities
    /// mean N executions on one open connection. When `generated_key` is
    /// given it receives each entity together with the row id produced by
    /// its execution.
    ///
    /// Returns the total affected-row count.
    pub fn set_parameters_for_each<T, B>(
        &mut self,
        storage: &StorageContext,
        entities: &mut [T],
        mut bind: B,
        generated_key: Option<&dyn Fn(&mut T, i64) -> StoreResult<()>>,
    ) -> StoreResult<usize>
    where
        B: FnMut(&mut ParameterCollection, &T) -> StoreResult<()>,
    {
        let _connection = storage.open_scope()?;
        let mut affected = 0;
        for entity in entities.iter_mut() {
            bind(&mut self.parameters, entity)?;
            affected += storage.execute(self)?;
            if let Some(assign) = generated_key {
                assign(entity, storage.last_insert_rowid()?)?;
            }
        }
        Ok(affected)
    }

    pub(crate) fn execute_on(&self, conn: &Connection) -> rusqlite::Result<usize> {
        let mut statement = conn.prepare_cached(&self.sql)?;
        statement.execute(self.parameters.named().as_slice())
    }

    pub(crate) fn prepare_on<'conn>(
        &self,
        conn: &'conn Connection,
    ) -> rusqlite::Result<CachedStatement<'conn>> {
        conn.prepare_cached(&self.sql)
    }

    pub(crate) fn query_with<'stmt>(
        &self,
        statement: &'stmt mut CachedStatement<'_>,
    ) -> rusqlite::Result<Rows<'stmt>> {
        statement.query(self.parameters.named().as_slice())
    }
}
