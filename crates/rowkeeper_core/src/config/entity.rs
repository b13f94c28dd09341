use super::{validate_identifier, ConfigError, IdentifierKind, PropertyConfiguration};
use crate::model::{ColumnType, Entity};
use rusqlite::types::{FromSqlResult, Value, ValueRef};
use rusqlite::Row;
use std::collections::HashSet;
use std::fmt::{Debug, Formatter};

type Getter<T> = Box<dyn Fn(&T) -> Value>;
type Setter<T> = Box<dyn Fn(&mut T, ValueRef<'_>) -> FromSqlResult<()>>;

struct PropertyAccessor<T> {
    get: Getter<T>,
    set: Setter<T>,
}

/// User-supplied configure step for one entity type.
///
/// `configure` runs exactly once, while the configuration is built. It must
/// call `to_table` and declares properties in column order.
///
/// ```ignore
/// struct RoleMapping;
///
/// impl EntityMapping for RoleMapping {
///     type Entity = Role;
///
///     fn configure(&self, entity: &mut EntityConfigurationBuilder<Role>) {
///         entity.to_table("Roles");
///         entity.property("Id", |r: &Role| &r.id, |r, v| r.id = v);
///         entity.property("Name", |r: &Role| &r.name, |r, v| r.name = v);
///         entity.has_key(&["Id"]);
///     }
/// }
/// ```
pub trait EntityMapping {
    type Entity: Entity;

    fn configure(&self, entity: &mut EntityConfigurationBuilder<Self::Entity>);
}

/// Mutable view handed to the configure step.
pub struct EntityConfigurationBuilder<T> {
    table_name: Option<String>,
    properties: Vec<PropertyConfiguration>,
    accessors: Vec<PropertyAccessor<T>>,
    errors: Vec<ConfigError>,
}

impl<T: Entity> EntityConfigurationBuilder<T> {
    fn new() -> Self {
        Self {
            table_name: None,
            properties: Vec::new(),
            accessors: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn to_table(&mut self, table_name: &str) -> &mut Self {
        self.table_name = Some(table_name.to_string());
        self
    }

    /// Declares (or refines) one mapped property.
    ///
    /// Repeat calls with the same name return the configuration created by
    /// the first call; the first accessor pair stays in effect.
    pub fn property<V, G, S>(&mut self, name: &str, get: G, set: S) -> &mut PropertyConfiguration
    where
        V: ColumnType,
        G: Fn(&T) -> &V + 'static,
        S: Fn(&mut T, V) + 'static,
    {
        let declared = V::declared_type();
        if let Some(index) = self.position(name) {
            let existing = &mut self.properties[index];
            if existing.declared_type() != declared {
                existing.push_error(ConfigError::PropertyTypeMismatch {
                    property: name.to_string(),
                });
            }
            return existing;
        }

        self.properties.push(PropertyConfiguration::new(name, declared));
        self.accessors.push(PropertyAccessor {
            get: Box::new(move |item: &T| get(item).to_value()),
            set: Box::new(move |item: &mut T, value: ValueRef<'_>| {
                set(item, V::from_value(value)?);
                Ok(())
            }),
        });
        let last = self.properties.len() - 1;
        &mut self.properties[last]
    }

    /// Looks up a property declared earlier in this configure step.
    pub fn property_named(&mut self, name: &str) -> Result<&mut PropertyConfiguration, ConfigError> {
        match self.position(name) {
            Some(index) => Ok(&mut self.properties[index]),
            None => Err(ConfigError::UnknownProperty {
                entity: T::entity_name(),
                property: name.to_string(),
            }),
        }
    }

    /// Declares the primary key. One name is a sole key; several names form
    /// a composite key ordered as given. Replaces any earlier key.
    pub fn has_key(&mut self, names: &[&str]) -> &mut Self {
        if names.is_empty() {
            self.errors.push(ConfigError::EmptyKey {
                entity: T::entity_name(),
            });
            return self;
        }

        let mut positions = Vec::with_capacity(names.len());
        for name in names {
            match self.position(name) {
                Some(index) => positions.push(index),
                None => {
                    self.errors.push(ConfigError::UnknownProperty {
                        entity: T::entity_name(),
                        property: (*name).to_string(),
                    });
                    return self;
                }
            }
        }

        for property in &mut self.properties {
            property.clear_key();
        }
        let composite = positions.len() > 1;
        for (order, index) in positions.into_iter().enumerate() {
            self.properties[index].mark_key(composite.then_some(order));
        }
        self
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.properties
            .iter()
            .position(|property| property.property_name() == name)
    }

    fn build(mut self) -> Result<EntityConfiguration<T>, ConfigError> {
        if let Some(err) = self.errors.drain(..).next() {
            return Err(err);
        }

        let table_name = self.table_name.take().ok_or(ConfigError::MissingTable {
            entity: T::entity_name(),
        })?;
        validate_identifier(IdentifierKind::Table, &table_name)?;

        let mut columns = HashSet::new();
        for property in &mut self.properties {
            if let Some(err) = property.take_errors().into_iter().next() {
                return Err(err);
            }
            if !columns.insert(property.column_name().to_ascii_lowercase()) {
                return Err(ConfigError::DuplicateColumn {
                    entity: T::entity_name(),
                    column: property.column_name().to_string(),
                });
            }
        }

        Ok(EntityConfiguration {
            table_name,
            properties: self.properties,
            accessors: self.accessors,
        })
    }
}

/// Built, immutable mapping of one entity type to one table.
pub struct EntityConfiguration<T> {
    table_name: String,
    properties: Vec<PropertyConfiguration>,
    accessors: Vec<PropertyAccessor<T>>,
}

impl<T: Entity> EntityConfiguration<T> {
    /// Builds a configuration from a configure closure.
    ///
    /// # Errors
    /// - Returns the first `ConfigError` recorded while configuring.
    pub fn new(configure: impl FnOnce(&mut EntityConfigurationBuilder<T>)) -> Result<Self, ConfigError> {
        let mut builder = EntityConfigurationBuilder::new();
        configure(&mut builder);
        builder.build()
    }

    pub fn from_mapping<M>(mapping: &M) -> Result<Self, ConfigError>
    where
        M: EntityMapping<Entity = T>,
    {
        Self::new(|builder| mapping.configure(builder))
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Properties in declaration order.
    pub fn properties(&self) -> &[PropertyConfiguration] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Result<&PropertyConfiguration, ConfigError> {
        self.position(name)
            .map(|index| &self.properties[index])
            .ok_or_else(|| ConfigError::UnknownProperty {
                entity: T::entity_name(),
                property: name.to_string(),
            })
    }

    pub fn has_key(&self) -> bool {
        self.properties.iter().any(PropertyConfiguration::is_key)
    }

    /// Key properties in key order.
    pub fn key_properties(&self) -> Vec<&PropertyConfiguration> {
        let mut keys: Vec<&PropertyConfiguration> =
            self.properties.iter().filter(|p| p.is_key()).collect();
        keys.sort_by_key(|p| p.key_order().unwrap_or(0));
        keys
    }

    pub fn non_key_properties(&self) -> Vec<&PropertyConfiguration> {
        self.properties.iter().filter(|p| !p.is_key()).collect()
    }

    /// Properties written by INSERT: everything except generated columns.
    pub fn insert_properties(&self) -> Vec<&PropertyConfiguration> {
        self.properties.iter().filter(|p| !p.is_generated()).collect()
    }

    /// Reads one property value from `item`.
    pub fn value_of(&self, item: &T, name: &str) -> Result<Value, ConfigError> {
        let index = self.position(name).ok_or_else(|| ConfigError::UnknownProperty {
            entity: T::entity_name(),
            property: name.to_string(),
        })?;
        Ok((self.accessors[index].get)(item))
    }

    /// Key values of `item` in key order.
    pub fn key_values(&self, item: &T) -> Vec<(&PropertyConfiguration, Value)> {
        let mut keys: Vec<(usize, &PropertyConfiguration)> = self
            .properties
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_key())
            .collect();
        keys.sort_by_key(|(_, p)| p.key_order().unwrap_or(0));
        keys.into_iter()
            .map(|(index, property)| (property, (self.accessors[index].get)(item)))
            .collect()
    }

    pub(crate) fn assign(
        &self,
        item: &mut T,
        name: &str,
        value: ValueRef<'_>,
    ) -> Result<FromSqlResult<()>, ConfigError> {
        let index = self.position(name).ok_or_else(|| ConfigError::UnknownProperty {
            entity: T::entity_name(),
            property: name.to_string(),
        })?;
        Ok((self.accessors[index].set)(item, value))
    }

    /// Builds a fresh entity from a row selected with every property in
    /// declaration order. A NULL read from a non-nullable column takes the
    /// property's default value.
    pub(crate) fn materialize(&self, row: &Row<'_>) -> rusqlite::Result<T> {
        let mut item = T::default();
        for (index, (property, accessor)) in
            self.properties.iter().zip(&self.accessors).enumerate()
        {
            let raw = row.get_ref(index)?;
            let value = match raw {
                ValueRef::Null if !property.is_nullable() => {
                    ValueRef::from(property.default_value())
                }
                other => other,
            };
            (accessor.set)(&mut item, value).map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(index, value.data_type(), Box::new(err))
            })?;
        }
        Ok(item)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.properties
            .iter()
            .position(|property| property.property_name() == name)
    }
}

impl<T> Debug for EntityConfiguration<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityConfiguration")
            .field("table_name", &self.table_name)
            .field("properties", &self.properties)
            .finish()
    }
}
