use super::{ConfigError, EntityConfiguration, EntityMapping, PropertyConfiguration};
use crate::model::Entity;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::rc::Rc;

/// Type-erased view of one entity configuration.
pub trait EntityMetadata {
    fn entity_name(&self) -> &'static str;
    fn table_name(&self) -> &str;
    fn properties(&self) -> &[PropertyConfiguration];
}

impl<T: Entity> EntityMetadata for EntityConfiguration<T> {
    fn entity_name(&self) -> &'static str {
        T::entity_name()
    }

    fn table_name(&self) -> &str {
        EntityConfiguration::table_name(self)
    }

    fn properties(&self) -> &[PropertyConfiguration] {
        EntityConfiguration::properties(self)
    }
}

struct Registered {
    metadata: Rc<dyn EntityMetadata>,
    typed: Rc<dyn Any>,
}

/// Registry from entity type to its configuration.
///
/// Filled before a storage context is created and read-only afterwards.
#[derive(Default)]
pub struct EntityConfigurationCollection {
    entries: HashMap<TypeId, Registered>,
}

impl EntityConfigurationCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the configuration for `T`.
    ///
    /// Returns `true` when an earlier configuration was replaced.
    pub fn add<T: Entity>(&mut self, configuration: EntityConfiguration<T>) -> bool {
        let configuration = Rc::new(configuration);
        let registered = Registered {
            metadata: configuration.clone(),
            typed: configuration,
        };
        self.entries
            .insert(TypeId::of::<T>(), registered)
            .is_some()
    }

    /// Builds the configuration described by `mapping` and adds it.
    pub fn add_mapping<M: EntityMapping>(&mut self, mapping: &M) -> Result<&mut Self, ConfigError> {
        let configuration = EntityConfiguration::from_mapping(mapping)?;
        self.add(configuration);
        Ok(self)
    }

    pub fn get<T: Entity>(&self) -> Option<Rc<EntityConfiguration<T>>> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.typed.clone().downcast::<EntityConfiguration<T>>().ok())
    }

    /// Reads the entry stored under `type_id` as a configuration of `T`.
    ///
    /// # Errors
    /// - `TypeMismatch` when the entry under `type_id` belongs to another
    ///   entity type.
    pub fn get_as<T: Entity>(
        &self,
        type_id: TypeId,
    ) -> Result<Option<Rc<EntityConfiguration<T>>>, ConfigError> {
        let Some(entry) = self.entries.get(&type_id) else {
            return Ok(None);
        };
        entry
            .typed
            .clone()
            .downcast::<EntityConfiguration<T>>()
            .map(Some)
            .map_err(|_| ConfigError::TypeMismatch {
                requested: T::entity_name(),
                registered: entry.metadata.entity_name(),
            })
    }

    pub fn get_by_type(&self, type_id: TypeId) -> Option<Rc<dyn EntityMetadata>> {
        self.entries.get(&type_id).map(|entry| entry.metadata.clone())
    }

    pub fn contains<T: Entity>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mapped table names, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .values()
            .map(|entry| entry.metadata.table_name().to_string())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::{EntityConfigurationCollection, EntityMetadata};
    use crate::config::{ConfigError, EntityConfiguration};
    use crate::model::Entity;
    use std::any::TypeId;

    #[derive(Debug, Clone, Default)]
    struct Tag {
        id: i64,
        label: String,
    }

    impl Entity for Tag {}

    #[derive(Debug, Clone, Default)]
    struct Color {
        code: String,
    }

    impl Entity for Color {}

    fn tag_configuration(table: &str) -> EntityConfiguration<Tag> {
        EntityConfiguration::new(|entity| {
            entity.to_table(table);
            entity.property("Id", |t: &Tag| &t.id, |t, v| t.id = v);
            entity.property("Label", |t: &Tag| &t.label, |t, v| t.label = v);
            entity.has_key(&["Id"]);
        })
        .expect("tag configuration should build")
    }

    #[test]
    fn add_overwrites_existing_entry() {
        let mut collection = EntityConfigurationCollection::new();
        assert!(!collection.add(tag_configuration("Tags")));
        assert!(collection.add(tag_configuration("Labels")));

        assert_eq!(collection.len(), 1);
        let tags = collection.get::<Tag>().expect("Tag is registered");
        assert_eq!(tags.table_name(), "Labels");
    }

    #[test]
    fn missing_type_returns_none() {
        let collection = EntityConfigurationCollection::new();
        assert!(collection.get::<Tag>().is_none());
        assert!(collection.get_by_type(TypeId::of::<Tag>()).is_none());
    }

    #[test]
    fn get_as_rejects_wrong_static_type() {
        let mut collection = EntityConfigurationCollection::new();
        collection.add(tag_configuration("Tags"));

        let err = collection
            .get_as::<Color>(TypeId::of::<Tag>())
            .expect_err("Tag entry read as Color must fail");
        assert!(matches!(err, ConfigError::TypeMismatch { .. }));

        let metadata = collection
            .get_by_type(TypeId::of::<Tag>())
            .expect("erased lookup");
        assert_eq!(metadata.table_name(), "Tags");
        assert_eq!(metadata.properties().len(), 2);
    }

    #[test]
    fn table_names_are_sorted() {
        let mut collection = EntityConfigurationCollection::new();
        let colors = EntityConfiguration::<Color>::new(|entity| {
            entity.to_table("Colors");
            entity.property("Code", |c: &Color| &c.code, |c, v| c.code = v);
            entity.has_key(&["Code"]);
        })
        .expect("color configuration should build");
        collection.add(colors);
        collection.add(tag_configuration("Tags"));
        assert_eq!(collection.table_names(), vec!["Colors", "Tags"]);
    }
}
