use super::{ChangeKind, UnitOfWorkHandler};
use crate::db::{StorageContext, StoreResult};
use crate::model::Entity;
use rusqlite::types::Value;
use std::any::TypeId;
use std::collections::HashMap;
use std::rc::Rc;

/// Hashable form of one key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyPart {
    Integer(i64),
    Real(u64),
    Text(String),
    Blob(Vec<u8>),
}

impl KeyPart {
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Integer(v) => Some(Self::Integer(v)),
            Value::Real(v) => Some(Self::Real(v.to_bits())),
            Value::Text(v) => Some(Self::Text(v)),
            Value::Blob(v) => Some(Self::Blob(v)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum IdentityKey {
    Values(Vec<KeyPart>),
    Transient(u64),
}

/// Entity type plus primary-key values.
///
/// Transient identities never compare equal to anything but themselves,
/// so registrations carrying one never merge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct EntityIdentity {
    type_id: TypeId,
    key: IdentityKey,
}

impl EntityIdentity {
    /// Identity from key values in key order, or `None` when any of them
    /// is NULL.
    pub(crate) fn from_key_values<T: Entity>(values: Vec<Value>) -> Option<Self> {
        let parts = values
            .into_iter()
            .map(KeyPart::from_value)
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            type_id: TypeId::of::<T>(),
            key: IdentityKey::Values(parts),
        })
    }

    pub(crate) fn transient<T: Entity>(sequence: u64) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            key: IdentityKey::Transient(sequence),
        }
    }
}

/// Registered item erased to the operation it will be saved with.
pub(crate) trait PendingItem {
    fn entity_name(&self) -> &'static str;
    fn dispatch(&self, kind: ChangeKind, storage: &StorageContext) -> StoreResult<()>;
}

pub(crate) struct Registration<T> {
    item: T,
    handler: Rc<dyn UnitOfWorkHandler<T>>,
}

impl<T> Registration<T> {
    pub(crate) fn new(item: T, handler: Rc<dyn UnitOfWorkHandler<T>>) -> Self {
        Self { item, handler }
    }
}

impl<T: Entity> PendingItem for Registration<T> {
    fn entity_name(&self) -> &'static str {
        T::entity_name()
    }

    fn dispatch(&self, kind: ChangeKind, storage: &StorageContext) -> StoreResult<()> {
        match kind {
            ChangeKind::Added => self.handler.save_added_item(storage, &self.item),
            ChangeKind::Changed => self.handler.save_changed_item(storage, &self.item),
            ChangeKind::Removed => self.handler.save_removed_item(storage, &self.item),
        }
    }
}

/// Registrations of one change kind, in first-registration order.
///
/// Re-registering an identity replaces the item and handler in place, so
/// the slot keeps its original position.
#[derive(Default)]
pub(crate) struct Registry {
    entries: Vec<Option<Box<dyn PendingItem>>>,
    positions: HashMap<EntityIdentity, usize>,
}

impl Registry {
    /// Inserts or replaces; returns `true` when an entry was replaced.
    pub(crate) fn upsert(&mut self, identity: EntityIdentity, pending: Box<dyn PendingItem>) -> bool {
        if let Some(&index) = self.positions.get(&identity) {
            self.entries[index] = Some(pending);
            return true;
        }
        self.positions.insert(identity, self.entries.len());
        self.entries.push(Some(pending));
        false
    }

    pub(crate) fn remove(&mut self, identity: &EntityIdentity) -> bool {
        match self.positions.remove(identity) {
            Some(index) => {
                self.entries[index] = None;
                true
            }
            None => false,
        }
    }

    pub(crate) fn contains(&self, identity: &EntityIdentity) -> bool {
        self.positions.contains_key(identity)
    }

    pub(crate) fn len(&self) -> usize {
        self.positions.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &dyn PendingItem> {
        self.entries.iter().flatten().map(|pending| pending.as_ref())
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.positions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{EntityIdentity, PendingItem, Registry};
    use crate::db::{StorageContext, StoreResult};
    use crate::uow::ChangeKind;
    use rusqlite::types::Value;

    #[derive(Debug, Clone, Default)]
    struct Tag;

    impl crate::model::Entity for Tag {}

    struct Named(&'static str);

    impl PendingItem for Named {
        fn entity_name(&self) -> &'static str {
            self.0
        }

        fn dispatch(&self, _kind: ChangeKind, _storage: &StorageContext) -> StoreResult<()> {
            Ok(())
        }
    }

    fn identity(id: i64) -> EntityIdentity {
        EntityIdentity::from_key_values::<Tag>(vec![Value::Integer(id)]).expect("non-null key")
    }

    #[test]
    fn replacing_keeps_first_position() {
        let mut registry = Registry::default();
        assert!(!registry.upsert(identity(1), Box::new(Named("first"))));
        assert!(!registry.upsert(identity(2), Box::new(Named("second"))));
        assert!(registry.upsert(identity(1), Box::new(Named("replaced"))));

        let names: Vec<&str> = registry.iter().map(|pending| pending.entity_name()).collect();
        assert_eq!(names, vec!["replaced", "second"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn removed_slots_are_skipped() {
        let mut registry = Registry::default();
        registry.upsert(identity(1), Box::new(Named("a")));
        registry.upsert(identity(2), Box::new(Named("b")));
        assert!(registry.remove(&identity(1)));
        assert!(!registry.remove(&identity(1)));

        let names: Vec<&str> = registry.iter().map(|pending| pending.entity_name()).collect();
        assert_eq!(names, vec!["b"]);
        assert!(registry.contains(&identity(2)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn null_key_values_have_no_identity() {
        assert!(EntityIdentity::from_key_values::<Tag>(vec![Value::Null]).is_none());
        assert_ne!(
            EntityIdentity::transient::<Tag>(1),
            EntityIdentity::transient::<Tag>(2)
        );
    }
}
