use super::{validate_identifier, ConfigError, IdentifierKind};
use crate::model::{ColumnType, DeclaredType};
use rusqlite::types::Value;

/// Metadata for one mapped field.
///
/// Fluent setters never fail on the spot; problems are collected and
/// reported when the owning entity configuration is built.
#[derive(Debug, Clone)]
pub struct PropertyConfiguration {
    property_name: String,
    column_name: String,
    column_name_set: bool,
    declared_type: DeclaredType,
    is_key: bool,
    key_order: Option<usize>,
    generated: bool,
    default_value: Value,
    errors: Vec<ConfigError>,
}

impl PropertyConfiguration {
    pub(crate) fn new(property_name: &str, declared_type: DeclaredType) -> Self {
        let mut errors = Vec::new();
        if let Err(err) = validate_identifier(IdentifierKind::Property, property_name) {
            errors.push(err);
        }
        Self {
            property_name: property_name.to_string(),
            column_name: property_name.to_string(),
            column_name_set: false,
            declared_type,
            is_key: false,
            key_order: None,
            generated: false,
            default_value: declared_type.default_value(),
            errors,
        }
    }

    pub fn property_name(&self) -> &str {
        &self.property_name
    }

    /// Column name; the property name unless overridden.
    pub fn column_name(&self) -> &str {
        &self.column_name
    }

    pub fn declared_type(&self) -> DeclaredType {
        self.declared_type
    }

    pub fn is_nullable(&self) -> bool {
        self.declared_type.nullable
    }

    pub fn is_key(&self) -> bool {
        self.is_key
    }

    /// Position inside a composite key. `None` for non-key properties and
    /// for a sole key property.
    pub fn key_order(&self) -> Option<usize> {
        self.key_order
    }

    pub fn is_generated(&self) -> bool {
        self.generated
    }

    pub fn default_value(&self) -> &Value {
        &self.default_value
    }

    /// Overrides the column name. May be set once.
    pub fn has_column_name(&mut self, column_name: &str) -> &mut Self {
        if self.column_name_set && self.column_name != column_name {
            self.errors.push(ConfigError::ColumnNameAlreadySet {
                property: self.property_name.clone(),
                current: self.column_name.clone(),
                requested: column_name.to_string(),
            });
            return self;
        }
        if let Err(err) = validate_identifier(IdentifierKind::Column, column_name) {
            self.errors.push(err);
            return self;
        }
        self.column_name = column_name.to_string();
        self.column_name_set = true;
        self
    }

    /// Overrides the kind-derived default value.
    pub fn has_default_value<V: ColumnType>(&mut self, value: V) -> &mut Self {
        let value = value.to_value();
        if !self.declared_type.accepts(&value) {
            self.errors.push(ConfigError::IncompatibleDefault {
                property: self.property_name.clone(),
            });
            return self;
        }
        self.default_value = value;
        self
    }

    /// Marks the column as filled by the database on insert. Generated
    /// columns are left out of INSERT statements.
    pub fn value_generated_on_add(&mut self) -> &mut Self {
        self.generated = true;
        self
    }

    pub(crate) fn mark_key(&mut self, key_order: Option<usize>) {
        self.is_key = true;
        self.key_order = key_order;
    }

    pub(crate) fn clear_key(&mut self) {
        self.is_key = false;
        self.key_order = None;
    }

    pub(crate) fn push_error(&mut self, error: ConfigError) {
        self.errors.push(error);
    }

    pub(crate) fn take_errors(&mut self) -> Vec<ConfigError> {
        std::mem::take(&mut self.errors)
    }
}
