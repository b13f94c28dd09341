//! Entity contract and column value types.
//!
//! # Responsibility
//! - Define the marker every persisted type implements.
//! - Define the closed set of Rust types that can back a mapped column.
//!
//! # Invariants
//! - Entities are constructible without arguments so rows can be
//!   materialized into fresh instances.
//! - Only primitive, nullable primitive and text types map to columns.

pub mod value;

pub use value::{ColumnType, DeclaredType, RequiredColumnType, ValueKind};

/// Marker for types persisted through an entity configuration.
///
/// `Default` stands in for the parameterless constructor used when reading
/// rows; `Clone` lets the unit of work keep its own snapshot of a
/// registered item.
pub trait Entity: Default + Clone + 'static {
    /// Human-readable type name used in errors and log events.
    fn entity_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}
