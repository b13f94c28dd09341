//! Entity-to-table mapping metadata.
//!
//! # Responsibility
//! - Describe how each entity type maps to one table and its columns.
//! - Validate that metadata once, when a configuration is built.
//!
//! # Invariants
//! - Built configurations are immutable.
//! - Every table, column and property name matches `IDENTIFIER_PATTERN`,
//!   so generated SQL only ever interpolates closed metadata.

use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod collection;
mod entity;
mod property;

pub use collection::{EntityConfigurationCollection, EntityMetadata};
pub use entity::{EntityConfiguration, EntityConfigurationBuilder, EntityMapping};
pub use property::PropertyConfiguration;

pub const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(IDENTIFIER_PATTERN).expect("valid identifier regex"));

/// Kind of name rejected by identifier validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Table,
    Column,
    Property,
}

impl Display for IdentifierKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Column => write!(f, "column"),
            Self::Property => write!(f, "property"),
        }
    }
}

/// Mapping metadata error. Raised while building or looking up
/// configurations and never recovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidIdentifier {
        kind: IdentifierKind,
        value: String,
    },
    MissingTable {
        entity: &'static str,
    },
    UnknownProperty {
        entity: &'static str,
        property: String,
    },
    ColumnNameAlreadySet {
        property: String,
        current: String,
        requested: String,
    },
    DuplicateColumn {
        entity: &'static str,
        column: String,
    },
    PropertyTypeMismatch {
        property: String,
    },
    IncompatibleDefault {
        property: String,
    },
    EmptyKey {
        entity: &'static str,
    },
    MissingKey {
        entity: &'static str,
    },
    NotMapped {
        entity: &'static str,
    },
    TypeMismatch {
        requested: &'static str,
        registered: &'static str,
    },
    NothingToUpdate {
        entity: &'static str,
    },
    CompositeKeyUnsupported {
        entity: &'static str,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIdentifier { kind, value } => {
                write!(f, "invalid {kind} name `{value}`")
            }
            Self::MissingTable { entity } => write!(f, "no table configured for `{entity}`"),
            Self::UnknownProperty { entity, property } => {
                write!(f, "property `{property}` is not configured for `{entity}`")
            }
            Self::ColumnNameAlreadySet {
                property,
                current,
                requested,
            } => write!(
                f,
                "column name of `{property}` already set to `{current}`; refusing `{requested}`"
            ),
            Self::DuplicateColumn { entity, column } => {
                write!(f, "column `{column}` is mapped twice on `{entity}`")
            }
            Self::PropertyTypeMismatch { property } => write!(
                f,
                "property `{property}` was re-declared with a different type"
            ),
            Self::IncompatibleDefault { property } => write!(
                f,
                "default value does not match the declared type of `{property}`"
            ),
            Self::EmptyKey { entity } => write!(f, "empty key declared for `{entity}`"),
            Self::MissingKey { entity } => write!(f, "no key configured for `{entity}`"),
            Self::NotMapped { entity } => write!(f, "entity type `{entity}` is not mapped"),
            Self::TypeMismatch {
                requested,
                registered,
            } => write!(
                f,
                "configuration registered for `{registered}` requested as `{requested}`"
            ),
            Self::NothingToUpdate { entity } => {
                write!(f, "`{entity}` has no non-key columns to update")
            }
            Self::CompositeKeyUnsupported { entity } => {
                write!(f, "operation needs a single-column key on `{entity}`")
            }
        }
    }
}

impl Error for ConfigError {}

pub(crate) fn validate_identifier(kind: IdentifierKind, value: &str) -> Result<(), ConfigError> {
    if IDENTIFIER_RE.is_match(value) {
        return Ok(());
    }
    Err(ConfigError::InvalidIdentifier {
        kind,
        value: value.to_string(),
    })
}
