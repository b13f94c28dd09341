//! SQL dialects and metadata-driven SQL generation.
//!
//! # Responsibility
//! - Centralize identifier quoting per database engine.
//! - Generate INSERT/UPDATE/DELETE/SELECT text from entity configuration.
//!
//! # Invariants
//! - Every interpolated identifier passes through `Dialect::quote_identifier`.
//! - Only configuration metadata is interpolated; values are always bound.

mod builder;

pub use builder::QueryBuilder;

/// Database-engine specific SQL conventions.
pub trait Dialect {
    fn name(&self) -> &'static str;

    /// Quotes one table or column identifier.
    fn quote_identifier(&self, identifier: &str) -> String;

    /// Character prefixing named parameter placeholders.
    fn parameter_prefix(&self) -> char {
        ':'
    }
}

/// SQLite / ANSI double-quoted identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }
}

/// MySQL backtick identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("`{}`", identifier.replace('`', "``"))
    }
}

/// SQL Server bracket identifiers with `@` parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDialect;

impl Dialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "sqlserver"
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("[{}]", identifier.replace(']', "]]"))
    }

    fn parameter_prefix(&self) -> char {
        '@'
    }
}
