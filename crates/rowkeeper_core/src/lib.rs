//! Database-agnostic persistence core: entity mapping, batched unit of
//! work and generic repositories over SQLite.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;
pub mod uow;

pub use config::{
    ConfigError, EntityConfiguration, EntityConfigurationBuilder, EntityConfigurationCollection,
    EntityMapping, EntityMetadata, PropertyConfiguration,
};
pub use db::{
    CommandContext, ConnectionState, ConnectionTarget, Parameter, ParameterCollection,
    StorageContext, StorageOptions, StorageStats, StoreError, StoreResult, TransactionMode,
    TransactionScope,
};
pub use logging::{init_logging, logging_status, LogLevel, LoggingConfig, LoggingError};
pub use model::{ColumnType, DeclaredType, Entity, ValueKind};
pub use query::{Dialect, MySqlDialect, QueryBuilder, SqlServerDialect, SqliteDialect};
pub use repo::{Repository, NAME_PROPERTY};
pub use uow::{ChangeKind, UnitOfWork, UnitOfWorkHandler};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
