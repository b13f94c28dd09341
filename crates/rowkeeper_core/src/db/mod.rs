//! SQLite storage context, connection bootstrap and command plumbing.
//!
//! # Responsibility
//! - Own the single database connection and its open/close reference count.
//! - Queue commands for batched execution inside one transaction.
//! - Carry the error taxonomy shared by every persistence operation.
//!
//! # Invariants
//! - The connection is physically open exactly while the open count is
//!   non-zero.
//! - Driver errors are propagated unmodified inside `StoreError::Execution`.

use crate::config::ConfigError;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod command;
mod context;
mod open;
mod transaction;

pub use command::{CommandContext, Parameter, ParameterCollection};
pub use context::{ConnectionState, OpenScope, StorageContext, StorageStats};
pub use open::{ConnectionTarget, StorageOptions, TransactionMode};
pub use transaction::TransactionScope;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    /// Invalid or missing mapping metadata.
    Configuration(ConfigError),
    /// Missing or malformed caller argument.
    Argument(String),
    /// Database driver failure, unmodified.
    Execution(rusqlite::Error),
    /// Operation on an object that was already disposed.
    Disposed(&'static str),
    /// Re-entrant use the single-threaded model does not allow.
    InvalidState(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration(err) => write!(f, "{err}"),
            Self::Argument(message) => write!(f, "invalid argument: {message}"),
            Self::Execution(err) => write!(f, "{err}"),
            Self::Disposed(object) => write!(f, "{object} has been disposed"),
            Self::InvalidState(message) => write!(f, "invalid state: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Configuration(err) => Some(err),
            Self::Execution(err) => Some(err),
            Self::Argument(_) => None,
            Self::Disposed(_) => None,
            Self::InvalidState(_) => None,
        }
    }
}

impl From<ConfigError> for StoreError {
    fn from(value: ConfigError) -> Self {
        Self::Configuration(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Execution(value)
    }
}
