//! Storage options and physical connection bootstrap.
//!
//! # Responsibility
//! - Describe where and how the storage context connects.
//! - Parse the single connection string supplied by callers.
//! - Open and configure one SQLite connection.
//!
//! # Invariants
//! - Returned connections have the configured `foreign_keys` pragma and
//!   busy timeout applied.
//! - No schema work happens here; tables are owned by callers.

use super::{StoreError, StoreResult};
use log::{debug, error, info};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};

const MEMORY_SOURCE: &str = ":memory:";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Database the storage context connects to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ConnectionTarget {
    /// Private in-memory database. Its content lives only while the
    /// connection is physically open.
    Memory,
    File { path: PathBuf },
}

impl ConnectionTarget {
    fn from_source(source: &str) -> Self {
        if source.eq_ignore_ascii_case(MEMORY_SOURCE) {
            Self::Memory
        } else {
            Self::File {
                path: PathBuf::from(source),
            }
        }
    }

    fn mode(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File { .. } => "file",
        }
    }
}

/// `BEGIN` flavour used for transactions started by the storage context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    #[default]
    Deferred,
    Immediate,
    Exclusive,
}

impl TransactionMode {
    pub(crate) fn begin_sql(self) -> &'static str {
        match self {
            Self::Deferred => "BEGIN DEFERRED;",
            Self::Immediate => "BEGIN IMMEDIATE;",
            Self::Exclusive => "BEGIN EXCLUSIVE;",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "deferred" => Some(Self::Deferred),
            "immediate" => Some(Self::Immediate),
            "exclusive" => Some(Self::Exclusive),
            _ => None,
        }
    }
}

/// Connection settings for one storage context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    pub target: ConnectionTarget,
    pub busy_timeout_ms: u64,
    pub foreign_keys: bool,
    pub transaction_mode: TransactionMode,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            target: ConnectionTarget::Memory,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            foreign_keys: true,
            transaction_mode: TransactionMode::Deferred,
        }
    }
}

impl StorageOptions {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            target: ConnectionTarget::File { path: path.into() },
            ..Self::default()
        }
    }

    /// Parses a connection string.
    ///
    /// Accepted forms:
    /// - `:memory:`
    /// - a bare file path
    /// - `key=value` pairs separated by `;` with keys `data source`,
    ///   `busy timeout` (milliseconds), `foreign keys` (`true`/`false`) and
    ///   `transaction mode` (`deferred`/`immediate`/`exclusive`).
    ///
    /// # Errors
    /// - `StoreError::Argument` for empty input, unknown keys, malformed
    ///   values or a key/value string without `data source`.
    pub fn from_connection_string(value: &str) -> StoreResult<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(StoreError::Argument(
                "connection string cannot be empty".to_string(),
            ));
        }
        if !trimmed.contains('=') {
            return Ok(Self {
                target: ConnectionTarget::from_source(trimmed),
                ..Self::default()
            });
        }

        let mut options = Self::default();
        let mut has_source = false;
        for pair in trimmed.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (key, raw) = pair.split_once('=').ok_or_else(|| {
                StoreError::Argument(format!("connection string segment `{pair}` has no `=`"))
            })?;
            let raw = raw.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "data source" | "datasource" | "filename" => {
                    if raw.is_empty() {
                        return Err(StoreError::Argument(
                            "data source cannot be empty".to_string(),
                        ));
                    }
                    options.target = ConnectionTarget::from_source(raw);
                    has_source = true;
                }
                "busy timeout" => {
                    options.busy_timeout_ms = raw.parse().map_err(|_| {
                        StoreError::Argument(format!("busy timeout `{raw}` is not a number"))
                    })?;
                }
                "foreign keys" => {
                    options.foreign_keys = parse_flag(raw).ok_or_else(|| {
                        StoreError::Argument(format!("foreign keys `{raw}` is not a boolean"))
                    })?;
                }
                "transaction mode" => {
                    options.transaction_mode = TransactionMode::parse(raw).ok_or_else(|| {
                        StoreError::Argument(format!(
                            "unsupported transaction mode `{raw}`; expected deferred|immediate|exclusive"
                        ))
                    })?;
                }
                other => {
                    return Err(StoreError::Argument(format!(
                        "unknown connection string key `{other}`"
                    )));
                }
            }
        }

        if !has_source {
            return Err(StoreError::Argument(
                "connection string is missing `data source`".to_string(),
            ));
        }
        Ok(options)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Some(true),
        "false" | "off" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Opens and configures one physical connection.
///
/// # Side effects
/// - Emits `db_open` logging events with duration and status.
pub(crate) fn open_connection(options: &StorageOptions) -> StoreResult<Connection> {
    let started_at = Instant::now();
    let mode = options.target.mode();
    debug!("event=db_open module=db status=start mode={mode}");

    let opened = match &options.target {
        ConnectionTarget::Memory => Connection::open_in_memory(),
        ConnectionTarget::File { path } => Connection::open(path),
    };
    let conn = match opened {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap_connection(&conn, options) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={mode} duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_bootstrap_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err.into())
        }
    }
}

fn bootstrap_connection(conn: &Connection, options: &StorageOptions) -> rusqlite::Result<()> {
    let pragma = if options.foreign_keys {
        "PRAGMA foreign_keys = ON;"
    } else {
        "PRAGMA foreign_keys = OFF;"
    };
    conn.execute_batch(pragma)?;
    conn.busy_timeout(Duration::from_millis(options.busy_timeout_ms))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{open_connection, ConnectionTarget, StorageOptions, TransactionMode};
    use crate::db::StoreError;
    use std::path::PathBuf;

    #[test]
    fn memory_and_bare_path_forms_parse() {
        let memory = StorageOptions::from_connection_string(" :memory: ").expect("memory form");
        assert_eq!(memory.target, ConnectionTarget::Memory);

        let file = StorageOptions::from_connection_string("/tmp/rowkeeper.db").expect("path form");
        assert_eq!(
            file.target,
            ConnectionTarget::File {
                path: PathBuf::from("/tmp/rowkeeper.db")
            }
        );
    }

    #[test]
    fn key_value_form_sets_every_option() {
        let options = StorageOptions::from_connection_string(
            "Data Source=/tmp/app.db; Busy Timeout=250; Foreign Keys=off; Transaction Mode=Immediate;",
        )
        .expect("key/value form");
        assert_eq!(options.busy_timeout_ms, 250);
        assert!(!options.foreign_keys);
        assert_eq!(options.transaction_mode, TransactionMode::Immediate);
    }

    #[test]
    fn malformed_connection_strings_are_argument_errors() {
        for bad in ["", "   ", "busy timeout=10", "data source=x;colour=blue", "data source=x;busy timeout=soon"] {
            let err = StorageOptions::from_connection_string(bad).expect_err("must be rejected");
            assert!(matches!(err, StoreError::Argument(_)), "unexpected error for `{bad}`");
        }
    }

    #[test]
    fn open_connection_applies_foreign_keys_pragma() {
        let conn = open_connection(&StorageOptions::in_memory()).expect("memory db opens");
        let enabled: i64 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .expect("pragma readable");
        assert_eq!(enabled, 1);
    }
}
