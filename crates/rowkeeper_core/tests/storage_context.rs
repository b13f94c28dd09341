mod common;

use common::{configurations, count_rows, SCHEMA};
use rowkeeper_core::{
    ConnectionState, ConnectionTarget, Dialect, EntityConfigurationCollection, StorageContext,
    StorageOptions, StoreError, TransactionMode,
};
use rusqlite::types::Value;

fn memory_storage() -> StorageContext {
    StorageContext::new(StorageOptions::in_memory(), configurations())
}

#[test]
fn nested_open_close_keeps_connection_until_outermost_close() {
    let storage = memory_storage();
    assert_eq!(storage.state(), ConnectionState::Closed);

    storage.open().unwrap();
    storage.open().unwrap();
    assert_eq!(storage.open_count(), 2);

    storage.close(false).unwrap();
    assert_eq!(storage.state(), ConnectionState::Open);
    assert_eq!(storage.statistics().connections_closed, 0);

    storage.close(false).unwrap();
    assert_eq!(storage.state(), ConnectionState::Closed);

    let stats = storage.statistics();
    assert_eq!(stats.connections_opened, 1);
    assert_eq!(stats.connections_closed, 1);
}

#[test]
fn forced_close_disconnects_at_any_depth() {
    let storage = memory_storage();
    storage.open().unwrap();
    storage.open().unwrap();
    storage.open().unwrap();

    storage.close(true).unwrap();
    assert_eq!(storage.state(), ConnectionState::Closed);
    assert_eq!(storage.open_count(), 0);

    // Closing an already closed context is a no-op.
    storage.close(false).unwrap();
    assert_eq!(storage.statistics().connections_closed, 1);
}

#[test]
fn memory_database_lives_only_while_open() {
    let storage = memory_storage();
    {
        let _connection = storage.open_scope().unwrap();
        storage.execute_batch(SCHEMA).unwrap();
        storage
            .execute_batch("INSERT INTO Users (Name) VALUES ('kept');")
            .unwrap();
        assert_eq!(count_rows(&storage, "Users"), 1);
    }
    assert_eq!(storage.state(), ConnectionState::Closed);

    let err = storage.execute_batch("SELECT * FROM Users;").unwrap_err();
    assert!(matches!(err, StoreError::Execution(_)));
}

#[test]
fn queued_commands_run_in_order_on_execute_pending() {
    let storage = memory_storage();
    let _connection = storage.open_scope().unwrap();
    storage.execute_batch(SCHEMA).unwrap();

    for name in ["first", "second"] {
        let mut command = storage
            .create_command("INSERT INTO Users (Name) VALUES (:Name)")
            .unwrap();
        command.bind("Name", Value::Text(name.to_string()));
        storage.add_command(command).unwrap();
    }
    assert_eq!(storage.pending_command_count(), 2);
    assert_eq!(count_rows(&storage, "Users"), 0);

    assert_eq!(storage.execute_pending().unwrap(), 2);
    assert_eq!(storage.pending_command_count(), 0);

    let command = storage
        .create_command("SELECT Name FROM Users ORDER BY Id")
        .unwrap();
    let names = storage
        .query(&command, |row| Ok(row.get::<_, String>(0)?))
        .unwrap();
    assert_eq!(names, vec!["first", "second"]);
}

#[test]
fn discard_pending_drops_queue_without_executing() {
    let storage = memory_storage();
    let command = storage.create_command("DELETE FROM Nowhere").unwrap();
    storage.add_command(command).unwrap();

    assert_eq!(storage.discard_pending(), 1);
    assert_eq!(storage.execute_pending().unwrap(), 0);
    assert_eq!(storage.statistics().connections_opened, 0);
}

#[test]
fn transaction_scope_rolls_back_when_dropped() {
    let storage = memory_storage();
    let _connection = storage.open_scope().unwrap();
    storage.execute_batch(SCHEMA).unwrap();

    {
        let scope = storage.transaction_context().unwrap();
        assert!(scope.is_owner());
        assert!(storage.transaction_exists());
        storage
            .execute_batch("INSERT INTO Users (Name) VALUES ('lost');")
            .unwrap();
    }
    assert!(!storage.transaction_exists());
    assert_eq!(count_rows(&storage, "Users"), 0);
    assert_eq!(storage.statistics().transactions_rolled_back, 1);
}

#[test]
fn joined_scope_leaves_commit_to_owner() {
    let storage = memory_storage();
    let _connection = storage.open_scope().unwrap();
    storage.execute_batch(SCHEMA).unwrap();

    let outer = storage.transaction_context().unwrap();
    let inner = storage.transaction_context().unwrap();
    assert!(!inner.is_owner());
    storage
        .execute_batch("INSERT INTO Users (Name) VALUES ('kept');")
        .unwrap();
    inner.commit().unwrap();
    assert!(storage.transaction_exists());

    outer.commit().unwrap();
    assert!(!storage.transaction_exists());
    assert_eq!(count_rows(&storage, "Users"), 1);
    assert_eq!(storage.statistics().transactions_committed, 1);
}

#[test]
fn forced_close_rolls_back_active_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let storage = StorageContext::new(
        StorageOptions::file(dir.path().join("forced.db")),
        configurations(),
    );
    storage.execute_batch(SCHEMA).unwrap();

    let scope = storage.transaction_context().unwrap();
    storage
        .execute_batch("INSERT INTO Users (Name) VALUES ('pending');")
        .unwrap();
    storage.close(true).unwrap();
    assert!(!storage.transaction_exists());
    assert_eq!(storage.state(), ConnectionState::Closed);
    drop(scope);

    assert_eq!(count_rows(&storage, "Users"), 0);
    assert_eq!(storage.statistics().transactions_rolled_back, 1);
}

#[test]
fn disposed_context_rejects_every_operation() {
    let storage = memory_storage();
    storage.open().unwrap();
    storage.dispose();

    assert!(storage.is_disposed());
    assert_eq!(storage.state(), ConnectionState::Closed);
    assert!(matches!(storage.open(), Err(StoreError::Disposed("StorageContext"))));
    assert!(matches!(
        storage.create_command("SELECT 1"),
        Err(StoreError::Disposed(_))
    ));
    assert!(matches!(
        storage.execute_batch("SELECT 1;"),
        Err(StoreError::Disposed(_))
    ));
}

#[test]
fn connection_string_selects_target_and_mode() {
    let storage = StorageContext::from_connection_string(
        "Data Source=:memory:;Transaction Mode=immediate",
        EntityConfigurationCollection::new(),
    )
    .unwrap();
    assert_eq!(storage.options().target, ConnectionTarget::Memory);
    assert_eq!(storage.options().transaction_mode, TransactionMode::Immediate);
    assert_eq!(storage.dialect().name(), "sqlite");
}

#[test]
fn storage_options_deserialize_with_defaults() {
    let options: StorageOptions = serde_json::from_str(
        r#"{ "target": { "mode": "file", "path": "/data/app.db" }, "foreign_keys": false }"#,
    )
    .unwrap();
    assert_eq!(options.target, StorageOptions::file("/data/app.db").target);
    assert!(!options.foreign_keys);
    assert_eq!(options.busy_timeout_ms, 5_000);
    assert_eq!(options.transaction_mode, TransactionMode::Deferred);
}

#[test]
fn scope_outliving_forced_close_leaves_later_connection_open() {
    let storage = memory_storage();
    let stale = storage.open_scope().unwrap();
    storage.close(true).unwrap();

    storage.open().unwrap();
    drop(stale);
    assert_eq!(storage.state(), ConnectionState::Open);
    assert_eq!(storage.open_count(), 1);
    assert_eq!(storage.statistics().connections_closed, 1);

    storage.close(false).unwrap();
    assert_eq!(storage.state(), ConnectionState::Closed);
}

#[test]
fn transaction_scope_outliving_forced_close_cannot_commit() {
    let dir = tempfile::tempdir().unwrap();
    let storage = StorageContext::new(
        StorageOptions::file(dir.path().join("stale.db")),
        configurations(),
    );
    storage.execute_batch(SCHEMA).unwrap();

    let stale = storage.transaction_context().unwrap();
    storage
        .execute_batch("INSERT INTO Users (Name) VALUES ('lost');")
        .unwrap();
    storage.close(true).unwrap();

    let later = storage.transaction_context().unwrap();
    storage
        .execute_batch("INSERT INTO Users (Name) VALUES ('kept');")
        .unwrap();
    assert!(matches!(stale.commit(), Err(StoreError::InvalidState(_))));
    assert!(storage.transaction_exists());

    later.commit().unwrap();
    assert_eq!(count_rows(&storage, "Users"), 1);
    assert_eq!(storage.statistics().transactions_committed, 1);
    assert_eq!(storage.statistics().transactions_rolled_back, 1);
}
