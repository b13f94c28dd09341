//! CLI smoke entry point.
//!
//! # Responsibility
//! - Exercise configuration, unit of work and repository end to end.
//! - Keep output deterministic apart from generated ids.
//!
//! Usage: `rowkeeper_cli [connection-string] [role-name]`. The connection
//! string defaults to `:memory:`; set `ROWKEEPER_LOG_DIR` to an absolute
//! path to enable file logging.

use log::info;
use rowkeeper_core::{
    init_logging, EntityConfigurationBuilder, EntityConfigurationCollection, EntityMapping, Entity,
    LogLevel, LoggingConfig, Repository, StorageContext, StoreResult, UnitOfWork,
};
use std::process::ExitCode;
use std::rc::Rc;
use uuid::Uuid;

const ROLES_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS Roles (
    Id TEXT PRIMARY KEY NOT NULL,
    Name TEXT NOT NULL
);";

#[derive(Debug, Clone, Default)]
struct Role {
    id: Uuid,
    name: String,
}

impl Entity for Role {
    fn entity_name() -> &'static str {
        "Role"
    }
}

struct RoleMapping;

impl EntityMapping for RoleMapping {
    type Entity = Role;

    fn configure(&self, entity: &mut EntityConfigurationBuilder<Role>) {
        entity.to_table("Roles");
        entity.property("Id", |r: &Role| &r.id, |r, v| r.id = v);
        entity.property("Name", |r: &Role| &r.name, |r, v| r.name = v);
        entity.has_key(&["Id"]);
    }
}

fn main() -> ExitCode {
    if let Some(log_dir) = std::env::var_os("ROWKEEPER_LOG_DIR") {
        let config = LoggingConfig::new(LogLevel::default_for_build(), log_dir);
        if let Err(err) = init_logging(&config) {
            eprintln!("rowkeeper logging disabled: {err}");
        }
    }

    let mut args = std::env::args().skip(1);
    let connection_string = args.next().unwrap_or_else(|| ":memory:".to_string());
    let role_name = args.next().unwrap_or_else(|| "Admin".to_string());

    match run(&connection_string, &role_name) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("rowkeeper error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(connection_string: &str, role_name: &str) -> StoreResult<()> {
    println!("rowkeeper_core version={}", rowkeeper_core::core_version());

    let mut configurations = EntityConfigurationCollection::new();
    configurations.add_mapping(&RoleMapping)?;
    let storage = StorageContext::from_connection_string(connection_string, configurations)?;
    let unit_of_work = Rc::new(UnitOfWork::new(storage));
    let storage = unit_of_work.storage();

    // Held for the whole run so an in-memory database survives between
    // the save and the lookup.
    let _connection = storage.open_scope()?;
    storage.execute_batch(ROLES_SCHEMA)?;

    let roles = Repository::<Role>::new(&unit_of_work)?;
    roles.add(&Role {
        id: Uuid::new_v4(),
        name: role_name.to_string(),
    })?;
    let saved = unit_of_work.save_changes()?;
    info!("event=cli_save module=cli status=ok processed={saved}");
    println!("saved={saved}");

    let lookup = role_name.to_lowercase();
    match roles.find_by_name(Some(&lookup))? {
        Some(role) => println!("found id={} name={}", role.id, role.name),
        None => println!("found none for name={lookup}"),
    }

    let stats = storage.statistics();
    println!(
        "stats connections_opened={} commands_executed={} transactions_committed={}",
        stats.connections_opened, stats.commands_executed, stats.transactions_committed
    );
    Ok(())
}
