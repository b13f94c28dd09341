#![allow(dead_code)]

use rowkeeper_core::{
    Entity, EntityConfigurationBuilder, EntityConfigurationCollection, EntityMapping,
    StorageContext, StorageOptions, UnitOfWork,
};
use std::rc::Rc;
use tempfile::TempDir;
use uuid::Uuid;

pub const SCHEMA: &str = "
CREATE TABLE Roles (
    Id TEXT PRIMARY KEY NOT NULL,
    Name TEXT NOT NULL
);
CREATE TABLE Users (
    Id INTEGER PRIMARY KEY AUTOINCREMENT,
    Name TEXT NOT NULL,
    email_address TEXT NULL,
    IsActive INTEGER NULL
);
CREATE TABLE UserRoles (
    UserId INTEGER NOT NULL REFERENCES Users(Id),
    RoleId TEXT NOT NULL REFERENCES Roles(Id),
    PRIMARY KEY (UserId, RoleId)
);";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
}

impl Role {
    pub fn named(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
        }
    }
}

impl Entity for Role {
    fn entity_name() -> &'static str {
        "Role"
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub active: bool,
}

impl User {
    pub fn named(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            email: None,
            active: true,
        }
    }
}

impl Entity for User {
    fn entity_name() -> &'static str {
        "User"
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserRole {
    pub user_id: i64,
    pub role_id: Uuid,
}

impl Entity for UserRole {
    fn entity_name() -> &'static str {
        "UserRole"
    }
}

pub struct RoleMapping;

impl EntityMapping for RoleMapping {
    type Entity = Role;

    fn configure(&self, entity: &mut EntityConfigurationBuilder<Role>) {
        entity.to_table("Roles");
        entity.property("Id", |r: &Role| &r.id, |r, v| r.id = v);
        entity.property("Name", |r: &Role| &r.name, |r, v| r.name = v);
        entity.has_key(&["Id"]);
    }
}

pub struct UserMapping;

impl EntityMapping for UserMapping {
    type Entity = User;

    fn configure(&self, entity: &mut EntityConfigurationBuilder<User>) {
        entity.to_table("Users");
        entity
            .property("Id", |u: &User| &u.id, |u, v| u.id = v)
            .value_generated_on_add();
        entity.property("Name", |u: &User| &u.name, |u, v| u.name = v);
        entity
            .property("Email", |u: &User| &u.email, |u, v| u.email = v)
            .has_column_name("email_address");
        entity
            .property("IsActive", |u: &User| &u.active, |u, v| u.active = v)
            .has_default_value(true);
        entity.has_key(&["Id"]);
    }
}

pub struct UserRoleMapping;

impl EntityMapping for UserRoleMapping {
    type Entity = UserRole;

    fn configure(&self, entity: &mut EntityConfigurationBuilder<UserRole>) {
        entity.to_table("UserRoles");
        entity.property("UserId", |l: &UserRole| &l.user_id, |l, v| l.user_id = v);
        entity.property("RoleId", |l: &UserRole| &l.role_id, |l, v| l.role_id = v);
        entity.has_key(&["UserId", "RoleId"]);
    }
}

pub fn configurations() -> EntityConfigurationCollection {
    let mut configurations = EntityConfigurationCollection::new();
    configurations
        .add_mapping(&RoleMapping)
        .unwrap()
        .add_mapping(&UserMapping)
        .unwrap()
        .add_mapping(&UserRoleMapping)
        .unwrap();
    configurations
}

/// File-backed store with the test schema applied. The database lives as
/// long as the returned value.
pub struct TestStore {
    pub unit_of_work: Rc<UnitOfWork>,
    _dir: TempDir,
}

impl TestStore {
    pub fn storage(&self) -> &StorageContext {
        self.unit_of_work.storage()
    }
}

pub fn file_store() -> TestStore {
    let dir = tempfile::tempdir().unwrap();
    let options = StorageOptions::file(dir.path().join("rowkeeper.db"));
    let storage = StorageContext::new(options, configurations());
    storage.execute_batch(SCHEMA).unwrap();
    TestStore {
        unit_of_work: Rc::new(UnitOfWork::new(storage)),
        _dir: dir,
    }
}

pub fn count_rows(storage: &StorageContext, table: &str) -> i64 {
    let command = storage
        .create_command(format!("SELECT COUNT(*) FROM {table}"))
        .unwrap();
    storage
        .query_first(&command, |row| Ok(row.get::<_, i64>(0)?))
        .unwrap()
        .unwrap()
}
