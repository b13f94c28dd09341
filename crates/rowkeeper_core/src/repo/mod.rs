//! Repository layer over the unit of work.
//!
//! # Responsibility
//! - Expose per-entity CRUD entry points that batch writes and run reads.
//! - Keep SQL generation and parameter binding out of caller code.
//!
//! # Invariants
//! - Repositories never open their own connections; every database touch
//!   goes through the storage context of their unit of work.

pub mod repository;

pub use repository::{Repository, NAME_PROPERTY};
