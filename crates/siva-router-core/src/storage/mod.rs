//! Storage layer - SQLite
//!
//! Provides database management and migrations for the router.
//!
//! # Architecture
//!
//! - `database`: Connection pool management and initialization
//! - `migrations`: Schema versioning and automatic migration
//!
//! Reference data (capabilities, models, persona policies) and the
//! append-only logs (routing decisions, capability denials) share one
//! database. The log tables reject `UPDATE`/`DELETE` at the schema level.

pub mod database;
pub mod migrations;

pub use database::{Database, DatabaseConfig, StorageHealth, default_database_path};
