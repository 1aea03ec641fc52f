//! MySQL schema migrations across many databases.
//!
//! The library parses DDL and data scripts, orders statements by their
//! dependencies, runs versioned migrations with a ledger and a per-database
//! lock, and loads or copies data in batches.

pub mod config;
pub mod constants;
pub mod data;
pub mod database;
pub mod db;
pub mod error;
pub mod migration;
pub mod migration_tracking;
pub mod migrator;
pub mod oracle;
pub mod progress;
pub mod resolver;
pub mod schema_ops;
pub mod sqlparse;

pub use error::{MigrateError, Result};
