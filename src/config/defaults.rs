use crate::config::types::*;
use crate::constants::{DEFAULT_LOCK_TABLE, DEFAULT_MIGRATIONS_DIR, DEFAULT_MIGRATIONS_TABLE};
use std::path::PathBuf;

// Config derives Default; ConnectionSettings and DataInsertConfig carry their own

impl Default for MigratorSettings {
    fn default() -> Self {
        Self {
            migrations_table: DEFAULT_MIGRATIONS_TABLE.to_string(),
            lock_table: DEFAULT_LOCK_TABLE.to_string(),
            migrations_dir: PathBuf::from(DEFAULT_MIGRATIONS_DIR),
            default_database: None,
            database_patterns: vec![],
            dry_run: false,
            stale_lock_timeout: None,
        }
    }
}
