use std::time::Duration;

// Configuration file name
pub const CONFIG_FILENAME: &str = "dbmt.yaml";

// Ledger and lock table defaults
pub const DEFAULT_MIGRATIONS_TABLE: &str = "schema_migrations";
pub const DEFAULT_LOCK_TABLE: &str = "schema_migrations_lock";
pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";
pub const LOCK_ROW_ID: i64 = 1;

// Migration file naming conventions
pub const MIGRATION_FILENAME_PREFIX: &str = "V";

// Data loading defaults
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_COPY_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Prepared statement placeholder limit of the MySQL protocol.
pub const MYSQL_MAX_PLACEHOLDERS: usize = 65_535;

// Database creation defaults
pub const DEFAULT_CHARSET: &str = "utf8mb4";
pub const DEFAULT_COLLATION: &str = "utf8mb4_unicode_ci";

/// Schemas the server owns; never migration targets.
pub const SYSTEM_DATABASES: [&str; 4] = ["information_schema", "mysql", "performance_schema", "sys"];

pub fn is_system_database(name: &str) -> bool {
    SYSTEM_DATABASES
        .iter()
        .any(|system| system.eq_ignore_ascii_case(name))
}
