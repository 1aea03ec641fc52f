use crate::config::types::*;
use std::collections::BTreeMap;

/// Trait for merging optional configuration values
pub trait Merge<T> {
    fn merge(self, other: T) -> T;
}

impl<T> Merge<Option<T>> for Option<T> {
    fn merge(self, other: Option<T>) -> Option<T> {
        other.or(self)
    }
}

impl Merge<ConfigInput> for ConfigInput {
    fn merge(self, other: ConfigInput) -> ConfigInput {
        ConfigInput {
            database: match (self.database, other.database) {
                (None, None) => None,
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (Some(a), Some(b)) => Some(a.merge_with(b)),
            },
            databases: match (self.databases, other.databases) {
                (None, None) => None,
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (Some(a), Some(b)) => Some(merge_databases(a, b)),
            },
            migrator: match (self.migrator, other.migrator) {
                (None, None) => None,
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (Some(a), Some(b)) => Some(a.merge_with(b)),
            },
            data: match (self.data, other.data) {
                (None, None) => None,
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (Some(a), Some(b)) => Some(a.merge_with(b)),
            },
        }
    }
}

fn merge_databases(
    mut base: BTreeMap<String, ConnectionInput>,
    other: BTreeMap<String, ConnectionInput>,
) -> BTreeMap<String, ConnectionInput> {
    for (name, input) in other {
        let merged = match base.remove(&name) {
            Some(existing) => existing.merge_with(input),
            None => input,
        };
        base.insert(name, merged);
    }
    base
}

// Custom merge implementations for complex types
impl ConnectionInput {
    pub fn merge_with(self, other: ConnectionInput) -> ConnectionInput {
        ConnectionInput {
            url: other.url.or(self.url),
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            username: other.username.or(self.username),
            password: other.password.or(self.password),
            database: other.database.or(self.database),
            charset: other.charset.or(self.charset),
        }
    }
}

impl MigratorInput {
    pub fn merge_with(self, other: MigratorInput) -> MigratorInput {
        MigratorInput {
            migrations_table: other.migrations_table.or(self.migrations_table),
            lock_table: other.lock_table.or(self.lock_table),
            migrations_dir: other.migrations_dir.or(self.migrations_dir),
            default_database: other.default_database.or(self.default_database),
            database_patterns: other.database_patterns.or(self.database_patterns),
            dry_run: other.dry_run.or(self.dry_run),
            stale_lock_timeout_secs: other
                .stale_lock_timeout_secs
                .or(self.stale_lock_timeout_secs),
        }
    }
}

impl DataInput {
    pub fn merge_with(self, other: DataInput) -> DataInput {
        DataInput {
            batch_size: other.batch_size.or(self.batch_size),
            on_conflict: other.on_conflict.or(self.on_conflict),
            stop_on_error: other.stop_on_error.or(self.stop_on_error),
            validate_tables: other.validate_tables.or(self.validate_tables),
            use_transaction: other.use_transaction.or(self.use_transaction),
            timeout: other.timeout.or(self.timeout),
        }
    }
}
