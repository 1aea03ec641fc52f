pub mod connection;
pub mod error_context;
pub mod executor;
pub mod mysql;
pub mod value;

pub use connection::{ConnectionConfig, ConnectionSettings, Connector, MySqlConnector};
pub use executor::{Database, DbResult, SqlExecutor, Transaction};
pub use value::{Row, Value};

/// Quote an identifier with backticks, splitting `schema.name` into parts.
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("`{}`", part.trim_matches('`').replace('`', "``")))
        .collect::<Vec<_>>()
        .join(".")
}

/// `?, ?, ?` with `count` placeholders.
pub fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
