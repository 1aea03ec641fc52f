//! Error types shared by the migration engine.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, MigrateError>;

/// A failure attributed to one target database during a multi-database run.
#[derive(Debug)]
pub struct DatabaseFailure {
    pub database: String,
    pub error: MigrateError,
}

impl fmt::Display for DatabaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.database, format_detailed(&self.error))
    }
}

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("circular dependency detected between: {}", .statements.join(", "))]
    Cycle { statements: Vec<String> },

    #[error("failed to check whether {kind} '{name}' exists")]
    ExistenceCheck {
        kind: &'static str,
        name: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("database '{database}' is locked by {holder}{}", .since.as_ref().map(|s| format!(" since {s}")).unwrap_or_default())]
    LockContention {
        database: String,
        holder: String,
        since: Option<String>,
    },

    #[error("failed to execute {object} on database '{database}'")]
    Execution {
        database: String,
        object: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("statement at line {line} failed: {statement}")]
    Statement {
        line: usize,
        statement: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("migration {version} failed on database '{database}'")]
    MigrationFailed {
        database: String,
        version: String,
        #[source]
        source: Box<MigrateError>,
    },

    #[error("duplicate key while inserting into '{table}'")]
    Conflict {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("{operation} cancelled: deadline exceeded")]
    Cancelled { operation: String },

    #[error("copy of '{table}' failed and rollback was requested, but rolling back copied data is not supported")]
    RollbackUnsupported {
        table: String,
        #[source]
        source: Box<MigrateError>,
    },

    #[error("{} database(s) failed:\n{}", .0.len(), .0.iter().map(|f| format!("  {f}")).collect::<Vec<_>>().join("\n"))]
    MultiDatabase(Vec<DatabaseFailure>),

    #[error("failed to connect to database '{database}'")]
    Connection {
        database: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl MigrateError {
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn execution(
        database: impl Into<String>,
        object: impl Into<String>,
        source: sqlx::Error,
    ) -> Self {
        Self::Execution {
            database: database.into(),
            object: object.into(),
            source,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the underlying driver error is a unique-key violation.
    pub fn is_duplicate_key(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Execution { source, .. }
            | Self::Statement { source, .. }
            | Self::Database(source) => is_duplicate_key(source),
            Self::MigrationFailed { source, .. } => source.is_duplicate_key(),
            _ => false,
        }
    }
}

/// MySQL reports duplicate keys as error 1062 / SQLSTATE 23000; other drivers
/// and proxies only surface the message text.
pub fn is_duplicate_key(error: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db) = error
        && (db.code().as_deref() == Some("23000") || db.is_unique_violation())
    {
        return true;
    }
    let message = error.to_string().to_lowercase();
    message.contains("duplicate entry")
        || message.contains("duplicate key")
        || message.contains("unique constraint")
}

/// Render an error together with its full cause chain.
pub fn format_detailed(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.ends_with(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
