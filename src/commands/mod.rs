mod create_db;
mod data;
mod databases;
mod migrate;

pub use create_db::{CreateDbArgs, cmd_create_db};
pub use data::{CopyDataArgs, InsertDataArgs, cmd_copy_data, cmd_insert_data};
pub use databases::cmd_databases;
pub use migrate::{StatusArgs, cmd_create, cmd_down, cmd_init, cmd_status, cmd_up};

use anyhow::{Result, anyhow};
use clap::Args;
use dbmt::config::Config;
use dbmt::database::{DatabaseManager, TargetSelection};
use dbmt::db::MySqlConnector;
use dbmt::db::error_context::SqlErrorContext;
use dbmt::error::MigrateError;
use dbmt::migrator::MultiDatabaseReport;
use dbmt::progress::Reporter;
use std::path::Path;
use std::sync::Arc;

/// Parse failures are shown against the script lines around them; anything
/// else keeps its chain under a `parsing <path>` context.
pub fn script_error(path: &Path, content: &str, error: MigrateError) -> anyhow::Error {
    match error {
        MigrateError::Parse { .. } => anyhow!(
            SqlErrorContext::from_error(&error, None).format(&path.display().to_string(), content)
        ),
        other => anyhow::Error::new(other).context(format!("parsing {}", path.display())),
    }
}

/// Target database selection shared by every multi-database command.
#[derive(Debug, Clone, Default, Args)]
#[group(id = "selection", multiple = false)]
pub struct SelectionArgs {
    /// Run against a single database
    #[arg(short = 'd', long)]
    pub database: Option<String>,

    /// Run against these databases (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub databases: Vec<String>,

    /// Run against server databases matching these glob patterns
    #[arg(long, value_delimiter = ',')]
    pub patterns: Vec<String>,

    /// Run against every configured or pattern-matched database
    #[arg(long)]
    pub all: bool,
}

impl SelectionArgs {
    pub fn selection(&self) -> Result<TargetSelection> {
        Ok(TargetSelection::from_flags(
            self.database.clone(),
            self.databases.clone(),
            self.patterns.clone(),
            self.all,
        )?)
    }
}

/// Resolved configuration plus the connection manager built from it.
pub struct CommandContext {
    pub config: Config,
    pub manager: DatabaseManager,
    pub reporter: Reporter,
}

impl CommandContext {
    pub fn new(config: Config, reporter: Reporter) -> Result<Self> {
        let connector = MySqlConnector::new(config.database.clone(), config.databases.clone());
        let manager = DatabaseManager::new(Arc::new(connector), config.manager_options())?;
        Ok(Self {
            config,
            manager,
            reporter,
        })
    }

    pub async fn targets(&self, selection: &SelectionArgs) -> Result<Vec<String>> {
        Ok(self.manager.resolve(&selection.selection()?).await?)
    }

    /// Print failures, close connections and turn the report into a result.
    pub async fn finish<T>(&self, report: MultiDatabaseReport<T>) -> Result<()> {
        self.manager.close_all().await;
        if !report.is_success() {
            self.reporter.failures(&report.failures);
            return Err(MigrateError::MultiDatabase(report.failures).into());
        }
        Ok(())
    }
}
