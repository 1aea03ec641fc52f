use crate::config::filter::DatabaseFilter;
use crate::database::target::TargetSelection;
use crate::db::{Connector, Database};
use crate::error::{MigrateError, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Where a database name came from during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseSource {
    Configured,
    Default,
    Server,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub configured: bool,
    pub matched: bool,
    pub source: DatabaseSource,
}

/// Names the manager knows about before any connection is opened.
#[derive(Debug, Clone, Default)]
pub struct ManagerOptions {
    /// Databases with their own connection block.
    pub configured: Vec<String>,
    /// Explicit `migrator.default_database`.
    pub default_database: Option<String>,
    /// Database named by the base connection.
    pub base_database: Option<String>,
    /// `migrator.database_patterns`, used by `--all`.
    pub patterns: Vec<String>,
}

impl ManagerOptions {
    /// Explicit default, else the first configured name, else the base database.
    pub fn resolve_default(&self) -> Option<String> {
        self.default_database
            .clone()
            .or_else(|| self.configured.iter().min().cloned())
            .or_else(|| self.base_database.clone())
            .filter(|name| !name.is_empty())
    }
}

/// Lazily opened, cached connections to named databases.
pub struct DatabaseManager {
    connector: Arc<dyn Connector>,
    configured: BTreeSet<String>,
    default_database: String,
    patterns: Vec<String>,
    connections: Mutex<HashMap<String, Box<dyn Database>>>,
}

impl DatabaseManager {
    pub fn new(connector: Arc<dyn Connector>, options: ManagerOptions) -> Result<Self> {
        let default_database = options.resolve_default().ok_or_else(|| {
            MigrateError::validation(
                "no default database: set migrator.default_database, a databases entry or database.database",
            )
        })?;
        Ok(Self {
            connector,
            configured: options.configured.into_iter().collect(),
            default_database,
            patterns: options.patterns,
            connections: Mutex::new(HashMap::new()),
        })
    }

    pub fn default_database(&self) -> &str {
        &self.default_database
    }

    pub fn configured(&self) -> impl Iterator<Item = &str> {
        self.configured.iter().map(String::as_str)
    }

    pub fn is_configured(&self, name: &str) -> bool {
        self.configured.contains(name)
    }

    /// Handle to `name`, connecting on first use.
    pub async fn database(&self, name: &str) -> Result<Box<dyn Database>> {
        let mut connections = self.connections.lock().await;
        if let Some(db) = connections.get(name) {
            return Ok(db.clone_handle());
        }

        debug!("Opening connection to {}", name);
        let db = self
            .connector
            .connect(Some(name))
            .await
            .map_err(|source| MigrateError::Connection {
                database: name.to_string(),
                source,
            })?;
        let handle = db.clone_handle();
        connections.insert(name.to_string(), db);
        Ok(handle)
    }

    /// Connection to the server without a default database. Not cached.
    pub async fn server(&self) -> Result<Box<dyn Database>> {
        self.connector
            .connect(None)
            .await
            .map_err(|source| MigrateError::Connection {
                database: "(server)".to_string(),
                source,
            })
    }

    /// Non-system databases reported by `SHOW DATABASES`.
    pub async fn discover_from_server(&self) -> Result<Vec<String>> {
        let mut server = self.server().await?;
        let rows = server
            .executor()
            .query("SHOW DATABASES", &[])
            .await
            .map_err(|e| MigrateError::execution("(server)", "SHOW DATABASES", e))?;
        server.close().await;

        let filter = DatabaseFilter::default();
        Ok(rows
            .iter()
            .filter_map(|row| row.text(0))
            .filter(|name| filter.should_include_discovered(name))
            .collect())
    }

    /// Every known database: configured, default and, when reachable, those
    /// on the server. `matched` reflects `patterns` (or the configured
    /// patterns when none are given).
    pub async fn discover(&self, patterns: &[String]) -> Result<Vec<DatabaseInfo>> {
        let patterns = if patterns.is_empty() {
            self.patterns.as_slice()
        } else {
            patterns
        };
        let filter = DatabaseFilter::new(patterns)?;
        let matches = |name: &str| !filter.is_empty() && filter.matches(name);

        let mut found: BTreeMap<String, DatabaseSource> = BTreeMap::new();
        for name in &self.configured {
            found.insert(name.clone(), DatabaseSource::Configured);
        }
        found
            .entry(self.default_database.clone())
            .or_insert(DatabaseSource::Default);

        match self.discover_from_server().await {
            Ok(names) => {
                for name in names {
                    found.entry(name).or_insert(DatabaseSource::Server);
                }
            }
            Err(e) => warn!("Could not list databases on the server: {}", e),
        }

        Ok(found
            .into_iter()
            .map(|(name, source)| DatabaseInfo {
                configured: self.configured.contains(&name),
                matched: matches(&name),
                source,
                name,
            })
            .collect())
    }

    /// Sorted names matching any of `patterns`.
    pub async fn matched_databases(&self, patterns: &[String]) -> Result<Vec<String>> {
        if patterns.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .discover(patterns)
            .await?
            .into_iter()
            .filter(|info| info.matched)
            .map(|info| info.name)
            .collect())
    }

    /// Concrete target list for a selection; never empty.
    pub async fn resolve(&self, selection: &TargetSelection) -> Result<Vec<String>> {
        let names = match selection {
            TargetSelection::Default => Vec::new(),
            TargetSelection::Single(name) => vec![name.clone()],
            TargetSelection::List(names) => names.clone(),
            TargetSelection::Patterns(patterns) => self.matched_databases(patterns).await?,
            TargetSelection::All if !self.patterns.is_empty() => {
                self.matched_databases(&self.patterns).await?
            }
            TargetSelection::All => self.configured.iter().cloned().collect(),
        };

        if names.is_empty() {
            if !matches!(selection, TargetSelection::Default) {
                warn!(
                    "No databases matched {}, using default database {}",
                    selection.describe(),
                    self.default_database
                );
            }
            return Ok(vec![self.default_database.clone()]);
        }
        info!("Target databases: {}", names.join(", "));
        Ok(names)
    }

    pub async fn close_all(&self) {
        let mut connections = self.connections.lock().await;
        for (name, db) in connections.drain() {
            debug!("Closing connection to {}", name);
            db.close().await;
        }
    }
}
