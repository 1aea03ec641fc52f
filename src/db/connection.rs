use crate::db::executor::{Database, DbResult};
use crate::db::mysql::MySqlDatabase;
use async_trait::async_trait;
use sqlx::ConnectOptions;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use tracing::log::LevelFilter;

/// Mask password in database URL for display
pub fn mask_url_password(url: &str) -> String {
    let Some((protocol, rest)) = url.split_once("://") else {
        return url.to_string();
    };

    if let Some(at_pos) = rest.rfind('@') {
        let user_info = &rest[..at_pos];
        let host_and_path = &rest[at_pos + 1..];

        if let Some((username, _)) = user_info.split_once(':') {
            return format!("{}://{}:***@{}", protocol, username, host_and_path);
        }
    }

    url.to_string()
}

/// Connection parameters for one MySQL server/database pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub database: Option<String>,
    pub charset: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 3306,
            username: "root".to_string(),
            password: None,
            database: None,
            charset: "utf8mb4".to_string(),
        }
    }
}

impl ConnectionSettings {
    /// Same server and credentials, different database.
    pub fn for_database(&self, database: &str) -> Self {
        Self {
            database: Some(database.to_string()),
            ..self.clone()
        }
    }

    /// Connection options with slow statement logging disabled, since schema
    /// scripts and batch inserts routinely exceed sqlx's threshold.
    pub fn connect_options(&self) -> DbResult<MySqlConnectOptions> {
        let options = match &self.url {
            Some(url) => {
                let mut options = MySqlConnectOptions::from_str(url)?;
                if let Some(database) = &self.database {
                    options = options.database(database);
                }
                options
            }
            None => {
                let mut options = MySqlConnectOptions::new()
                    .host(&self.host)
                    .port(self.port)
                    .username(&self.username)
                    .charset(&self.charset);
                if let Some(password) = &self.password {
                    options = options.password(password);
                }
                if let Some(database) = &self.database {
                    options = options.database(database);
                }
                options
            }
        };

        Ok(options.log_slow_statements(LevelFilter::Off, Duration::from_secs(0)))
    }

    /// Human-readable target with the password masked.
    pub fn describe(&self) -> String {
        match &self.url {
            Some(url) => mask_url_password(url),
            None => format!(
                "mysql://{}@{}:{}/{}",
                self.username,
                self.host,
                self.port,
                self.database.as_deref().unwrap_or("")
            ),
        }
    }
}

/// Database connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Maximum number of retries for database connections
    pub max_retries: u32,
    /// Delay before the first retry; doubled after each failed attempt
    pub retry_delay: Duration,
    /// Pool acquire timeout
    pub acquire_timeout: Duration,
    pub max_connections: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_millis(200),
            acquire_timeout: Duration::from_secs(5),
            max_connections: 5,
        }
    }
}

pub fn retry_delay(config: &ConnectionConfig, attempt: u32) -> Duration {
    config.retry_delay * 2u32.saturating_pow(attempt.min(6))
}

/// Connect to database with custom retry configuration
///
/// Handles transient failures such as a server that is still starting up.
pub async fn connect_with_retry(
    settings: &ConnectionSettings,
    config: &ConnectionConfig,
) -> DbResult<MySqlPool> {
    let options = settings.connect_options()?;
    let mut attempt = 0;

    loop {
        let result = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options.clone())
            .await;

        match result {
            Ok(pool) => {
                if attempt > 0 {
                    info!(
                        "✅ Connected to {} (after {} retry{})",
                        settings.describe(),
                        attempt,
                        if attempt == 1 { "" } else { "ies" }
                    );
                } else {
                    info!("✅ Connected to {}", settings.describe());
                }
                return Ok(pool);
            }
            Err(e) if attempt < config.max_retries => {
                if attempt == 0 {
                    info!("🔄 Database not ready ({}), retrying...", e);
                }
                tokio::time::sleep(retry_delay(config, attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Opens connections to named databases on demand.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `database`, or to the server without a default
    /// database when `None`.
    async fn connect(&self, database: Option<&str>) -> DbResult<Box<dyn Database>>;
}

/// Connector for MySQL using a base connection plus per-database overrides.
#[derive(Debug, Clone)]
pub struct MySqlConnector {
    base: ConnectionSettings,
    overrides: BTreeMap<String, ConnectionSettings>,
    config: ConnectionConfig,
}

impl MySqlConnector {
    pub fn new(base: ConnectionSettings, overrides: BTreeMap<String, ConnectionSettings>) -> Self {
        Self {
            base,
            overrides,
            config: ConnectionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Settings for `database`: an explicit override when configured,
    /// otherwise the base settings pointed at that database.
    pub fn settings_for(&self, database: Option<&str>) -> ConnectionSettings {
        match database {
            Some(name) => self
                .overrides
                .get(name)
                .cloned()
                .unwrap_or_else(|| self.base.for_database(name)),
            None => ConnectionSettings {
                database: None,
                ..self.base.clone()
            },
        }
    }
}

#[async_trait]
impl Connector for MySqlConnector {
    async fn connect(&self, database: Option<&str>) -> DbResult<Box<dyn Database>> {
        let settings = self.settings_for(database);
        let pool = connect_with_retry(&settings, &self.config).await?;
        let name = database
            .map(str::to_string)
            .or_else(|| settings.database.clone())
            .unwrap_or_default();
        Ok(Box::new(MySqlDatabase::new(name, pool)))
    }
}
