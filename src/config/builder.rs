use crate::config::{duration::parse_duration, merge::Merge, types::*};
use crate::data::DataInsertConfig;
use crate::db::ConnectionSettings;
use anyhow::{Context, Result, anyhow};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

type EnvLookup = fn(&str) -> Option<String>;

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

pub struct ConfigBuilder {
    config_input: ConfigInput,
    config_dir: Option<PathBuf>,
    env: EnvLookup,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config_input: ConfigInput::default(),
            config_dir: None,
            env: process_env,
        }
    }

    pub fn with_file(mut self, file_input: ConfigInput) -> Self {
        self.config_input = self.config_input.merge(file_input);
        self
    }

    /// Relative paths in the file are resolved against this directory.
    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }

    pub fn with_cli_args(mut self, cli_input: ConfigInput) -> Self {
        self.config_input = self.config_input.merge(cli_input);
        self
    }

    pub fn with_env_lookup(mut self, env: EnvLookup) -> Self {
        self.env = env;
        self
    }

    pub fn resolve(self) -> Result<Config> {
        let defaults = Config::default();
        let database = self.resolve_connection(&defaults.database);

        Ok(Config {
            databases: self.resolve_databases(&database)?,
            migrator: self.resolve_migrator(&defaults.migrator)?,
            data: self.resolve_data(&defaults.data)?,
            database,
        })
    }

    fn resolve_connection(&self, defaults: &ConnectionSettings) -> ConnectionSettings {
        let input = self.config_input.database.clone().unwrap_or_default();

        ConnectionSettings {
            url: input.url.or_else(|| (self.env)("DATABASE_URL")),
            host: input.host.unwrap_or_else(|| defaults.host.clone()),
            port: input.port.unwrap_or(defaults.port),
            username: input.username.unwrap_or_else(|| defaults.username.clone()),
            password: input.password.or_else(|| (self.env)("DB_PASSWORD")),
            database: input.database.or_else(|| defaults.database.clone()),
            charset: input.charset.unwrap_or_else(|| defaults.charset.clone()),
        }
    }

    /// Each named entry layers over the base connection; the entry key is
    /// the database name unless the entry overrides it.
    fn resolve_databases(
        &self,
        base: &ConnectionSettings,
    ) -> Result<BTreeMap<String, ConnectionSettings>> {
        let Some(entries) = &self.config_input.databases else {
            return Ok(BTreeMap::new());
        };

        let mut resolved = BTreeMap::new();
        for (name, input) in entries {
            if name.trim().is_empty() {
                return Err(anyhow!("databases: entry names must not be empty"));
            }
            let settings = ConnectionSettings {
                url: input.url.clone().or_else(|| base.url.clone()),
                host: input.host.clone().unwrap_or_else(|| base.host.clone()),
                port: input.port.unwrap_or(base.port),
                username: input
                    .username
                    .clone()
                    .unwrap_or_else(|| base.username.clone()),
                password: input.password.clone().or_else(|| base.password.clone()),
                database: Some(input.database.clone().unwrap_or_else(|| name.clone())),
                charset: input.charset.clone().unwrap_or_else(|| base.charset.clone()),
            };
            resolved.insert(name.clone(), settings);
        }
        Ok(resolved)
    }

    fn resolve_migrator(&self, defaults: &MigratorSettings) -> Result<MigratorSettings> {
        let input = self.config_input.migrator.clone().unwrap_or_default();

        let migrations_dir = match input.migrations_dir {
            Some(dir) => {
                let dir = PathBuf::from(dir);
                match &self.config_dir {
                    Some(base) if dir.is_relative() => base.join(dir),
                    _ => dir,
                }
            }
            None => match &self.config_dir {
                Some(base) => base.join(&defaults.migrations_dir),
                None => defaults.migrations_dir.clone(),
            },
        };

        if let Some(default_db) = &input.default_database
            && let Some(entries) = &self.config_input.databases
            && !entries.is_empty()
            && !entries.contains_key(default_db)
        {
            return Err(anyhow!(
                "migrator.default_database '{}' is not listed under databases",
                default_db
            ));
        }

        Ok(MigratorSettings {
            migrations_table: input
                .migrations_table
                .unwrap_or_else(|| defaults.migrations_table.clone()),
            lock_table: input
                .lock_table
                .unwrap_or_else(|| defaults.lock_table.clone()),
            migrations_dir,
            default_database: input.default_database.or_else(|| defaults.default_database.clone()),
            database_patterns: input
                .database_patterns
                .unwrap_or_else(|| defaults.database_patterns.clone()),
            dry_run: input.dry_run.unwrap_or(defaults.dry_run),
            stale_lock_timeout: input
                .stale_lock_timeout_secs
                .map(Duration::from_secs)
                .or(defaults.stale_lock_timeout),
        })
    }

    fn resolve_data(&self, defaults: &DataInsertConfig) -> Result<DataInsertConfig> {
        let input = self.config_input.data.clone().unwrap_or_default();

        let batch_size = input.batch_size.unwrap_or(defaults.batch_size);
        if batch_size == 0 {
            return Err(anyhow!("data.batch_size must be greater than zero"));
        }

        let timeout = match input.timeout {
            Some(raw) => Some(
                parse_duration(&raw).with_context(|| format!("data.timeout '{}'", raw))?,
            ),
            None => defaults.timeout,
        };

        Ok(DataInsertConfig {
            batch_size,
            on_conflict: input.on_conflict.unwrap_or(defaults.on_conflict),
            stop_on_error: input.stop_on_error.unwrap_or(defaults.stop_on_error),
            validate_tables: input.validate_tables.unwrap_or(defaults.validate_tables),
            use_transaction: input.use_transaction.unwrap_or(defaults.use_transaction),
            timeout,
        })
    }
}
