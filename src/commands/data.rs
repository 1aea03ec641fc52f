use crate::commands::{CommandContext, SelectionArgs, script_error};
use anyhow::{Context, Result, anyhow};
use clap::{ArgGroup, Args};
use dbmt::config::Config;
use dbmt::config::duration::parse_duration;
use dbmt::data::{
    ConflictPolicy, CopyConfig, CopyProgress, CopyStrategy, CrossDatabaseCopier, DataCopier,
    DataLoader, LoadProgress, OnError, parse_conditions, parse_mappings,
};
use dbmt::progress::Reporter;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Args)]
pub struct InsertDataArgs {
    /// Data script containing INSERT statements
    #[arg(long)]
    pub from_sql: PathBuf,

    /// Rows per INSERT batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Duplicate-key handling: error or ignore
    #[arg(long)]
    pub on_conflict: Option<ConflictPolicy>,

    /// Check that every target table exists before loading
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub validate_tables: Option<bool>,

    /// Load each database in one transaction
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub use_transaction: Option<bool>,

    /// Abort on the first failed batch
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub stop_on_error: Option<bool>,

    /// Give up between batches after this long (e.g. 90s, 10m)
    #[arg(long)]
    pub timeout: Option<String>,

    #[command(flatten)]
    pub selection: SelectionArgs,
}

pub async fn cmd_insert_data(
    config: Config,
    reporter: Reporter,
    args: &InsertDataArgs,
) -> Result<()> {
    let mut insert_config = config.data.clone();
    if let Some(batch_size) = args.batch_size {
        insert_config.batch_size = batch_size;
    }
    if let Some(policy) = args.on_conflict {
        insert_config.on_conflict = policy;
    }
    if let Some(validate) = args.validate_tables {
        insert_config.validate_tables = validate;
    }
    if let Some(use_transaction) = args.use_transaction {
        insert_config.use_transaction = use_transaction;
    }
    if let Some(stop) = args.stop_on_error {
        insert_config.stop_on_error = stop;
    }
    if let Some(timeout) = &args.timeout {
        insert_config.timeout = Some(parse_duration(timeout)?);
    }

    let statements = DataLoader::parse_file(&args.from_sql).map_err(|e| {
        let content = std::fs::read_to_string(&args.from_sql).unwrap_or_default();
        script_error(&args.from_sql, &content, e)
    })?;
    info!(
        "Parsed {} INSERT statement(s) from {}",
        statements.len(),
        args.from_sql.display()
    );

    let loader = DataLoader::new(insert_config)?
        .with_progress(Arc::new(move |progress: &LoadProgress| reporter.load_progress(progress)));
    let ctx = CommandContext::new(config, reporter)?;
    let targets = ctx.targets(&args.selection).await?;

    let report = loader.load_many(&ctx.manager, &targets, &statements).await;
    for (_, result) in &report.successes {
        ctx.reporter.insert_result(result);
    }
    ctx.finish(report).await
}

#[derive(Debug, Clone, Args)]
#[command(group(ArgGroup::new("destination").args(["target", "targets"]).multiple(false)))]
pub struct CopyDataArgs {
    /// Database to read from
    #[arg(long)]
    pub source: String,

    /// Database to write to
    #[arg(long)]
    pub target: Option<String>,

    /// Databases to write to (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub targets: Vec<String>,

    /// Tables to copy (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub tables: Vec<String>,

    /// overwrite, merge, insert or ignore
    #[arg(long)]
    pub strategy: Option<CopyStrategy>,

    /// Row filter as table:condition (repeatable)
    #[arg(long)]
    pub conditions: Vec<String>,

    /// Column mapping as table:source=target[,source=target] (repeatable)
    #[arg(long)]
    pub mappings: Vec<String>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Overall time limit (e.g. 30m)
    #[arg(long)]
    pub timeout: Option<String>,

    /// stop, continue or rollback
    #[arg(long)]
    pub on_error: Option<OnError>,

    /// YAML copy configuration; flags override its values
    #[arg(long)]
    pub copy_config: Option<PathBuf>,
}

impl CopyDataArgs {
    fn copy_config(&self) -> Result<CopyConfig> {
        let mut config = match &self.copy_config {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_yaml::from_str(&contents)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => CopyConfig::default(),
        };

        if !self.tables.is_empty() {
            config.tables = self.tables.clone();
        }
        if let Some(strategy) = self.strategy {
            config.strategy = strategy;
        }
        config.conditions.extend(parse_conditions(&self.conditions)?);
        config.field_mappings.extend(parse_mappings(&self.mappings)?);
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(timeout) = &self.timeout {
            config.timeout = parse_duration(timeout)?;
        }
        if let Some(on_error) = self.on_error {
            config.on_error = on_error;
        }
        Ok(config)
    }

    fn targets(&self) -> Result<Vec<String>> {
        let mut targets: Vec<String> = self.target.iter().cloned().collect();
        targets.extend(
            self.targets
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
        );
        targets.dedup();
        if targets.is_empty() {
            return Err(anyhow!("copy-data needs --target or --targets"));
        }
        Ok(targets)
    }
}

pub async fn cmd_copy_data(config: Config, reporter: Reporter, args: &CopyDataArgs) -> Result<()> {
    let copy_config = args.copy_config()?;
    let targets = args.targets()?;
    let copier = DataCopier::new(copy_config)?
        .with_progress(Arc::new(move |progress: &CopyProgress| reporter.copy_progress(progress)));
    info!(
        "Copying {} table(s) from {} to {}",
        copier.config().tables.len(),
        args.source,
        targets.join(", ")
    );

    let ctx = CommandContext::new(config, reporter)?;
    let report = CrossDatabaseCopier::new(&ctx.manager, copier)
        .copy_to_many(&args.source, &targets)
        .await;
    for (_, copy) in &report.successes {
        ctx.reporter.copy_report(copy);
        if copy.failed_tables().next().is_some() {
            ctx.reporter.warn(&format!(
                "{}: some tables failed and were skipped",
                copy.target
            ));
        }
    }
    ctx.finish(report).await
}
