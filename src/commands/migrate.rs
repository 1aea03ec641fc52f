use crate::commands::{CommandContext, SelectionArgs};
use anyhow::{Context, Result};
use clap::Args;
use console::style;
use dbmt::config::Config;
use dbmt::migration::{Migration, discover_migrations, new_migration_file};
use dbmt::migrator::MultiMigrator;
use dbmt::progress::Reporter;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub selection: SelectionArgs,
}

fn build_migrator(ctx: &CommandContext) -> Result<MultiMigrator> {
    let dir = &ctx.config.migrator.migrations_dir;
    let migrations = discover_migrations(dir)
        .with_context(|| format!("loading migrations from {}", dir.display()))?;
    info!("Loaded {} migration(s) from {}", migrations.len(), dir.display());

    let mut migrator = MultiMigrator::new(
        ctx.config.migrator_config(),
        ctx.manager.default_database(),
    )
    .with_migrations_dir(dir);
    migrator.register_all(
        migrations
            .into_iter()
            .map(|m| Arc::new(m) as Arc<dyn Migration>),
    );
    Ok(migrator)
}

pub async fn cmd_init(config: Config, reporter: Reporter, selection: &SelectionArgs) -> Result<()> {
    let ctx = CommandContext::new(config, reporter)?;
    let targets = ctx.targets(selection).await?;
    let migrator = build_migrator(&ctx)?;

    let report = migrator.init(&ctx.manager, &targets).await;
    for (database, ()) in &report.successes {
        println!(
            "{} {}: {} and {} ready",
            style("✓").green(),
            database,
            ctx.config.migrator.migrations_table,
            ctx.config.migrator.lock_table
        );
    }
    ctx.finish(report).await
}

pub async fn cmd_up(config: Config, reporter: Reporter, selection: &SelectionArgs) -> Result<()> {
    let ctx = CommandContext::new(config, reporter)?;
    let targets = ctx.targets(selection).await?;
    let migrator = build_migrator(&ctx)?;

    let report = migrator.up(&ctx.manager, &targets).await;
    for (_, run) in &report.successes {
        ctx.reporter.run_report(run);
    }
    ctx.finish(report).await
}

pub async fn cmd_down(
    config: Config,
    reporter: Reporter,
    selection: &SelectionArgs,
    steps: usize,
) -> Result<()> {
    let ctx = CommandContext::new(config, reporter)?;
    let targets = ctx.targets(selection).await?;
    let migrator = build_migrator(&ctx)?;

    let report = migrator.down(&ctx.manager, &targets, steps).await;
    for (_, run) in &report.successes {
        ctx.reporter.run_report(run);
    }
    ctx.finish(report).await
}

pub async fn cmd_status(config: Config, reporter: Reporter, args: &StatusArgs) -> Result<()> {
    let ctx = CommandContext::new(config, reporter)?;
    let targets = ctx.targets(&args.selection).await?;
    let migrator = build_migrator(&ctx)?;

    let report = migrator.status(&ctx.manager, &targets).await;
    if args.json {
        let by_database: BTreeMap<_, _> = report
            .successes
            .iter()
            .map(|(database, statuses)| (database.as_str(), statuses))
            .collect();
        println!("{}", serde_json::to_string_pretty(&by_database)?);
    } else {
        for (database, statuses) in &report.successes {
            ctx.reporter.status(database, statuses);
        }
    }
    ctx.finish(report).await
}

/// Needs no database connection.
pub fn cmd_create(config: &Config, name: &str, database: Option<&str>) -> Result<()> {
    let path = new_migration_file(
        &config.migrator.migrations_dir,
        name,
        database,
        chrono::Local::now(),
    )?;
    println!("{} Created {}", style("✓").green(), path.display());
    Ok(())
}
