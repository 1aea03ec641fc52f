use crate::commands::{CommandContext, script_error};
use anyhow::{Context, Result};
use clap::Args;
use console::style;
use dbmt::config::Config;
use dbmt::constants::{DEFAULT_CHARSET, DEFAULT_COLLATION};
use dbmt::database::{CreateDatabaseOptions, CreateFromScriptResult, DatabaseCreator, IfExists};
use dbmt::progress::Reporter;
use dialoguer::Confirm;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Args)]
pub struct CreateDbArgs {
    /// Database to create
    #[arg(long)]
    pub name: String,

    /// Schema script to run against the new database
    #[arg(long)]
    pub from_sql: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_CHARSET)]
    pub charset: String,

    #[arg(long, default_value = DEFAULT_COLLATION)]
    pub collation: String,

    /// What to do when the database already exists: error, skip or prompt
    #[arg(long, default_value = "error")]
    pub if_exists: IfExists,
}

fn confirm_existing(name: &str) -> bool {
    Confirm::new()
        .with_prompt(format!(
            "Database {} already exists. Continue with the existing database?",
            name
        ))
        .default(false)
        .interact()
        .unwrap_or(false)
}

pub async fn cmd_create_db(config: Config, reporter: Reporter, args: &CreateDbArgs) -> Result<()> {
    let started = Instant::now();
    let dry_run = config.migrator.dry_run;

    let mut options = CreateDatabaseOptions::new(&args.name);
    options.charset = args.charset.clone();
    options.collation = args.collation.clone();
    options.if_exists = args.if_exists;

    let mut creator = DatabaseCreator::new();
    if args.if_exists == IfExists::Prompt && std::io::stdin().is_terminal() {
        creator = creator.with_confirm(Arc::new(confirm_existing));
    }

    let script = match &args.from_sql {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?,
        ),
        None => None,
    };
    let plan = match (&args.from_sql, &script) {
        (Some(path), Some(script)) => Some(
            creator
                .plan(script)
                .map_err(|e| script_error(path, script, e))?,
        ),
        _ => None,
    };

    if dry_run {
        println!("{}", style("Dry run, nothing will be executed").yellow());
        println!("  {};", options.create_sql());
        if let Some(plan) = &plan {
            reporter.plan(plan);
        }
        return Ok(());
    }

    let ctx = CommandContext::new(config, reporter)?;
    let outcome = run(&ctx, &creator, &options, script.as_deref(), started).await;
    ctx.manager.close_all().await;
    let result = outcome?;

    ctx.reporter.create_result(&result);
    Ok(())
}

async fn run(
    ctx: &CommandContext,
    creator: &DatabaseCreator,
    options: &CreateDatabaseOptions,
    script: Option<&str>,
    started: Instant,
) -> Result<CreateFromScriptResult> {
    let mut server = ctx.manager.server().await?;
    let created = creator.create_database(server.executor(), options).await?;
    server.close().await;

    let mut result = match script {
        Some(script) => {
            info!("Running schema script against {}", options.name);
            let mut db = ctx.manager.database(&options.name).await?;
            creator.execute_script(db.as_mut(), script).await?
        }
        None => CreateFromScriptResult::new(&options.name),
    };
    result.created = created;
    result.duration = started.elapsed();
    Ok(result)
}
