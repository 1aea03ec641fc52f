mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{
    CopyDataArgs, CreateDbArgs, InsertDataArgs, SelectionArgs, StatusArgs,
};
use console::style;
use dbmt::config::{self, ConfigInput, ConnectionArgs, MigratorArgs};
use dbmt::constants::CONFIG_FILENAME;
use dbmt::error::format_detailed;
use dbmt::progress::Reporter;
use dotenv::dotenv;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(long, default_value = CONFIG_FILENAME, global = true)]
    config_file: String,

    /// Enable verbose output (info level)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Suppress all non-essential output (error level only)
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// Enable debug output (debug level)
    #[arg(long, global = true)]
    debug: bool,

    #[command(flatten)]
    connection_args: ConnectionArgs,

    #[command(flatten)]
    migrator_args: MigratorArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the ledger and lock tables on the target databases
    Init {
        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Apply pending migrations
    Up {
        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Revert the most recently applied migrations
    Down {
        /// Number of migrations to revert
        #[arg(long, default_value = "1")]
        steps: usize,

        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Show applied and pending migrations
    Status(StatusArgs),

    /// Write a new migration file
    Create {
        /// Migration name, e.g. "add user index"
        name: String,

        /// Place the file in this database's subdirectory
        #[arg(short = 'd', long)]
        database: Option<String>,
    },

    /// List databases known to the configuration and the server
    Databases {
        /// Glob patterns to match (defaults to migrator.database_patterns)
        #[arg(long, value_delimiter = ',')]
        patterns: Vec<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Create a database and run a schema script against it
    CreateDb(CreateDbArgs),

    /// Load INSERT statements from a data script
    InsertData(InsertDataArgs),

    /// Copy table data between databases
    CopyData(CopyDataArgs),
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    let cli = Cli::parse();
    initialize_logging(&cli);

    let result = tokio::select! {
        result = run_main(cli) => result,
        _ = wait_for_shutdown_signal() => {
            info!("Received shutdown signal, exiting");
            Err(anyhow::anyhow!("interrupted"))
        }
    };

    if let Err(e) = result {
        eprintln!("{} {}", style("Error:").red().bold(), format_detailed(e.as_ref()));
        std::process::exit(1);
    }
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn initialize_logging(cli: &Cli) {
    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else if cli.quiet {
        "error"
    } else {
        "warn" // default level
    };

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(level)
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_main(cli: Cli) -> Result<()> {
    let (file_config, config_dir) = config::load_config(&cli.config_file)?;
    let cli_config = ConfigInput {
        database: Some(cli.connection_args.clone().into()),
        databases: None,
        migrator: Some(cli.migrator_args.clone().into()),
        data: None,
    };
    let config = config::ConfigBuilder::new()
        .with_file(file_config)
        .with_config_dir(config_dir)
        .with_cli_args(cli_config)
        .resolve()?;
    let reporter = Reporter::new(cli.verbose || cli.debug);

    match cli.command {
        Commands::Create { name, database } => {
            commands::cmd_create(&config, &name, database.as_deref())
        }
        Commands::Init { selection } => commands::cmd_init(config, reporter, &selection).await,
        Commands::Up { selection } => commands::cmd_up(config, reporter, &selection).await,
        Commands::Down { steps, selection } => {
            commands::cmd_down(config, reporter, &selection, steps).await
        }
        Commands::Status(args) => commands::cmd_status(config, reporter, &args).await,
        Commands::Databases { patterns, json } => {
            commands::cmd_databases(config, reporter, &patterns, json).await
        }
        Commands::CreateDb(args) => commands::cmd_create_db(config, reporter, &args).await,
        Commands::InsertData(args) => commands::cmd_insert_data(config, reporter, &args).await,
        Commands::CopyData(args) => commands::cmd_copy_data(config, reporter, &args).await,
    }
}
