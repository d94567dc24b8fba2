//! mssql-table-migrator CLI - transactional SQL Server table replication.

use clap::{Args, Parser, Subcommand};
use mssql_table_migrator::{Config, MigrateError, MigrationSession, SessionFactory, TableRef};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "mssql-table-migrator")]
#[command(about = "Transactional SQL Server table replication")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CopyArgs {
    /// Source table, as `schema.name` or `name` (schema defaults to dbo)
    source: TableRef,

    /// Destination table (default: same name as the source)
    #[arg(short, long)]
    destination: Option<TableRef>,

    /// Run without wrapping the copy in a destination transaction
    #[arg(long)]
    no_transaction: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy a table's schema, indexes and rows
    Migrate(CopyArgs),

    /// Copy a table's schema and indexes without rows
    CopySchema(CopyArgs),

    /// Report whether a table exists on the destination
    Exists {
        /// Table, as `schema.name` or `name`
        table: TableRef,
    },

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);
    let factory = SessionFactory::new(config)?;

    match cli.command {
        Commands::Migrate(args) => {
            copy(&factory, &args, true).await?;
            println!(
                "Migrated {} -> {}",
                args.source,
                args.destination.as_ref().unwrap_or(&args.source)
            );
        }

        Commands::CopySchema(args) => {
            copy(&factory, &args, false).await?;
            println!(
                "Copied schema {} -> {}",
                args.source,
                args.destination.as_ref().unwrap_or(&args.source)
            );
        }

        Commands::Exists { table } => {
            let mut session = factory.from_defaults()?;
            session.open().await?;
            let exists = session.check_table_exists(&table).await;
            session.close().await?;
            println!("{}: {}", table, if exists? { "exists" } else { "missing" });
        }

        Commands::HealthCheck => {
            let mut session = factory.from_defaults()?;
            let opened = session.open().await;
            let closed = session.close().await;
            println!("Health Check Results:");
            println!(
                "  Topology: {:?} ({})",
                session.topology(),
                session.topology().data_mover().as_str()
            );
            match (&opened, &closed) {
                (Ok(()), Ok(())) => println!("  Connections: OK"),
                (Err(e), _) | (_, Err(e)) => println!("  Connections: FAILED\n    Error: {}", e),
            }
            opened?;
            closed?;
        }
    }

    Ok(())
}

/// Open, guard against an existing destination, run inside a transaction
/// unless disabled, then close regardless of outcome.
async fn copy(
    factory: &SessionFactory,
    args: &CopyArgs,
    with_data: bool,
) -> Result<(), MigrateError> {
    let mut session = factory.from_defaults()?;
    session.open().await?;

    let result = copy_in_session(session.as_mut(), args, with_data).await;
    let closed = session.close().await;

    result?;
    closed
}

async fn copy_in_session(
    session: &mut dyn MigrationSession,
    args: &CopyArgs,
    with_data: bool,
) -> Result<(), MigrateError> {
    let destination = args.destination.as_ref().unwrap_or(&args.source);
    if session.check_table_exists(destination).await? {
        return Err(MigrateError::AlreadyExists(destination.to_string()));
    }

    let transactional = !args.no_transaction;
    if transactional {
        session.begin_transaction().await?;
    }

    let outcome = if with_data {
        session.migrate_table(&args.source, Some(destination)).await
    } else {
        session.copy_table_schema(&args.source, Some(destination)).await
    };

    match outcome {
        Ok(true) => {
            if transactional {
                session.commit_transaction().await?;
            }
            Ok(())
        }
        Ok(false) => {
            if transactional {
                session.rollback_transaction().await?;
            }
            Err(MigrateError::state(format!(
                "copy {} -> {} did not complete",
                args.source, destination
            )))
        }
        Err(e) => {
            if transactional {
                if let Err(rollback_err) = session.rollback_transaction().await {
                    warn!("Rollback after failure also failed: {}", rollback_err);
                }
            }
            Err(e)
        }
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}
