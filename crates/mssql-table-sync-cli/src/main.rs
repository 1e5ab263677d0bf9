//! mssql-table-sync CLI - replicate SQL Server tables between databases.

use clap::{Parser, Subcommand};
use mssql_table_sync::{Config, CopyMode, Orchestrator, SyncError};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "mssql-table-sync")]
#[command(about = "Replicate SQL Server tables between databases with differing schemas")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Read configuration from SRC_DB_*, TGT_DB_* and SYNC_* environment variables
    #[arg(long)]
    from_env: bool,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replicate every discovered table
    Run {
        /// Skip tables before this one (physical or logical name)
        resume_from: Option<String>,
    },

    /// List the tables that would be replicated, per company
    ListTables,

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<u8, SyncError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(SyncError::Config)?;

    let config = if cli.from_env {
        let config = Config::from_env()?;
        info!("Loaded configuration from environment");
        config
    } else {
        let config = Config::load(&cli.config)?;
        info!("Loaded configuration from {:?}", cli.config);
        config
    };

    match cli.command {
        Commands::Run { resume_from } => {
            // Setup signal handling for graceful shutdown (SIGINT and SIGTERM)
            let cancel_token = setup_signal_handler().await?;

            let orchestrator = Orchestrator::new(config).await?;
            let summary = orchestrator
                .run(resume_from.as_deref(), Some(cancel_token))
                .await?;

            if cli.output_json {
                println!("{}", summary.to_json()?);
            } else {
                println!("\nReplication {}!", summary.status);
                println!("  Run ID: {}", summary.run_id);
                println!("  Duration: {:.2}s", summary.duration_seconds);
                println!(
                    "  Tables: {} inline, {} fallback, {} failed, {} skipped",
                    summary.tables_inline,
                    summary.tables_fallback,
                    summary.tables_failed,
                    summary.tables_skipped
                );
                println!("  Rows: {}", summary.rows_copied);
                for result in summary.tables.iter().filter(|t| t.mode == CopyMode::FallbackScript) {
                    if let Some(ref script) = result.script {
                        println!("  Script: {}", script.path.display());
                    }
                }
                for failed in &summary.failed_tables {
                    println!("  Failed: {} ({})", failed.table, failed.error);
                }
            }

            Ok(summary.exit_code())
        }

        Commands::ListTables => {
            let orchestrator = Orchestrator::new(config).await?;
            let companies = orchestrator.list_tables().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&companies)?);
            } else {
                for company in &companies {
                    println!("{} ({} tables)", company.company, company.tables.len());
                    for table in &company.tables {
                        let suffix = if table.extension { " [ext]" } else { "" };
                        println!("  {}{}", table.logical, suffix);
                    }
                }
            }

            Ok(0)
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.health_check().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source: {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref version) = result.source_version {
                    println!("    {}", version);
                }
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target: {} ({}ms)",
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref version) = result.target_version {
                    println!("    {}", version);
                }
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(SyncError::pool("health check failed", "health-check"));
            }
            Ok(0)
        }
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => return Err(format!("unknown verbosity {:?}", other)),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("unknown log format {:?}", other)),
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received;
/// the table being copied finishes before the run stops.
#[cfg(unix)]
async fn setup_signal_handler() -> Result<CancellationToken, SyncError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token_int = cancel_token.clone();
    tokio::spawn(async move {
        sigint.recv().await;
        eprintln!("\nReceived SIGINT. Stopping after the current table...");
        token_int.cancel();
    });

    let token_term = cancel_token.clone();
    tokio::spawn(async move {
        sigterm.recv().await;
        eprintln!("\nReceived SIGTERM. Stopping after the current table...");
        token_term.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
async fn setup_signal_handler() -> Result<CancellationToken, SyncError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current table...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
