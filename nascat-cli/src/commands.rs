//! CLI command implementations

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Subcommand};
use nascat_core::catalog::CatalogStore;
use nascat_core::sync::{SyncOutcome, SyncSummary, Synchronizer};
use nascat_core::{NascatConfig, NascatError};
use nascat_web::ServerError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::progress::ScanSpinner;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Walk a directory tree and synchronize it into the catalog
    Scan(ScanArgs),
    /// Serve cataloged files and the JSON catalog API
    Serve(ServeArgs),
    /// List recent scan runs
    Runs {
        /// Database location (SQLite URL or file path)
        #[arg(long)]
        database_url: Option<String>,
        /// Number of runs to show
        #[arg(short, long, default_value_t = 10)]
        limit: u32,
    },
}

#[derive(Args)]
pub struct ScanArgs {
    /// Database location (SQLite URL or file path)
    #[arg(long)]
    database_url: Option<String>,
    /// Directory to scan
    #[arg(long)]
    root: Option<PathBuf>,
    /// Label recorded on every row from this root
    #[arg(long)]
    root_label: Option<String>,
    /// Files per committed transaction
    #[arg(long)]
    batch_size: Option<usize>,
}

#[derive(Args)]
pub struct ServeArgs {
    /// Database location (SQLite URL or file path)
    #[arg(long)]
    database_url: Option<String>,
    /// Address to listen on
    #[arg(long)]
    bind: Option<SocketAddr>,
    /// Only files under this directory are served
    #[arg(long)]
    allowed_root: Option<PathBuf>,
    /// Serve any cataloged path when no allowed root is set
    #[arg(long)]
    allow_unconfined: bool,
}

/// Process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failure,
    ConfigError,
    Interrupted,
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(match status {
            ExitStatus::Success => 0,
            ExitStatus::Failure => 1,
            ExitStatus::ConfigError => 2,
            ExitStatus::Interrupted => 130,
        })
    }
}

/// Handle the CLI command
///
/// # Errors
/// Returns the failure of the command that ran; see [`classify_error`]
pub async fn handle_command(command: Commands) -> anyhow::Result<ExitStatus> {
    match command {
        Commands::Scan(args) => scan(args).await,
        Commands::Serve(args) => serve(args).await,
        Commands::Runs {
            database_url,
            limit,
        } => list_runs(database_url, limit).await,
    }
}

/// Maps a command failure to its exit status.
pub fn classify_error(error: &anyhow::Error) -> ExitStatus {
    if let Some(e) = error.downcast_ref::<NascatError>()
        && e.is_user_error()
    {
        return ExitStatus::ConfigError;
    }
    if let Some(ServerError::Config(_)) = error.downcast_ref::<ServerError>() {
        return ExitStatus::ConfigError;
    }
    ExitStatus::Failure
}

/// Synchronize one root into the catalog
///
/// # Errors
/// - `NascatError::Config` - Database or scan root missing or invalid
/// - `NascatError::Sync` - Storage failure during the run
pub async fn scan(args: ScanArgs) -> anyhow::Result<ExitStatus> {
    let mut config = NascatConfig::from_env().map_err(NascatError::from)?;
    if let Some(url) = args.database_url {
        config.database.url = Some(url);
    }
    if let Some(root) = args.root {
        config.scan.root = Some(root);
    }
    if let Some(label) = args.root_label {
        config.scan.root_label = label;
    }
    if let Some(batch_size) = args.batch_size {
        config.scan.batch_size = batch_size;
    }
    config.validate_for_scan().map_err(NascatError::from)?;

    let store = CatalogStore::connect(&config.database)
        .await
        .map_err(NascatError::from)?;

    let cancel = CancellationToken::new();
    let signal_task = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; committing progress");
                cancel.cancel();
            }
        }
    });

    let spinner = ScanSpinner::new(&config.scan.root_label);
    let outcome = Synchronizer::new(store, config.scan.clone())
        .run(&cancel, &spinner)
        .await;
    spinner.finish();
    signal_task.abort();

    match outcome.map_err(NascatError::from)? {
        SyncOutcome::Completed(summary) => {
            println!("\nDone.");
            print_summary(&summary);
            Ok(ExitStatus::Success)
        }
        SyncOutcome::Interrupted(summary) => {
            println!("\nInterrupted. Progress committed; run left incomplete.");
            print_summary(&summary);
            Ok(ExitStatus::Interrupted)
        }
    }
}

fn print_summary(summary: &SyncSummary) {
    println!("Run ID: {}", summary.run_id);
    println!("Root name: {}", summary.root_label);
    println!("Scan path: {}", summary.scan_root.display());
    println!("Files seen: {}", summary.files_seen);
    println!("Files new/changed: {}", summary.files_changed);
    println!("Elapsed: {:.1}s", summary.elapsed.as_secs_f64());
}

/// Start the media server
///
/// # Errors
/// - `ServerError::Config` - Database or allowed root missing
/// - `ServerError::Catalog` - Catalog could not be opened
/// - `ServerError::Io` - Bind failed
pub async fn serve(args: ServeArgs) -> anyhow::Result<ExitStatus> {
    let mut config = NascatConfig::from_env().map_err(NascatError::from)?;
    if let Some(url) = args.database_url {
        config.database.url = Some(url);
    }
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    if let Some(root) = args.allowed_root {
        config.server.allowed_root = Some(root);
    }
    config.server.allow_unconfined |= args.allow_unconfined;

    nascat_web::run_server(&config).await?;
    Ok(ExitStatus::Success)
}

/// List recent scan runs, newest first
///
/// # Errors
/// - `NascatError::Config` - Database location missing
/// - `NascatError::Catalog` - Query failed
pub async fn list_runs(database_url: Option<String>, limit: u32) -> anyhow::Result<ExitStatus> {
    let mut config = NascatConfig::from_env().map_err(NascatError::from)?;
    if let Some(url) = database_url {
        config.database.url = Some(url);
    }
    config.database_url().map_err(NascatError::from)?;

    let store = CatalogStore::connect(&config.database)
        .await
        .map_err(NascatError::from)?;
    let runs = store.latest_runs(limit).await.map_err(NascatError::from)?;

    if runs.is_empty() {
        println!("No scan runs recorded");
        return Ok(ExitStatus::Success);
    }

    for run in runs {
        let finished = run
            .finished_at
            .map_or_else(|| "INCOMPLETE".to_string(), |t| t.to_rfc3339());
        println!(
            "#{:<6} {:<16} started {}  finished {}  seen {}  changed {}",
            run.id,
            run.root,
            run.started_at.to_rfc3339(),
            finished,
            run.files_seen,
            run.files_changed
        );
    }

    Ok(ExitStatus::Success)
}

#[cfg(test)]
mod tests {
    use nascat_core::ConfigError;
    use nascat_core::catalog::CatalogError;

    use super::*;

    #[test]
    fn test_exit_codes() {
        let config = anyhow::Error::from(NascatError::from(ConfigError::MissingScanRoot));
        assert_eq!(classify_error(&config), ExitStatus::ConfigError);

        let serve_config = anyhow::Error::from(ServerError::Config(ConfigError::MissingAllowedRoot));
        assert_eq!(classify_error(&serve_config), ExitStatus::ConfigError);

        let storage = anyhow::Error::from(NascatError::from(CatalogError::NotConfigured));
        assert_eq!(classify_error(&storage), ExitStatus::Failure);
    }

    #[test]
    fn test_cli_parses_scan_flags() {
        use clap::Parser;

        #[derive(Parser)]
        struct TestCli {
            #[command(subcommand)]
            command: Commands,
        }

        let cli = TestCli::try_parse_from([
            "nascat",
            "scan",
            "--database-url",
            "catalog.db",
            "--root",
            "/srv/media",
            "--batch-size",
            "10",
        ])
        .unwrap();
        match cli.command {
            Commands::Scan(args) => {
                assert_eq!(args.database_url.as_deref(), Some("catalog.db"));
                assert_eq!(args.batch_size, Some(10));
                assert!(args.root_label.is_none());
            }
            _ => panic!("expected scan"),
        }
    }
}
