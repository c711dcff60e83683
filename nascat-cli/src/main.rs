//! Nascat CLI - Command-line interface
//!
//! Catalogs a storage volume and serves the catalog over HTTP.

mod commands;
mod progress;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use nascat_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "nascat")]
#[command(about = "Incremental file catalog and range-aware media server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,

    /// Console log level (RUST_LOG overrides)
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info, global = true)]
    log_level: CliLogLevel,

    /// Directory for the full debug log
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref()) {
        eprintln!("Warning: could not initialize file logging: {e}");
    }

    match commands::handle_command(cli.command).await {
        Ok(status) => status.into(),
        Err(e) => {
            let status = commands::classify_error(&e);
            eprintln!("Error: {e:#}");
            status.into()
        }
    }
}
