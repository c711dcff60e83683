//! Logging for the `nascat` binary.
//!
//! A scan of a large volume makes one classification decision per file, far
//! too many for a terminal. The console therefore shows run-level events
//! (runs opened, batches committed, requests refused) at the level picked
//! with `--log-level`, while every event down to `trace` goes to a file that
//! is replaced on each invocation.

use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

const DEFAULT_LOGS_DIR: &str = "logs";
const LOG_FILE_NAME: &str = "nascat-last-run.log";

/// Where the per-invocation log file is written.
pub fn log_file_path(logs_dir: Option<&Path>) -> PathBuf {
    logs_dir
        .unwrap_or_else(|| Path::new(DEFAULT_LOGS_DIR))
        .join(LOG_FILE_NAME)
}

/// `RUST_LOG` wins over the command-line level when it parses.
fn console_filter(console_level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(console_level.to_string()))
}

/// Installs the global subscriber for a scan or serve invocation.
///
/// Console output goes to stderr so the scan summary on stdout stays
/// clean. The log file under `logs_dir` (`./logs` when unset) records
/// everything with source locations and no colour codes.
///
/// # Errors
///
/// - `Box<dyn std::error::Error>` - Log directory or file not writable, or a subscriber is already installed
pub fn init_tracing(
    console_level: Level,
    logs_dir: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let log_path = log_file_path(logs_dir);
    if let Some(dir) = log_path.parent() {
        create_dir_all(dir)?;
    }
    let log_file = File::create(&log_path)?;

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .with_filter(console_filter(console_level));

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(log_file)
        .with_filter(EnvFilter::new("trace"));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        console = %console_level,
        log_file = %log_path.display(),
        "Logging started"
    );

    Ok(())
}

/// Console verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    /// Failures only
    Error,
    /// Failures and skipped entries
    Warn,
    /// Run and request lifecycle
    Info,
    /// Per-batch and per-request detail
    Debug,
    /// Per-file decisions
    Trace,
}

impl CliLogLevel {
    /// Maps the flag value onto a tracing level.
    ///
    /// # Examples
    /// ```
    /// use nascat_core::tracing_setup::CliLogLevel;
    ///
    /// assert_eq!(CliLogLevel::Debug.as_tracing_level(), tracing::Level::DEBUG);
    /// ```
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            CliLogLevel::Error => "error",
            CliLogLevel::Warn => "warn",
            CliLogLevel::Info => "info",
            CliLogLevel::Debug => "debug",
            CliLogLevel::Trace => "trace",
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
