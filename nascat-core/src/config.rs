//! Centralized configuration for Nascat.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase. Components receive
//! the section they need at construction and never read the environment
//! themselves.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

/// Number of processed files between catalog commits.
pub const DEFAULT_BATCH_SIZE: usize = 2000;

/// Maximum size of a single chunk emitted by the media streamer.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024; // 1 MiB

/// Central configuration for all Nascat components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct NascatConfig {
    pub database: DatabaseConfig,
    pub scan: ScanConfig,
    pub server: ServerConfig,
}

/// Catalog database connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// SQLite URL (`sqlite:catalog.db`) or plain file path
    pub url: Option<String>,
    /// How long a writer waits for a competing lock before failing
    pub busy_timeout: Duration,
    /// Upper bound on pooled connections
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            busy_timeout: Duration::from_secs(5),
            max_connections: 4,
        }
    }
}

/// Synchronizer settings.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Directory tree to catalog
    pub root: Option<PathBuf>,
    /// Label stored with every row produced by this root
    pub root_label: String,
    /// Files processed per committed transaction
    pub batch_size: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            root: None,
            root_label: "Root".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// HTTP delivery settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP server binds to
    pub bind_addr: SocketAddr,
    /// Files outside this directory are never served
    pub allowed_root: Option<PathBuf>,
    /// Serve without an allowed root. Off unless explicitly requested.
    pub allow_unconfined: bool,
    /// Maximum bytes per streamed body chunk
    pub chunk_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 8000)),
            allowed_root: None,
            allow_unconfined: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Configuration problems detected before any work begins.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("database location is not configured (set DATABASE_URL or --database-url)")]
    MissingDatabase,

    #[error("scan root is not configured (set SCAN_ROOT or --root)")]
    MissingScanRoot,

    #[error("scan root is not a directory: {path}")]
    ScanRootNotDirectory { path: PathBuf },

    #[error("batch size must be at least 1")]
    InvalidBatchSize,

    #[error(
        "no allowed media root configured; set MEDIA_ALLOWED_ROOT or pass --allow-unconfined"
    )]
    MissingAllowedRoot,

    #[error("allowed media root is not a directory: {path}")]
    AllowedRootNotDirectory { path: PathBuf },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

impl NascatConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Recognized variables: `DATABASE_URL`, `SCAN_ROOT`, `ROOT_NAME`,
    /// `MEDIA_ALLOWED_ROOT`, `NASCAT_BIND`, `NASCAT_BATCH_SIZE` and
    /// `NASCAT_ALLOW_UNCONFINED`.
    ///
    /// # Errors
    ///
    /// - `ConfigError::InvalidValue` - A variable is set but cannot be parsed
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// - `ConfigError::InvalidValue` - A value is present but cannot be parsed
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()) {
            config.database.url = Some(url);
        }

        if let Some(root) = lookup("SCAN_ROOT").filter(|v| !v.trim().is_empty()) {
            config.scan.root = Some(PathBuf::from(root));
        }

        if let Some(label) = lookup("ROOT_NAME").filter(|v| !v.trim().is_empty()) {
            config.scan.root_label = label;
        }

        if let Some(batch) = lookup("NASCAT_BATCH_SIZE") {
            config.scan.batch_size =
                batch
                    .parse::<usize>()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: "NASCAT_BATCH_SIZE",
                        value: batch.clone(),
                    })?;
        }

        if let Some(root) = lookup("MEDIA_ALLOWED_ROOT").filter(|v| !v.trim().is_empty()) {
            config.server.allowed_root = Some(PathBuf::from(root));
        }

        if let Some(bind) = lookup("NASCAT_BIND") {
            config.server.bind_addr =
                bind.parse::<SocketAddr>()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: "NASCAT_BIND",
                        value: bind.clone(),
                    })?;
        }

        if let Some(flag) = lookup("NASCAT_ALLOW_UNCONFINED") {
            config.server.allow_unconfined =
                flag.parse::<bool>()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: "NASCAT_ALLOW_UNCONFINED",
                        value: flag.clone(),
                    })?;
        }

        Ok(config)
    }

    /// Returns the configured database location.
    ///
    /// # Errors
    ///
    /// - `ConfigError::MissingDatabase` - No database location configured
    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database
            .url
            .as_deref()
            .ok_or(ConfigError::MissingDatabase)
    }

    /// Checks everything the synchronizer needs before it touches the catalog.
    ///
    /// # Errors
    ///
    /// - `ConfigError::MissingDatabase` - No database location configured
    /// - `ConfigError::MissingScanRoot` - No scan root configured
    /// - `ConfigError::ScanRootNotDirectory` - Scan root missing or not a directory
    /// - `ConfigError::InvalidBatchSize` - Batch size of zero
    pub fn validate_for_scan(&self) -> Result<(), ConfigError> {
        self.database_url()?;

        let root = self.scan.root.as_ref().ok_or(ConfigError::MissingScanRoot)?;
        if !root.is_dir() {
            return Err(ConfigError::ScanRootNotDirectory { path: root.clone() });
        }

        if self.scan.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }

        Ok(())
    }

    /// Checks everything the media server needs before binding.
    ///
    /// # Errors
    ///
    /// - `ConfigError::MissingDatabase` - No database location configured
    /// - `ConfigError::MissingAllowedRoot` - No allowed root and unconfined mode not requested
    /// - `ConfigError::AllowedRootNotDirectory` - Allowed root missing or not a directory
    pub fn validate_for_serve(&self) -> Result<(), ConfigError> {
        self.database_url()?;

        match &self.server.allowed_root {
            Some(root) if !root.is_dir() => {
                Err(ConfigError::AllowedRootNotDirectory { path: root.clone() })
            }
            Some(_) => Ok(()),
            None if self.server.allow_unconfined => Ok(()),
            None => Err(ConfigError::MissingAllowedRoot),
        }
    }
}
