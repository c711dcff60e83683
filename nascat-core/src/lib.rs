//! Nascat Core - File catalog synchronization and range-aware delivery
//!
//! This crate provides the building blocks for indexing a storage volume
//! into a SQLite catalog and serving cataloged files as full or partial byte
//! streams: the catalog store, the incremental synchronizer, the delivery
//! path, and configuration management.

pub mod catalog;
pub mod config;
pub mod delivery;
pub mod sync;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_fixtures;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use catalog::{CatalogError, CatalogStore};
pub use config::{ConfigError, NascatConfig};
pub use delivery::{DeliveryError, MediaResolver, PathGuard};
pub use sync::{SyncError, SyncOutcome, Synchronizer};

/// Core errors that can bubble up from any Nascat subsystem.
#[derive(Debug, thiserror::Error)]
pub enum NascatError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NascatError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            NascatError::Config(e) | NascatError::Sync(SyncError::Config(e)) => e.to_string(),
            NascatError::Sync(SyncError::ScanRoot { path, .. }) => {
                format!("Scan root is not accessible: {}", path.display())
            }
            NascatError::Catalog(_) | NascatError::Sync(SyncError::Catalog(_)) => {
                "Catalog database error occurred".to_string()
            }
            NascatError::Sync(SyncError::WalkAborted { reason }) => {
                format!("Directory walk aborted: {reason}")
            }
            NascatError::Delivery(e) if e.is_client_error() => e.to_string(),
            NascatError::Delivery(_) => "Media delivery error occurred".to_string(),
            NascatError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to invalid configuration or input.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            NascatError::Config(_)
                | NascatError::Sync(SyncError::Config(_))
                | NascatError::Sync(SyncError::ScanRoot { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, NascatError>;
