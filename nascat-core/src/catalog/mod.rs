//! Persisted catalog of files observed under scanned storage roots.
//!
//! The catalog holds two tables: `files`, keyed uniquely by absolute path,
//! and `scan_runs`, one row per synchronizer invocation. Only the
//! synchronizer writes file rows; everything else reads through
//! [`CatalogStore`].

pub mod store;

use chrono::{DateTime, Utc};
use serde::Serialize;
pub use store::{CatalogStore, FileUpsert, StoredState};

/// Largest page size accepted by listing queries.
pub const MAX_PAGE_SIZE: u32 = 500;

/// One cataloged file.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct FileRecord {
    /// Row identifier used by the delivery endpoint
    pub id: i64,
    /// Absolute path, unique across the catalog
    pub abs_path: String,
    /// Label of the scan root that produced this row
    pub root: String,
    /// Path relative to the scan root
    pub rel_path: String,
    /// Size in bytes at last observation
    pub size_bytes: i64,
    /// Modification time at last observation
    pub mtime: DateTime<Utc>,
    /// Externally supplied content hash, if any
    pub content_hash: Option<String>,
    /// Scan run that most recently observed the file
    pub last_seen_run_id: i64,
}

impl FileRecord {
    /// Size in bytes as an unsigned length.
    pub fn size(&self) -> u64 {
        u64::try_from(self.size_bytes).unwrap_or(0)
    }
}

/// Provenance record for one synchronizer invocation.
///
/// A run whose `finished_at` is still `None` either is in progress or was
/// interrupted; consumers treat it as incomplete.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct ScanRun {
    pub id: i64,
    pub root: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub files_seen: i64,
    pub files_changed: i64,
}

impl ScanRun {
    /// Whether the run reached normal completion.
    pub fn is_complete(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// Filter and paging for [`CatalogStore::search_files`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileQuery {
    /// Case-insensitive substring matched against the absolute path
    pub path_contains: Option<String>,
    /// Exact root label
    pub root: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for FileQuery {
    fn default() -> Self {
        Self {
            path_contains: None,
            root: None,
            limit: 50,
            offset: 0,
        }
    }
}

/// Totals across the whole catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub total_files: i64,
    pub total_bytes: i64,
    pub by_root: Vec<RootStats>,
}

/// Totals for a single root label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct RootStats {
    pub root: String,
    pub files: i64,
    pub bytes: i64,
}

/// Files sharing one content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub content_hash: String,
    pub copies: i64,
    pub total_bytes: i64,
    /// Absolute paths, sorted
    pub paths: Vec<String>,
}

/// Errors raised by catalog storage operations.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// No database location was supplied
    #[error("catalog database location is not configured")]
    NotConfigured,

    /// The database rejected a statement or the connection failed
    #[error("catalog database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Preparing the database file location failed
    #[error("catalog I/O error: {0}")]
    Io(#[from] std::io::Error),
}
