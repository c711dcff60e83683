//! Range-aware delivery of cataloged files.
//!
//! [`MediaResolver`] runs the delivery state machine independent of HTTP:
//! catalog lookup, on-disk existence, confinement, then range selection.
//! The web layer turns the resulting [`DeliveryPlan`] into a response and
//! streams the body with [`FileChunkStream`].

pub mod file_stream;
pub mod path_guard;
pub mod range;

use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use file_stream::FileChunkStream;
pub use path_guard::{GuardError, PathGuard};
pub use range::{ByteRange, RangeError};
use tracing::{debug, info};

use crate::catalog::{CatalogError, CatalogStore};

/// Terminal failures of a delivery request.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("no catalog entry with id {id}")]
    UnknownId { id: i64 },

    #[error("cataloged file is missing on disk: {path}")]
    MissingOnDisk { path: String },

    #[error("cataloged file is outside the allowed root: {path}")]
    Forbidden { path: String },

    #[error("catalog lookup failed: {0}")]
    Catalog(#[from] CatalogError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeliveryError {
    /// Whether the failure is the client's concern rather than the server's.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DeliveryError::UnknownId { .. }
                | DeliveryError::MissingOnDisk { .. }
                | DeliveryError::Forbidden { .. }
        )
    }
}

/// Which part of the file a response carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPlan {
    /// No range requested; 200 with the whole file
    Full,
    /// Valid single range; 206
    Partial(ByteRange),
    /// Range present but rejected; 416
    Unsatisfiable,
}

/// Everything needed to answer a delivery request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryPlan {
    /// Canonical on-disk path to open
    pub path: PathBuf,
    /// Current on-disk size, which may differ from the cataloged size
    pub total_size: u64,
    pub body: BodyPlan,
}

impl DeliveryPlan {
    /// Interval to stream, or `None` for an empty or rejected body.
    pub fn stream_range(&self) -> Option<ByteRange> {
        match self.body {
            BodyPlan::Full => ByteRange::full(self.total_size),
            BodyPlan::Partial(range) => Some(range),
            BodyPlan::Unsatisfiable => None,
        }
    }

    /// Number of bytes the response body will carry.
    pub fn content_length(&self) -> u64 {
        self.stream_range().map_or(0, |range| range.len())
    }

    /// Opens the body stream for this plan.
    ///
    /// # Errors
    ///
    /// - `io::Error` - The file vanished or could not be read since resolution
    pub async fn open_stream(&self, chunk_size: usize) -> std::io::Result<FileChunkStream> {
        FileChunkStream::open(&self.path, self.stream_range(), chunk_size).await
    }
}

/// Resolves catalog ids to servable files under a confinement policy.
#[derive(Clone)]
pub struct MediaResolver {
    store: CatalogStore,
    guard: Arc<PathGuard>,
}

impl MediaResolver {
    pub fn new(store: CatalogStore, guard: PathGuard) -> Self {
        Self {
            store,
            guard: Arc::new(guard),
        }
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    /// Runs lookup, existence and confinement checks, then selects the body.
    ///
    /// A rejected range is not an error: it produces [`BodyPlan::Unsatisfiable`].
    ///
    /// # Errors
    ///
    /// - `DeliveryError::UnknownId` - No catalog row for `id`
    /// - `DeliveryError::MissingOnDisk` - Row exists but the file is gone (stale row)
    /// - `DeliveryError::Forbidden` - File resolves outside the allowed root
    /// - `DeliveryError::Catalog` - Catalog lookup failed
    /// - `DeliveryError::Io` - File metadata could not be read
    pub async fn resolve(
        &self,
        id: i64,
        range_header: Option<&str>,
    ) -> Result<DeliveryPlan, DeliveryError> {
        let record = self
            .store
            .file_by_id(id)
            .await?
            .ok_or(DeliveryError::UnknownId { id })?;

        let path = match self.guard.check(Path::new(&record.abs_path)).await {
            Ok(path) => path,
            Err(GuardError::NotFound { .. }) => {
                info!(id, path = %record.abs_path, "Stale catalog row; file missing on disk");
                return Err(DeliveryError::MissingOnDisk {
                    path: record.abs_path,
                });
            }
            Err(GuardError::Forbidden { .. }) => {
                info!(id, path = %record.abs_path, "Refused path outside allowed root");
                return Err(DeliveryError::Forbidden {
                    path: record.abs_path,
                });
            }
        };

        let total_size = size_on_disk(&path, &record.abs_path).await?;

        let body = match range_header {
            None => BodyPlan::Full,
            Some(header) => match ByteRange::parse(header, total_size) {
                Ok(range) => BodyPlan::Partial(range),
                Err(e) => {
                    debug!(id, header, error = %e, "Rejected range request");
                    BodyPlan::Unsatisfiable
                }
            },
        };

        Ok(DeliveryPlan {
            path,
            total_size,
            body,
        })
    }
}

/// Size of the resolved file. A file removed after the guard check is
/// reported the same as one that was never there.
async fn size_on_disk(path: &Path, abs_path: &str) -> Result<u64, DeliveryError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %abs_path, "File vanished after resolution");
            Err(DeliveryError::MissingOnDisk {
                path: abs_path.to_string(),
            })
        }
        Err(e) => Err(e.into()),
    }
}
