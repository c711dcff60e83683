//! Confinement of served paths to an allowed root.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Why a requested path may not be served.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GuardError {
    /// The path does not resolve to an existing regular file
    #[error("file not found: {path}")]
    NotFound { path: PathBuf },

    /// The resolved path lies outside the allowed root
    #[error("path outside allowed root: {path}")]
    Forbidden { path: PathBuf },
}

/// Restricts servable files to those nested under an allowed root.
///
/// Both sides are compared in canonical form, so symlinks and `..`
/// components cannot escape the root. Containment is component-wise:
/// `/srv/media-private` is not inside `/srv/media`.
#[derive(Debug, Clone)]
pub struct PathGuard {
    allowed_root: Option<PathBuf>,
}

impl PathGuard {
    /// Creates a guard confined to `allowed_root`.
    ///
    /// # Errors
    ///
    /// - `io::Error` - The root cannot be canonicalized (missing, unreadable)
    pub fn confined(allowed_root: &Path) -> io::Result<Self> {
        let canonical = allowed_root.canonicalize()?;
        debug!(root = %canonical.display(), "Media confinement enabled");
        Ok(Self {
            allowed_root: Some(canonical),
        })
    }

    /// Creates a guard that performs no containment check.
    ///
    /// Any cataloged path that exists on disk will be served.
    pub fn unconfined() -> Self {
        warn!("Media confinement disabled; any cataloged path may be served");
        Self { allowed_root: None }
    }

    /// Builds a confined guard when a root is given, unconfined otherwise.
    ///
    /// # Errors
    ///
    /// - `io::Error` - The root cannot be canonicalized
    pub fn from_config(allowed_root: Option<&Path>) -> io::Result<Self> {
        match allowed_root {
            Some(root) => Self::confined(root),
            None => Ok(Self::unconfined()),
        }
    }

    /// Canonical allowed root, if confinement is active.
    pub fn allowed_root(&self) -> Option<&Path> {
        self.allowed_root.as_deref()
    }

    /// Resolves `requested` and checks it against the allowed root.
    ///
    /// Existence is checked first: a path that cannot be resolved, or that
    /// is not a regular file, is `NotFound` even when it would also be
    /// outside the root. Returns the canonical path to open.
    ///
    /// # Errors
    ///
    /// - `GuardError::NotFound` - Path missing, unresolvable or not a regular file
    /// - `GuardError::Forbidden` - Path resolves outside the allowed root
    pub async fn check(&self, requested: &Path) -> Result<PathBuf, GuardError> {
        let not_found = || GuardError::NotFound {
            path: requested.to_path_buf(),
        };

        let canonical = tokio::fs::canonicalize(requested)
            .await
            .map_err(|_| not_found())?;

        let is_file = tokio::fs::metadata(&canonical)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(not_found());
        }

        if let Some(root) = &self.allowed_root
            && !canonical.starts_with(root)
        {
            return Err(GuardError::Forbidden {
                path: requested.to_path_buf(),
            });
        }

        Ok(canonical)
    }
}
