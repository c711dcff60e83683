//! Recursive enumeration of catalogable files under a scan root.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Timelike, Utc};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// A regular file observed during a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedFile {
    pub abs_path: String,
    /// Path relative to the walk root, `/`-separated on Unix
    pub rel_path: String,
    pub size: u64,
    /// Modification time truncated to microseconds
    pub mtime: DateTime<Utc>,
}

/// Lazy, finite walk over the regular, non-hidden files below a root.
///
/// Symbolic links are never followed and never yielded, so the walk cannot
/// cycle. Entries that vanish or become unreadable between discovery and
/// stat are skipped. A walk cannot be resumed; restarting begins at the root.
pub struct FileWalker {
    root: PathBuf,
    entries: walkdir::FilterEntry<walkdir::IntoIter, fn(&DirEntry) -> bool>,
}

impl FileWalker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let entries = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(is_visible as fn(&DirEntry) -> bool);

        Self { root, entries }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn observe(&self, entry: &DirEntry) -> Option<WalkedFile> {
        if !entry.file_type().is_file() {
            return None;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(path = %entry.path().display(), error = %e, "Skipping entry that could not be stat'ed");
                return None;
            }
        };

        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(e) => {
                debug!(path = %entry.path().display(), error = %e, "Skipping entry without modification time");
                return None;
            }
        };

        let (Some(abs_path), Some(rel_path)) = (
            entry.path().to_str(),
            entry
                .path()
                .strip_prefix(&self.root)
                .ok()
                .and_then(Path::to_str),
        ) else {
            warn!(path = %entry.path().display(), "Skipping path that is not valid UTF-8");
            return None;
        };

        Some(WalkedFile {
            abs_path: abs_path.to_string(),
            rel_path: rel_path.to_string(),
            size: metadata.len(),
            mtime: catalog_time(modified),
        })
    }
}

impl Iterator for FileWalker {
    type Item = WalkedFile;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.entries.next()? {
                Ok(entry) => {
                    if let Some(file) = self.observe(&entry) {
                        return Some(file);
                    }
                }
                Err(e) => {
                    // Vanished directories and permission errors are transient here
                    debug!(path = ?e.path(), error = %e, "Skipping unreadable entry");
                }
            }
        }
    }
}

/// Converts a filesystem timestamp to the precision the catalog stores.
pub fn catalog_time(modified: SystemTime) -> DateTime<Utc> {
    let time = DateTime::<Utc>::from(modified);
    let micros = time.timestamp_subsec_micros();
    time.with_nanosecond(micros * 1_000).unwrap_or(time)
}

fn is_visible(entry: &DirEntry) -> bool {
    entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
}
