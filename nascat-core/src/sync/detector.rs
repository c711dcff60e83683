//! Classification of a walked file against its persisted record.

use crate::catalog::StoredState;
use crate::sync::walker::WalkedFile;

/// How a walked file relates to what the catalog already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// No row for this absolute path
    New,
    /// Row exists but size or modification time differs
    Changed,
    /// Row exists with identical size and modification time
    Unchanged,
}

impl ChangeKind {
    /// Whether this classification counts toward a run's changed total.
    pub fn counts_as_changed(self) -> bool {
        matches!(self, ChangeKind::New | ChangeKind::Changed)
    }
}

/// Size and mtime comparison between the filesystem and the catalog.
pub struct ChangeDetector;

impl ChangeDetector {
    pub fn classify(existing: Option<&StoredState>, walked: &WalkedFile) -> ChangeKind {
        match existing {
            None => ChangeKind::New,
            Some(stored)
                if u64::try_from(stored.size_bytes).ok() != Some(walked.size)
                    || stored.mtime != walked.mtime =>
            {
                ChangeKind::Changed
            }
            Some(_) => ChangeKind::Unchanged,
        }
    }
}
