//! Batched, idempotent catalog writes.

use sqlx::{Sqlite, Transaction};
use tracing::debug;

use crate::catalog::store::{stored_state, upsert_file};
use crate::catalog::{CatalogError, CatalogStore, FileUpsert};
use crate::sync::detector::{ChangeDetector, ChangeKind};
use crate::sync::walker::WalkedFile;

/// Writes walked files into the catalog, one transaction per batch.
///
/// Every write is an insert-or-update keyed by absolute path, so replaying a
/// batch lost to a crash converges to the same rows.
pub struct CatalogWriter {
    store: CatalogStore,
    run_id: i64,
    root_label: String,
    batch_size: usize,
    tx: Option<Transaction<'static, Sqlite>>,
    pending: usize,
    files_seen: u64,
    files_changed: u64,
}

impl CatalogWriter {
    pub fn new(
        store: CatalogStore,
        run_id: i64,
        root_label: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            run_id,
            root_label: root_label.into(),
            batch_size: batch_size.max(1),
            tx: None,
            pending: 0,
            files_seen: 0,
            files_changed: 0,
        }
    }

    /// Classifies `file` against the catalog and upserts it into the open batch.
    ///
    /// # Errors
    ///
    /// - `CatalogError::Database` - Lookup, upsert or transaction start failed
    pub async fn record(&mut self, file: &WalkedFile) -> Result<ChangeKind, CatalogError> {
        let tx = match self.tx.take() {
            Some(tx) => tx,
            None => self.store.begin().await?,
        };
        let tx = self.tx.insert(tx);

        let existing = stored_state(tx, &file.abs_path).await?;
        let kind = ChangeDetector::classify(existing.as_ref(), file);

        upsert_file(
            tx,
            &FileUpsert {
                abs_path: &file.abs_path,
                root: &self.root_label,
                rel_path: &file.rel_path,
                size_bytes: i64::try_from(file.size).unwrap_or(i64::MAX),
                mtime: file.mtime,
                run_id: self.run_id,
            },
        )
        .await?;

        self.files_seen += 1;
        if kind.counts_as_changed() {
            self.files_changed += 1;
        }
        self.pending += 1;

        debug!(path = %file.abs_path, ?kind, "Recorded file");
        Ok(kind)
    }

    /// Whether the open batch has reached the configured size.
    pub fn batch_full(&self) -> bool {
        self.pending >= self.batch_size
    }

    /// Commits the open batch, if any. Returns how many files it held.
    ///
    /// # Errors
    ///
    /// - `CatalogError::Database` - Commit failed; the batch is rolled back
    pub async fn commit(&mut self) -> Result<usize, CatalogError> {
        let committed = self.pending;
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        self.pending = 0;
        Ok(committed)
    }

    pub fn files_seen(&self) -> u64 {
        self.files_seen
    }

    pub fn files_changed(&self) -> u64 {
        self.files_changed
    }

    /// Files written since the last commit.
    pub fn pending(&self) -> usize {
        self.pending
    }
}
