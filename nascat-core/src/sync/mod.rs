//! Incremental catalog synchronizer.
//!
//! Walks a scan root, classifies every regular file against the catalog,
//! and upserts it in batches under a scan-run record. The walk runs on a
//! blocking thread and feeds the database loop through a bounded channel;
//! database work is strictly sequential.

pub mod detector;
pub mod run_tracker;
pub mod walker;
pub mod writer;

use std::path::PathBuf;
use std::time::Duration;

pub use detector::{ChangeDetector, ChangeKind};
pub use run_tracker::RunTracker;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
pub use walker::{FileWalker, WalkedFile};
pub use writer::CatalogWriter;

use crate::catalog::{CatalogError, CatalogStore};
use crate::config::{ConfigError, ScanConfig};

/// Walked files buffered between the walker thread and the database loop.
const WALK_CHANNEL_CAPACITY: usize = 1024;

/// Receives progress notifications from a running scan.
pub trait ScanProgress: Send + Sync {
    /// Called after each batch commit with the running total of files seen.
    fn on_batch_committed(&self, files_seen: u64);

    /// Called once after the final commit of a completed scan.
    fn on_finished(&self, _files_seen: u64) {}
}

/// Progress sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ScanProgress for NoProgress {
    fn on_batch_committed(&self, _files_seen: u64) {}
}

/// What a scan accomplished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    pub run_id: i64,
    pub root_label: String,
    pub scan_root: PathBuf,
    pub files_seen: u64,
    pub files_changed: u64,
    pub elapsed: Duration,
}

/// How a scan ended without a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every file was processed and the run was finalized
    Completed(SyncSummary),
    /// Cancellation was observed; the buffered batch was flushed and the
    /// run row was left unfinished
    Interrupted(SyncSummary),
}

impl SyncOutcome {
    pub fn summary(&self) -> &SyncSummary {
        match self {
            SyncOutcome::Completed(summary) | SyncOutcome::Interrupted(summary) => summary,
        }
    }
}

/// Errors that abort a scan. The run row, if created, stays unfinished.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot resolve scan root {path}: {source}")]
    ScanRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("directory walk aborted: {reason}")]
    WalkAborted { reason: String },
}

/// Drives one scan of one root into the catalog.
pub struct Synchronizer {
    store: CatalogStore,
    config: ScanConfig,
}

impl Synchronizer {
    pub fn new(store: CatalogStore, config: ScanConfig) -> Self {
        Self { store, config }
    }

    /// Runs a complete scan.
    ///
    /// Cancellation is checked between files. When observed, the buffered
    /// batch is committed best-effort and [`SyncOutcome::Interrupted`] is
    /// returned with the run left unfinished.
    ///
    /// # Errors
    ///
    /// - `SyncError::Config` - No scan root configured
    /// - `SyncError::ScanRoot` - Scan root cannot be resolved or is not a directory
    /// - `SyncError::Catalog` - Storage failure; fatal to the run
    /// - `SyncError::WalkAborted` - The walker thread panicked
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        progress: &dyn ScanProgress,
    ) -> Result<SyncOutcome, SyncError> {
        let scan_root = self.resolve_root().await?;
        let root_label = self.config.root_label.clone();

        let tracker = RunTracker::open(&self.store, &root_label).await?;
        let mut writer = CatalogWriter::new(
            self.store.clone(),
            tracker.run_id(),
            root_label.clone(),
            self.config.batch_size,
        );

        info!(
            run_id = tracker.run_id(),
            root = %scan_root.display(),
            label = %root_label,
            "Scanning"
        );

        let (mut files, walk_handle) = spawn_walk(scan_root.clone());
        let mut interrupted = false;

        loop {
            let file = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    interrupted = true;
                    break;
                }
                next = files.recv() => match next {
                    Some(file) => file,
                    None => break,
                },
            };

            writer.record(&file).await?;

            if writer.batch_full() {
                let committed = writer.commit().await?;
                info!(
                    run_id = tracker.run_id(),
                    committed,
                    files_seen = writer.files_seen(),
                    "Committed batch"
                );
                progress.on_batch_committed(writer.files_seen());
            }
        }

        if interrupted {
            // Stops the walker at its next send
            drop(files);

            let pending = writer.pending();
            match writer.commit().await {
                Ok(committed) => info!(committed, "Flushed buffered batch after interruption"),
                Err(e) => warn!(pending, error = %e, "Could not flush buffered batch after interruption"),
            }

            let summary = SyncSummary {
                run_id: tracker.run_id(),
                root_label,
                scan_root,
                files_seen: writer.files_seen(),
                files_changed: writer.files_changed(),
                elapsed: tracker.elapsed(),
            };
            tracker.abandon();
            return Ok(SyncOutcome::Interrupted(summary));
        }

        walk_handle.await.map_err(|e| SyncError::WalkAborted {
            reason: e.to_string(),
        })?;

        writer.commit().await?;
        progress.on_finished(writer.files_seen());

        let summary = SyncSummary {
            run_id: tracker.run_id(),
            root_label,
            scan_root,
            files_seen: writer.files_seen(),
            files_changed: writer.files_changed(),
            elapsed: tracker.elapsed(),
        };
        tracker
            .finish(summary.files_seen, summary.files_changed)
            .await?;

        Ok(SyncOutcome::Completed(summary))
    }

    async fn resolve_root(&self) -> Result<PathBuf, SyncError> {
        let root = self
            .config
            .root
            .as_deref()
            .ok_or(ConfigError::MissingScanRoot)?;

        let canonical = tokio::fs::canonicalize(root)
            .await
            .map_err(|source| SyncError::ScanRoot {
                path: root.to_path_buf(),
                source,
            })?;

        if !tokio::fs::metadata(&canonical)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(ConfigError::ScanRootNotDirectory {
                path: root.to_path_buf(),
            }
            .into());
        }

        Ok(canonical)
    }
}

fn spawn_walk(root: PathBuf) -> (mpsc::Receiver<WalkedFile>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(WALK_CHANNEL_CAPACITY);

    let handle = tokio::task::spawn_blocking(move || {
        for file in FileWalker::new(&root) {
            if tx.blocking_send(file).is_err() {
                debug!(root = %root.display(), "Walk receiver closed; stopping walk");
                return;
            }
        }
        debug!(root = %root.display(), "Walk finished");
    });

    (rx, handle)
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::test_fixtures::{database_config_in, open_temp_store, write_file};

    fn scan_config(root: &Path, batch_size: usize) -> ScanConfig {
        ScanConfig {
            root: Some(root.to_path_buf()),
            root_label: "Media".to_string(),
            batch_size,
        }
    }

    struct CountingProgress {
        batches: AtomicU64,
        finished_with: AtomicU64,
    }

    impl ScanProgress for CountingProgress {
        fn on_batch_committed(&self, _files_seen: u64) {
            self.batches.fetch_add(1, Ordering::SeqCst);
        }

        fn on_finished(&self, files_seen: u64) {
            self.finished_with.store(files_seen, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_completed_scan_records_files_and_run() {
        let (_db_dir, store) = open_temp_store().await;
        let media = tempfile::tempdir().unwrap();
        for i in 0..5 {
            write_file(media.path(), &format!("dir/{i}.mkv"), b"data");
        }

        let progress = CountingProgress {
            batches: AtomicU64::new(0),
            finished_with: AtomicU64::new(0),
        };
        let sync = Synchronizer::new(store.clone(), scan_config(media.path(), 2));
        let outcome = sync
            .run(&CancellationToken::new(), &progress)
            .await
            .unwrap();

        let SyncOutcome::Completed(summary) = outcome else {
            panic!("scan should complete");
        };
        assert_eq!(summary.files_seen, 5);
        assert_eq!(summary.files_changed, 5);
        assert_eq!(progress.batches.load(Ordering::SeqCst), 2);
        assert_eq!(progress.finished_with.load(Ordering::SeqCst), 5);

        let run = store.scan_run(summary.run_id).await.unwrap().unwrap();
        assert!(run.is_complete());
        assert_eq!((run.files_seen, run.files_changed), (5, 5));
        assert_eq!(run.root, "Media");

        let canonical = media.path().canonicalize().unwrap();
        let abs = canonical.join("dir/3.mkv");
        let record = store
            .file_by_path(abs.to_str().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.rel_path, "dir/3.mkv");
        assert_eq!(record.root, "Media");
        assert_eq!(record.size_bytes, 4);
        assert_eq!(record.last_seen_run_id, summary.run_id);
    }

    /// Shuts the catalog pool down once the first batch is durable.
    struct ClosePoolAfterFirstBatch {
        store: CatalogStore,
    }

    impl ScanProgress for ClosePoolAfterFirstBatch {
        fn on_batch_committed(&self, _files_seen: u64) {
            // The pool is marked closed on the call; awaiting only drains connections
            drop(self.store.pool().close());
        }
    }

    #[tokio::test]
    async fn test_storage_failure_mid_run_is_fatal_and_leaves_run_unfinished() {
        let (db_dir, store) = open_temp_store().await;
        let media = tempfile::tempdir().unwrap();
        for i in 0..6 {
            write_file(media.path(), &format!("{i}.mkv"), b"data");
        }

        let progress = ClosePoolAfterFirstBatch {
            store: store.clone(),
        };
        let sync = Synchronizer::new(store, scan_config(media.path(), 2));
        let result = sync.run(&CancellationToken::new(), &progress).await;
        assert!(
            matches!(result, Err(SyncError::Catalog(_))),
            "expected a catalog error, got {result:?}"
        );

        let reopened = CatalogStore::connect(&database_config_in(db_dir.path()))
            .await
            .unwrap();
        let runs = reopened.latest_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].finished_at.is_none());
        assert_eq!(reopened.count_files().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_second_scan_of_unchanged_tree_changes_nothing() {
        let (_db_dir, store) = open_temp_store().await;
        let media = tempfile::tempdir().unwrap();
        write_file(media.path(), "a.mkv", b"aaaa");
        write_file(media.path(), "b/c.mkv", b"cc");

        let sync = Synchronizer::new(store.clone(), scan_config(media.path(), 2000));
        let first = sync.run(&CancellationToken::new(), &NoProgress).await.unwrap();
        let second = sync.run(&CancellationToken::new(), &NoProgress).await.unwrap();

        assert_eq!(first.summary().files_changed, 2);
        assert_eq!(second.summary().files_seen, 2);
        assert_eq!(second.summary().files_changed, 0);
        assert_eq!(store.count_files().await.unwrap(), 2);

        // Last-seen run is refreshed even for unchanged files
        let abs = media.path().canonicalize().unwrap().join("a.mkv");
        let record = store
            .file_by_path(abs.to_str().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.last_seen_run_id, second.summary().run_id);
    }

    #[tokio::test]
    async fn test_modified_file_is_counted_as_changed() {
        let (_db_dir, store) = open_temp_store().await;
        let media = tempfile::tempdir().unwrap();
        write_file(media.path(), "a.mkv", b"aaaa");
        write_file(media.path(), "b.mkv", b"bbbb");

        let sync = Synchronizer::new(store.clone(), scan_config(media.path(), 2000));
        sync.run(&CancellationToken::new(), &NoProgress).await.unwrap();

        write_file(media.path(), "a.mkv", b"aaaaaaaa");
        write_file(media.path(), "new.mkv", b"n");

        let outcome = sync.run(&CancellationToken::new(), &NoProgress).await.unwrap();
        assert_eq!(outcome.summary().files_seen, 3);
        assert_eq!(outcome.summary().files_changed, 2);
    }

    #[tokio::test]
    async fn test_deleted_file_keeps_its_row() {
        let (_db_dir, store) = open_temp_store().await;
        let media = tempfile::tempdir().unwrap();
        let doomed = write_file(media.path(), "gone.mkv", b"x");
        write_file(media.path(), "kept.mkv", b"y");

        let sync = Synchronizer::new(store.clone(), scan_config(media.path(), 2000));
        let first = sync.run(&CancellationToken::new(), &NoProgress).await.unwrap();

        std::fs::remove_file(doomed).unwrap();
        let second = sync.run(&CancellationToken::new(), &NoProgress).await.unwrap();

        assert_eq!(second.summary().files_seen, 1);
        assert_eq!(store.count_files().await.unwrap(), 2);

        let abs = media.path().canonicalize().unwrap().join("gone.mkv");
        let stale = store
            .file_by_path(abs.to_str().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stale.last_seen_run_id, first.summary().run_id);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_leaves_run_unfinished() {
        let (_db_dir, store) = open_temp_store().await;
        let media = tempfile::tempdir().unwrap();
        write_file(media.path(), "a.mkv", b"a");

        let cancel = CancellationToken::new();
        cancel.cancel();

        let sync = Synchronizer::new(store.clone(), scan_config(media.path(), 2000));
        let outcome = sync.run(&cancel, &NoProgress).await.unwrap();

        let SyncOutcome::Interrupted(summary) = outcome else {
            panic!("scan should be interrupted");
        };
        assert_eq!(summary.files_seen, 0);
        let run = store.scan_run(summary.run_id).await.unwrap().unwrap();
        assert!(run.finished_at.is_none());
    }

    #[tokio::test]
    async fn test_missing_root_is_rejected_before_run_is_created() {
        let (_db_dir, store) = open_temp_store().await;
        let media = tempfile::tempdir().unwrap();

        let sync = Synchronizer::new(store.clone(), scan_config(&media.path().join("nope"), 10));
        let result = sync.run(&CancellationToken::new(), &NoProgress).await;

        assert!(matches!(result, Err(SyncError::ScanRoot { .. })));
        assert!(store.latest_runs(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_as_root_is_rejected() {
        let (_db_dir, store) = open_temp_store().await;
        let media = tempfile::tempdir().unwrap();
        let file = write_file(media.path(), "plain.txt", b"x");

        let sync = Synchronizer::new(store, scan_config(&file, 10));
        let result = sync.run(&CancellationToken::new(), &NoProgress).await;

        assert!(matches!(
            result,
            Err(SyncError::Config(ConfigError::ScanRootNotDirectory { .. }))
        ));
    }
}
