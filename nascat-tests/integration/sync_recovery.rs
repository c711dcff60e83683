//! Synchronizer behavior across repeated and interrupted runs.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use nascat_core::catalog::CatalogStore;
use nascat_core::config::ScanConfig;
use nascat_core::sync::{NoProgress, ScanProgress, SyncOutcome, Synchronizer};
use nascat_core::test_fixtures::{open_temp_store, patterned_bytes, write_file};
use tokio_util::sync::CancellationToken;

/// Cancels the scan as soon as the first batch is durable.
struct CancelAfterFirstBatch {
    cancel: CancellationToken,
    batches: AtomicU32,
}

impl ScanProgress for CancelAfterFirstBatch {
    fn on_batch_committed(&self, _files_seen: u64) {
        if self.batches.fetch_add(1, Ordering::SeqCst) == 0 {
            self.cancel.cancel();
        }
    }
}

fn populate(root: &Path, count: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|i| {
            let rel = format!("dir{}/file{i}.bin", i % 3);
            let file = write_file(root, &rel, &patterned_bytes(i + 1));
            file.canonicalize().unwrap()
        })
        .collect()
}

fn scan_config(root: &Path, batch_size: usize) -> ScanConfig {
    ScanConfig {
        root: Some(root.to_path_buf()),
        root_label: "Volume".to_string(),
        batch_size,
    }
}

async fn assert_one_row_per_path(store: &CatalogStore, files: &[PathBuf]) {
    for file in files {
        let rows = store
            .count_rows_for_path(&file.display().to_string())
            .await
            .unwrap();
        assert_eq!(rows, 1, "{}", file.display());
    }
}

#[tokio::test]
async fn test_second_scan_of_unchanged_tree_changes_nothing() {
    let (dir, store) = open_temp_store().await;
    let root = dir.path().join("volume");
    let files = populate(&root, 7);
    let sync = Synchronizer::new(store.clone(), scan_config(&root, 3));
    let cancel = CancellationToken::new();

    let first = sync.run(&cancel, &NoProgress).await.unwrap();
    let second = sync.run(&cancel, &NoProgress).await.unwrap();

    let (SyncOutcome::Completed(first), SyncOutcome::Completed(second)) = (first, second) else {
        panic!("both scans should complete");
    };
    assert_eq!(first.files_seen, 7);
    assert_eq!(first.files_changed, 7);
    assert_eq!(second.files_seen, 7);
    assert_eq!(second.files_changed, 0);
    assert_ne!(first.run_id, second.run_id);

    assert_eq!(store.count_files().await.unwrap(), 7);
    assert_one_row_per_path(&store, &files).await;

    let runs = store.latest_runs(10).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|run| run.is_complete()));
    assert_eq!(runs[0].id, second.run_id);
    assert_eq!(runs[0].files_changed, 0);
}

#[tokio::test]
async fn test_interrupted_scan_is_recovered_by_next_run() {
    let (dir, store) = open_temp_store().await;
    let root = dir.path().join("volume");
    let files = populate(&root, 9);

    let cancel = CancellationToken::new();
    let progress = CancelAfterFirstBatch {
        cancel: cancel.clone(),
        batches: AtomicU32::new(0),
    };
    let interrupted = Synchronizer::new(store.clone(), scan_config(&root, 2))
        .run(&cancel, &progress)
        .await
        .unwrap();

    let SyncOutcome::Interrupted(partial) = interrupted else {
        panic!("scan should observe cancellation");
    };
    assert_eq!(partial.files_seen, 2);
    assert_eq!(store.count_files().await.unwrap(), 2);

    let abandoned = store.scan_run(partial.run_id).await.unwrap().unwrap();
    assert!(abandoned.finished_at.is_none());

    let recovered = Synchronizer::new(store.clone(), scan_config(&root, 2))
        .run(&CancellationToken::new(), &NoProgress)
        .await
        .unwrap();

    let SyncOutcome::Completed(summary) = recovered else {
        panic!("recovery scan should complete");
    };
    assert_eq!(summary.files_seen, 9);
    assert_eq!(summary.files_changed, 7);
    assert_eq!(store.count_files().await.unwrap(), 9);
    assert_one_row_per_path(&store, &files).await;

    // The interrupted run stays incomplete after recovery
    let abandoned = store.scan_run(partial.run_id).await.unwrap().unwrap();
    assert!(!abandoned.is_complete());
    let completed = store.scan_run(summary.run_id).await.unwrap().unwrap();
    assert!(completed.is_complete());

    for file in &files {
        let record = store
            .file_by_path(&file.display().to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.last_seen_run_id, summary.run_id);
        assert_eq!(record.root, "Volume");
    }
}

#[tokio::test]
async fn test_modified_file_is_reclassified_and_loses_hash() {
    let (dir, store) = open_temp_store().await;
    let root = dir.path().join("volume");
    let files = populate(&root, 3);
    let target = files[0].display().to_string();
    let sync = Synchronizer::new(store.clone(), scan_config(&root, 100));
    let cancel = CancellationToken::new();

    sync.run(&cancel, &NoProgress).await.unwrap();
    assert!(store.set_content_hash(&target, "deadbeef").await.unwrap());

    std::fs::write(&files[0], patterned_bytes(4_096)).unwrap();
    let outcome = sync.run(&cancel, &NoProgress).await.unwrap();

    assert_eq!(outcome.summary().files_changed, 1);
    let record = store.file_by_path(&target).await.unwrap().unwrap();
    assert_eq!(record.size_bytes, 4_096);
    assert!(record.content_hash.is_none());

    let untouched = store
        .file_by_path(&files[1].display().to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(untouched.size_bytes, 2);
}
