//! Scan-run provenance.

use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use crate::catalog::{CatalogError, CatalogStore};

/// Open scan run.
///
/// The row is committed by [`RunTracker::open`] before any file is
/// processed, so its id exists even if the scan later aborts. Only
/// [`RunTracker::finish`] sets the finish time; dropping the tracker
/// leaves the run incomplete.
pub struct RunTracker {
    store: CatalogStore,
    run_id: i64,
    started: Instant,
}

impl RunTracker {
    /// # Errors
    ///
    /// - `CatalogError::Database` - The run row could not be inserted
    pub async fn open(store: &CatalogStore, root_label: &str) -> Result<Self, CatalogError> {
        let run_id = store.begin_run(root_label, Utc::now()).await?;
        info!(run_id, root = root_label, "Scan run opened");

        Ok(Self {
            store: store.clone(),
            run_id,
            started: Instant::now(),
        })
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Records completion time and final counters in a single commit.
    ///
    /// # Errors
    ///
    /// - `CatalogError::Database` - The run row could not be updated
    pub async fn finish(self, files_seen: u64, files_changed: u64) -> Result<(), CatalogError> {
        self.store
            .finish_run(self.run_id, Utc::now(), files_seen, files_changed)
            .await?;
        info!(
            run_id = self.run_id,
            files_seen, files_changed, "Scan run finished"
        );
        Ok(())
    }

    /// Leaves the run unfinished on purpose, marking it incomplete.
    pub fn abandon(self) {
        warn!(
            run_id = self.run_id,
            "Scan run left unfinished; it will be reported as incomplete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::open_temp_store;

    #[tokio::test]
    async fn test_open_commits_before_finish() {
        let (_dir, store) = open_temp_store().await;
        let tracker = RunTracker::open(&store, "Films").await.unwrap();
        let run_id = tracker.run_id();

        let run = store.scan_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.root, "Films");
        assert!(!run.is_complete());

        tracker.finish(12, 3).await.unwrap();
        let run = store.scan_run(run_id).await.unwrap().unwrap();
        assert!(run.is_complete());
        assert_eq!((run.files_seen, run.files_changed), (12, 3));
    }

    #[tokio::test]
    async fn test_abandon_leaves_run_incomplete() {
        let (_dir, store) = open_temp_store().await;
        let tracker = RunTracker::open(&store, "Films").await.unwrap();
        let run_id = tracker.run_id();
        tracker.abandon();

        let run = store.scan_run(run_id).await.unwrap().unwrap();
        assert!(run.finished_at.is_none());
        assert_eq!(run.files_seen, 0);
    }
}
