//! Terminal progress for long scans.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use nascat_core::sync::ScanProgress;

/// Spinner updated after every committed batch.
pub struct ScanSpinner {
    bar: ProgressBar,
}

impl ScanSpinner {
    pub fn new(label: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
            .template("{spinner:.cyan} {msg} [{elapsed}]")
        {
            bar.set_style(style);
        }
        bar.set_message(format!("Scanning {label}..."));
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    /// Removes the spinner so the summary prints on a clean line.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ScanProgress for ScanSpinner {
    fn on_batch_committed(&self, files_seen: u64) {
        self.bar
            .set_message(format!("Scanning... {files_seen} files committed"));
    }

    fn on_finished(&self, files_seen: u64) {
        self.bar
            .set_message(format!("Finalizing run after {files_seen} files"));
    }
}
