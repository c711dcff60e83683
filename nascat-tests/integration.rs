//! Integration tests for Nascat
//!
//! These tests drive the synchronizer against real directory trees and the
//! HTTP router against the resulting catalog, covering run provenance,
//! crash recovery, confinement and stale rows end to end.

#[path = "integration/delivery_pipeline.rs"]
mod delivery_pipeline;
#[path = "integration/sync_recovery.rs"]
mod sync_recovery;
