//! Test fixtures for catalog and delivery testing.
//!
//! Provides standardized scratch databases and media trees for consistent
//! testing across modules and crates.

use std::path::{Path, PathBuf};

use crate::catalog::CatalogStore;
use crate::config::DatabaseConfig;

/// Opens a fresh catalog in a temporary directory.
///
/// The directory must outlive the store, so both are returned.
///
/// # Panics
///
/// Panics if the temporary directory or database cannot be created.
/// This is acceptable in test fixtures where failures indicate environment issues.
pub async fn open_temp_store() -> (tempfile::TempDir, CatalogStore) {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = database_config_in(temp_dir.path());
    let store = CatalogStore::connect(&config).await.unwrap();
    (temp_dir, store)
}

/// Database configuration pointing at `catalog.db` inside `dir`.
pub fn database_config_in(dir: &Path) -> DatabaseConfig {
    DatabaseConfig {
        url: Some(dir.join("catalog.db").display().to_string()),
        ..DatabaseConfig::default()
    }
}

/// Writes `contents` to `root/rel`, creating parent directories.
///
/// # Panics
///
/// Panics if the file cannot be written.
pub fn write_file(root: &Path, rel: &str, contents: &[u8]) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, contents).unwrap();
    path
}

/// Deterministic, non-repeating-looking payload of `len` bytes.
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_file_creates_parents() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = write_file(temp_dir.path(), "a/b/c.bin", b"xyz");

        assert!(path.is_file());
        assert_eq!(std::fs::read(path).unwrap(), b"xyz");
    }

    #[test]
    fn test_patterned_bytes_wraps() {
        let bytes = patterned_bytes(300);
        assert_eq!(bytes[0], 0);
        assert_eq!(bytes[250], 250);
        assert_eq!(bytes[251], 0);
    }
}
