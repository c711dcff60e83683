//! HTTP request handlers organized by functionality

pub mod api;
pub mod media;

// Re-export handler functions
pub use api::{ApiError, api_duplicates, api_files, api_health, api_stats};
pub use media::serve_media;
