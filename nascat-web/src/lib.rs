//! Nascat Web - Media delivery and catalog API server

#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
#![warn(clippy::too_many_lines)]
//!
//! Serves cataloged files over HTTP with single-range partial content
//! support, plus read-only JSON endpoints over the catalog.

pub mod handlers;
pub mod server;

// Re-export main types
pub use server::{AppState, ServerError, router, run_server};
