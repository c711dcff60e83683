//! JSON catalog API: health, listing, statistics and duplicate groups.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::SecondsFormat;
use nascat_core::CatalogError;
use nascat_core::catalog::{CatalogStats, FileQuery, FileRecord, MAX_PAGE_SIZE};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

use crate::server::AppState;

const DEFAULT_FILES_LIMIT: i64 = 50;
const DEFAULT_DUPLICATES_LIMIT: i64 = 100;

/// Errors returned by the JSON endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A query parameter is missing its bounds or cannot be parsed
    #[error("{0}")]
    Validation(String),

    /// The catalog could not answer
    #[error("catalog unavailable")]
    Catalog(#[from] CatalogError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(detail) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "detail": detail })))
                    .into_response()
            }
            ApiError::Catalog(e) => {
                error!(error = %e, "Catalog query failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "detail": "catalog unavailable" })),
                )
                    .into_response()
            }
        }
    }
}

/// Query parameters for `GET /files`.
#[derive(Debug, Default, Deserialize)]
pub struct FilesParams {
    /// Case-insensitive substring of the absolute path
    pub q: Option<String>,
    /// Exact root label
    pub root: Option<String>,
    /// Page size, 1 to 500
    pub limit: Option<i64>,
    /// Rows to skip
    pub offset: Option<i64>,
}

/// Query parameters for `GET /duplicates`.
#[derive(Debug, Default, Deserialize)]
pub struct DuplicatesParams {
    /// Maximum number of groups, 1 to 500
    pub limit: Option<i64>,
}

/// One row of the `GET /files` listing.
#[derive(Debug, Serialize)]
pub struct FileEntry {
    /// Catalog id, usable with `/media/{id}`
    pub id: i64,
    /// Absolute path on the volume
    pub abs_path: String,
    /// Size in bytes at last scan
    pub size_bytes: i64,
    /// RFC 3339 modification time
    pub mtime: String,
    /// Content hash, when one has been recorded
    pub sha256: Option<String>,
}

impl From<FileRecord> for FileEntry {
    fn from(record: FileRecord) -> Self {
        Self {
            id: record.id,
            abs_path: record.abs_path,
            size_bytes: record.size_bytes,
            mtime: record.mtime.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            sha256: record.content_hash,
        }
    }
}

/// One group of the `GET /duplicates` listing.
#[derive(Debug, Serialize)]
pub struct DuplicateEntry {
    /// Shared content hash
    pub sha256: String,
    /// Number of rows carrying the hash
    pub copies: i64,
    /// Combined size of all copies
    pub total_bytes: i64,
    /// Absolute paths, sorted
    pub paths: Vec<String>,
}

/// `GET /health`: round-trips the database.
pub async fn api_health(State(state): State<AppState>) -> Response {
    match state.store.health_check().await {
        Ok(db) => Json(json!({ "ok": true, "db": db })).into_response(),
        Err(e) => {
            warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "ok": false })),
            )
                .into_response()
        }
    }
}

/// `GET /files`: filtered listing, most recently modified first.
///
/// # Errors
///
/// - `ApiError::Validation` - Limit outside `1..=500`, negative offset, or unparsable query
/// - `ApiError::Catalog` - Query failed
pub async fn api_files(
    State(state): State<AppState>,
    params: Result<Query<FilesParams>, QueryRejection>,
) -> Result<Json<Vec<FileEntry>>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::Validation(e.body_text()))?;

    let query = FileQuery {
        path_contains: params.q,
        root: params.root,
        limit: page_limit(params.limit, DEFAULT_FILES_LIMIT)?,
        offset: match params.offset.unwrap_or(0) {
            offset if offset < 0 => {
                return Err(ApiError::Validation(
                    "offset must be greater than or equal to 0".to_string(),
                ));
            }
            offset => u32::try_from(offset).unwrap_or(u32::MAX),
        },
    };

    let files = state.store.search_files(&query).await?;
    Ok(Json(files.into_iter().map(FileEntry::from).collect()))
}

/// `GET /stats`: totals overall and per root.
///
/// # Errors
///
/// - `ApiError::Catalog` - Query failed
pub async fn api_stats(State(state): State<AppState>) -> Result<Json<CatalogStats>, ApiError> {
    Ok(Json(state.store.stats().await?))
}

/// `GET /duplicates`: content-hash groups with more than one copy.
///
/// # Errors
///
/// - `ApiError::Validation` - Limit outside `1..=500` or unparsable query
/// - `ApiError::Catalog` - Query failed
pub async fn api_duplicates(
    State(state): State<AppState>,
    params: Result<Query<DuplicatesParams>, QueryRejection>,
) -> Result<Json<Vec<DuplicateEntry>>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::Validation(e.body_text()))?;
    let limit = page_limit(params.limit, DEFAULT_DUPLICATES_LIMIT)?;

    let groups = state.store.duplicates(limit).await?;
    Ok(Json(
        groups
            .into_iter()
            .map(|group| DuplicateEntry {
                sha256: group.content_hash,
                copies: group.copies,
                total_bytes: group.total_bytes,
                paths: group.paths,
            })
            .collect(),
    ))
}

fn page_limit(requested: Option<i64>, default: i64) -> Result<u32, ApiError> {
    let limit = requested.unwrap_or(default);
    u32::try_from(limit)
        .ok()
        .filter(|limit| (1..=MAX_PAGE_SIZE).contains(limit))
        .ok_or_else(|| {
            ApiError::Validation(format!("limit must be between 1 and {MAX_PAGE_SIZE}"))
        })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn test_page_limit_bounds() {
        assert_eq!(page_limit(None, 50).unwrap(), 50);
        assert_eq!(page_limit(Some(1), 50).unwrap(), 1);
        assert_eq!(page_limit(Some(500), 50).unwrap(), 500);
        assert!(page_limit(Some(0), 50).is_err());
        assert!(page_limit(Some(501), 50).is_err());
        assert!(page_limit(Some(-3), 50).is_err());
    }

    #[test]
    fn test_file_entry_formats_mtime() {
        let record = FileRecord {
            id: 7,
            abs_path: "/srv/a.mkv".to_string(),
            root: "Films".to_string(),
            rel_path: "a.mkv".to_string(),
            size_bytes: 10,
            mtime: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            content_hash: None,
            last_seen_run_id: 1,
        };

        let entry = FileEntry::from(record);
        assert_eq!(entry.id, 7);
        assert_eq!(entry.mtime, "2023-11-14T22:13:20Z");
        assert!(entry.sha256.is_none());
    }
}
