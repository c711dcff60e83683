//! SQLite-backed catalog store.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::{Pool, QueryBuilder, Sqlite, Transaction};
use tracing::{debug, info};

use super::{
    CatalogError, CatalogStats, DuplicateGroup, FileQuery, FileRecord, MAX_PAGE_SIZE, RootStats,
    ScanRun,
};
use crate::config::DatabaseConfig;

const FILE_COLUMNS: &str =
    "id, abs_path, root, rel_path, size_bytes, mtime, content_hash, last_seen_run_id";

const RUN_COLUMNS: &str = "id, root, started_at, finished_at, files_seen, files_changed";

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS scan_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        root TEXT NOT NULL,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        files_seen INTEGER NOT NULL DEFAULT 0,
        files_changed INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        abs_path TEXT NOT NULL UNIQUE,
        root TEXT NOT NULL,
        rel_path TEXT NOT NULL,
        size_bytes INTEGER NOT NULL CHECK (size_bytes >= 0),
        mtime TEXT NOT NULL,
        content_hash TEXT,
        last_seen_run_id INTEGER NOT NULL REFERENCES scan_runs(id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_files_root ON files(root)",
    "CREATE INDEX IF NOT EXISTS idx_files_mtime ON files(mtime)",
    "CREATE INDEX IF NOT EXISTS idx_files_content_hash ON files(content_hash)",
];

/// Size and modification time as last persisted for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct StoredState {
    pub size_bytes: i64,
    pub mtime: DateTime<Utc>,
}

/// Freshly observed values written by the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpsert<'a> {
    pub abs_path: &'a str,
    pub root: &'a str,
    pub rel_path: &'a str,
    pub size_bytes: i64,
    pub mtime: DateTime<Utc>,
    pub run_id: i64,
}

/// Handle to the catalog database.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    pool: Pool<Sqlite>,
}

impl CatalogStore {
    /// Opens (creating if needed) the catalog database and applies the schema.
    ///
    /// # Errors
    ///
    /// - `CatalogError::NotConfigured` - No database location in the configuration
    /// - `CatalogError::Database` - Connection or schema creation failed
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, CatalogError> {
        let location = config.url.as_deref().ok_or(CatalogError::NotConfigured)?;
        let url = sqlite_url(location);

        let opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        info!(database = %url, "Catalog database ready");
        Ok(store)
    }

    /// Wraps an existing pool. The schema is not applied.
    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Creates tables and indexes that do not exist yet.
    ///
    /// # Errors
    ///
    /// - `CatalogError::Database` - A schema statement failed
    pub async fn migrate(&self) -> Result<(), CatalogError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Round-trips a trivial query.
    ///
    /// # Errors
    ///
    /// - `CatalogError::Database` - The database is unreachable
    pub async fn health_check(&self) -> Result<i64, CatalogError> {
        let value = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(value)
    }

    /// Starts a write transaction.
    ///
    /// # Errors
    ///
    /// - `CatalogError::Database` - No connection could be acquired
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, CatalogError> {
        Ok(self.pool.begin().await?)
    }

    /// # Errors
    ///
    /// - `CatalogError::Database` - Query failed
    pub async fn file_by_id(&self, id: i64) -> Result<Option<FileRecord>, CatalogError> {
        let record = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// # Errors
    ///
    /// - `CatalogError::Database` - Query failed
    pub async fn file_by_path(&self, abs_path: &str) -> Result<Option<FileRecord>, CatalogError> {
        let record = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE abs_path = ?"
        ))
        .bind(abs_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Filtered, newest-first page of catalog rows.
    ///
    /// The limit is clamped to `1..=500`.
    ///
    /// # Errors
    ///
    /// - `CatalogError::Database` - Query failed
    pub async fn search_files(&self, query: &FileQuery) -> Result<Vec<FileRecord>, CatalogError> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {FILE_COLUMNS} FROM files"));
        let mut has_where = false;

        if let Some(needle) = query.path_contains.as_deref().filter(|n| !n.is_empty()) {
            builder
                .push(" WHERE abs_path LIKE ")
                .push_bind(like_pattern(needle))
                .push(" ESCAPE '\\'");
            has_where = true;
        }

        if let Some(root) = query.root.as_deref().filter(|r| !r.is_empty()) {
            builder
                .push(if has_where { " AND " } else { " WHERE " })
                .push("root = ")
                .push_bind(root.to_string());
        }

        builder
            .push(" ORDER BY mtime DESC, id DESC LIMIT ")
            .push_bind(i64::from(query.limit.clamp(1, MAX_PAGE_SIZE)))
            .push(" OFFSET ")
            .push_bind(i64::from(query.offset));

        let rows = builder
            .build_query_as::<FileRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Totals overall and per root, largest root first.
    ///
    /// # Errors
    ///
    /// - `CatalogError::Database` - Query failed
    pub async fn stats(&self) -> Result<CatalogStats, CatalogError> {
        let (total_files, total_bytes) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM files",
        )
        .fetch_one(&self.pool)
        .await?;

        let by_root = sqlx::query_as::<_, RootStats>(
            "SELECT root, COUNT(*) AS files, COALESCE(SUM(size_bytes), 0) AS bytes
             FROM files
             GROUP BY root
             ORDER BY bytes DESC, root ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(CatalogStats {
            total_files,
            total_bytes,
            by_root,
        })
    }

    /// Groups of rows sharing a content hash, most wasted bytes first.
    ///
    /// Rows without a hash never participate.
    ///
    /// # Errors
    ///
    /// - `CatalogError::Database` - Query failed
    pub async fn duplicates(&self, limit: u32) -> Result<Vec<DuplicateGroup>, CatalogError> {
        let groups = sqlx::query_as::<_, (String, i64, i64)>(
            "SELECT content_hash, COUNT(*) AS copies, COALESCE(SUM(size_bytes), 0) AS total_bytes
             FROM files
             WHERE content_hash IS NOT NULL
             GROUP BY content_hash
             HAVING COUNT(*) > 1
             ORDER BY total_bytes DESC, content_hash ASC
             LIMIT ?",
        )
        .bind(i64::from(limit.clamp(1, MAX_PAGE_SIZE)))
        .fetch_all(&self.pool)
        .await?;

        let mut duplicates = Vec::with_capacity(groups.len());
        for (content_hash, copies, total_bytes) in groups {
            let paths = sqlx::query_scalar::<_, String>(
                "SELECT abs_path FROM files WHERE content_hash = ? ORDER BY abs_path",
            )
            .bind(&content_hash)
            .fetch_all(&self.pool)
            .await?;

            duplicates.push(DuplicateGroup {
                content_hash,
                copies,
                total_bytes,
                paths,
            });
        }

        Ok(duplicates)
    }

    /// Records an externally computed content hash for a path.
    ///
    /// Returns `false` when the path is not cataloged.
    ///
    /// # Errors
    ///
    /// - `CatalogError::Database` - Update failed
    pub async fn set_content_hash(&self, abs_path: &str, hash: &str) -> Result<bool, CatalogError> {
        let result = sqlx::query("UPDATE files SET content_hash = ? WHERE abs_path = ?")
            .bind(hash)
            .bind(abs_path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// # Errors
    ///
    /// - `CatalogError::Database` - Query failed
    pub async fn count_files(&self) -> Result<i64, CatalogError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM files")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Number of rows stored for one absolute path; at most 1 by schema.
    ///
    /// # Errors
    ///
    /// - `CatalogError::Database` - Query failed
    pub async fn count_rows_for_path(&self, abs_path: &str) -> Result<i64, CatalogError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM files WHERE abs_path = ?")
            .bind(abs_path)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Inserts and commits a new, unfinished scan run. Returns its id.
    ///
    /// # Errors
    ///
    /// - `CatalogError::Database` - Insert failed
    pub async fn begin_run(
        &self,
        root_label: &str,
        started_at: DateTime<Utc>,
    ) -> Result<i64, CatalogError> {
        let result = sqlx::query("INSERT INTO scan_runs (root, started_at) VALUES (?, ?)")
            .bind(root_label)
            .bind(started_at)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// Marks a run finished and stores its final counters in one statement.
    ///
    /// # Errors
    ///
    /// - `CatalogError::Database` - Update failed
    pub async fn finish_run(
        &self,
        run_id: i64,
        finished_at: DateTime<Utc>,
        files_seen: u64,
        files_changed: u64,
    ) -> Result<(), CatalogError> {
        sqlx::query(
            "UPDATE scan_runs SET finished_at = ?, files_seen = ?, files_changed = ? WHERE id = ?",
        )
        .bind(finished_at)
        .bind(to_sql_count(files_seen))
        .bind(to_sql_count(files_changed))
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// # Errors
    ///
    /// - `CatalogError::Database` - Query failed
    pub async fn scan_run(&self, run_id: i64) -> Result<Option<ScanRun>, CatalogError> {
        let run = sqlx::query_as::<_, ScanRun>(&format!(
            "SELECT {RUN_COLUMNS} FROM scan_runs WHERE id = ?"
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(run)
    }

    /// Most recent runs first.
    ///
    /// # Errors
    ///
    /// - `CatalogError::Database` - Query failed
    pub async fn latest_runs(&self, limit: u32) -> Result<Vec<ScanRun>, CatalogError> {
        let runs = sqlx::query_as::<_, ScanRun>(&format!(
            "SELECT {RUN_COLUMNS} FROM scan_runs ORDER BY id DESC LIMIT ?"
        ))
        .bind(i64::from(limit.clamp(1, MAX_PAGE_SIZE)))
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }
}

/// Reads the persisted size and mtime for a path inside an open transaction.
///
/// # Errors
///
/// - `CatalogError::Database` - Query failed
pub async fn stored_state(
    conn: &mut SqliteConnection,
    abs_path: &str,
) -> Result<Option<StoredState>, CatalogError> {
    let state = sqlx::query_as::<_, StoredState>(
        "SELECT size_bytes, mtime FROM files WHERE abs_path = ?",
    )
    .bind(abs_path)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(state)
}

/// Inserts or overwrites the row for `file.abs_path`.
///
/// Root, relative path, size, mtime and last-seen run always take the new
/// values. A stored content hash survives only while size and mtime are
/// unchanged.
///
/// # Errors
///
/// - `CatalogError::Database` - Statement failed
pub async fn upsert_file(
    conn: &mut SqliteConnection,
    file: &FileUpsert<'_>,
) -> Result<(), CatalogError> {
    sqlx::query(
        "INSERT INTO files (abs_path, root, rel_path, size_bytes, mtime, last_seen_run_id)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT (abs_path) DO UPDATE SET
            root = excluded.root,
            rel_path = excluded.rel_path,
            content_hash = CASE
                WHEN files.size_bytes = excluded.size_bytes AND files.mtime = excluded.mtime
                THEN files.content_hash
                ELSE NULL
            END,
            size_bytes = excluded.size_bytes,
            mtime = excluded.mtime,
            last_seen_run_id = excluded.last_seen_run_id",
    )
    .bind(file.abs_path)
    .bind(file.root)
    .bind(file.rel_path)
    .bind(file.size_bytes)
    .bind(file.mtime)
    .bind(file.run_id)
    .execute(&mut *conn)
    .await?;

    debug!(path = file.abs_path, run_id = file.run_id, "Upserted catalog row");
    Ok(())
}

fn sqlite_url(location: &str) -> String {
    if location.starts_with("sqlite:") {
        location.to_string()
    } else {
        format!("sqlite://{location}")
    }
}

fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

fn to_sql_count(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}
