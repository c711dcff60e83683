//! Router assembly and server lifecycle.

use std::net::SocketAddr;

use axum::Router;
use axum::routing::get;
use nascat_core::catalog::CatalogStore;
use nascat_core::config::{ConfigError, NascatConfig};
use nascat_core::CatalogError;
use nascat_core::delivery::{MediaResolver, PathGuard};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers::{api_duplicates, api_files, api_health, api_stats, serve_media};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Catalog read interface
    pub store: CatalogStore,
    /// Delivery state machine bound to the confinement policy
    pub resolver: MediaResolver,
    /// Maximum bytes per streamed body chunk
    pub chunk_size: usize,
}

impl AppState {
    /// Builds state from an open catalog and a confinement policy.
    pub fn new(store: CatalogStore, guard: PathGuard, chunk_size: usize) -> Self {
        Self {
            resolver: MediaResolver::new(store.clone(), guard),
            store,
            chunk_size,
        }
    }
}

/// Failures that prevent the server from starting or keep it from running.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Serving configuration is incomplete or invalid
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The catalog could not be opened
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Binding, serving or resolving the allowed root failed
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Media delivery; `get` also answers HEAD
        .route("/media/{id}", get(serve_media))
        // JSON catalog API
        .route("/health", get(api_health))
        .route("/files", get(api_files))
        .route("/stats", get(api_stats))
        .route("/duplicates", get(api_duplicates))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Opens the catalog and serves until Ctrl-C.
///
/// # Errors
///
/// - `ServerError::Config` - No allowed root and unconfined mode not requested
/// - `ServerError::Catalog` - Catalog could not be opened
/// - `ServerError::Io` - Allowed root unresolvable or bind address unavailable
pub async fn run_server(config: &NascatConfig) -> Result<(), ServerError> {
    config.validate_for_serve()?;

    let store = CatalogStore::connect(&config.database).await?;
    let guard = PathGuard::from_config(config.server.allowed_root.as_deref())?;
    let state = AppState::new(store, guard, config.server.chunk_size);

    let listener = tokio::net::TcpListener::bind(config.server.bind_addr).await?;
    let local_addr: SocketAddr = listener.local_addr()?;
    info!(addr = %local_addr, "Nascat media server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Nascat media server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // Without a signal handler the server runs until killed
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use chrono::Utc;
    use nascat_core::catalog::FileUpsert;
    use nascat_core::catalog::store::upsert_file;
    use nascat_core::test_fixtures::{open_temp_store, patterned_bytes, write_file};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    async fn catalog(store: &CatalogStore, path: &Path, root: &str) -> i64 {
        let abs_path = path.display().to_string();
        let run_id = store.begin_run(root, Utc::now()).await.unwrap();
        let mut tx = store.begin().await.unwrap();
        upsert_file(
            &mut tx,
            &FileUpsert {
                abs_path: &abs_path,
                root,
                rel_path: "x",
                size_bytes: std::fs::metadata(path).map(|m| m.len() as i64).unwrap_or(0),
                mtime: Utc::now(),
                run_id,
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        store.file_by_path(&abs_path).await.unwrap().unwrap().id
    }

    async fn send(
        app: Router,
        request: Request<Body>,
    ) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, body.to_vec())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn get_range(uri: &str, range: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::RANGE, range)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_media_status_mapping() {
        let (dir, store) = open_temp_store().await;
        let media = dir.path().join("media");
        let data = patterned_bytes(1_000);
        let file = write_file(&media, "films/a.mp4", &data);
        let id = catalog(&store, &file, "Films").await;

        let guard = PathGuard::confined(&media).unwrap();
        let app = router(AppState::new(store, guard, 64));

        let (status, headers, body) = send(app.clone(), get(&format!("/media/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_LENGTH], "1000");
        assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
        assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");
        assert_eq!(body, data);

        let (status, headers, body) =
            send(app.clone(), get_range(&format!("/media/{id}"), "bytes=0-99")).await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(headers[header::CONTENT_RANGE], "bytes 0-99/1000");
        assert_eq!(headers[header::CONTENT_LENGTH], "100");
        assert_eq!(body, data[..100]);

        let (status, headers, body) =
            send(app.clone(), get_range(&format!("/media/{id}"), "bytes=-100")).await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(headers[header::CONTENT_RANGE], "bytes 900-999/1000");
        assert_eq!(body, data[900..]);

        for invalid in ["bytes=2000-3000", "bytes=100-50", "bytes=0-10,20-30", "lines=1-2"] {
            let (status, headers, body) =
                send(app.clone(), get_range(&format!("/media/{id}"), invalid)).await;
            assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE, "{invalid}");
            assert_eq!(headers[header::CONTENT_RANGE], "bytes */1000");
            assert!(body.is_empty());
        }

        let (status, _, _) = send(app.clone(), get("/media/424242")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _, _) = send(app, get("/media/not-a-number")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_head_has_headers_without_body() {
        let (dir, store) = open_temp_store().await;
        let file = write_file(dir.path(), "a.bin", &patterned_bytes(300));
        let id = catalog(&store, &file, "Root").await;
        let app = router(AppState::new(store, PathGuard::confined(dir.path()).unwrap(), 64));

        let request = Request::head(format!("/media/{id}"))
            .body(Body::empty())
            .unwrap();
        let (status, headers, body) = send(app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_LENGTH], "300");
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_confinement_and_stale_rows() {
        let (dir, store) = open_temp_store().await;
        let media = dir.path().join("media");
        std::fs::create_dir_all(&media).unwrap();
        let outside = write_file(dir.path(), "private/secret.txt", b"secret");
        let doomed = write_file(&media, "doomed.bin", b"bye");

        let outside_id = catalog(&store, &outside, "Root").await;
        let doomed_id = catalog(&store, &doomed, "Root").await;
        std::fs::remove_file(&doomed).unwrap();

        let app = router(AppState::new(store, PathGuard::confined(&media).unwrap(), 64));

        let (status, _, body) = send(app.clone(), get(&format!("/media/{outside_id}"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.is_empty());

        let (status, _, _) = send(app, get(&format!("/media/{doomed_id}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_zero_length_file() {
        let (dir, store) = open_temp_store().await;
        let file = write_file(dir.path(), "empty.txt", b"");
        let id = catalog(&store, &file, "Root").await;
        let app = router(AppState::new(store, PathGuard::confined(dir.path()).unwrap(), 64));

        let (status, headers, body) = send(app.clone(), get(&format!("/media/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_LENGTH], "0");
        assert!(body.is_empty());

        let (status, headers, _) =
            send(app, get_range(&format!("/media/{id}"), "bytes=0-")).await;
        assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(headers[header::CONTENT_RANGE], "bytes */0");
    }

    #[tokio::test]
    async fn test_json_endpoints() {
        let (dir, store) = open_temp_store().await;
        let a = write_file(dir.path(), "films/a.mkv", &patterned_bytes(30));
        let b = write_file(dir.path(), "films/b.mkv", &patterned_bytes(30));
        let c = write_file(dir.path(), "shows/c.mkv", &patterned_bytes(5));
        catalog(&store, &a, "Films").await;
        catalog(&store, &b, "Films").await;
        catalog(&store, &c, "Shows").await;
        store
            .set_content_hash(&a.display().to_string(), "abc")
            .await
            .unwrap();
        store
            .set_content_hash(&b.display().to_string(), "abc")
            .await
            .unwrap();

        let app = router(AppState::new(store, PathGuard::confined(dir.path()).unwrap(), 64));

        let (status, _, body) = send(app.clone(), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        let health: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(health, serde_json::json!({ "ok": true, "db": 1 }));

        let (status, _, body) = send(app.clone(), get("/files?root=Shows")).await;
        assert_eq!(status, StatusCode::OK);
        let files: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(files.as_array().unwrap().len(), 1);
        assert_eq!(files[0]["size_bytes"], 5);

        let (_, _, body) = send(app.clone(), get("/files?q=FILMS&limit=1")).await;
        let files: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(files.as_array().unwrap().len(), 1);

        let (status, _, body) = send(app.clone(), get("/stats")).await;
        assert_eq!(status, StatusCode::OK);
        let stats: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(stats["total_files"], 3);
        assert_eq!(stats["total_bytes"], 65);
        assert_eq!(stats["by_root"][0]["root"], "Films");

        let (status, _, body) = send(app.clone(), get("/duplicates")).await;
        assert_eq!(status, StatusCode::OK);
        let groups: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(groups[0]["sha256"], "abc");
        assert_eq!(groups[0]["copies"], 2);
        assert_eq!(groups[0]["total_bytes"], 60);

        for bad in [
            "/files?limit=0",
            "/files?limit=501",
            "/files?offset=-1",
            "/files?limit=x",
            "/duplicates?limit=0",
        ] {
            let (status, _, _) = send(app.clone(), get(bad)).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{bad}");
        }
    }

    #[tokio::test]
    async fn test_health_reports_unavailable_database() {
        let (_dir, store) = open_temp_store().await;
        store.pool().close().await;
        let app = router(AppState::new(store, PathGuard::unconfined(), 64));

        let (status, _, body) = send(app, get("/health")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let health: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(health["ok"], false);
    }
}
