//! Scan a tree, then serve it: status mapping over real catalog rows.

use std::path::Path;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{HeaderMap, Request, StatusCode, header};
use nascat_core::catalog::CatalogStore;
use nascat_core::config::ScanConfig;
use nascat_core::delivery::PathGuard;
use nascat_core::sync::{NoProgress, Synchronizer};
use nascat_core::test_fixtures::{open_temp_store, patterned_bytes, write_file};
use nascat_web::{AppState, router};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

async fn scan(store: &CatalogStore, root: &Path, label: &str) {
    let config = ScanConfig {
        root: Some(root.to_path_buf()),
        root_label: label.to_string(),
        batch_size: 2,
    };
    Synchronizer::new(store.clone(), config)
        .run(&CancellationToken::new(), &NoProgress)
        .await
        .unwrap();
}

async fn id_of(store: &CatalogStore, file: &Path) -> i64 {
    let abs_path = file.canonicalize().unwrap().display().to_string();
    store.file_by_path(&abs_path).await.unwrap().unwrap().id
}

async fn request(
    app: &Router,
    uri: &str,
    range: Option<&str>,
) -> (StatusCode, HeaderMap, Vec<u8>) {
    let mut builder = Request::get(uri);
    if let Some(range) = range {
        builder = builder.header(header::RANGE, range);
    }
    let response = app
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

#[tokio::test]
async fn test_scanned_file_is_served_full_and_partial() {
    let (dir, store) = open_temp_store().await;
    let media = dir.path().join("media");
    let data = patterned_bytes(5_000);
    let file = write_file(&media, "films/clip.mp4", &data);
    write_file(&media, "films/other.mkv", &patterned_bytes(10));
    scan(&store, &media, "Films").await;
    let id = id_of(&store, &file).await;

    let app = router(AppState::new(store, PathGuard::confined(&media).unwrap(), 1_024));
    let uri = format!("/media/{id}");

    let (status, headers, body) = request(&app, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_LENGTH], "5000");
    assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
    assert_eq!(body, data);

    let (status, headers, body) = request(&app, &uri, Some("bytes=1000-2999")).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(headers[header::CONTENT_RANGE], "bytes 1000-2999/5000");
    assert_eq!(headers[header::CONTENT_LENGTH], "2000");
    assert_eq!(body, data[1_000..3_000]);

    let (status, headers, body) = request(&app, &uri, Some("bytes=4500-")).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(headers[header::CONTENT_RANGE], "bytes 4500-4999/5000");
    assert_eq!(body, data[4_500..]);

    let (status, headers, _) = request(&app, &uri, Some("bytes=9000-9999")).await;
    assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(headers[header::CONTENT_RANGE], "bytes */5000");
}

#[tokio::test]
async fn test_cataloged_file_outside_allowed_root_is_forbidden() {
    let (dir, store) = open_temp_store().await;
    let volume = dir.path().join("volume");
    let public = write_file(&volume, "public/song.mp3", &patterned_bytes(64));
    let private = write_file(&volume, "private/tax.pdf", &patterned_bytes(64));
    scan(&store, &volume, "Volume").await;

    let public_id = id_of(&store, &public).await;
    let private_id = id_of(&store, &private).await;
    let guard = PathGuard::confined(&volume.join("public")).unwrap();
    let app = router(AppState::new(store, guard, 1_024));

    let (status, _, _) = request(&app, &format!("/media/{public_id}"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, body) = request(&app, &format!("/media/{private_id}"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body.is_empty());

    let (status, _, _) =
        request(&app, &format!("/media/{private_id}"), Some("bytes=0-9")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_deleted_file_yields_not_found_and_row_survives() {
    let (dir, store) = open_temp_store().await;
    let media = dir.path().join("media");
    let doomed = write_file(&media, "doomed.avi", &patterned_bytes(128));
    write_file(&media, "kept.avi", &patterned_bytes(128));
    scan(&store, &media, "Media").await;
    let doomed_id = id_of(&store, &doomed).await;

    std::fs::remove_file(&doomed).unwrap();
    scan(&store, &media, "Media").await;
    assert_eq!(store.count_files().await.unwrap(), 2);

    let app = router(AppState::new(
        store.clone(),
        PathGuard::confined(&media).unwrap(),
        1_024,
    ));
    for range in [None, Some("bytes=0-10")] {
        let (status, _, body) = request(&app, &format!("/media/{doomed_id}"), range).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.is_empty());
    }

    let latest = store.latest_runs(1).await.unwrap();
    let stale = store.file_by_id(doomed_id).await.unwrap().unwrap();
    assert_ne!(stale.last_seen_run_id, latest[0].id);
}
