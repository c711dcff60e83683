//! Range-aware media delivery handler.
//!
//! Status mapping: unknown id or file gone from disk is 404, a path outside
//! the allowed root is 403, no `Range` header is 200 with the whole file, a
//! valid single range is 206 and any rejected range is 416.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use nascat_core::delivery::{BodyPlan, ByteRange, DeliveryError, DeliveryPlan};
use tracing::{debug, error, warn};

use crate::server::AppState;

const OCTET_STREAM: &str = "application/octet-stream";

/// Serves `GET` and `HEAD /media/{id}`.
pub async fn serve_media(
    State(state): State<AppState>,
    Path(id): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let Ok(id) = id.parse::<i64>() else {
        debug!(id = %id, "Non-numeric media id");
        return status_only(StatusCode::NOT_FOUND);
    };

    // A header that is not visible ASCII can never be a valid range
    let range_header = headers
        .get(header::RANGE)
        .map(|value| value.to_str().unwrap_or_default());

    let plan = match state.resolver.resolve(id, range_header).await {
        Ok(plan) => plan,
        Err(e) => return delivery_error_response(id, &e),
    };

    let status = match plan.body {
        BodyPlan::Full => StatusCode::OK,
        BodyPlan::Partial(_) => StatusCode::PARTIAL_CONTENT,
        BodyPlan::Unsatisfiable => {
            return unsatisfiable_response(plan.total_size);
        }
    };

    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        match plan.open_stream(state.chunk_size).await {
            Ok(stream) => Body::from_stream(stream),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(id, path = %plan.path.display(), "File vanished before streaming");
                return status_only(StatusCode::NOT_FOUND);
            }
            Err(e) => {
                error!(id, path = %plan.path.display(), error = %e, "Failed to open media file");
                return status_only(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
    };

    debug!(id, status = status.as_u16(), length = plan.content_length(), "Serving media");
    (status, media_headers(&plan), body).into_response()
}

fn media_headers(plan: &DeliveryPlan) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(plan.content_length()));

    let mime = mime_guess::from_path(&plan.path).first_raw().unwrap_or(OCTET_STREAM);
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(mime));

    if let BodyPlan::Partial(range) = plan.body
        && let Ok(value) = HeaderValue::from_str(&range.content_range(plan.total_size))
    {
        headers.insert(header::CONTENT_RANGE, value);
    }

    headers
}

fn unsatisfiable_response(total_size: u64) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Ok(value) = HeaderValue::from_str(&ByteRange::unsatisfied_content_range(total_size)) {
        headers.insert(header::CONTENT_RANGE, value);
    }
    (StatusCode::RANGE_NOT_SATISFIABLE, headers).into_response()
}

fn delivery_error_response(id: i64, error: &DeliveryError) -> Response {
    let status = match error {
        DeliveryError::UnknownId { .. } | DeliveryError::MissingOnDisk { .. } => {
            StatusCode::NOT_FOUND
        }
        DeliveryError::Forbidden { .. } => StatusCode::FORBIDDEN,
        DeliveryError::Catalog(_) | DeliveryError::Io(_) => {
            error!(id, error = %error, "Media lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    status_only(status)
}

fn status_only(status: StatusCode) -> Response {
    (status, [(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"))]).into_response()
}
