//! Public latency chart endpoint.

use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use shared::storage::SNAPSHOT_KEY;

/// Error response for snapshot reads.
#[derive(Debug, Serialize)]
pub struct SnapshotError {
    /// Error code.
    pub error: String,
    /// Human readable description.
    pub message: String,
}

/// Creates the snapshot routes.
pub fn snapshot_routes(state: AppState) -> Router {
    Router::new()
        .route(&format!("/{SNAPSHOT_KEY}"), get(latest_snapshot))
        .with_state(state)
}

async fn latest_snapshot(
    State(state): State<AppState>,
) -> Result<Response, (StatusCode, Json<SnapshotError>)> {
    let object = state.snapshots().latest().map_err(|e| {
        tracing::error!(error = %e, "Failed to read latency snapshot");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(SnapshotError {
                error: "storage_error".to_string(),
                message: e.to_string(),
            }),
        )
    })?;

    let Some(object) = object else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(SnapshotError {
                error: "not_found".to_string(),
                message: "No latency chart has been published yet".to_string(),
            }),
        ));
    };

    Ok((
        [
            (header::CONTENT_TYPE, object.content_type),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        object.body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn request() -> Request<Body> {
        Request::builder()
            .uri("/ttl-latency.png")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_not_found() {
        let app = snapshot_routes(AppState::with_in_memory_store());

        let response = app.oneshot(request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(error["error"], "not_found");
    }

    #[tokio::test]
    async fn test_published_snapshot_is_served_as_png() {
        let state = AppState::with_in_memory_store();
        state.snapshots().publish(b"\x89PNG-bytes").unwrap();
        let app = snapshot_routes(state);

        let response = app.oneshot(request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/png"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"\x89PNG-bytes");
    }
}
