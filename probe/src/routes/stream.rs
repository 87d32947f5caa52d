//! Change-stream ingest endpoint.
//!
//! Accepts one change batch per request from an external store's stream, in
//! the same wire format `ttl-latency detect` reads from disk, and hands it to
//! the expiration detector.
//!
//! Rejected events answer `400` so the sender does not retry them. Collaborator
//! failures answer `500`, which leaves retrying to the sender's own bound.

use crate::detector::DetectorError;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

/// Response for an accepted batch.
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    /// Key of the expired record.
    pub creation_key: String,
    /// Observed expiration latency in milliseconds.
    pub latency_ms: i64,
    /// True when the creation key lay in the future.
    pub anomalous: bool,
    /// Key the refreshed chart was published under.
    pub snapshot: String,
}

/// Error response for the ingest endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestError {
    /// Error code.
    pub error: String,
    /// Human readable description.
    pub message: String,
}

/// Creates the ingest routes.
pub fn stream_routes(state: AppState) -> Router {
    Router::new()
        .route("/stream", post(ingest_batch))
        .with_state(state)
}

async fn ingest_batch(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<IngestResponse>, (StatusCode, Json<IngestError>)> {
    let detection = state.detector().handle_batch(&body).map_err(|e| {
        let (status, code) = match e {
            DetectorError::Validation(_) => {
                tracing::warn!(error = %e, "Rejected change batch");
                (StatusCode::BAD_REQUEST, "invalid_event")
            }
            _ => {
                tracing::error!(error = %e, "Failed to handle change batch");
                (StatusCode::INTERNAL_SERVER_ERROR, "detector_error")
            }
        };
        (
            status,
            Json(IngestError {
                error: code.to_string(),
                message: e.to_string(),
            }),
        )
    })?;

    Ok(Json(IngestResponse {
        creation_key: detection.sample.creation_key,
        latency_ms: detection.sample.latency_ms,
        anomalous: detection.sample.anomalous,
        snapshot: detection.snapshot.key,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::ExpirationDetector;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{TimeZone, Utc};
    use http_body_util::BodyExt;
    use shared::chart::{ChartRenderer, ChartSpec, MetricStoreRenderer, RenderError, RenderedChart};
    use shared::clock::FixedClock;
    use shared::config::ExecutionIdentity;
    use shared::models::{ChangeEvent, StreamBatch};
    use shared::storage::{InMemoryMetricStore, InMemoryObjectStore, SnapshotPublisher};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct OfflineRenderer;

    impl ChartRenderer for OfflineRenderer {
        fn render(&self, _spec: &ChartSpec) -> Result<RenderedChart, RenderError> {
            Err(RenderError::InvalidSpec("renderer offline".to_string()))
        }
    }

    fn state_with(renderer: Option<Arc<dyn ChartRenderer>>) -> AppState {
        let metrics = InMemoryMetricStore::new_shared();
        let snapshots = SnapshotPublisher::new(InMemoryObjectStore::new_shared());
        let renderer: Arc<dyn ChartRenderer> = match renderer {
            Some(renderer) => renderer,
            None => Arc::new(MetricStoreRenderer::new(metrics.clone())),
        };
        let detector = ExpirationDetector::new(
            metrics,
            renderer,
            snapshots.clone(),
            ExecutionIdentity::default(),
            Arc::new(FixedClock::new(
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap(),
            )),
        );
        AppState::new(snapshots, Arc::new(detector))
    }

    fn post(body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/stream")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    fn expired_batch() -> String {
        serde_json::to_string(&StreamBatch::single(&ChangeEvent::expired(
            "2024-01-01T00:00:00.000000Z",
        )))
        .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_expired_batch_is_measured_and_published() {
        let state = state_with(None);
        let app = stream_routes(state.clone());

        let response = app.oneshot(post(expired_batch())).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["latency_ms"], 5_000);
        assert_eq!(body["snapshot"], "ttl-latency.png");
        assert!(state.snapshots().latest().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_explicit_delete_is_bad_request() {
        let state = state_with(None);
        let app = stream_routes(state.clone());
        let batch = serde_json::to_string(&StreamBatch::single(&ChangeEvent::removed(
            "2024-01-01T00:00:00.000000Z",
        )))
        .unwrap();

        let response = app.oneshot(post(batch)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "invalid_event");
        assert!(state.snapshots().latest().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_bad_request() {
        let app = stream_routes(state_with(None));

        let response = app.oneshot(post("{".to_string())).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_render_failure_is_server_error() {
        let app = stream_routes(state_with(Some(Arc::new(OfflineRenderer))));

        let response = app.oneshot(post(expired_batch())).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await["error"], "detector_error");
    }
}
