//! HTTP transport: webhook intake and demand queries
//!
//! Routes:
//! - `GET /` - service banner
//! - `POST /webhook` - workflow job events (signature checked when a secret is configured)
//! - `GET /running-count?period=<hour|day|week|month|all>` - current demand view

pub mod error;
pub mod handlers;
pub mod signature;

use crate::pipeline::{AggregationEngine, IngestionPipeline};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

pub use error::ApiError;

/// Shared handler state, built once at startup
pub struct AppState {
    pub ingestion: Arc<IngestionPipeline>,
    pub aggregation: Arc<AggregationEngine>,
    pub webhook_secret: Option<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/webhook", post(handlers::webhook))
        .route("/running-count", get(handlers::running_count))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::HistoryResolver;
    use crate::store::{DemandStore, InMemoryDemandStore, StoreOp};
    use crate::types::RunnerCategory;
    use axum::body::{self, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt; // for `oneshot`

    const SECRET: &str = "webhook-secret";

    fn event_body(action: &str) -> String {
        format!(
            r#"{{"action":"{}","workflow_job":{{"id":123,"labels":["self-hosted"],"created_at":"2025-01-01T00:00:00Z","started_at":"2025-01-01T00:05:00Z"}}}}"#,
            action
        )
    }

    fn app(store: Arc<InMemoryDemandStore>, secret: Option<&str>) -> Router {
        let history = Arc::new(HistoryResolver::new(store.clone()));
        router(Arc::new(AppState {
            ingestion: Arc::new(IngestionPipeline::new(store.clone())),
            aggregation: Arc::new(AggregationEngine::new(store, history)),
            webhook_secret: secret.map(str::to_string),
        }))
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn post_webhook(body: String, signature: Option<String>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json");
        if let Some(sig) = signature {
            builder = builder.header("X-Hub-Signature-256", sig);
        }
        builder.body(Body::from(body)).unwrap()
    }

    #[tokio::test]
    async fn test_signed_webhook_is_ingested() {
        let store = Arc::new(InMemoryDemandStore::new());
        let body = event_body("in_progress");
        let sig = signature::sign(SECRET.as_bytes(), body.as_bytes()).unwrap();

        let (status, value) = send(app(store.clone(), Some(SECRET)), post_webhook(body, Some(sig))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["status"], "success");
        assert_eq!(store.snapshots().len(), 1);
        assert_eq!(store.queue_samples().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_or_missing_signature_rejected() {
        let store = Arc::new(InMemoryDemandStore::new());

        let (status, _) = send(
            app(store.clone(), Some(SECRET)),
            post_webhook(event_body("queued"), None),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let wrong = signature::sign(b"not-the-secret", event_body("queued").as_bytes()).unwrap();
        let (status, value) = send(
            app(store.clone(), Some(SECRET)),
            post_webhook(event_body("queued"), Some(wrong)),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(value["error"], "Invalid signature");

        assert!(store.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_unsigned_webhook_accepted_without_secret() {
        let store = Arc::new(InMemoryDemandStore::new());

        let (status, _) = send(app(store.clone(), None), post_webhook(event_body("queued"), None)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(store.jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_bad_request() {
        let store = Arc::new(InMemoryDemandStore::new());

        let (status, _) = send(app(store.clone(), None), post_webhook("{not json".into(), None)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(store.calls(StoreOp::UpsertJob), 0);
    }

    #[tokio::test]
    async fn test_ingestion_failure_is_generic_500() {
        let store = Arc::new(InMemoryDemandStore::new());
        store.fail_operation(StoreOp::AppendSnapshot);

        let (status, value) = send(app(store, None), post_webhook(event_body("queued"), None)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(value, serde_json::json!({ "error": "Failed to process event" }));
    }

    #[tokio::test]
    async fn test_running_count_defaults_to_all() {
        let store = Arc::new(InMemoryDemandStore::new());
        let app = app(store.clone(), None);
        send(app.clone(), post_webhook(event_body("in_progress"), None)).await;

        let req = Request::builder()
            .uri("/running-count")
            .body(Body::empty())
            .unwrap();
        let (status, value) = send(app, req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["period"], "all");
        assert_eq!(value["current_count_self_hosted"], 1);
        assert_eq!(value["current_count_github_hosted"], 0);
        assert_eq!(value["current_queued_count"], 0);
        assert_eq!(value["avg_queue_time_ms"], 300_000);
        assert_eq!(value["peak_demand"], 1);
        assert_eq!(value["historical_data"].as_array().map(Vec::len), Some(1));
        assert!(value["peak_demand_timestamp"].as_str().is_some_and(|s| !s.is_empty()));
    }

    #[tokio::test]
    async fn test_running_count_failure_has_no_metrics() {
        let store = Arc::new(InMemoryDemandStore::new());
        store.fail_operation(StoreOp::ListRunning(RunnerCategory::SelfHosted));
        assert!(store.count_queued().await.is_ok());

        let req = Request::builder()
            .uri("/running-count?period=week")
            .body(Body::empty())
            .unwrap();
        let (status, value) = send(app(store, None), req).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(value, serde_json::json!({ "error": "Failed to retrieve data" }));
    }

    #[tokio::test]
    async fn test_running_count_invalid_period() {
        let store = Arc::new(InMemoryDemandStore::new());

        let req = Request::builder()
            .uri("/running-count?period=year")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(app(store, None), req).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_root_banner() {
        let store = Arc::new(InMemoryDemandStore::new());
        let resp = app(store, None)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
    }
}
