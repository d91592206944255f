//! Axum router configuration with middleware.
//!
//! Job routes live under `/api/v1/`; `/health` is open.
//! Middleware: CORS, tracing.

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Run trigger (GET for cron services that can only issue GETs)
        .route(
            "/jobs/run",
            get(handlers::jobs::run_jobs).post(handlers::jobs::run_jobs),
        )
        .route(
            "/jobs",
            get(handlers::jobs::list_jobs).post(handlers::jobs::enqueue_job),
        )
        .route("/jobs/{id}", get(handlers::jobs::get_job));

    Router::new()
        .route("/health", get(handlers::health::health))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use taskloom_infra::sqlite::job::SqliteJobStore;
    use taskloom_infra::sqlite::pool::DatabasePool;
    use taskloom_types::config::TaskloomConfig;
    use tower::ServiceExt;

    use super::*;
    use crate::builtin;

    async fn test_router(secret: Option<&str>) -> Router {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("api.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        let data_dir = PathBuf::from(dir.path());
        // Keep the directory alive for the duration of the test
        std::mem::forget(dir);

        let mut config = TaskloomConfig::default();
        config.server.run_secret = secret.map(str::to_string);
        let state = AppState::from_parts(
            SqliteJobStore::new(pool),
            builtin::registry().unwrap(),
            config,
            data_dir,
        );
        build_router(state)
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = test_router(None).await;
        let (status, body) = send(&router, get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_enqueue_run_and_inspect() {
        let router = test_router(None).await;

        let (status, body) = send(
            &router,
            post_json(
                "/api/v1/jobs",
                json!({"kind": {"type": "workflow", "slug": "echo-chain"}, "input": {"n": 1}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = body["data"]["id"].as_str().unwrap().to_string();
        assert_eq!(body["data"]["status"], "queued");

        let (status, body) = send(&router, get_req("/api/v1/jobs/run?limit=5")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["jobs"][0]["outcome"], "completed");
        assert_eq!(body["data"]["stop_reason"], "queue_drained");

        let (status, body) = send(&router, get_req(&format!("/api/v1/jobs/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "completed");
        assert_eq!(
            body["data"]["task_status"]["echo"]["first"]["output"],
            json!({"n": 1})
        );

        let (status, body) = send(&router, get_req("/api/v1/jobs?status=completed")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_rejections() {
        let router = test_router(None).await;

        let (status, body) = send(
            &router,
            post_json(
                "/api/v1/jobs",
                json!({"kind": {"type": "task", "slug": "sleep"}, "input": {"ms": "soon"}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["errors"][0]["code"], "SCHEMA_VALIDATION_ERROR");

        let (status, body) = send(
            &router,
            post_json(
                "/api/v1/jobs",
                json!({"kind": {"type": "task", "slug": "ghost"}, "input": {}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["errors"][0]["code"], "UNKNOWN_DEFINITION");

        let (_, body) = send(&router, get_req("/api/v1/jobs")).await;
        assert!(body["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_job_is_404() {
        let router = test_router(None).await;
        let (status, body) =
            send(&router, get_req(&format!("/api/v1/jobs/{}", uuid::Uuid::now_v7()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_run_requires_secret_when_configured() {
        let router = test_router(Some("s3cret")).await;

        let (status, body) = send(&router, post_json("/api/v1/jobs/run", json!({}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["errors"][0]["code"], "UNAUTHORIZED");

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/jobs/run")
            .header("x-taskloom-secret", "s3cret")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["jobs"], json!([]));

        let request = Request::builder()
            .uri("/api/v1/jobs/run")
            .header("authorization", "Bearer wrong")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
