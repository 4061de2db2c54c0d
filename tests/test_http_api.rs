//! End-to-end tests for the HTTP query API, driven through the router with
//! `tower::ServiceExt::oneshot` (no socket is bound).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;

use onequery::core::config::load_from;
use onequery::services::Services;
use onequery::subsystems::comms::CommsState;
use onequery::subsystems::comms::axum_channel::build_router;
use onequery::trackers::{ReportEntry, ReportTracker};
use onequery::vector::Document;

fn write_config(dir: &Path, replies: &[&str], delay_ms: u64) -> std::path::PathBuf {
    let replies = replies
        .iter()
        .map(|r| format!("{r:?}"))
        .collect::<Vec<_>>()
        .join(", ");
    let toml = format!(
        r#"
[app]
name = "onequery-test"
work_dir = "/unused"
log_level = "warn"

[llm]
default = "scripted"
scripted_replies = [{replies}]
scripted_delay_ms = {delay_ms}

[embeddings]
provider = "dummy"
dimensions = 32

[storage]
backend = "local"
root = "storage"

[[retrieval.stores]]
name = "drive"
kind = "memory"

[[retrieval.stores]]
name = "meetings"
kind = "memory"

[assistant]
reasoning = false
rewrite_query = false
"#
    );
    let path = dir.join("test.toml");
    std::fs::write(&path, toml).unwrap();
    path
}

fn services_with_delay(dir: &TempDir, replies: &[&str], delay_ms: u64) -> Arc<Services> {
    let path = write_config(dir.path(), replies, delay_ms);
    let work_dir = dir.path().to_str().unwrap();
    let config = load_from(&path, Some(work_dir), None).unwrap();
    Arc::new(Services::build(config).unwrap())
}

fn services(dir: &TempDir, replies: &[&str]) -> Arc<Services> {
    services_with_delay(dir, replies, 0)
}

fn router_with_timeout(services: Arc<Services>, query_timeout: Duration) -> Router {
    let (tx, _rx) = mpsc::channel(16);
    let comms = Arc::new(CommsState::new(services, tx));
    build_router("http-test", comms, query_timeout)
}

fn router(services: Arc<Services>) -> Router {
    router_with_timeout(services, Duration::from_secs(5))
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_query(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_reports_backends() {
    let dir = TempDir::new().unwrap();
    let app = router(services(&dir, &["unused"]));

    let response = app
        .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["llm"], "scripted");
    assert_eq!(body["retrievers"], serde_json::json!(["drive", "meetings"]));
    assert!(body["storage"].as_str().unwrap().starts_with("local"));
}

#[tokio::test]
async fn projects_lists_tracked_reports() {
    let dir = TempDir::new().unwrap();
    let services = services(&dir, &["unused"]);
    let app = router(services.clone());

    let response = app
        .clone()
        .oneshot(Request::get("/api/projects").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(json_body(response).await, serde_json::json!({ "projects": [] }));

    let mut tracker = ReportTracker::default();
    tracker.set(
        "apollo",
        ReportEntry {
            report_path: "slack_project_reports/apollo.txt".into(),
            last_ts: "0".into(),
        },
    );
    tracker.save(&services.storage).await.unwrap();

    let response = app
        .oneshot(Request::get("/api/projects").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(
        json_body(response).await,
        serde_json::json!({ "projects": ["apollo"] })
    );
}

#[tokio::test]
async fn query_answers_with_citations() {
    let dir = TempDir::new().unwrap();
    let services = services(&dir, &["apollo", "Launch is on March 3."]);

    let mut tracker = ReportTracker::default();
    tracker.set(
        "apollo",
        ReportEntry {
            report_path: "slack_project_reports/apollo.txt".into(),
            last_ts: "0".into(),
        },
    );
    tracker.save(&services.storage).await.unwrap();

    let doc = Document::new("[This is the meeting summary for apollo project.]\nLaunch moved to March 3.")
        .with_meta("source", "grain")
        .with_meta("project_name", "apollo")
        .with_meta("file_name", "standup.txt");
    let embeddings = services
        .embedder
        .embed_batch(&[doc.page_content.clone()])
        .await
        .unwrap();
    services
        .store("meetings")
        .unwrap()
        .upsert(&[doc], &embeddings)
        .await
        .unwrap();

    let response = router(services)
        .oneshot(post_query("/query", r#"{"query": "When does apollo launch?"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["project_key"], "apollo");
    assert_eq!(body["answer"], "Launch is on March 3.");
    assert_eq!(body["citations"], serde_json::json!(["- Grain: apollo"]));
}

#[tokio::test]
async fn api_query_alias_matches_query() {
    let dir = TempDir::new().unwrap();
    let app = router(services(&dir, &["Nothing on file."]));

    let response = app
        .oneshot(post_query("/api/query", r#"{"query": "anything new?"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["project_key"], "unknown");
    assert_eq!(body["answer"], "Nothing on file.");
    assert_eq!(body["citations"], serde_json::json!([]));
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let dir = TempDir::new().unwrap();
    let app = router(services(&dir, &["unused"]));

    let response = app
        .oneshot(post_query("/query", r#"{"query": "   "}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "bad_request");
}

#[tokio::test]
async fn unknown_route_is_404() {
    let dir = TempDir::new().unwrap();
    let app = router(services(&dir, &["unused"]));

    let response = app
        .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "not_found");
}

#[tokio::test]
async fn missing_query_field_is_bad_request() {
    let dir = TempDir::new().unwrap();
    let app = router(services(&dir, &["unused"]));

    let response = app
        .clone()
        .oneshot(post_query("/query", r#"{"question": "wrong field"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "bad_request");

    let response = app
        .oneshot(post_query("/query", "not json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn llm_failure_is_bad_gateway() {
    let dir = TempDir::new().unwrap();
    // An empty script makes every completion fail.
    let app = router(services(&dir, &[]));

    let response = app
        .oneshot(post_query("/query", r#"{"query": "status of apollo?"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert_eq!(body["error"], "internal");
    assert!(body["message"].as_str().unwrap().contains("no replies"));
}

#[tokio::test]
async fn slow_pipeline_times_out() {
    let dir = TempDir::new().unwrap();
    let app = router_with_timeout(
        services_with_delay(&dir, &["too late"], 2_000),
        Duration::from_millis(50),
    );

    let response = app
        .oneshot(post_query("/query", r#"{"query": "status of apollo?"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(json_body(response).await["error"], "timeout");
}
