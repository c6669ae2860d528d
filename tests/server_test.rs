mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{definition_toml, wait, ScriptedEvaluator, TestEnv};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;
use travel_quality_eval::server::{router, AppState};
use travel_quality_eval::RunState;

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("POST")
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_start_conflict_stop_over_http() {
    let env = TestEnv::new();
    let evaluator = Arc::new(ScriptedEvaluator::new().delay("tokyo", Duration::from_millis(300)));
    let controller = env.controller(evaluator);
    let config = env.path().join("matrix.toml");
    std::fs::write(&config, definition_toml(&["booking_com", "google_travel"], &["tokyo"], 1)).unwrap();
    let app = router(AppState::new(controller.clone(), Some(config.clone())));

    let (status, body) = send(&app, post("/api/start", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let run_id = body["run_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, post("/api/start", json!({ "config": config }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["exit_code"], 3);
    assert!(body["error"].as_str().unwrap().contains(&run_id));

    let (status, body) = send(&app, get("/api/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "running");
    assert_eq!(body["run_id"], run_id.as_str());
    assert_eq!(body["total_cells"], 2);

    let (status, body) = send(&app, post("/api/stop", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stop_requested"], true);

    // 第一个单元在途，第二个还没开始
    let finished = wait(&controller).await;
    assert_eq!(finished.state, RunState::Stopped);
    assert_eq!(finished.counts.pending, 1);

    let (status, body) = send(&app, post("/api/stop", json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["exit_code"], 4);

    let (_, body) = send(&app, get("/api/status")).await;
    assert_eq!(body["state"], "stopped");

    let log_file = format!("evaluation_{}.log", run_id);
    let (status, body) = send(&app, get("/api/log-files")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["files"], json!([log_file.clone()]));
    assert_eq!(body["current"], log_file.as_str());

    let (status, body) = send(&app, get("/api/logs")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["file"], log_file.as_str());
    assert!(body["content"].as_str().unwrap().contains("收到停止请求"));
}

#[tokio::test]
async fn test_start_rejects_bad_config_over_http() {
    let env = TestEnv::new();
    let evaluator = Arc::new(ScriptedEvaluator::new());
    let app = router(AppState::new(env.controller(evaluator.clone()), None));

    let (status, _) = send(&app, post("/api/start", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let missing = env.path().join("missing.toml");
    let (status, body) = send(&app, post("/api/start", json!({ "config": missing }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["exit_code"], 2);
    assert!(evaluator.calls().is_empty());

    let (_, body) = send(&app, get("/api/status")).await;
    assert_eq!(body["state"], "idle");
}

#[tokio::test]
async fn test_unknown_log_file_is_not_found() {
    let env = TestEnv::new();
    let app = router(AppState::new(env.controller(Arc::new(ScriptedEvaluator::new())), None));

    let (status, body) = send(&app, get("/api/logs?file=evaluation_19700101_000000_000.log")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, body) = send(&app, get("/api/logs")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], "");
    assert_eq!(body["file"], Value::Null);

    let (_, body) = send(&app, get("/api/log-files")).await;
    assert_eq!(body["files"], json!([]));
}
