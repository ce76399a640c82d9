//! HTTP API tests
//!
//! The router is driven in-process with `tower::ServiceExt::oneshot`, and the
//! OpenAI backend is replaced by a wiremock server.

use std::path::PathBuf;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

use narrator_gateway::{AppState, ServerConfig, routes};

const SPEECH_PATH: &str = "/v1/audio/speech";
const CHUNK_BYTES: usize = 4800;
/// Splits into three chunks at a limit of 20 characters
const THREE_SENTENCES: &str = "The first sentence. The second sentence. The third one.";

struct TestApp {
    router: Router,
    _dir: TempDir,
}

async fn test_app(server: &MockServer, deduplicate: bool) -> TestApp {
    let dir = TempDir::new().unwrap();
    let config_path: PathBuf = dir.path().join("config.yaml");
    let yaml = format!(
        r#"
providers:
  openai_api_key: "sk-test"
  openai_tts_url: "{uri}{SPEECH_PATH}"
conversion:
  chunk_size: 20
  default_provider: openai
  default_format: pcm
  worker_pool_size: 2
retry:
  max_attempts: 2
  base_delay_ms: 10
  max_delay_ms: 20
  attempt_timeout_secs: 10
jobs:
  retention_secs: 60
  deduplicate: {deduplicate}
"#,
        uri = server.uri()
    );
    std::fs::write(&config_path, yaml).unwrap();

    let config = ServerConfig::from_file(&config_path).unwrap();
    let state = AppState::new(config).unwrap();
    TestApp {
        router: routes::api::create_api_router().with_state(state),
        _dir: dir,
    }
}

async fn mount_speech(server: &MockServer, delay: Duration) {
    Mock::given(method("POST"))
        .and(path(SPEECH_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0u8; CHUNK_BYTES])
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn submit(router: &Router, body: Value) -> String {
    let (status, body) = send(router, json_request("POST", "/tts/convert", body)).await;
    assert_eq!(status, StatusCode::ACCEPTED, "unexpected body: {body}");
    body["job_id"].as_str().unwrap().to_string()
}

async fn wait_for_status(router: &Router, job_id: &str, wanted: &str) -> Value {
    for _ in 0..200 {
        let (status, body) = send(router, empty_request("GET", &format!("/tts/jobs/{job_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] == wanted {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {job_id} never reached {wanted}");
}

#[tokio::test]
async fn test_health_check() {
    let server = MockServer::start().await;
    let app = test_app(&server, false).await;

    let (status, body) = send(&app.router, empty_request("GET", "/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
    assert_eq!(body["service"], "narrator-gateway");
}

#[tokio::test]
async fn test_blank_text_rejected() {
    let server = MockServer::start().await;
    let app = test_app(&server, false).await;

    let (status, body) = send(
        &app.router,
        json_request("POST", "/tts/convert", json!({ "text": "   " })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);
    assert!(body["error"].as_str().unwrap().contains("Text cannot be empty"));
}

#[tokio::test]
async fn test_unknown_voice_rejected_before_dispatch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let app = test_app(&server, false).await;

    let (status, body) = send(
        &app.router,
        json_request(
            "POST",
            "/tts/convert",
            json!({ "text": "Hello.", "provider": { "kind": "openai", "voice": "robot" } }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("robot"));
}

#[tokio::test]
async fn test_silence_gap_with_compressed_format_rejected() {
    let server = MockServer::start().await;
    let app = test_app(&server, false).await;

    let (status, _) = send(
        &app.router,
        json_request(
            "POST",
            "/tts/convert",
            json!({
                "text": "Hello.",
                "provider": { "kind": "openai", "output_format": "mp3" },
                "gap_policy": { "type": "silence", "duration_ms": 250 },
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let server = MockServer::start().await;
    let app = test_app(&server, false).await;
    let id = uuid::Uuid::new_v4();

    let (status, body) = send(&app.router, empty_request("GET", &format!("/tts/jobs/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 404);

    let (status, _) = send(
        &app.router,
        empty_request("GET", &format!("/tts/jobs/{id}/audio")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app.router, empty_request("DELETE", &format!("/tts/jobs/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_job_id_is_bad_request() {
    let server = MockServer::start().await;
    let app = test_app(&server, false).await;

    let (status, _) = send(&app.router, empty_request("GET", "/tts/jobs/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_provider_listing() {
    let server = MockServer::start().await;
    let app = test_app(&server, false).await;

    let (status, body) = send(&app.router, empty_request("GET", "/tts/providers")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["default_provider"], "openai");

    let providers = body["providers"].as_array().unwrap();
    assert_eq!(providers.len(), 2);
    assert_eq!(providers[0]["provider"], "openai");
    assert_eq!(providers[0]["configured"], true);
    assert!(
        providers[0]["voices"]
            .as_array()
            .unwrap()
            .contains(&json!("nova"))
    );
    assert_eq!(providers[1]["provider"], "local");
}

#[tokio::test]
async fn test_full_conversion_flow() {
    let server = MockServer::start().await;
    mount_speech(&server, Duration::ZERO).await;
    let app = test_app(&server, false).await;

    let job_id = submit(&app.router, json!({ "text": THREE_SENTENCES })).await;

    let job = wait_for_status(&app.router, &job_id, "completed").await;
    assert_eq!(job["chunks_total"], 3);
    assert_eq!(job["chunks_completed"], 3);
    assert_eq!(job["progress_percentage"], 100.0);
    assert!(job["failed_chunk_indices"].as_array().unwrap().is_empty());

    let response = app
        .router
        .clone()
        .oneshot(empty_request("GET", &format!("/tts/jobs/{job_id}/audio")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "audio/pcm");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        format!("attachment; filename=\"{job_id}.pcm\"").as_str()
    );
    assert_eq!(headers["x-chunk-count"], "3");
    assert_eq!(headers["x-failed-chunks"], "");
    // 7200 samples at 24kHz
    assert_eq!(headers["x-duration-ms"], "300");

    let audio = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(audio.len(), CHUNK_BYTES * 3);

    // Collected artifacts are gone
    let (status, _) = send(
        &app.router,
        empty_request("GET", &format!("/tts/jobs/{job_id}/audio")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_audio_before_completion_is_conflict() {
    let server = MockServer::start().await;
    mount_speech(&server, Duration::from_secs(2)).await;
    let app = test_app(&server, false).await;

    let job_id = submit(&app.router, json!({ "text": THREE_SENTENCES })).await;

    let (status, body) = send(
        &app.router,
        empty_request("GET", &format!("/tts/jobs/{job_id}/audio")),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], 409);
}

#[tokio::test]
async fn test_cancel_running_job() {
    let server = MockServer::start().await;
    mount_speech(&server, Duration::from_secs(2)).await;
    let app = test_app(&server, false).await;

    let job_id = submit(&app.router, json!({ "text": THREE_SENTENCES })).await;

    let (status, body) = send(
        &app.router,
        empty_request("DELETE", &format!("/tts/jobs/{job_id}")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], true);
    assert_eq!(body["action"], "cancelled");
    assert_eq!(body["discarded"], false);

    let job = wait_for_status(&app.router, &job_id, "failed").await;
    assert!(job["error"].as_str().unwrap().contains("cancelled"));

    // A failed job has no audio to hand out
    let (status, _) = send(
        &app.router,
        empty_request("GET", &format!("/tts/jobs/{job_id}/audio")),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_best_effort_reports_failed_chunks() {
    let server = MockServer::start().await;
    // Second request fails for good, the rest succeed
    Mock::given(method("POST"))
        .and(path(SPEECH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; CHUNK_BYTES]))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SPEECH_PATH))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .with_priority(2)
        .mount(&server)
        .await;
    mount_speech(&server, Duration::ZERO).await;
    let app = test_app(&server, false).await;

    let job_id = submit(
        &app.router,
        json!({
            "text": THREE_SENTENCES,
            "failure_policy": "best_effort",
            "worker_pool_size": 1,
        }),
    )
    .await;

    let job = wait_for_status(&app.router, &job_id, "partially_failed").await;
    assert_eq!(job["failed_chunk_indices"], json!([1]));
    assert_eq!(job["failures"][0]["kind"], "permanent");

    let response = app
        .router
        .clone()
        .oneshot(empty_request("GET", &format!("/tts/jobs/{job_id}/audio")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-failed-chunks"], "1");
    let audio = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(audio.len(), CHUNK_BYTES * 2);
}

#[tokio::test]
async fn test_identical_requests_share_a_job() {
    let server = MockServer::start().await;
    mount_speech(&server, Duration::from_millis(500)).await;
    let app = test_app(&server, true).await;

    let first = submit(&app.router, json!({ "text": THREE_SENTENCES })).await;
    let second = submit(&app.router, json!({ "text": THREE_SENTENCES })).await;
    assert_eq!(first, second);

    let other = submit(&app.router, json!({ "text": "Something else entirely." })).await;
    assert_ne!(first, other);
}

#[tokio::test]
async fn test_requests_differing_in_policy_get_separate_jobs() {
    let server = MockServer::start().await;
    mount_speech(&server, Duration::from_millis(500)).await;
    let app = test_app(&server, true).await;

    let fail_fast = submit(&app.router, json!({ "text": THREE_SENTENCES })).await;
    let best_effort = submit(
        &app.router,
        json!({
            "text": THREE_SENTENCES,
            "failure_policy": "best_effort",
            "gap_policy": { "type": "silence", "duration_ms": 500 },
        }),
    )
    .await;
    assert_ne!(fail_fast, best_effort);

    let best_effort_again = submit(
        &app.router,
        json!({
            "text": THREE_SENTENCES,
            "failure_policy": "best_effort",
            "gap_policy": { "type": "silence", "duration_ms": 500 },
        }),
    )
    .await;
    assert_eq!(best_effort, best_effort_again);
}

#[tokio::test]
async fn test_shared_job_stays_available_until_every_requester_collects() {
    let server = MockServer::start().await;
    mount_speech(&server, Duration::from_millis(50)).await;
    let app = test_app(&server, true).await;

    let first = submit(&app.router, json!({ "text": THREE_SENTENCES })).await;
    let second = submit(&app.router, json!({ "text": THREE_SENTENCES })).await;
    assert_eq!(first, second);
    wait_for_status(&app.router, &first, "completed").await;

    let audio_uri = format!("/tts/jobs/{first}/audio");
    let response = app
        .router
        .clone()
        .oneshot(empty_request("GET", &audio_uri))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first_audio = to_bytes(response.into_body(), usize::MAX).await.unwrap();

    // The other requester can still poll and download
    let (status, body) = send(&app.router, empty_request("GET", &format!("/tts/jobs/{first}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");

    let response = app
        .router
        .clone()
        .oneshot(empty_request("GET", &audio_uri))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let second_audio = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(first_audio, second_audio);
    assert_eq!(second_audio.len(), CHUNK_BYTES * 3);

    let (status, _) = send(&app.router, empty_request("GET", &audio_uri)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_shared_job_is_not_cancelled_by_one_requester() {
    let server = MockServer::start().await;
    mount_speech(&server, Duration::from_millis(200)).await;
    let app = test_app(&server, true).await;

    let first = submit(&app.router, json!({ "text": THREE_SENTENCES })).await;
    let second = submit(&app.router, json!({ "text": THREE_SENTENCES })).await;
    assert_eq!(first, second);

    let (status, body) = send(&app.router, empty_request("DELETE", &format!("/tts/jobs/{first}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action"], "released");
    assert_eq!(body["cancelled"], false);

    wait_for_status(&app.router, &first, "completed").await;
    let (status, _) = send(&app.router, empty_request("GET", &format!("/tts/jobs/{first}/audio"))).await;
    assert_eq!(status, StatusCode::OK);
}
