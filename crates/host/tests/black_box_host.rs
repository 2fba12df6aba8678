use std::time::Duration;

use courier_host::{build_app, demo, DevStack};
use courier_infra::jobs::JobHooks;
use courier_infra::{LocalHostConfig, ManagedQueueConfig, SchedulerConfig};
use reqwest::StatusCode;
use serde_json::{json, Value};

struct TestServer {
    base_url: String,
    stack: DevStack,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as the binary, bound to an ephemeral port.
        let stack = DevStack::new(
            ManagedQueueConfig::default(),
            SchedulerConfig::default(),
            LocalHostConfig::default().with_poll_interval(Duration::from_millis(5)),
            demo::module_graph,
            JobHooks::new(),
        );
        let app = build_app(stack.app_state());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            stack,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let res = reqwest::Client::new()
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        let body = res.json().await.unwrap_or(Value::Null);
        (status, body)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::test]
async fn health_reports_driver_and_default_queue() {
    let server = TestServer::spawn().await;

    let res = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["driver"], "sqs");
    assert_eq!(body["defaultQueue"], "jobs");
    assert_eq!(body["ready"], false);
}

#[tokio::test]
async fn lists_registered_jobs() {
    let server = TestServer::spawn().await;

    let body: Value = reqwest::get(server.url("/jobs"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["jobs"], json!(["echo", "flaky", "notify", "reject"]));
}

#[tokio::test]
async fn submitted_job_lands_on_default_queue() {
    let server = TestServer::spawn().await;

    let (status, body) = server
        .post(
            "/jobs",
            json!({"jobName": "echo", "payload": {"n": 1}, "metadata": {"traceId": "t-1"}}),
        )
        .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body["messageId"].is_string());
    assert!(body.get("trigger").is_none());
    assert_eq!(server.stack.queue.depth(&server.stack.queue_url), 1);

    let sent = server.stack.queue.sent_requests();
    let envelope: Value = serde_json::from_str(&sent[0].body).unwrap();
    assert_eq!(envelope["jobName"], "echo");
    assert_eq!(envelope["jobId"], body["jobId"]);
    assert_eq!(envelope["metadata"]["traceId"], "t-1");
}

#[tokio::test]
async fn uniqueness_key_becomes_job_id() {
    let server = TestServer::spawn().await;
    let payload = json!({"jobName": "notify", "payload": {"to": "ops@example.com", "subject": "hi"}});

    let (_, first) = server.post("/jobs", payload.clone()).await;
    let (_, second) = server.post("/jobs", payload).await;

    assert_eq!(first["jobId"], "notify-ops@example.com");
    assert_eq!(first["jobId"], second["jobId"]);
}

#[tokio::test]
async fn unknown_job_is_rejected() {
    let server = TestServer::spawn().await;

    let (status, body) = server.post("/jobs", json!({"jobName": "nope"})).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "unknown_job");
    assert!(server.stack.queue.sent_requests().is_empty());
}

#[tokio::test]
async fn payload_failing_schema_is_rejected_with_issues() {
    let server = TestServer::spawn().await;

    let (status, body) = server
        .post("/jobs", json!({"jobName": "notify", "payload": {"to": "a@b.c"}}))
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "invalid_payload");
    assert!(!body["issues"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn run_at_and_delay_are_mutually_exclusive() {
    let server = TestServer::spawn().await;

    let (status, body) = server
        .post(
            "/jobs",
            json!({"jobName": "echo", "runAt": "2030-01-01T00:00:00Z", "delaySeconds": 5}),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "conflicting_schedule");
}

#[tokio::test]
async fn short_delay_uses_native_queue_delay() {
    let server = TestServer::spawn().await;

    let (status, body) = server
        .post("/jobs", json!({"jobName": "echo", "delaySeconds": 30}))
        .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body.get("trigger").is_none());
    assert_eq!(server.stack.queue.sent_requests()[0].delay_seconds, 30);
    assert!(server.stack.scheduler.schedules().is_empty());
}

#[tokio::test]
async fn long_delay_creates_cancellable_schedule() {
    let server = TestServer::spawn().await;

    let (status, body) = server
        .post("/jobs", json!({"jobName": "echo", "delaySeconds": 3600}))
        .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let name = body["trigger"]["scheduleName"].as_str().unwrap().to_string();
    assert_eq!(body["messageId"], body["trigger"]["scheduleArn"]);
    assert!(server.stack.queue.sent_requests().is_empty());
    assert_eq!(server.stack.scheduler.schedules().len(), 1);

    let client = reqwest::Client::new();
    let res = client
        .delete(server.url(&format!("/schedules/{name}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert!(server.stack.scheduler.schedules().is_empty());

    let res = client
        .delete(server.url(&format!("/schedules/{name}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn direct_invocation_reports_completion() {
    let server = TestServer::spawn().await;

    let (status, body) = server
        .post("/invoke", json!({"jobName": "echo", "jobId": "j-1", "payload": {}}))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"jobId": "j-1", "jobName": "echo", "status": "completed"})
    );
}

#[tokio::test]
async fn direct_invocation_of_permanent_failure_maps_to_dead_letter() {
    let server = TestServer::spawn().await;

    let (status, body) = server.post("/invoke", json!({"jobName": "reject"})).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "dead_letter");
}

#[tokio::test]
async fn direct_invocation_with_attempts_left_asks_for_retry() {
    let server = TestServer::spawn().await;

    let (status, body) = server
        .post("/invoke", json!({"jobName": "flaky", "payload": {"succeedOnAttempt": 3}}))
        .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "retry");
}

#[tokio::test]
async fn batch_invocation_returns_item_failures() {
    let server = TestServer::spawn().await;

    let (status, body) = server
        .post(
            "/invoke",
            json!({"Records": [
                {"messageId": "m-1", "body": "{\"jobName\":\"echo\"}", "attributes": {}},
                {"messageId": "m-2", "body": "not json", "attributes": {}},
            ]}),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"batchItemFailures": [{"itemIdentifier": "m-2"}]}));
}

#[tokio::test]
async fn non_object_event_is_a_bad_request() {
    let server = TestServer::spawn().await;

    let (status, body) = server.post("/invoke", json!([1, 2, 3])).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_event");
}

#[tokio::test]
async fn local_host_drains_submitted_jobs() {
    let server = TestServer::spawn().await;
    let host = server.stack.spawn_local_host();

    for n in 0..3 {
        let (status, _) = server
            .post("/jobs", json!({"jobName": "echo", "payload": {"n": n}}))
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    // The local host polls in the background; wait for it to catch up.
    let url = server.stack.queue_url.clone();
    for _ in 0..200 {
        if server.stack.queue.depth(&url) == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    host.shutdown().await;

    assert_eq!(server.stack.queue.depth(&url), 0);
    assert!(server.stack.queue.dead_letters(&url).is_empty());
}
