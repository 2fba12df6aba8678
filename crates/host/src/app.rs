use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tower::ServiceBuilder;
use tracing::{info, warn};

use courier_core::{JobId, ValidationIssue};
use courier_infra::workers::WorkerEntryPoint;
use courier_queue::{JobMessage, QueueDriver, ScheduleResult};

use crate::errors::{json_error, queue_error_to_response, worker_error_to_response};

/// Shared handles behind every route.
#[derive(Clone)]
pub struct AppState {
    entry: Arc<WorkerEntryPoint>,
    driver: Arc<dyn QueueDriver>,
}

impl core::fmt::Debug for AppState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppState")
            .field("driver", &self.driver.name())
            .field("ready", &self.entry.is_built())
            .finish()
    }
}

impl AppState {
    pub fn new(entry: Arc<WorkerEntryPoint>, driver: Arc<dyn QueueDriver>) -> Self {
        Self { entry, driver }
    }

    pub fn entry(&self) -> &Arc<WorkerEntryPoint> {
        &self.entry
    }

    pub fn driver(&self) -> &Arc<dyn QueueDriver> {
        &self.driver
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/invoke", post(invoke))
        .route("/jobs", get(list_jobs).post(submit_job))
        .route("/schedules/:name", delete(cancel_schedule))
        .layer(Extension(Arc::new(state)))
        .layer(ServiceBuilder::new())
}

async fn health(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "driver": state.driver.name(),
        "defaultQueue": state.driver.default_queue(),
        "ready": state.entry.is_built(),
    }))
}

/// Hands a raw invocation event to the entry point, as the platform would.
async fn invoke(
    Extension(state): Extension<Arc<AppState>>,
    Json(event): Json<JsonValue>,
) -> axum::response::Response {
    match state.entry.handle(event).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => {
            warn!(error = %err, "invocation failed");
            worker_error_to_response(err)
        }
    }
}

async fn list_jobs(Extension(state): Extension<Arc<AppState>>) -> axum::response::Response {
    match state.entry.executor().await {
        Ok(executor) => Json(json!({ "jobs": executor.registry().names() })).into_response(),
        Err(err) => worker_error_to_response(err),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitJobRequest {
    job_name: String,
    #[serde(default)]
    payload: JsonValue,
    #[serde(default)]
    queue: Option<String>,
    #[serde(default)]
    job_id: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    #[serde(default)]
    run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    delay_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InvalidPayloadBody<'a> {
    error: &'static str,
    message: String,
    issues: &'a [ValidationIssue],
}

async fn submit_job(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<SubmitJobRequest>,
) -> axum::response::Response {
    if body.run_at.is_some() && body.delay_seconds.is_some() {
        return json_error(
            StatusCode::BAD_REQUEST,
            "conflicting_schedule",
            "give either runAt or delaySeconds, not both",
        );
    }

    let executor = match state.entry.executor().await {
        Ok(executor) => executor,
        Err(err) => return worker_error_to_response(err),
    };
    let definition = match executor.registry().resolve(&body.job_name) {
        Ok(definition) => definition,
        Err(err) => return crate::errors::config_error_to_response(err),
    };

    if let Some(schema) = definition.schema() {
        if let Err(issues) = schema.validate(&body.payload) {
            let payload = InvalidPayloadBody {
                error: "invalid_payload",
                message: format!("payload rejected for job `{}`", body.job_name),
                issues: &issues,
            };
            return (StatusCode::UNPROCESSABLE_ENTITY, Json(payload)).into_response();
        }
    }

    let mut message = definition.to_message(body.payload);
    if let Some(queue) = body.queue {
        message = message.with_queue(queue);
    }
    if let Some(job_id) = body.job_id {
        message = message.with_job_id(JobId::from(job_id));
    }
    for (key, value) in body.metadata {
        message = message.with_metadata(key, value);
    }

    let result = dispatch(state.driver.as_ref(), message, body.run_at, body.delay_seconds).await;
    match result {
        Ok(result) => {
            info!(
                job_name = %body.job_name,
                job_id = %result.job_id(),
                scheduled = result.is_scheduled(),
                "job submitted"
            );
            (StatusCode::ACCEPTED, Json(result)).into_response()
        }
        Err(err) => queue_error_to_response(err),
    }
}

async fn dispatch(
    driver: &dyn QueueDriver,
    message: JobMessage,
    run_at: Option<DateTime<Utc>>,
    delay_seconds: Option<u64>,
) -> Result<ScheduleResult, courier_queue::QueueError> {
    match (run_at, delay_seconds) {
        (Some(at), _) => driver.enqueue_at(message, at).await,
        (None, Some(secs)) => driver.enqueue_in(message, Duration::from_secs(secs)).await,
        (None, None) => driver.enqueue(message).await.map(ScheduleResult::immediate),
    }
}

async fn cancel_schedule(
    Extension(state): Extension<Arc<AppState>>,
    Path(name): Path<String>,
) -> axum::response::Response {
    match state.driver.cancel_schedule(&name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => queue_error_to_response(err),
    }
}
