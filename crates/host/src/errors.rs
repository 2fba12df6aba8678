use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use courier_core::ConfigError;
use courier_infra::jobs::ExecutionError;
use courier_infra::workers::WorkerError;
use courier_queue::{ClientError, QueueError};

pub fn config_error_to_response(err: ConfigError) -> axum::response::Response {
    match err {
        ConfigError::UnknownJob(_) => json_error(StatusCode::NOT_FOUND, "unknown_job", err.to_string()),
        ConfigError::UnknownQueue(_) | ConfigError::InvalidQueueAddress(_) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_queue", err.to_string())
        }
        ConfigError::MissingJobName => {
            json_error(StatusCode::BAD_REQUEST, "missing_job_name", err.to_string())
        }
        ConfigError::InvalidValue { .. } => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", err.to_string())
        }
        ConfigError::SchedulerNotConfigured { .. } | ConfigError::NoScheduler(_) => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "scheduler_not_configured",
            err.to_string(),
        ),
        _ => json_error(StatusCode::INTERNAL_SERVER_ERROR, "config_error", err.to_string()),
    }
}

pub fn queue_error_to_response(err: QueueError) -> axum::response::Response {
    match err {
        QueueError::Config(e) => config_error_to_response(e),
        QueueError::Disposed(_) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "disposed", err.to_string())
        }
        QueueError::Unsupported { .. } => {
            json_error(StatusCode::NOT_IMPLEMENTED, "unsupported", err.to_string())
        }
        QueueError::Serialization(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "serialization_error",
            e.to_string(),
        ),
        QueueError::Client(ClientError::NotFound(msg)) => {
            json_error(StatusCode::NOT_FOUND, "not_found", msg)
        }
        QueueError::Client(ClientError::Conflict(msg)) => {
            json_error(StatusCode::CONFLICT, "conflict", msg)
        }
        QueueError::Client(e) => json_error(StatusCode::BAD_GATEWAY, "client_error", e.to_string()),
    }
}

pub fn worker_error_to_response(err: WorkerError) -> axum::response::Response {
    match err {
        WorkerError::Config(e) => config_error_to_response(e),
        WorkerError::InvalidEvent(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_event", msg),
        WorkerError::Envelope(e) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_envelope", e.to_string())
        }
        WorkerError::Execution(ExecutionError::Config(e)) => config_error_to_response(e),
        // The caller owns redelivery of a direct invocation.
        WorkerError::Execution(e @ ExecutionError::Retry { .. }) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "retry", e.to_string())
        }
        WorkerError::Execution(e @ ExecutionError::DeadLetter(_)) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "dead_letter", e.to_string())
        }
        WorkerError::Execution(e @ ExecutionError::Scope(_)) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "scope_error", e.to_string())
        }
        WorkerError::Queue(e) => json_error(StatusCode::BAD_GATEWAY, "client_error", e.to_string()),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
