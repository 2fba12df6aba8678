//! Worker entry point: host invocations -> executor calls.
//!
//! - **Batch mode** (`{"Records": [...]}`): records run sequentially, in
//!   order, each independently. A record that fails for any reason is listed
//!   in `batchItemFailures`; batch processing itself only fails if the
//!   application cannot be built.
//! - **Direct mode** (any other object): one execution; errors propagate.
//!
//! The registry and container are built once per entry point and shared by
//! every later invocation.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, instrument, warn};

use courier_core::{ConfigError, JobId};
use courier_queue::{ClientError, EnvelopeError, JobEnvelope};

use super::event::{
    BatchResponse, DirectResponse, DirectStatus, InvocationResponse, QueueRecord,
};
use crate::jobs::{ExecutionError, JobExecution, JobExecutor, JobHooks, ModuleGraph, Outcome};

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid invocation event: {0}")]
    InvalidEvent(String),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// The polling host could not talk to its queue.
    #[error("queue unavailable: {0}")]
    Queue(#[from] ClientError),
}

impl WorkerError {
    /// Wiring mistakes, including an unknown job name.
    pub fn is_config(&self) -> bool {
        match self {
            WorkerError::Config(_) => true,
            WorkerError::Execution(e) => e.is_config(),
            WorkerError::InvalidEvent(_) | WorkerError::Envelope(_) | WorkerError::Queue(_) => false,
        }
    }
}

type GraphFactory = Box<dyn Fn() -> ModuleGraph + Send + Sync>;

pub struct WorkerEntryPoint {
    graph: GraphFactory,
    hooks: JobHooks,
    executor: OnceCell<Arc<JobExecutor>>,
}

impl core::fmt::Debug for WorkerEntryPoint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerEntryPoint")
            .field("built", &self.executor.initialized())
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl WorkerEntryPoint {
    /// `graph` declares the modules; it is called again only if a previous
    /// build failed.
    pub fn new(graph: impl Fn() -> ModuleGraph + Send + Sync + 'static) -> Self {
        Self {
            graph: Box::new(graph),
            hooks: JobHooks::new(),
            executor: OnceCell::new(),
        }
    }

    pub fn with_hooks(mut self, hooks: JobHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// The memoized executor, building the application on first use.
    pub async fn executor(&self) -> Result<&Arc<JobExecutor>, WorkerError> {
        self.executor
            .get_or_try_init(|| async {
                let app = (self.graph)().build()?;
                info!(jobs = app.registry.len(), "job application built");
                let executor = JobExecutor::new(Arc::new(app.registry), Arc::new(app.container))
                    .with_hooks(self.hooks.clone());
                Ok::<_, WorkerError>(Arc::new(executor))
            })
            .await
    }

    /// Build eagerly so registration errors surface at process start.
    pub async fn warm_up(&self) -> Result<(), WorkerError> {
        self.executor().await.map(|_| ())
    }

    pub fn is_built(&self) -> bool {
        self.executor.initialized()
    }

    /// Dispatch on event shape.
    pub async fn handle(&self, event: JsonValue) -> Result<InvocationResponse, WorkerError> {
        match event {
            JsonValue::Object(mut obj) => match obj.remove("Records") {
                Some(JsonValue::Array(records)) => {
                    self.handle_batch(records).await.map(InvocationResponse::Batch)
                }
                Some(other) => {
                    obj.insert("Records".to_string(), other);
                    self.handle_direct(&obj).await.map(InvocationResponse::Direct)
                }
                None => self.handle_direct(&obj).await.map(InvocationResponse::Direct),
            },
            other => Err(WorkerError::InvalidEvent(format!(
                "expected a JSON object, got {}",
                kind_of(&other)
            ))),
        }
    }

    /// Process raw batch records. Only a build failure is an `Err`.
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub async fn handle_batch(&self, records: Vec<JsonValue>) -> Result<BatchResponse, WorkerError> {
        let executor = self.executor().await?;
        let mut response = BatchResponse::default();

        for raw in records {
            let message_id = raw
                .get("messageId")
                .and_then(JsonValue::as_str)
                .map(str::to_string);

            if let Err(err) = process_record(executor, raw).await {
                match (&message_id, err.is_config()) {
                    (Some(id), true) => error!(message_id = %id, error = %err, "record failed: configuration"),
                    (Some(id), false) => warn!(message_id = %id, error = %err, "record failed"),
                    (None, _) => error!(error = %err, "record without messageId failed; cannot report it"),
                }
                if let Some(id) = message_id {
                    response.push_failure(id);
                }
            }
        }

        debug!(failed = response.batch_item_failures.len(), "batch processed");
        Ok(response)
    }

    /// Process one direct/scheduled invocation.
    #[instrument(skip(self, event), err)]
    pub async fn handle_direct(
        &self,
        event: &Map<String, JsonValue>,
    ) -> Result<DirectResponse, WorkerError> {
        let executor = self.executor().await?;
        let execution = parse_direct(event)?;
        let job_id = execution.job_id.to_string();
        let job_name = execution.job_name.clone();

        let (status, error) = match executor.execute(execution).await? {
            Outcome::Completed => (DirectStatus::Completed, None),
            Outcome::Discarded { error } => (DirectStatus::Discarded, Some(error.to_string())),
        };
        Ok(DirectResponse {
            job_id,
            job_name,
            status,
            error,
        })
    }
}

async fn process_record(executor: &JobExecutor, raw: JsonValue) -> Result<(), WorkerError> {
    let record: QueueRecord =
        serde_json::from_value(raw).map_err(|e| WorkerError::InvalidEvent(e.to_string()))?;
    let envelope = JobEnvelope::from_json(&record.body)?;

    let attempt = record.attempt();
    let sent_at = record.sent_at();
    let message_id = record.message_id;
    let execution = JobExecution::from_envelope(
        envelope,
        || JobId::from(message_id.as_str()),
        || sent_at.unwrap_or_else(Utc::now),
    )
    .with_attempt(attempt)
    .with_message_id(message_id.clone());

    executor.execute(execution).await?;
    Ok(())
}

fn kind_of(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

fn has_job_name(obj: &Map<String, JsonValue>) -> bool {
    obj.get("jobName")
        .and_then(JsonValue::as_str)
        .is_some_and(|n| !n.is_empty())
}

/// Read the execution from the top level, else from `detail`.
fn parse_direct(event: &Map<String, JsonValue>) -> Result<JobExecution, WorkerError> {
    let detail = event.get("detail").and_then(JsonValue::as_object);
    let source = if has_job_name(event) {
        event
    } else {
        detail
            .filter(|d| has_job_name(d))
            .ok_or(ConfigError::MissingJobName)?
    };

    let job_name = source
        .get("jobName")
        .and_then(JsonValue::as_str)
        .ok_or(ConfigError::MissingJobName)?;
    let payload = source.get("payload").cloned().unwrap_or(JsonValue::Null);

    let job_id = match source.get("jobId") {
        Some(JsonValue::String(id)) if !id.is_empty() => JobId::from(id.as_str()),
        None | Some(JsonValue::Null) => JobId::generate(),
        Some(other) => {
            return Err(WorkerError::InvalidEvent(format!(
                "jobId must be a string, got {}",
                kind_of(other)
            )));
        }
    };

    let metadata: BTreeMap<String, String> = match source.get("metadata") {
        None | Some(JsonValue::Null) => BTreeMap::new(),
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|e| WorkerError::InvalidEvent(format!("metadata: {e}")))?,
    };

    let enqueued_at: DateTime<Utc> = match source.get("enqueuedAt") {
        None | Some(JsonValue::Null) => Utc::now(),
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|e| WorkerError::InvalidEvent(format!("enqueuedAt: {e}")))?,
    };

    // Host retry metadata: attempt = retries so far + 1.
    let attempt = event
        .get("retryAttempt")
        .or_else(|| detail.and_then(|d| d.get("retryAttempt")))
        .and_then(JsonValue::as_u64)
        .map_or(1, |n| u32::try_from(n).unwrap_or(u32::MAX - 1).saturating_add(1));

    let mut execution = JobExecution::new(job_name, payload)
        .with_job_id(job_id)
        .with_attempt(attempt)
        .with_enqueued_at(enqueued_at);
    execution.metadata = metadata;
    Ok(execution)
}
