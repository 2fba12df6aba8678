//! One unit of work and the context its handler sees.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::Span;

use courier_core::{JobError, JobId};
use courier_queue::JobEnvelope;

use super::scope::Services;

/// A parsed unit of work, ready for the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct JobExecution {
    pub job_id: JobId,
    pub job_name: String,
    pub payload: JsonValue,
    /// 1-based.
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
    /// Id of the delivering queue record, when there is one.
    pub message_id: Option<String>,
}

impl JobExecution {
    pub fn new(job_name: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            job_id: JobId::generate(),
            job_name: job_name.into(),
            payload,
            attempt: 1,
            enqueued_at: Utc::now(),
            metadata: BTreeMap::new(),
            message_id: None,
        }
    }

    /// Build from a wire envelope, using the fallbacks for fields it lacks.
    pub fn from_envelope(
        envelope: JobEnvelope,
        fallback_job_id: impl FnOnce() -> JobId,
        fallback_enqueued_at: impl FnOnce() -> DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: envelope.job_id.unwrap_or_else(fallback_job_id),
            job_name: envelope.job_name,
            payload: envelope.payload,
            attempt: 1,
            enqueued_at: envelope.enqueued_at.unwrap_or_else(fallback_enqueued_at),
            metadata: envelope.metadata.unwrap_or_default(),
            message_id: None,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt.max(1);
        self
    }

    pub fn with_job_id(mut self, job_id: impl Into<JobId>) -> Self {
        self.job_id = job_id.into();
        self
    }

    pub fn with_enqueued_at(mut self, at: DateTime<Utc>) -> Self {
        self.enqueued_at = at;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}

/// Handed to a job handler alongside its payload.
#[derive(Debug, Clone)]
pub struct JobContext {
    services: Services,
    job_id: JobId,
    job_name: String,
    attempt: u32,
    enqueued_at: DateTime<Utc>,
    metadata: BTreeMap<String, String>,
    span: Span,
}

impl JobContext {
    pub(crate) fn new(services: Services, execution: &JobExecution, span: Span) -> Self {
        Self {
            services,
            job_id: execution.job_id.clone(),
            job_name: execution.job_name.clone(),
            attempt: execution.attempt,
            enqueued_at: execution.enqueued_at,
            metadata: execution.metadata.clone(),
            span,
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.services.get::<T>()
    }

    pub fn require<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, JobError> {
        self.services.require::<T>()
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Execution-scoped span; the handler future already runs inside it.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_fields_win_over_fallbacks() {
        let at = Utc::now() - chrono::Duration::hours(1);
        let envelope = JobEnvelope {
            job_name: "ping".into(),
            payload: json!({"n": 1}),
            job_id: Some(JobId::from("from-envelope")),
            metadata: None,
            enqueued_at: Some(at),
        };

        let exec = JobExecution::from_envelope(envelope, || JobId::from("fallback"), Utc::now);

        assert_eq!(exec.job_id.as_str(), "from-envelope");
        assert_eq!(exec.enqueued_at, at);
        assert!(exec.metadata.is_empty());
        assert_eq!(exec.attempt, 1);
    }

    #[test]
    fn attempt_is_at_least_one() {
        assert_eq!(JobExecution::new("x", json!(null)).with_attempt(0).attempt, 1);
    }
}
