//! Error model.
//!
//! Two families live here:
//!
//! - [`JobError`]: what a handler (or the executor itself) reports about one
//!   unit of work. The executor decides retry / dead-letter / discard by
//!   matching on [`JobError::kind`], never by inspecting messages.
//! - [`ConfigError`]: deployment or wiring mistakes (unknown job, duplicate
//!   registration, unresolvable queue, ...). These are fatal and must never be
//!   swallowed or retried.

use std::time::Duration;

use thiserror::Error;

use crate::schema::ValidationIssue;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type returned by job handlers.
pub type JobResult<T = ()> = Result<T, JobError>;

/// Discriminant of a [`JobError`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Never retry; route to dead-letter.
    Permanent,
    /// Retry; may carry an advisory retry-after hint.
    Transient,
    /// Unclassified handler failure; counts against attempts like `Transient`.
    Failed,
    /// Payload did not match the job's declared schema; retryable.
    InvalidPayload,
    /// Synthetic: attempt count reached the configured maximum.
    RetriesExhausted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Permanent => "permanent",
            ErrorKind::Transient => "transient",
            ErrorKind::Failed => "failed",
            ErrorKind::InvalidPayload => "invalid_payload",
            ErrorKind::RetriesExhausted => "retries_exhausted",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one job execution.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("permanent failure: {message}")]
    Permanent {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("transient failure: {message}")]
    Transient {
        message: String,
        /// Advisory only. Redelivery timing belongs to the queue.
        retry_after: Option<Duration>,
        #[source]
        source: Option<BoxError>,
    },

    #[error("job failed: {message}")]
    Failed {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("invalid payload for job `{job_name}`: {}", summarize(.issues))]
    InvalidPayload {
        job_name: String,
        issues: Vec<ValidationIssue>,
    },

    #[error("job `{job_name}` exhausted retries (attempt {attempt} of {max_attempts})")]
    RetriesExhausted {
        job_name: String,
        attempt: u32,
        max_attempts: u32,
        #[source]
        cause: Box<JobError>,
    },
}

fn summarize(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl JobError {
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
            source: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
            source: None,
        }
    }

    pub fn transient_after(message: impl Into<String>, retry_after: Duration) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: Some(retry_after),
            source: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            source: None,
        }
    }

    pub fn invalid_payload(job_name: impl Into<String>, issues: Vec<ValidationIssue>) -> Self {
        Self::InvalidPayload {
            job_name: job_name.into(),
            issues,
        }
    }

    pub fn retries_exhausted(
        job_name: impl Into<String>,
        attempt: u32,
        max_attempts: u32,
        cause: JobError,
    ) -> Self {
        Self::RetriesExhausted {
            job_name: job_name.into(),
            attempt,
            max_attempts,
            cause: Box::new(cause),
        }
    }

    /// Attach an underlying error to a `Permanent`, `Transient` or `Failed` error.
    ///
    /// No-op for the structured variants.
    pub fn with_source(mut self, err: impl Into<BoxError>) -> Self {
        match &mut self {
            JobError::Permanent { source, .. }
            | JobError::Transient { source, .. }
            | JobError::Failed { source, .. } => *source = Some(err.into()),
            JobError::InvalidPayload { .. } | JobError::RetriesExhausted { .. } => {}
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::Permanent { .. } => ErrorKind::Permanent,
            JobError::Transient { .. } => ErrorKind::Transient,
            JobError::Failed { .. } => ErrorKind::Failed,
            JobError::InvalidPayload { .. } => ErrorKind::InvalidPayload,
            JobError::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.kind() == ErrorKind::Permanent
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            JobError::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn validation_issues(&self) -> &[ValidationIssue] {
        match self {
            JobError::InvalidPayload { issues, .. } => issues,
            _ => &[],
        }
    }

    /// For `RetriesExhausted`, the error that caused the final attempt to fail.
    pub fn cause(&self) -> Option<&JobError> {
        match self {
            JobError::RetriesExhausted { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        JobError::Failed {
            message: err.to_string(),
            source: Some(err.into()),
        }
    }
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        JobError::Failed {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

/// Fatal wiring / deployment errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("no job registered under name `{0}`")]
    UnknownJob(String),

    #[error("job `{0}` is registered more than once")]
    DuplicateJob(String),

    #[error("module `{0}` is declared more than once")]
    DuplicateModule(String),

    #[error("module `{module}` imports unknown module `{import}`")]
    UnknownModule { module: String, import: String },

    #[error("circular module dependency: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    #[error("queue `{0}` is not configured")]
    UnknownQueue(String),

    #[error("no queue given and driver `{0}` has no default queue")]
    NoQueue(String),

    #[error(
        "delay of {delay_secs}s exceeds the native cap of {max_native_secs}s and no scheduler is configured"
    )]
    SchedulerNotConfigured { delay_secs: u64, max_native_secs: u64 },

    #[error("driver `{0}` has no scheduler configured")]
    NoScheduler(String),

    #[error("`{0}` is not a recognised queue address")]
    InvalidQueueAddress(String),

    #[error("invocation event carries no job name")]
    MissingJobName,

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl ConfigError {
    pub fn invalid_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_variants() {
        assert_eq!(JobError::permanent("x").kind(), ErrorKind::Permanent);
        assert_eq!(JobError::transient("x").kind(), ErrorKind::Transient);
        assert_eq!(JobError::failed("x").kind(), ErrorKind::Failed);
        assert_eq!(
            JobError::invalid_payload("j", vec![]).kind(),
            ErrorKind::InvalidPayload
        );
        assert_eq!(
            JobError::retries_exhausted("j", 3, 3, JobError::failed("x")).kind(),
            ErrorKind::RetriesExhausted
        );
    }

    #[test]
    fn retries_exhausted_keeps_original_as_cause() {
        let err = JobError::retries_exhausted("send-email", 3, 3, JobError::transient("smtp down"));

        let cause = err.cause().expect("cause");
        assert_eq!(cause.kind(), ErrorKind::Transient);
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(
            err.to_string(),
            "job `send-email` exhausted retries (attempt 3 of 3)"
        );
    }

    #[test]
    fn anyhow_errors_become_unclassified_failures() {
        let err: JobError = anyhow::anyhow!("boom").into();

        assert_eq!(err.kind(), ErrorKind::Failed);
        assert_eq!(err.to_string(), "job failed: boom");
    }

    #[test]
    fn retry_after_is_only_reported_for_transient() {
        let hint = Duration::from_secs(30);
        assert_eq!(JobError::transient_after("busy", hint).retry_after(), Some(hint));
        assert_eq!(JobError::permanent("nope").retry_after(), None);
    }

    #[test]
    fn invalid_payload_message_lists_issues() {
        let err = JobError::invalid_payload(
            "resize",
            vec![
                ValidationIssue::new("width", "expected u32"),
                ValidationIssue::new("height", "missing"),
            ],
        );

        assert_eq!(
            err.to_string(),
            "invalid payload for job `resize`: width: expected u32; height: missing"
        );
        assert_eq!(err.validation_issues().len(), 2);
    }

    #[test]
    fn cycle_error_renders_path() {
        let err = ConfigError::CircularDependency(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "circular module dependency: a -> b -> a");
    }
}
