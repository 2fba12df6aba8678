//! Job executor with retry and dead-letter decisions.
//!
//! Runs one [`JobExecution`] inside a fresh dependency scope, then decides
//! what the host should do with a failure:
//!
//! | condition                              | hooks               | result                   |
//! |----------------------------------------|---------------------|--------------------------|
//! | permanent error                        | failed, dead-letter | `DeadLetter(error)`      |
//! | retries disabled                       | failed              | `Discarded`              |
//! | attempt < max                          | failed              | `Retry`                  |
//! | attempt >= max, dead-lettering on      | failed, dead-letter | `DeadLetter(exhausted)`  |
//! | attempt >= max, dead-lettering off     | failed, dead-letter | `Discarded`              |
//!
//! Only the two `Discarded` rows swallow the error.

use std::sync::Arc;

use tracing::{Instrument, debug, error, info, info_span, warn};

use courier_core::{ConfigError, JobError, RetryConfig};

use super::definition::JobDefinition;
use super::execution::{JobContext, JobExecution};
use super::hooks::JobHooks;
use super::registry::JobRegistry;
use super::scope::{ScopeError, ScopeFactory, ScopeGuard};

/// Terminal result of an execution the host should acknowledge.
#[derive(Debug)]
pub enum Outcome {
    Completed,
    /// Failure deliberately swallowed; the message must not be redelivered.
    Discarded { error: JobError },
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed)
    }
}

/// Execution result the host must not acknowledge.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// Redeliver; attempts remain.
    #[error("job `{job_name}` failed on attempt {attempt} of {max_attempts}: {error}")]
    Retry {
        job_name: String,
        attempt: u32,
        max_attempts: u32,
        #[source]
        error: JobError,
    },

    /// Route to the dead-letter destination.
    #[error("job routed to dead-letter: {0}")]
    DeadLetter(#[source] JobError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Scope(#[from] ScopeError),
}

impl ExecutionError {
    pub fn is_config(&self) -> bool {
        matches!(self, ExecutionError::Config(_))
    }

    pub fn job_error(&self) -> Option<&JobError> {
        match self {
            ExecutionError::Retry { error, .. } | ExecutionError::DeadLetter(error) => Some(error),
            ExecutionError::Config(_) | ExecutionError::Scope(_) => None,
        }
    }
}

pub struct JobExecutor {
    registry: Arc<JobRegistry>,
    scopes: Arc<dyn ScopeFactory>,
    hooks: JobHooks,
}

impl core::fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobExecutor")
            .field("jobs", &self.registry.len())
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl JobExecutor {
    pub fn new(registry: Arc<JobRegistry>, scopes: Arc<dyn ScopeFactory>) -> Self {
        Self {
            registry,
            scopes,
            hooks: JobHooks::new(),
        }
    }

    pub fn with_hooks(mut self, hooks: JobHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Execute one job.
    ///
    /// `Ok` means the host should acknowledge (completed or discarded); `Err`
    /// means redeliver, dead-letter, or (for configuration errors) fail loudly.
    pub async fn execute(&self, execution: JobExecution) -> Result<Outcome, ExecutionError> {
        let definition = self.registry.resolve(&execution.job_name)?;
        let span = info_span!(
            "job",
            job_name = %execution.job_name,
            job_id = %execution.job_id,
            attempt = execution.attempt,
            message_id = execution.message_id.as_deref().unwrap_or(""),
        );

        self.execute_in_scope(&definition, &execution, span.clone())
            .instrument(span)
            .await
    }

    async fn execute_in_scope(
        &self,
        definition: &JobDefinition,
        execution: &JobExecution,
        span: tracing::Span,
    ) -> Result<Outcome, ExecutionError> {
        let retry = definition.retry_config();
        let guard = ScopeGuard::new(self.scopes.create_scope().await?);

        let ctx = JobContext::new(guard.services(), execution, span);

        self.hooks.job_started(execution, &ctx).await;
        let result = self.run(definition, execution, ctx.clone()).await;

        let decision = match result {
            Ok(()) => {
                self.hooks.job_completed(execution, &ctx).await;
                info!("job completed");
                Ok(Outcome::Completed)
            }
            Err(err) => self.decide(execution, &ctx, retry, err).await,
        };

        guard.close();
        decision
    }

    async fn run(
        &self,
        definition: &JobDefinition,
        execution: &JobExecution,
        ctx: JobContext,
    ) -> Result<(), JobError> {
        if let Some(schema) = definition.schema() {
            schema
                .validate(&execution.payload)
                .map_err(|issues| JobError::invalid_payload(definition.name(), issues))?;
        }

        let span = ctx.span().clone();
        debug!("invoking handler");
        definition
            .handler()
            .handle(execution.payload.clone(), ctx)
            .instrument(span)
            .await
    }

    async fn decide(
        &self,
        execution: &JobExecution,
        ctx: &JobContext,
        retry: RetryConfig,
        err: JobError,
    ) -> Result<Outcome, ExecutionError> {
        let attempt = execution.attempt;

        if err.is_permanent() {
            self.hooks.job_failed(execution, ctx, &err).await;
            self.hooks.job_dead_lettered(execution, ctx, &err).await;
            error!(error = %err, kind = %err.kind(), "permanent failure; dead-lettering");
            return Err(ExecutionError::DeadLetter(err));
        }

        let Some(max_attempts) = retry.limit() else {
            self.hooks.job_failed(execution, ctx, &err).await;
            warn!(error = %err, kind = %err.kind(), "retries disabled; discarding");
            return Ok(Outcome::Discarded { error: err });
        };

        if attempt < max_attempts {
            self.hooks.job_failed(execution, ctx, &err).await;
            match err.retry_after() {
                Some(hint) => warn!(
                    error = %err,
                    kind = %err.kind(),
                    max_attempts,
                    retry_after_ms = u64::try_from(hint.as_millis()).unwrap_or(u64::MAX),
                    "job failed; will be redelivered"
                ),
                None => warn!(error = %err, kind = %err.kind(), max_attempts, "job failed; will be redelivered"),
            }
            return Err(ExecutionError::Retry {
                job_name: execution.job_name.clone(),
                attempt,
                max_attempts,
                error: err,
            });
        }

        self.hooks.job_failed(execution, ctx, &err).await;
        self.hooks.job_dead_lettered(execution, ctx, &err).await;

        if retry.dead_letter_on_exhaustion {
            error!(error = %err, max_attempts, "retries exhausted; dead-lettering");
            Err(ExecutionError::DeadLetter(JobError::retries_exhausted(
                &execution.job_name,
                attempt,
                max_attempts,
                err,
            )))
        } else {
            warn!(error = %err, max_attempts, "retries exhausted; discarding");
            Ok(Outcome::Discarded { error: err })
        }
    }
}
