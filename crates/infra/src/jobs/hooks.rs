//! Lifecycle observers.
//!
//! Observers are best-effort: a failing observer is logged and never changes
//! the outcome of the execution it observes.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use courier_core::JobError;

use super::execution::{JobContext, JobExecution};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Receives job lifecycle events. Every method is optional.
///
/// The [`JobContext`] is the one the handler sees: same scoped services, same
/// span, same metadata view.
///
/// `on_job_failed` and `on_job_dead_letter` always receive the error the
/// handler produced, never a synthetic exhaustion wrapper.
#[async_trait]
pub trait JobObserver: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn on_job_start(
        &self,
        _execution: &JobExecution,
        _ctx: &JobContext,
    ) -> Result<(), HookError> {
        Ok(())
    }

    async fn on_job_complete(
        &self,
        _execution: &JobExecution,
        _ctx: &JobContext,
    ) -> Result<(), HookError> {
        Ok(())
    }

    async fn on_job_failed(
        &self,
        _execution: &JobExecution,
        _ctx: &JobContext,
        _error: &JobError,
    ) -> Result<(), HookError> {
        Ok(())
    }

    async fn on_job_dead_letter(
        &self,
        _execution: &JobExecution,
        _ctx: &JobContext,
        _error: &JobError,
    ) -> Result<(), HookError> {
        Ok(())
    }
}

/// Ordered list of observers (possibly empty).
#[derive(Clone, Default)]
pub struct JobHooks {
    observers: Vec<Arc<dyn JobObserver>>,
}

impl core::fmt::Debug for JobHooks {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list()
            .entries(self.observers.iter().map(|o| o.name()))
            .finish()
    }
}

fn report(observer: &dyn JobObserver, hook: &'static str, result: Result<(), HookError>) {
    if let Err(err) = result {
        warn!(observer = observer.name(), hook, error = %err, "job observer failed");
    }
}

impl JobHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: impl JobObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    pub fn push(&mut self, observer: Arc<dyn JobObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub async fn job_started(&self, execution: &JobExecution, ctx: &JobContext) {
        for o in &self.observers {
            report(o.as_ref(), "on_job_start", o.on_job_start(execution, ctx).await);
        }
    }

    pub async fn job_completed(&self, execution: &JobExecution, ctx: &JobContext) {
        for o in &self.observers {
            report(
                o.as_ref(),
                "on_job_complete",
                o.on_job_complete(execution, ctx).await,
            );
        }
    }

    pub async fn job_failed(&self, execution: &JobExecution, ctx: &JobContext, error: &JobError) {
        for o in &self.observers {
            report(
                o.as_ref(),
                "on_job_failed",
                o.on_job_failed(execution, ctx, error).await,
            );
        }
    }

    pub async fn job_dead_lettered(
        &self,
        execution: &JobExecution,
        ctx: &JobContext,
        error: &JobError,
    ) {
        for o in &self.observers {
            report(
                o.as_ref(),
                "on_job_dead_letter",
                o.on_job_dead_letter(execution, ctx, error).await,
            );
        }
    }
}
