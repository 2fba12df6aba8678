//! Jobs the dev host registers out of the box.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use courier_core::{JobError, RetrySpec};
use courier_infra::jobs::{
    HookError, JobContext, JobDefinition, JobExecution, JobModule, JobObserver, ModuleGraph,
    Uniqueness,
};

/// Singleton recording every delivered notification.
#[derive(Debug, Default)]
pub struct Outbox {
    sent: Mutex<Vec<String>>,
}

impl Outbox {
    pub fn record(&self, line: String) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notify {
    pub to: String,
    pub subject: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Flaky {
    #[serde(default = "one")]
    succeed_on_attempt: u32,
}

fn one() -> u32 {
    1
}

pub fn notifications_module() -> JobModule {
    JobModule::new("notifications")
        .provide(Outbox::default())
        .job(
            JobDefinition::typed("notify", |job: Notify, ctx| async move {
                let outbox = ctx.require::<Outbox>()?;
                outbox.record(format!("{}: {}", job.to, job.subject));
                info!(to = %job.to, "notification delivered");
                Ok(())
            })
            .with_retry(RetrySpec::attempts(5))
            .with_uniqueness(Uniqueness::new(|payload| {
                format!(
                    "notify-{}",
                    payload.get("to").and_then(|v| v.as_str()).unwrap_or("anyone")
                )
            })),
        )
}

pub fn diagnostics_module() -> JobModule {
    JobModule::new("diagnostics")
        .import("notifications")
        .job(JobDefinition::from_fn("echo", |payload, ctx| async move {
            info!(job_id = %ctx.job_id(), %payload, "echo");
            Ok(())
        }))
        .job(
            JobDefinition::typed("flaky", |job: Flaky, ctx| async move {
                if ctx.attempt() < job.succeed_on_attempt {
                    return Err(JobError::transient(format!(
                        "not yet, attempt {} of {}",
                        ctx.attempt(),
                        job.succeed_on_attempt
                    )));
                }
                Ok(())
            })
            .with_retry(RetrySpec::attempts(3)),
        )
        .job(JobDefinition::from_fn("reject", |_, _| async {
            Err(JobError::permanent("this job always rejects its payload"))
        }))
}

pub fn module_graph() -> ModuleGraph {
    ModuleGraph::new()
        .module(notifications_module())
        .module(diagnostics_module())
}

/// Logs lifecycle events.
#[derive(Debug, Default)]
pub struct LoggingObserver;

#[async_trait]
impl JobObserver for LoggingObserver {
    fn name(&self) -> &str {
        "logging"
    }

    async fn on_job_complete(
        &self,
        execution: &JobExecution,
        ctx: &JobContext,
    ) -> Result<(), HookError> {
        info!(parent: ctx.span(), job_name = %execution.job_name, attempt = execution.attempt, "job completed");
        Ok(())
    }

    async fn on_job_dead_letter(
        &self,
        execution: &JobExecution,
        ctx: &JobContext,
        error: &JobError,
    ) -> Result<(), HookError> {
        warn!(parent: ctx.span(), job_name = %execution.job_name, error = %error, "job dead-lettered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_graph_builds() {
        let app = module_graph().build().unwrap();
        assert_eq!(app.registry.names(), vec!["echo", "flaky", "notify", "reject"]);
    }
}
