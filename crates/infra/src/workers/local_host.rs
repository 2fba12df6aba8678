//! Local stand-in for the invoking platform.
//!
//! - Fires due schedules onto the queue
//! - Receives a batch, wraps it as a `Records` event, calls the entry point
//! - Acknowledges successes, releases failures (the queue redrives them to
//!   its dead-letter list once the receive limit is reached)
//! - Supports graceful shutdown

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use courier_queue::{InMemoryQueueClient, InMemorySchedulerClient, ReceivedMessage, ReleaseOutcome};

use super::entry_point::{WorkerEntryPoint, WorkerError};
use super::event::QueueRecord;
use crate::config::LocalHostConfig;

/// What one poll did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub schedules_fired: usize,
    pub received: usize,
    pub acknowledged: usize,
    pub requeued: usize,
    pub dead_lettered: usize,
}

pub struct LocalHost {
    config: LocalHostConfig,
    entry: Arc<WorkerEntryPoint>,
    queue: Arc<InMemoryQueueClient>,
    queue_url: String,
    scheduler: Option<Arc<InMemorySchedulerClient>>,
}

impl core::fmt::Debug for LocalHost {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LocalHost")
            .field("config", &self.config)
            .field("queue_url", &self.queue_url)
            .field("scheduler", &self.scheduler.is_some())
            .finish()
    }
}

/// Handle to stop a spawned [`LocalHost`].
#[derive(Debug)]
pub struct LocalHostHandle {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl LocalHostHandle {
    /// Request graceful shutdown and wait for the loop to stop.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(err) = self.join.await {
            warn!(error = %err, "local host task ended abnormally");
        }
    }
}

impl LocalHost {
    pub fn new(
        config: LocalHostConfig,
        entry: Arc<WorkerEntryPoint>,
        queue: Arc<InMemoryQueueClient>,
        queue_url: impl Into<String>,
    ) -> Self {
        Self {
            config,
            entry,
            queue,
            queue_url: queue_url.into(),
            scheduler: None,
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<InMemorySchedulerClient>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// One round: fire schedules, then process at most one batch.
    ///
    /// Fails only if the entry point cannot build its application. The build
    /// happens before anything is received, so a wiring error never counts
    /// against a message's receive limit.
    pub async fn poll_once(&self) -> Result<PollReport, WorkerError> {
        let mut report = PollReport::default();
        self.entry.warm_up().await?;

        if let Some(scheduler) = &self.scheduler {
            match scheduler.fire_due(Utc::now(), self.queue.as_ref()).await {
                Ok(fired) => report.schedules_fired = fired,
                Err(err) => warn!(error = %err, "failed to fire due schedules"),
            }
        }

        let messages = self.queue.receive(&self.queue_url, self.config.batch_size);
        report.received = messages.len();
        if messages.is_empty() {
            return Ok(report);
        }

        let response = match batch_records(&messages) {
            Ok(records) => self.entry.handle_batch(records).await,
            Err(err) => Err(err),
        };
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                for m in &messages {
                    self.queue.release(&self.queue_url, &m.message_id);
                }
                return Err(err);
            }
        };

        let failed = response.failed_ids();
        for m in &messages {
            if !failed.contains(&m.message_id.as_str()) {
                self.queue.acknowledge(&self.queue_url, &m.message_id);
                report.acknowledged += 1;
                continue;
            }
            match self.queue.release(&self.queue_url, &m.message_id) {
                ReleaseOutcome::Requeued => report.requeued += 1,
                ReleaseOutcome::DeadLettered => {
                    warn!(message_id = %m.message_id, receive_count = m.receive_count, "message moved to dead-letter list");
                    report.dead_lettered += 1;
                }
                ReleaseOutcome::Unknown => {}
            }
        }

        debug!(?report, "poll finished");
        Ok(report)
    }

    /// Spawn the polling loop.
    pub fn spawn(self) -> LocalHostHandle {
        spawn_polling(self)
    }
}

/// Wrap received messages as the records of a batch event.
pub(crate) fn batch_records<'a>(
    messages: impl IntoIterator<Item = &'a ReceivedMessage>,
) -> Result<Vec<JsonValue>, WorkerError> {
    messages
        .into_iter()
        .map(|m| {
            let mut record = QueueRecord::new(&m.message_id, &m.body)
                .with_receive_count(m.receive_count)
                .with_sent_at(m.sent_at);
            record.attributes.message_group_id = m.message_group_id.clone();
            serde_json::to_value(record)
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| WorkerError::InvalidEvent(e.to_string()))
}

/// A host the shared polling loop can drive.
#[async_trait]
pub(crate) trait Poller: Send + Sync + 'static {
    fn config(&self) -> &LocalHostConfig;

    fn queue_url(&self) -> &str;

    async fn poll(&self) -> Result<PollReport, WorkerError>;
}

#[async_trait]
impl Poller for LocalHost {
    fn config(&self) -> &LocalHostConfig {
        &self.config
    }

    fn queue_url(&self) -> &str {
        &self.queue_url
    }

    async fn poll(&self) -> Result<PollReport, WorkerError> {
        self.poll_once().await
    }
}

/// Poll on every tick until shut down.
pub(crate) fn spawn_polling<P: Poller>(poller: P) -> LocalHostHandle {
    let shutdown = Arc::new(Notify::new());
    let signal = Arc::clone(&shutdown);

    let join = tokio::spawn(async move {
        let config = poller.config().clone();
        info!(host = %config.name, queue_url = %poller.queue_url(), "local host started");
        let mut tick = tokio::time::interval(config.poll_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = signal.notified() => {
                    info!(host = %config.name, "local host received shutdown signal");
                    break;
                }
                _ = tick.tick() => {
                    // Drain while batches come back full.
                    loop {
                        match poller.poll().await {
                            Ok(report) if report.received == config.batch_size => continue,
                            Ok(_) => break,
                            Err(err) => {
                                error!(host = %config.name, error = %err, "poll failed");
                                break;
                            }
                        }
                    }
                }
            }
        }
    });

    LocalHostHandle { shutdown, join }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use courier_core::{JobError, RetrySpec};
    use courier_queue::{QueueClient, SendMessageRequest};
    use serde_json::json;

    use crate::jobs::{JobDefinition, JobModule, ModuleGraph};

    fn entry() -> Arc<WorkerEntryPoint> {
        Arc::new(WorkerEntryPoint::new(|| {
            ModuleGraph::new().module(
                JobModule::new("app")
                    .job(JobDefinition::from_fn("ok", |_, _| async { Ok(()) }))
                    .job(
                        JobDefinition::from_fn("flaky", |_, _| async {
                            Err(JobError::transient("down"))
                        })
                        .with_retry(RetrySpec::attempts(10)),
                    ),
            )
        }))
    }

    async fn send(queue: &InMemoryQueueClient, url: &str, job: &str) {
        queue
            .send_message(SendMessageRequest::new(url, json!({"jobName": job}).to_string()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn acknowledges_successes_and_redrives_failures() {
        let queue = Arc::new(InMemoryQueueClient::new().with_max_receive_count(2));
        let url = queue.create_queue("jobs");
        send(&queue, &url, "ok").await;
        send(&queue, &url, "flaky").await;

        let host = LocalHost::new(LocalHostConfig::default(), entry(), queue.clone(), &url);

        let first = host.poll_once().await.unwrap();
        assert_eq!((first.received, first.acknowledged, first.requeued), (2, 1, 1));

        let second = host.poll_once().await.unwrap();
        assert_eq!((second.received, second.dead_lettered), (1, 1));

        assert_eq!(queue.depth(&url), 0);
        assert_eq!(queue.dead_letters(&url).len(), 1);
    }

    #[tokio::test]
    async fn failed_build_leaves_messages_untouched() {
        let queue = Arc::new(InMemoryQueueClient::new().with_max_receive_count(2));
        let url = queue.create_queue("jobs");
        send(&queue, &url, "ok").await;

        let broken = Arc::new(WorkerEntryPoint::new(|| {
            ModuleGraph::new().module(JobModule::new("app").import("missing"))
        }));
        let host = LocalHost::new(LocalHostConfig::default(), broken, queue.clone(), &url);

        for _ in 0..5 {
            let err = host.poll_once().await.unwrap_err();
            assert!(err.is_config());
        }

        assert_eq!(queue.depth(&url), 1);
        assert!(queue.dead_letters(&url).is_empty());
        assert_eq!(queue.receive(&url, 10)[0].receive_count, 1);
    }

    #[tokio::test]
    async fn fires_due_schedules_before_receiving() {
        use chrono::Duration as ChronoDuration;
        use courier_queue::{CreateScheduleRequest, ScheduleTarget, SchedulerClient};

        let queue = Arc::new(InMemoryQueueClient::new());
        let url = queue.create_queue("jobs");
        let scheduler = Arc::new(InMemorySchedulerClient::new());
        scheduler
            .create_schedule(CreateScheduleRequest {
                name: "due".into(),
                group_name: None,
                fire_at: Utc::now() - ChronoDuration::seconds(1),
                target: ScheduleTarget {
                    arn: "arn:aws:sqs:us-east-1:000000000000:jobs".into(),
                    queue_url: url.clone(),
                    role_arn: None,
                    input: json!({"jobName": "ok"}).to_string(),
                    message_group_id: None,
                },
                delete_after_completion: true,
            })
            .await
            .unwrap();

        let host = LocalHost::new(LocalHostConfig::default(), entry(), queue.clone(), &url)
            .with_scheduler(scheduler);
        let report = host.poll_once().await.unwrap();

        assert_eq!(report.schedules_fired, 1);
        assert_eq!(report.acknowledged, 1);
    }

    #[tokio::test]
    async fn spawned_loop_drains_queue_and_stops() {
        let queue = Arc::new(InMemoryQueueClient::new());
        let url = queue.create_queue("jobs");
        for _ in 0..5 {
            send(&queue, &url, "ok").await;
        }

        let config = LocalHostConfig::default()
            .with_poll_interval(Duration::from_millis(5))
            .with_batch_size(2);
        let handle = LocalHost::new(config, entry(), queue.clone(), &url).spawn();

        for _ in 0..100 {
            if queue.depth(&url) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.shutdown().await;

        assert_eq!(queue.depth(&url), 0);
        assert!(queue.dead_letters(&url).is_empty());
    }
}
