//! Polling host over Redis Streams.
//!
//! Same round as [`LocalHost`](super::LocalHost), against a
//! [`RedisStreamsQueueClient`]: promote due delayed entries, read a batch
//! through the consumer group, call the entry point, acknowledge successes and
//! release failures.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use courier_queue::{ClientError, ReleaseOutcome};

use super::entry_point::{WorkerEntryPoint, WorkerError};
use super::local_host::{batch_records, spawn_polling, LocalHostHandle, PollReport, Poller};
use crate::config::LocalHostConfig;
use crate::queue::redis_streams::{RedisStreamsQueueClient, StreamDelivery, DEFAULT_CONSUMER_GROUP};

pub struct RedisHost {
    config: LocalHostConfig,
    entry: Arc<WorkerEntryPoint>,
    client: Arc<RedisStreamsQueueClient>,
    queue_url: String,
    group: String,
    group_ready: OnceCell<()>,
}

impl core::fmt::Debug for RedisHost {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisHost")
            .field("config", &self.config)
            .field("queue_url", &self.queue_url)
            .field("group", &self.group)
            .finish()
    }
}

impl RedisHost {
    pub fn new(
        config: LocalHostConfig,
        entry: Arc<WorkerEntryPoint>,
        client: Arc<RedisStreamsQueueClient>,
        queue_url: impl Into<String>,
    ) -> Self {
        Self {
            config,
            entry,
            client,
            queue_url: queue_url.into(),
            group: DEFAULT_CONSUMER_GROUP.to_string(),
            group_ready: OnceCell::new(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// One round. Promoted delayed entries are reported as `schedules_fired`.
    ///
    /// The application is built before anything is read, so a wiring error
    /// never counts against a message's receive limit.
    pub async fn poll_once(&self) -> Result<PollReport, WorkerError> {
        let mut report = PollReport::default();
        self.entry.warm_up().await?;
        self.group_ready
            .get_or_try_init(|| self.client.ensure_group(&self.queue_url, &self.group))
            .await
            .map_err(WorkerError::Queue)?;

        match self.client.promote_due(&self.queue_url).await {
            Ok(promoted) => report.schedules_fired = promoted,
            Err(err) => warn!(error = %err, "failed to promote delayed messages"),
        }

        let deliveries = self
            .client
            .receive(&self.queue_url, &self.group, &self.config.name, self.config.batch_size)
            .await
            .map_err(WorkerError::Queue)?;
        report.received = deliveries.len();
        if deliveries.is_empty() {
            return Ok(report);
        }

        let response = match batch_records(deliveries.iter().map(|d| &d.message)) {
            Ok(records) => self.entry.handle_batch(records).await,
            Err(err) => Err(err),
        };
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                for d in &deliveries {
                    if let Err(release_err) = self.release(d).await {
                        warn!(entry_id = %d.entry_id, error = %release_err, "failed to release message");
                    }
                }
                return Err(err);
            }
        };

        let failed = response.failed_ids();
        for d in &deliveries {
            if !failed.contains(&d.message.message_id.as_str()) {
                self.client
                    .acknowledge(&self.queue_url, &self.group, &d.entry_id)
                    .await
                    .map_err(WorkerError::Queue)?;
                report.acknowledged += 1;
                continue;
            }
            match self.release(d).await? {
                ReleaseOutcome::Requeued => report.requeued += 1,
                ReleaseOutcome::DeadLettered => {
                    warn!(message_id = %d.message.message_id, receive_count = d.message.receive_count, "message moved to dead-letter stream");
                    report.dead_lettered += 1;
                }
                ReleaseOutcome::Unknown => {}
            }
        }

        debug!(?report, "poll finished");
        Ok(report)
    }

    async fn release(&self, delivery: &StreamDelivery) -> Result<ReleaseOutcome, ClientError> {
        self.client
            .release(
                &self.queue_url,
                &self.group,
                delivery,
                self.config.max_receive_count,
            )
            .await
    }

    /// Spawn the polling loop.
    pub fn spawn(self) -> LocalHostHandle {
        spawn_polling(self)
    }
}

#[async_trait]
impl Poller for RedisHost {
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

#[cfg(test)]
mod tests {
    use super::*;

    use courier_core::{JobError, RetrySpec};
    use courier_queue::{QueueClient, SendMessageRequest};
    use serde_json::json;
    use uuid::Uuid;

    use crate::jobs::{JobDefinition, JobModule, ModuleGraph};

    const QUEUE: &str = "http://localhost:4566/000000000000/jobs";

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

    // Skipped unless COURIER_TEST_REDIS_URL points at a server.
    fn live_client() -> Option<Arc<RedisStreamsQueueClient>> {
        let url = std::env::var("COURIER_TEST_REDIS_URL").ok()?;
        let prefix = format!("courier-test:{}:", Uuid::now_v7());
        Some(Arc::new(
            RedisStreamsQueueClient::new(url).unwrap().with_key_prefix(prefix),
        ))
    }

    async fn send(client: &RedisStreamsQueueClient, job: &str) {
        client
            .send_message(SendMessageRequest::new(QUEUE, json!({"jobName": job}).to_string()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn acknowledges_successes_and_redrives_failures() {
        let Some(client) = live_client() else { return };
        send(&client, "ok").await;
        send(&client, "flaky").await;

        let config = LocalHostConfig::default().with_max_receive_count(2);
        let host = RedisHost::new(config, entry(), client.clone(), QUEUE);

        let first = host.poll_once().await.unwrap();
        assert_eq!((first.received, first.acknowledged, first.requeued), (2, 1, 1));

        let second = host.poll_once().await.unwrap();
        assert_eq!((second.received, second.dead_lettered), (1, 1));

        assert_eq!(client.stream_len(QUEUE).await.unwrap(), 0);
        assert_eq!(client.dead_letter_len(QUEUE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn promotes_delayed_messages_before_receiving() {
        let Some(client) = live_client() else { return };
        let mut request = SendMessageRequest::new(QUEUE, json!({"jobName": "ok"}).to_string());
        request.delay_seconds = 1;
        client.send_message(request).await.unwrap();

        let host = RedisHost::new(LocalHostConfig::default(), entry(), client.clone(), QUEUE);
        assert_eq!(host.poll_once().await.unwrap().received, 0);

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let report = host.poll_once().await.unwrap();

        assert_eq!(report.schedules_fired, 1);
        assert_eq!(report.acknowledged, 1);
    }

    #[tokio::test]
    async fn failed_build_reads_nothing() {
        let Some(client) = live_client() else { return };
        send(&client, "ok").await;

        let broken = Arc::new(WorkerEntryPoint::new(|| {
            ModuleGraph::new().module(JobModule::new("app").import("missing"))
        }));
        let host = RedisHost::new(LocalHostConfig::default(), broken, client.clone(), QUEUE);

        assert!(host.poll_once().await.unwrap_err().is_config());

        let host = RedisHost::new(LocalHostConfig::default(), entry(), client.clone(), QUEUE);
        let report = host.poll_once().await.unwrap();
        assert_eq!((report.received, report.acknowledged), (1, 1));
    }
}
