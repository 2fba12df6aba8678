//! Primary queue driver for a managed message queue.
//!
//! - Queue resolution: explicit name, else default; names map to addresses
//!   through [`ManagedQueueConfig`], addresses pass through unchanged
//! - Ordered (`.fifo`) queues get a message group id (queue name, else job
//!   name) and use the job id as dedup id
//! - Delays up to the native cap use the queue's own delay; longer delays go
//!   through the [`SchedulerDriver`]
//!
//! All configuration problems surface before any network call.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use courier_core::{ConfigError, JobId};
use courier_queue::{
    ClientError, EnqueueResult, JobEnvelope, JobMessage, QueueClient, QueueDriver, QueueError,
    ScheduleResult, SendMessageRequest,
};

use super::address::is_fifo_url;
use super::client_slot::{ClientSlot, SlotError};
use super::scheduler::{ScheduledDelivery, SchedulerDriver};
use crate::config::ManagedQueueConfig;

/// Message prepared for sending: envelope serialized, queue resolved.
struct Prepared {
    queue_url: String,
    body: String,
    job_id: JobId,
    job_name: String,
    group_id: Option<String>,
}

#[derive(Debug)]
pub struct ManagedQueueDriver {
    config: ManagedQueueConfig,
    client: ClientSlot<dyn QueueClient>,
    scheduler: Option<SchedulerDriver>,
    disposed: AtomicBool,
}

impl ManagedQueueDriver {
    pub fn new<F>(config: ManagedQueueConfig, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn QueueClient>, ClientError> + Send + Sync + 'static,
    {
        Self {
            config,
            client: ClientSlot::new(factory),
            scheduler: None,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn with_client(config: ManagedQueueConfig, client: Arc<dyn QueueClient>) -> Self {
        Self {
            config,
            client: ClientSlot::from_client(client),
            scheduler: None,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerDriver) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn config(&self) -> &ManagedQueueConfig {
        &self.config
    }

    pub fn scheduler(&self) -> Option<&SchedulerDriver> {
        self.scheduler.as_ref()
    }

    fn ensure_live(&self) -> Result<(), QueueError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(QueueError::Disposed(self.config.driver_name.clone()));
        }
        Ok(())
    }

    fn client(&self) -> Result<Arc<dyn QueueClient>, QueueError> {
        self.client.get().map_err(|e| match e {
            SlotError::Disposed => QueueError::Disposed(self.config.driver_name.clone()),
            SlotError::Create(err) => QueueError::Client(err),
        })
    }

    fn prepare(&self, message: JobMessage, now: DateTime<Utc>) -> Result<Prepared, QueueError> {
        let (queue_name, queue_url) = self.config.resolve_queue(message.queue.as_deref())?;
        let group_id = is_fifo_url(&queue_url).then(|| {
            message
                .queue
                .clone()
                .unwrap_or_else(|| message.job_name.clone())
        });
        debug!(queue = queue_name, fifo = group_id.is_some(), "resolved queue");

        let job_id = message.job_id.clone().unwrap_or_else(JobId::generate);
        let body = JobEnvelope::for_message(&message, job_id.clone(), now).to_json()?;

        Ok(Prepared {
            queue_url,
            body,
            job_id,
            job_name: message.job_name,
            group_id,
        })
    }

    async fn send(&self, prepared: Prepared, delay_seconds: u32) -> Result<EnqueueResult, QueueError> {
        let client = self.client()?;
        let dedup_id = prepared
            .group_id
            .as_ref()
            .map(|_| prepared.job_id.as_str().to_string());

        let message_id = client
            .send_message(SendMessageRequest {
                queue_url: prepared.queue_url,
                body: prepared.body,
                delay_seconds,
                message_group_id: prepared.group_id,
                message_deduplication_id: dedup_id,
            })
            .await?;

        Ok(EnqueueResult {
            message_id,
            job_id: prepared.job_id,
        })
    }

    /// Branch on `delay` (already known to be positive).
    async fn deliver_later(
        &self,
        message: JobMessage,
        delay: Duration,
        fire_at: DateTime<Utc>,
    ) -> Result<ScheduleResult, QueueError> {
        let delay_secs = ceil_secs(delay);
        let cap = self.config.max_native_delay.as_secs();

        if delay_secs <= cap {
            let prepared = self.prepare(message, Utc::now())?;
            let delay_seconds = u32::try_from(delay_secs).unwrap_or(u32::MAX);
            debug!(delay_seconds, "using native queue delay");
            return self
                .send(prepared, delay_seconds)
                .await
                .map(ScheduleResult::immediate);
        }

        let scheduler = self.scheduler.as_ref().ok_or(ConfigError::SchedulerNotConfigured {
            delay_secs,
            max_native_secs: cap,
        })?;
        let prepared = self.prepare(message, Utc::now())?;
        let job_id = prepared.job_id.clone();
        let trigger = scheduler
            .schedule(ScheduledDelivery {
                queue_url: prepared.queue_url,
                body: prepared.body,
                job_name: prepared.job_name,
                job_id: prepared.job_id,
                fire_at,
                message_group_id: prepared.group_id,
            })
            .await?;

        Ok(ScheduleResult::scheduled(job_id, trigger))
    }
}

fn ceil_secs(delay: Duration) -> u64 {
    delay
        .as_secs()
        .saturating_add(u64::from(delay.subsec_nanos() > 0))
}

#[async_trait]
impl QueueDriver for ManagedQueueDriver {
    fn name(&self) -> &str {
        &self.config.driver_name
    }

    fn default_queue(&self) -> Option<&str> {
        self.config.default_queue.as_deref()
    }

    #[instrument(skip(self, message), fields(driver = %self.config.driver_name, job_name = %message.job_name), err)]
    async fn enqueue(&self, message: JobMessage) -> Result<EnqueueResult, QueueError> {
        self.ensure_live()?;
        let prepared = self.prepare(message, Utc::now())?;
        self.send(prepared, 0).await
    }

    #[instrument(skip(self, message), fields(driver = %self.config.driver_name, job_name = %message.job_name), err)]
    async fn enqueue_at(
        &self,
        message: JobMessage,
        at: DateTime<Utc>,
    ) -> Result<ScheduleResult, QueueError> {
        self.ensure_live()?;
        match (at - Utc::now()).to_std() {
            Ok(delay) if !delay.is_zero() => self.deliver_later(message, delay, at).await,
            _ => self.enqueue(message).await.map(ScheduleResult::immediate),
        }
    }

    #[instrument(skip(self, message), fields(driver = %self.config.driver_name, job_name = %message.job_name), err)]
    async fn enqueue_in(
        &self,
        message: JobMessage,
        delay: Duration,
    ) -> Result<ScheduleResult, QueueError> {
        self.ensure_live()?;
        if delay.is_zero() {
            return self.enqueue(message).await.map(ScheduleResult::immediate);
        }
        let fire_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.deliver_later(message, delay, fire_at).await
    }

    async fn cancel_schedule(&self, schedule_name: &str) -> Result<(), QueueError> {
        self.ensure_live()?;
        let scheduler = self
            .scheduler
            .as_ref()
            .ok_or_else(|| ConfigError::NoScheduler(self.config.driver_name.clone()))?;
        scheduler.cancel(schedule_name).await
    }

    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.client.dispose();
        if let Some(scheduler) = &self.scheduler {
            scheduler.dispose();
        }
        debug!(driver = %self.config.driver_name, "queue driver disposed");
    }
}
