//! Scheduler driver: delays beyond the queue's native cap.
//!
//! Each delayed job becomes a one-off `at(...)` schedule whose target is the
//! destination queue and whose input is the exact envelope body. Schedules
//! delete themselves after firing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use courier_core::JobId;
use courier_queue::{
    ClientError, CreateScheduleRequest, QueueError, ScheduleTarget, ScheduleTrigger,
    SchedulerClient,
};

use super::address::queue_arn_from_url;
use super::client_slot::{ClientSlot, SlotError};
use crate::config::SchedulerConfig;

const MAX_SCHEDULE_NAME_LEN: usize = 64;

const DRIVER_NAME: &str = "scheduler";

/// One delivery to hand to the scheduling service.
#[derive(Debug, Clone)]
pub struct ScheduledDelivery {
    pub queue_url: String,
    /// Serialized envelope, delivered verbatim.
    pub body: String,
    pub job_name: String,
    pub job_id: JobId,
    pub fire_at: DateTime<Utc>,
    pub message_group_id: Option<String>,
}

#[derive(Debug)]
pub struct SchedulerDriver {
    config: SchedulerConfig,
    client: ClientSlot<dyn SchedulerClient>,
}

impl SchedulerDriver {
    pub fn new<F>(config: SchedulerConfig, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn SchedulerClient>, ClientError> + Send + Sync + 'static,
    {
        Self {
            config,
            client: ClientSlot::new(factory),
        }
    }

    pub fn with_client(config: SchedulerConfig, client: Arc<dyn SchedulerClient>) -> Self {
        Self {
            config,
            client: ClientSlot::from_client(client),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn client(&self) -> Result<Arc<dyn SchedulerClient>, QueueError> {
        self.client.get().map_err(|e| match e {
            SlotError::Disposed => QueueError::Disposed(DRIVER_NAME.to_string()),
            SlotError::Create(err) => QueueError::Client(err),
        })
    }

    /// `{prefix}{job_name}-{job_id}`, restricted to `[A-Za-z0-9._-]` and
    /// 64 characters. The job id suffix survives truncation.
    pub fn schedule_name(&self, job_name: &str, job_id: &JobId) -> String {
        let suffix = format!("-{}", sanitize(job_id.as_str()));
        let head = sanitize(&format!("{}{}", self.config.name_prefix, job_name));

        let room = MAX_SCHEDULE_NAME_LEN.saturating_sub(suffix.len());
        let mut name: String = head.chars().take(room).collect();
        name.push_str(&suffix);
        name.chars().take(MAX_SCHEDULE_NAME_LEN).collect()
    }

    #[instrument(
        skip(self, delivery),
        fields(job_name = %delivery.job_name, job_id = %delivery.job_id, fire_at = %delivery.fire_at),
        err
    )]
    pub async fn schedule(&self, delivery: ScheduledDelivery) -> Result<ScheduleTrigger, QueueError> {
        let arn = queue_arn_from_url(&delivery.queue_url, &self.config.default_region)?;
        let name = self.schedule_name(&delivery.job_name, &delivery.job_id);
        let client = self.client()?;

        let request = CreateScheduleRequest {
            name: name.clone(),
            group_name: self.config.group_name.clone(),
            fire_at: delivery.fire_at,
            target: ScheduleTarget {
                arn,
                queue_url: delivery.queue_url,
                role_arn: self.config.role_arn.clone(),
                input: delivery.body,
                message_group_id: delivery.message_group_id,
            },
            delete_after_completion: true,
        };

        let schedule_arn = client.create_schedule(request).await?;
        info!(schedule_name = %name, "created one-off schedule");
        Ok(ScheduleTrigger {
            schedule_arn,
            schedule_name: name,
        })
    }

    #[instrument(skip(self), err)]
    pub async fn cancel(&self, schedule_name: &str) -> Result<(), QueueError> {
        let client = self.client()?;
        client
            .delete_schedule(schedule_name, self.config.group_name.as_deref())
            .await?;
        info!(schedule_name, "cancelled schedule");
        Ok(())
    }

    pub fn dispose(&self) {
        self.client.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.client.is_disposed()
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use courier_queue::InMemorySchedulerClient;

    fn driver(config: SchedulerConfig) -> (SchedulerDriver, Arc<InMemorySchedulerClient>) {
        let client = Arc::new(InMemorySchedulerClient::new());
        let driver = SchedulerDriver::with_client(config, client.clone());
        (driver, client)
    }

    fn delivery(job_name: &str) -> ScheduledDelivery {
        ScheduledDelivery {
            queue_url: "https://sqs.us-east-1.amazonaws.com/123456789012/jobs".into(),
            body: r#"{"jobName":"x"}"#.into(),
            job_name: job_name.into(),
            job_id: JobId::from("0192b6c4-aaaa-7bbb-8ccc-123456789abc"),
            fire_at: Utc::now() + ChronoDuration::hours(2),
            message_group_id: None,
        }
    }

    #[test]
    fn names_are_sanitized_and_bounded() {
        let (driver, _) = driver(SchedulerConfig::default().with_name_prefix("app/"));
        let id = JobId::from("0192b6c4-aaaa-7bbb-8ccc-123456789abc");

        assert_eq!(
            driver.schedule_name("send email", &id),
            "app-send-email-0192b6c4-aaaa-7bbb-8ccc-123456789abc"
        );

        let long = driver.schedule_name(&"x".repeat(100), &id);
        assert_eq!(long.len(), 64);
        assert!(long.ends_with("-0192b6c4-aaaa-7bbb-8ccc-123456789abc"));
    }

    #[tokio::test]
    async fn schedule_targets_queue_arn_and_self_deletes() {
        let config = SchedulerConfig::default()
            .with_role_arn("arn:aws:iam::123456789012:role/scheduler")
            .with_group_name("jobs");
        let (driver, client) = driver(config);

        let trigger = driver.schedule(delivery("report")).await.unwrap();

        let schedules = client.schedules();
        assert_eq!(schedules.len(), 1);
        let created = &schedules[0];
        assert_eq!(created.name, trigger.schedule_name);
        assert_eq!(created.group_name.as_deref(), Some("jobs"));
        assert!(created.delete_after_completion);
        assert_eq!(created.target.arn, "arn:aws:sqs:us-east-1:123456789012:jobs");
        assert_eq!(created.target.input, r#"{"jobName":"x"}"#);
        assert!(created.schedule_expression().starts_with("at("));
    }

    #[tokio::test]
    async fn cancel_deletes_pending_schedule() {
        let (driver, client) = driver(SchedulerConfig::default());
        let trigger = driver.schedule(delivery("report")).await.unwrap();

        driver.cancel(&trigger.schedule_name).await.unwrap();
        assert!(client.schedules().is_empty());
        assert!(matches!(
            driver.cancel(&trigger.schedule_name).await,
            Err(QueueError::Client(ClientError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn malformed_address_fails_before_any_call() {
        let (driver, client) = driver(SchedulerConfig::default());
        let mut d = delivery("report");
        d.queue_url = "not-a-url".into();

        assert!(matches!(driver.schedule(d).await, Err(QueueError::Config(_))));
        assert!(client.schedules().is_empty());
    }

    #[tokio::test]
    async fn disposed_driver_refuses_work() {
        let (driver, _) = driver(SchedulerConfig::default());
        driver.dispose();

        assert!(driver.is_disposed());
        assert!(matches!(
            driver.schedule(delivery("report")).await,
            Err(QueueError::Disposed(_))
        ));
    }
}
