//! Producer-facing queue driver abstraction.
//!
//! A `QueueDriver` is what application code holds to submit work. It hides
//! which queue the work lands on and how delays are realized (native queue
//! delay vs. an external scheduling service).
//!
//! ## Delivery guarantees
//!
//! Drivers provide **at-least-once** delivery. A job may run more than once;
//! handlers must be idempotent or declare a uniqueness key so ordered queues
//! can deduplicate.
//!
//! ## Optional operations
//!
//! Only `enqueue` is mandatory. `enqueue_at`, `enqueue_in` and
//! `cancel_schedule` default to [`QueueError::Unsupported`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use courier_core::ConfigError;

use crate::client::ClientError;
use crate::envelope::{EnqueueResult, JobMessage, ScheduleResult};

/// Producer-side failure.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Wiring mistake; fatal, never retried.
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("driver `{0}` has been disposed")]
    Disposed(String),

    #[error("driver `{driver}` does not support {operation}")]
    Unsupported {
        driver: String,
        operation: &'static str,
    },

    #[error("failed to serialize job envelope: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl QueueError {
    pub fn unsupported(driver: impl Into<String>, operation: &'static str) -> Self {
        Self::Unsupported {
            driver: driver.into(),
            operation,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, QueueError::Config(_))
    }
}

#[async_trait]
pub trait QueueDriver: Send + Sync {
    /// Identity used in logs and errors.
    fn name(&self) -> &str;

    /// Queue used when a message does not name one.
    fn default_queue(&self) -> Option<&str>;

    async fn enqueue(&self, message: JobMessage) -> Result<EnqueueResult, QueueError>;

    /// Deliver no earlier than `at`. Past instants behave like `enqueue`.
    async fn enqueue_at(
        &self,
        message: JobMessage,
        at: DateTime<Utc>,
    ) -> Result<ScheduleResult, QueueError> {
        let _ = (message, at);
        Err(QueueError::unsupported(self.name(), "enqueue_at"))
    }

    /// Deliver after `delay`.
    async fn enqueue_in(
        &self,
        message: JobMessage,
        delay: Duration,
    ) -> Result<ScheduleResult, QueueError> {
        let _ = (message, delay);
        Err(QueueError::unsupported(self.name(), "enqueue_in"))
    }

    /// Cancel a delivery previously routed through the scheduling service.
    async fn cancel_schedule(&self, schedule_name: &str) -> Result<(), QueueError> {
        let _ = schedule_name;
        Err(QueueError::unsupported(self.name(), "cancel_schedule"))
    }

    /// Release network clients; later calls fail with [`QueueError::Disposed`].
    async fn dispose(&self) {}
}

#[async_trait]
impl<D> QueueDriver for Arc<D>
where
    D: QueueDriver + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn default_queue(&self) -> Option<&str> {
        (**self).default_queue()
    }

    async fn enqueue(&self, message: JobMessage) -> Result<EnqueueResult, QueueError> {
        (**self).enqueue(message).await
    }

    async fn enqueue_at(
        &self,
        message: JobMessage,
        at: DateTime<Utc>,
    ) -> Result<ScheduleResult, QueueError> {
        (**self).enqueue_at(message, at).await
    }

    async fn enqueue_in(
        &self,
        message: JobMessage,
        delay: Duration,
    ) -> Result<ScheduleResult, QueueError> {
        (**self).enqueue_in(message, delay).await
    }

    async fn cancel_schedule(&self, schedule_name: &str) -> Result<(), QueueError> {
        (**self).cancel_schedule(schedule_name).await
    }

    async fn dispose(&self) {
        (**self).dispose().await
    }
}
