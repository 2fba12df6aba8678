//! Network client contracts for the queue and the scheduling service.
//!
//! Drivers talk to the outside world only through these traits. Production
//! deployments plug in an SDK-backed implementation; tests and local
//! development use the in-memory clients from [`crate::in_memory`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Failure reported by a queue or scheduler client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("{operation} failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Conflict(String),
}

impl ClientError {
    pub fn request(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Request {
            operation,
            message: message.into(),
        }
    }
}

/// One `SendMessage` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessageRequest {
    pub queue_url: String,
    pub body: String,
    /// Native delivery delay; 0 for immediate.
    pub delay_seconds: u32,
    /// Required by ordered (FIFO) queues.
    pub message_group_id: Option<String>,
    /// Required by ordered (FIFO) queues without content-based dedup.
    pub message_deduplication_id: Option<String>,
}

impl SendMessageRequest {
    pub fn new(queue_url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            queue_url: queue_url.into(),
            body: body.into(),
            delay_seconds: 0,
            message_group_id: None,
            message_deduplication_id: None,
        }
    }
}

/// Producer side of a managed message queue.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Send one message; returns the queue-assigned message id.
    async fn send_message(&self, request: SendMessageRequest) -> Result<String, ClientError>;
}

/// Target of a one-off schedule: deliver `input` to a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleTarget {
    /// Resource identifier of the destination queue.
    pub arn: String,
    /// Address the identifier was derived from.
    pub queue_url: String,
    /// Role the scheduling service assumes to send the message.
    pub role_arn: Option<String>,
    /// Message body delivered when the schedule fires.
    pub input: String,
    pub message_group_id: Option<String>,
}

/// One `CreateSchedule` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateScheduleRequest {
    pub name: String,
    pub group_name: Option<String>,
    pub fire_at: DateTime<Utc>,
    pub target: ScheduleTarget,
    /// Remove the schedule once it has fired.
    pub delete_after_completion: bool,
}

impl CreateScheduleRequest {
    /// One-off expression, e.g. `at(2026-10-18T12:30:00)`, interpreted in UTC.
    pub fn schedule_expression(&self) -> String {
        format!("at({})", self.fire_at.format("%Y-%m-%dT%H:%M:%S"))
    }

    pub fn schedule_expression_timezone(&self) -> &'static str {
        "UTC"
    }
}

/// Client for the external scheduling service.
#[async_trait]
pub trait SchedulerClient: Send + Sync {
    /// Create a schedule; returns its identifier.
    async fn create_schedule(&self, request: CreateScheduleRequest) -> Result<String, ClientError>;

    async fn delete_schedule(&self, name: &str, group_name: Option<&str>)
        -> Result<(), ClientError>;
}
