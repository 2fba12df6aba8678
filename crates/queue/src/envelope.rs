//! Wire envelope and producer-facing message/result types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use courier_core::JobId;

/// Queue message body.
///
/// `jobName` is the only required field. Everything else is optional on the
/// way in; producers in this workspace always fill `jobId` and `enqueuedAt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    pub job_name: String,
    #[serde(default)]
    pub payload: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enqueued_at: Option<DateTime<Utc>>,
}

/// Why a message body could not be turned into a [`JobEnvelope`].
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("message body is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("message body is not a JSON object")]
    NotAnObject,

    #[error("message body has no string `jobName`")]
    MissingJobName,

    #[error("message body is malformed: {0}")]
    Malformed(#[source] serde_json::Error),
}

impl JobEnvelope {
    /// Build the envelope a producer sends for `message`.
    pub fn for_message(message: &JobMessage, job_id: JobId, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            job_name: message.job_name.clone(),
            payload: message.payload.clone(),
            job_id: Some(job_id),
            metadata: message.metadata.clone(),
            enqueued_at: Some(enqueued_at),
        }
    }

    /// Parse a raw message body.
    pub fn from_json(body: &str) -> Result<Self, EnvelopeError> {
        let value: JsonValue = serde_json::from_str(body).map_err(EnvelopeError::InvalidJson)?;
        Self::from_value(value)
    }

    /// Validate the minimum shape (`jobName` string) and decode.
    pub fn from_value(value: JsonValue) -> Result<Self, EnvelopeError> {
        let obj = value.as_object().ok_or(EnvelopeError::NotAnObject)?;
        match obj.get("jobName") {
            Some(JsonValue::String(name)) if !name.is_empty() => {}
            _ => return Err(EnvelopeError::MissingJobName),
        }
        serde_json::from_value(value).map_err(EnvelopeError::Malformed)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// What producer code hands to a queue driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    pub job_name: String,
    #[serde(default)]
    pub payload: JsonValue,
    /// Overrides the driver's default queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl JobMessage {
    pub fn new(job_name: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            job_name: job_name.into(),
            payload,
            queue: None,
            job_id: None,
            metadata: None,
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_job_id(mut self, job_id: impl Into<JobId>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Returned from a successful enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResult {
    pub message_id: String,
    pub job_id: JobId,
}

/// Handle on a pending one-off trigger created by the scheduling service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleTrigger {
    pub schedule_arn: String,
    /// Pass this to `cancel_schedule`.
    pub schedule_name: String,
}

/// Returned from `enqueue_at` / `enqueue_in`.
///
/// `trigger` is set only when the delay exceeded the queue's native cap and
/// the scheduling service was used; `message_id` is then the trigger's
/// identifier because the queue message does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleResult {
    #[serde(flatten)]
    pub enqueued: EnqueueResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<ScheduleTrigger>,
}

impl ScheduleResult {
    pub fn immediate(enqueued: EnqueueResult) -> Self {
        Self {
            enqueued,
            trigger: None,
        }
    }

    pub fn scheduled(job_id: JobId, trigger: ScheduleTrigger) -> Self {
        Self {
            enqueued: EnqueueResult {
                message_id: trigger.schedule_arn.clone(),
                job_id,
            },
            trigger: Some(trigger),
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.trigger.is_some()
    }

    pub fn job_id(&self) -> &JobId {
        &self.enqueued.job_id
    }
}
