//! Invocation events and responses exchanged with the host.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// One queue record inside a batch event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRecord {
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_handle: Option<String>,
    pub body: String,
    #[serde(default)]
    pub attributes: RecordAttributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_source: Option<String>,
    #[serde(
        rename = "eventSourceARN",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub event_source_arn: Option<String>,
}

/// System attributes; the host sends every value as a string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecordAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approximate_receive_count: Option<String>,
    /// Milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_deduplication_id: Option<String>,
}

impl QueueRecord {
    pub fn new(message_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            receipt_handle: None,
            body: body.into(),
            attributes: RecordAttributes::default(),
            event_source: None,
            event_source_arn: None,
        }
    }

    pub fn with_receive_count(mut self, count: u32) -> Self {
        self.attributes.approximate_receive_count = Some(count.to_string());
        self
    }

    pub fn with_sent_at(mut self, at: DateTime<Utc>) -> Self {
        self.attributes.sent_timestamp = Some(at.timestamp_millis().to_string());
        self
    }

    /// Delivery attempt (1-based); 1 when the host did not say.
    pub fn attempt(&self) -> u32 {
        self.attributes
            .approximate_receive_count
            .as_deref()
            .and_then(|c| c.trim().parse::<u32>().ok())
            .filter(|c| *c > 0)
            .unwrap_or(1)
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        let ms = self.attributes.sent_timestamp.as_deref()?.trim().parse::<i64>().ok()?;
        Utc.timestamp_millis_opt(ms).single()
    }
}

/// Records-array invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEvent {
    #[serde(rename = "Records")]
    pub records: Vec<QueueRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemFailure {
    pub item_identifier: String,
}

/// Partial-batch response: only the listed records are redelivered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub batch_item_failures: Vec<BatchItemFailure>,
}

impl BatchResponse {
    pub fn push_failure(&mut self, message_id: impl Into<String>) {
        self.batch_item_failures.push(BatchItemFailure {
            item_identifier: message_id.into(),
        });
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.batch_item_failures
            .iter()
            .map(|f| f.item_identifier.as_str())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.batch_item_failures.is_empty()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectStatus {
    Completed,
    Discarded,
}

/// Result of a direct/scheduled invocation that the host should not retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectResponse {
    pub job_id: String,
    pub job_name: String,
    pub status: DirectStatus,
    /// Why a discarded job failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InvocationResponse {
    Batch(BatchResponse),
    Direct(DirectResponse),
}
