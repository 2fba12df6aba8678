//! Redis Streams-backed queue client (durable, at-least-once delivery).
//!
//! Lets the managed queue driver run against Redis instead of a cloud queue:
//! - **Immediate sends**: `XADD` onto one stream per queue
//! - **Native delays**: a `:delayed` sorted set scored by due time (ms);
//!   [`RedisStreamsQueueClient::promote_due`] moves due entries onto the stream
//! - **Ordered-queue dedup**: `SET NX EX` on a per-dedup-id key; a repeated id
//!   within the window returns the original message id
//! - **Consumption**: one consumer group per stream (`XREADGROUP`); acknowledged
//!   entries are removed, released entries are re-added with a bumped receive
//!   count or moved to the dead-letter stream once the limit is reached
//!
//! ## Keys
//!
//! - **Stream**: `{prefix}{queue}` where `queue` is the last segment of the
//!   queue address (`courier:jobs` for `http://localhost:4566/0/jobs`)
//! - **Delayed set**: `{stream}:delayed`
//! - **Dedup**: `{stream}:dedup:{id}`
//! - **Dead letters**: `{stream}:dead`

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use courier_queue::{ClientError, QueueClient, ReceivedMessage, ReleaseOutcome, SendMessageRequest};

const DEFAULT_KEY_PREFIX: &str = "courier:";

/// Dedup window for ordered queues.
const DEFAULT_DEDUP_TTL_SECS: u64 = 300;

/// Consumer group every worker reads through.
pub const DEFAULT_CONSUMER_GROUP: &str = "courier-workers";

/// Entry parked in the delayed set.
#[derive(Debug, Serialize, Deserialize)]
struct DelayedEntry {
    message_id: String,
    body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message_group_id: Option<String>,
}

/// A message read from a stream, with the entry id needed to settle it.
#[derive(Debug, Clone)]
pub struct StreamDelivery {
    pub entry_id: String,
    pub message: ReceivedMessage,
}

#[derive(Debug, Clone)]
pub struct RedisStreamsQueueClient {
    client: Arc<redis::Client>,
    key_prefix: String,
    dedup_ttl_secs: u64,
}

fn connection_err(e: redis::RedisError) -> ClientError {
    ClientError::Connection(e.to_string())
}

impl RedisStreamsQueueClient {
    /// `redis_url` e.g. `redis://localhost:6379`.
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, ClientError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(connection_err)?;
        Ok(Self {
            client: Arc::new(client),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            dedup_ttl_secs: DEFAULT_DEDUP_TTL_SECS,
        })
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_dedup_ttl_secs(mut self, secs: u64) -> Self {
        self.dedup_ttl_secs = secs.max(1);
        self
    }

    /// Stream key for a queue address (or bare queue name).
    pub fn stream_key(&self, queue_url: &str) -> String {
        let name = queue_url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(queue_url);
        format!("{}{}", self.key_prefix, name)
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, ClientError>
    where
        T: Send + 'static,
        F: FnOnce(&mut redis::Connection) -> Result<T, ClientError> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || {
            let mut conn = client.get_connection().map_err(connection_err)?;
            op(&mut conn)
        })
        .await
        .map_err(|e| ClientError::Connection(format!("redis task failed: {e}")))?
    }

    /// Move every delayed entry due now onto the stream. Returns how many moved.
    #[instrument(skip(self), err)]
    pub async fn promote_due(&self, queue_url: &str) -> Result<usize, ClientError> {
        let stream = self.stream_key(queue_url);
        let now_ms = Utc::now().timestamp_millis();

        self.blocking(move |conn| {
            let delayed_key = format!("{stream}:delayed");
            let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
                .arg(&delayed_key)
                .arg("-inf")
                .arg(now_ms)
                .query(conn)
                .map_err(|e| ClientError::request("ZRANGEBYSCORE", e.to_string()))?;

            let mut moved = 0;
            for raw in due {
                // Only the caller that removes the entry delivers it.
                let removed: u64 = redis::cmd("ZREM")
                    .arg(&delayed_key)
                    .arg(&raw)
                    .query(conn)
                    .map_err(|e| ClientError::request("ZREM", e.to_string()))?;
                if removed == 0 {
                    continue;
                }
                let entry: DelayedEntry = serde_json::from_str(&raw)
                    .map_err(|e| ClientError::request("promote", e.to_string()))?;
                xadd(conn, &stream, &entry.message_id, &entry.body, entry.message_group_id.as_deref())?;
                moved += 1;
            }
            Ok(moved)
        })
        .await
    }

    /// Number of entries on the queue's stream.
    pub async fn stream_len(&self, queue_url: &str) -> Result<u64, ClientError> {
        let stream = self.stream_key(queue_url);
        self.blocking(move |conn| {
            redis::cmd("XLEN")
                .arg(&stream)
                .query(conn)
                .map_err(|e| ClientError::request("XLEN", e.to_string()))
        })
        .await
    }

    /// Number of entries on the queue's dead-letter stream.
    pub async fn dead_letter_len(&self, queue_url: &str) -> Result<u64, ClientError> {
        let dead = format!("{}:dead", self.stream_key(queue_url));
        self.blocking(move |conn| {
            redis::cmd("XLEN")
                .arg(&dead)
                .query(conn)
                .map_err(|e| ClientError::request("XLEN", e.to_string()))
        })
        .await
    }

    /// Create the consumer group (and the stream) if missing.
    pub async fn ensure_group(&self, queue_url: &str, group: &str) -> Result<(), ClientError> {
        let stream = self.stream_key(queue_url);
        let group = group.to_string();
        self.blocking(move |conn| {
            // BUSYGROUP when it already exists.
            let _: Result<String, _> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(&stream)
                .arg(&group)
                .arg("0")
                .arg("MKSTREAM")
                .query(conn);
            Ok(())
        })
        .await
    }

    /// Read up to `max` entries for `consumer`: its own unsettled entries
    /// first, then new ones.
    #[instrument(skip(self), err)]
    pub async fn receive(
        &self,
        queue_url: &str,
        group: &str,
        consumer: &str,
        max: usize,
    ) -> Result<Vec<StreamDelivery>, ClientError> {
        let stream = self.stream_key(queue_url);
        let group = group.to_string();
        let consumer = consumer.to_string();

        self.blocking(move |conn| {
            let pending = read_group(conn, &stream, &group, &consumer, max, "0")?;
            if !pending.is_empty() {
                return Ok(pending);
            }
            read_group(conn, &stream, &group, &consumer, max, ">")
        })
        .await
    }

    /// Settle a delivery: acknowledge and drop the entry.
    pub async fn acknowledge(
        &self,
        queue_url: &str,
        group: &str,
        entry_id: &str,
    ) -> Result<(), ClientError> {
        let stream = self.stream_key(queue_url);
        let group = group.to_string();
        let entry_id = entry_id.to_string();
        self.blocking(move |conn| {
            redis::pipe()
                .atomic()
                .cmd("XACK")
                .arg(&stream)
                .arg(&group)
                .arg(&entry_id)
                .ignore()
                .cmd("XDEL")
                .arg(&stream)
                .arg(&entry_id)
                .ignore()
                .query::<()>(conn)
                .map_err(|e| ClientError::request("XACK", e.to_string()))
        })
        .await
    }

    /// Hand a failed delivery back: re-added with the next receive count, or
    /// moved to the dead-letter stream once `max_receive_count` is reached.
    #[instrument(skip(self, delivery), fields(entry_id = %delivery.entry_id), err)]
    pub async fn release(
        &self,
        queue_url: &str,
        group: &str,
        delivery: &StreamDelivery,
        max_receive_count: u32,
    ) -> Result<ReleaseOutcome, ClientError> {
        let stream = self.stream_key(queue_url);
        let group = group.to_string();
        let entry_id = delivery.entry_id.clone();
        let message = delivery.message.clone();

        self.blocking(move |conn| {
            let dead = message.receive_count >= max_receive_count;
            let (target, receives) = if dead {
                (format!("{stream}:dead"), message.receive_count)
            } else {
                (stream.clone(), message.receive_count + 1)
            };

            let mut pipe = redis::pipe();
            pipe.atomic();
            let add = pipe.cmd("XADD").arg(&target).arg("*");
            add.arg("message_id")
                .arg(&message.message_id)
                .arg("body")
                .arg(&message.body)
                .arg("receives")
                .arg(receives)
                .arg("sent_at")
                .arg(message.sent_at.timestamp_millis());
            if let Some(group_id) = &message.message_group_id {
                add.arg("message_group_id").arg(group_id);
            }
            add.ignore();
            pipe.cmd("XACK")
                .arg(&stream)
                .arg(&group)
                .arg(&entry_id)
                .ignore()
                .cmd("XDEL")
                .arg(&stream)
                .arg(&entry_id)
                .ignore();
            pipe.query::<()>(conn)
                .map_err(|e| ClientError::request("release", e.to_string()))?;

            Ok(if dead {
                ReleaseOutcome::DeadLettered
            } else {
                ReleaseOutcome::Requeued
            })
        })
        .await
    }
}

fn read_group(
    conn: &mut redis::Connection,
    stream: &str,
    group: &str,
    consumer: &str,
    max: usize,
    from: &str,
) -> Result<Vec<StreamDelivery>, ClientError> {
    let reply: redis::Value = redis::cmd("XREADGROUP")
        .arg("GROUP")
        .arg(group)
        .arg(consumer)
        .arg("COUNT")
        .arg(max.max(1))
        .arg("STREAMS")
        .arg(stream)
        .arg(from)
        .query(conn)
        .map_err(|e| ClientError::request("XREADGROUP", e.to_string()))?;
    parse_read_reply(reply)
}

/// `[[stream, [[id, [field, value, ..]], ..]]]`, or nil when nothing is ready.
fn parse_read_reply(reply: redis::Value) -> Result<Vec<StreamDelivery>, ClientError> {
    let streams = match reply {
        redis::Value::Nil => return Ok(Vec::new()),
        redis::Value::Bulk(streams) => streams,
        other => return Err(malformed(format!("unexpected reply {other:?}"))),
    };

    let mut deliveries = Vec::new();
    for stream in streams {
        let entries = match stream {
            redis::Value::Bulk(mut parts) if parts.len() == 2 => parts.swap_remove(1),
            other => return Err(malformed(format!("unexpected stream {other:?}"))),
        };
        let redis::Value::Bulk(entries) = entries else {
            return Err(malformed("entries are not a list".to_string()));
        };
        for entry in entries {
            // Entries deleted while pending come back with nil fields.
            if let Some(delivery) = parse_entry(entry)? {
                deliveries.push(delivery);
            }
        }
    }
    Ok(deliveries)
}

fn parse_entry(entry: redis::Value) -> Result<Option<StreamDelivery>, ClientError> {
    let redis::Value::Bulk(parts) = entry else {
        return Err(malformed("entry is not a list".to_string()));
    };
    let mut parts = parts.into_iter();
    let entry_id = match parts.next() {
        Some(redis::Value::Data(id)) => String::from_utf8_lossy(&id).into_owned(),
        _ => return Err(malformed("entry without id".to_string())),
    };
    let raw_fields = match parts.next() {
        Some(redis::Value::Bulk(fields)) => fields,
        Some(redis::Value::Nil) | None => return Ok(None),
        Some(other) => return Err(malformed(format!("unexpected fields {other:?}"))),
    };

    let mut fields = HashMap::new();
    for pair in raw_fields.chunks(2) {
        if let [redis::Value::Data(key), redis::Value::Data(value)] = pair {
            fields.insert(
                String::from_utf8_lossy(key).into_owned(),
                String::from_utf8_lossy(value).into_owned(),
            );
        }
    }

    let body = fields
        .remove("body")
        .ok_or_else(|| malformed(format!("entry {entry_id} has no body")))?;
    let message_id = fields.remove("message_id").unwrap_or_else(|| entry_id.clone());
    let receive_count = fields
        .get("receives")
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);
    let sent_at = fields
        .get("sent_at")
        .and_then(|v| v.parse().ok())
        .or_else(|| entry_millis(&entry_id))
        .and_then(millis_to_time)
        .unwrap_or_else(Utc::now);

    Ok(Some(StreamDelivery {
        entry_id,
        message: ReceivedMessage {
            message_id,
            body,
            receive_count,
            sent_at,
            message_group_id: fields.remove("message_group_id"),
        },
    }))
}

/// Entry ids are `<unix millis>-<seq>`.
fn entry_millis(entry_id: &str) -> Option<i64> {
    entry_id.split('-').next()?.parse().ok()
}

fn millis_to_time(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

fn malformed(message: String) -> ClientError {
    ClientError::request("XREADGROUP", message)
}

fn xadd(
    conn: &mut redis::Connection,
    stream: &str,
    message_id: &str,
    body: &str,
    group: Option<&str>,
) -> Result<String, ClientError> {
    let mut cmd = redis::cmd("XADD");
    cmd.arg(stream)
        .arg("*")
        .arg("message_id")
        .arg(message_id)
        .arg("body")
        .arg(body);
    if let Some(group) = group {
        cmd.arg("message_group_id").arg(group);
    }
    cmd.query(conn)
        .map_err(|e| ClientError::request("XADD", e.to_string()))
}

#[async_trait]
impl QueueClient for RedisStreamsQueueClient {
    #[instrument(skip(self, request), fields(queue_url = %request.queue_url, delay = request.delay_seconds), err)]
    async fn send_message(&self, request: SendMessageRequest) -> Result<String, ClientError> {
        let stream = self.stream_key(&request.queue_url);
        let ttl = self.dedup_ttl_secs;

        let message_id = self
            .blocking(move |conn| {
                let message_id = Uuid::now_v7().to_string();

                if let Some(dedup_id) = &request.message_deduplication_id {
                    let dedup_key = format!("{stream}:dedup:{dedup_id}");
                    let claimed: Option<String> = redis::cmd("SET")
                        .arg(&dedup_key)
                        .arg(&message_id)
                        .arg("NX")
                        .arg("EX")
                        .arg(ttl)
                        .query(conn)
                        .map_err(|e| ClientError::request("SET", e.to_string()))?;
                    if claimed.is_none() {
                        let original: Option<String> = redis::cmd("GET")
                            .arg(&dedup_key)
                            .query(conn)
                            .map_err(|e| ClientError::request("GET", e.to_string()))?;
                        return Ok(original.unwrap_or(message_id));
                    }
                }

                if request.delay_seconds > 0 {
                    let due_ms =
                        Utc::now().timestamp_millis() + i64::from(request.delay_seconds) * 1000;
                    let entry = serde_json::to_string(&DelayedEntry {
                        message_id: message_id.clone(),
                        body: request.body,
                        message_group_id: request.message_group_id,
                    })
                    .map_err(|e| ClientError::request("ZADD", e.to_string()))?;
                    let _: u64 = redis::cmd("ZADD")
                        .arg(format!("{stream}:delayed"))
                        .arg(due_ms)
                        .arg(entry)
                        .query(conn)
                        .map_err(|e| ClientError::request("ZADD", e.to_string()))?;
                } else {
                    xadd(
                        conn,
                        &stream,
                        &message_id,
                        &request.body,
                        request.message_group_id.as_deref(),
                    )?;
                }
                Ok(message_id)
            })
            .await?;

        debug!(message_id = %message_id, "message sent to redis stream");
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_key_uses_last_address_segment() {
        let client = RedisStreamsQueueClient::new("redis://localhost:6379").unwrap();

        assert_eq!(
            client.stream_key("http://localhost:4566/000000000000/jobs"),
            "courier:jobs"
        );
        assert_eq!(client.stream_key("jobs.fifo/"), "courier:jobs.fifo");
        assert_eq!(
            client.with_key_prefix("app:").stream_key("mail"),
            "app:mail"
        );
    }

    #[test]
    fn invalid_url_is_connection_error() {
        assert!(matches!(
            RedisStreamsQueueClient::new("not a url"),
            Err(ClientError::Connection(_))
        ));
    }

    fn data(s: &str) -> redis::Value {
        redis::Value::Data(s.as_bytes().to_vec())
    }

    fn entry(id: &str, fields: &[(&str, &str)]) -> redis::Value {
        let fields = fields
            .iter()
            .flat_map(|(k, v)| [data(k), data(v)])
            .collect();
        redis::Value::Bulk(vec![data(id), redis::Value::Bulk(fields)])
    }

    #[test]
    fn read_reply_maps_entries_to_deliveries() {
        let reply = redis::Value::Bulk(vec![redis::Value::Bulk(vec![
            data("courier:jobs"),
            redis::Value::Bulk(vec![
                entry("1700000000000-0", &[("message_id", "m-1"), ("body", "{}")]),
                entry(
                    "1700000000500-1",
                    &[
                        ("message_id", "m-2"),
                        ("body", "[]"),
                        ("receives", "3"),
                        ("sent_at", "1600000000000"),
                        ("message_group_id", "g"),
                    ],
                ),
                redis::Value::Bulk(vec![data("1700000000600-0"), redis::Value::Nil]),
            ]),
        ])]);

        let deliveries = parse_read_reply(reply).unwrap();
        assert_eq!(deliveries.len(), 2);

        let first = &deliveries[0];
        assert_eq!(first.entry_id, "1700000000000-0");
        assert_eq!(first.message.message_id, "m-1");
        assert_eq!(first.message.receive_count, 1);
        assert_eq!(first.message.sent_at.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(first.message.message_group_id, None);

        let second = &deliveries[1].message;
        assert_eq!(second.body, "[]");
        assert_eq!(second.receive_count, 3);
        assert_eq!(second.sent_at.timestamp_millis(), 1_600_000_000_000);
        assert_eq!(second.message_group_id.as_deref(), Some("g"));
    }

    #[test]
    fn nil_read_reply_is_empty_and_bodyless_entry_is_rejected() {
        assert!(parse_read_reply(redis::Value::Nil).unwrap().is_empty());

        let reply = redis::Value::Bulk(vec![redis::Value::Bulk(vec![
            data("courier:jobs"),
            redis::Value::Bulk(vec![entry("1-0", &[("message_id", "m-1")])]),
        ])]);
        assert!(matches!(
            parse_read_reply(reply),
            Err(ClientError::Request { operation: "XREADGROUP", .. })
        ));
    }

    // The tests below talk to a real server and are skipped unless
    // COURIER_TEST_REDIS_URL is set (e.g. redis://127.0.0.1:6379).
    fn live_client() -> Option<RedisStreamsQueueClient> {
        let url = std::env::var("COURIER_TEST_REDIS_URL").ok()?;
        let prefix = format!("courier-test:{}:", Uuid::now_v7());
        Some(RedisStreamsQueueClient::new(url).unwrap().with_key_prefix(prefix))
    }

    const QUEUE: &str = "http://localhost:4566/000000000000/jobs";

    #[tokio::test]
    async fn sent_message_is_received_once_and_acknowledged() {
        let Some(client) = live_client() else { return };
        client.ensure_group(QUEUE, DEFAULT_CONSUMER_GROUP).await.unwrap();

        let id = client
            .send_message(SendMessageRequest::new(QUEUE, r#"{"jobName":"echo"}"#))
            .await
            .unwrap();
        assert_eq!(client.stream_len(QUEUE).await.unwrap(), 1);

        let batch = client.receive(QUEUE, DEFAULT_CONSUMER_GROUP, "w-1", 10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].message.message_id, id);
        assert_eq!(batch[0].message.receive_count, 1);
        assert!(client
            .receive(QUEUE, DEFAULT_CONSUMER_GROUP, "w-2", 10)
            .await
            .unwrap()
            .is_empty());

        client
            .acknowledge(QUEUE, DEFAULT_CONSUMER_GROUP, &batch[0].entry_id)
            .await
            .unwrap();
        assert_eq!(client.stream_len(QUEUE).await.unwrap(), 0);
        assert!(client
            .receive(QUEUE, DEFAULT_CONSUMER_GROUP, "w-1", 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn repeated_dedup_id_returns_original_message() {
        let Some(client) = live_client() else { return };
        let request = || {
            let mut request = SendMessageRequest::new(QUEUE, "{}");
            request.message_group_id = Some("g".into());
            request.message_deduplication_id = Some("job-1".into());
            request
        };

        let first = client.send_message(request()).await.unwrap();
        let second = client.send_message(request()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(client.stream_len(QUEUE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delayed_message_waits_for_promotion() {
        let Some(client) = live_client() else { return };
        let mut request = SendMessageRequest::new(QUEUE, "{}");
        request.delay_seconds = 1;
        client.send_message(request).await.unwrap();

        assert_eq!(client.promote_due(QUEUE).await.unwrap(), 0);
        assert_eq!(client.stream_len(QUEUE).await.unwrap(), 0);

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert_eq!(client.promote_due(QUEUE).await.unwrap(), 1);
        assert_eq!(client.promote_due(QUEUE).await.unwrap(), 0);
        assert_eq!(client.stream_len(QUEUE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn released_message_is_redelivered_then_dead_lettered() {
        let Some(client) = live_client() else { return };
        client.ensure_group(QUEUE, DEFAULT_CONSUMER_GROUP).await.unwrap();
        let id = client
            .send_message(SendMessageRequest::new(QUEUE, "{}"))
            .await
            .unwrap();

        let first = client.receive(QUEUE, DEFAULT_CONSUMER_GROUP, "w-1", 1).await.unwrap();
        let outcome = client
            .release(QUEUE, DEFAULT_CONSUMER_GROUP, &first[0], 2)
            .await
            .unwrap();
        assert_eq!(outcome, ReleaseOutcome::Requeued);

        let second = client.receive(QUEUE, DEFAULT_CONSUMER_GROUP, "w-1", 1).await.unwrap();
        assert_eq!(second[0].message.message_id, id);
        assert_eq!(second[0].message.receive_count, 2);
        assert_eq!(second[0].message.sent_at, first[0].message.sent_at);

        let outcome = client
            .release(QUEUE, DEFAULT_CONSUMER_GROUP, &second[0], 2)
            .await
            .unwrap();
        assert_eq!(outcome, ReleaseOutcome::DeadLettered);
        assert_eq!(client.stream_len(QUEUE).await.unwrap(), 0);
        assert_eq!(client.dead_letter_len(QUEUE).await.unwrap(), 1);
    }
}
