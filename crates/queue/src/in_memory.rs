//! In-memory queue and scheduler clients for tests/dev.
//!
//! - No IO
//! - Queues are addressed by local-development URLs
//!   (`http://localhost:4566/000000000000/<name>`)
//! - Receive counts and a redrive limit mimic a managed queue's redelivery
//!   and dead-letter behaviour closely enough to drive a local worker loop

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use uuid::Uuid;

use crate::client::{
    ClientError, CreateScheduleRequest, QueueClient, SchedulerClient, SendMessageRequest,
};

/// Base address for queues created by [`InMemoryQueueClient`].
pub const LOCAL_QUEUE_BASE_URL: &str = "http://localhost:4566/000000000000";

/// Ordered queues ignore a repeated dedup id within this window.
const DEDUP_WINDOW_SECS: i64 = 300;

/// Receives allowed before a released message is dead-lettered.
const DEFAULT_MAX_RECEIVE_COUNT: u32 = 5;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub body: String,
    /// 1 on first delivery.
    pub receive_count: u32,
    pub sent_at: DateTime<Utc>,
    pub message_group_id: Option<String>,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    body: String,
    sent_at: DateTime<Utc>,
    visible_at: DateTime<Utc>,
    receive_count: u32,
    message_group_id: Option<String>,
}

impl StoredMessage {
    fn to_received(&self) -> ReceivedMessage {
        ReceivedMessage {
            message_id: self.message_id.clone(),
            body: self.body.clone(),
            receive_count: self.receive_count,
            sent_at: self.sent_at,
            message_group_id: self.message_group_id.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    waiting: Vec<StoredMessage>,
    in_flight: HashMap<String, StoredMessage>,
    dead_letters: Vec<StoredMessage>,
    /// dedup id -> (message id, first seen)
    dedup: HashMap<String, (String, DateTime<Utc>)>,
}

/// What happened to a message handed back with [`InMemoryQueueClient::release`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Visible again for another receive.
    Requeued,
    /// Redrive limit reached; moved to the dead-letter list.
    DeadLettered,
    /// No such in-flight message.
    Unknown,
}

/// In-memory managed queue.
#[derive(Debug)]
pub struct InMemoryQueueClient {
    queues: Mutex<HashMap<String, QueueState>>,
    sent: Mutex<Vec<SendMessageRequest>>,
    max_receive_count: u32,
}

impl Default for InMemoryQueueClient {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueueClient {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            max_receive_count: DEFAULT_MAX_RECEIVE_COUNT,
        }
    }

    pub fn with_max_receive_count(mut self, max: u32) -> Self {
        self.max_receive_count = max.max(1);
        self
    }

    /// Local address of queue `name` (whether or not it exists).
    pub fn queue_url(name: &str) -> String {
        format!("{LOCAL_QUEUE_BASE_URL}/{name}")
    }

    /// Create (idempotently) a queue and return its address.
    pub fn create_queue(&self, name: &str) -> String {
        let url = Self::queue_url(name);
        lock(&self.queues).entry(url.clone()).or_default();
        url
    }

    /// Every send request accepted so far, in order.
    pub fn sent_requests(&self) -> Vec<SendMessageRequest> {
        lock(&self.sent).clone()
    }

    /// Receive up to `max` visible messages, oldest visibility first.
    pub fn receive(&self, queue_url: &str, max: usize) -> Vec<ReceivedMessage> {
        self.receive_at(queue_url, max, Utc::now())
    }

    /// [`receive`](Self::receive) against an explicit clock.
    pub fn receive_at(
        &self,
        queue_url: &str,
        max: usize,
        now: DateTime<Utc>,
    ) -> Vec<ReceivedMessage> {
        let mut queues = lock(&self.queues);
        let Some(state) = queues.get_mut(queue_url) else {
            return Vec::new();
        };

        state.waiting.sort_by_key(|m| m.visible_at);
        let mut out = Vec::new();
        let mut remaining = Vec::with_capacity(state.waiting.len());
        for mut msg in state.waiting.drain(..) {
            if out.len() < max && msg.visible_at <= now {
                msg.receive_count += 1;
                out.push(msg.to_received());
                state.in_flight.insert(msg.message_id.clone(), msg);
            } else {
                remaining.push(msg);
            }
        }
        state.waiting = remaining;
        out
    }

    /// Delete an in-flight message (successful processing).
    pub fn acknowledge(&self, queue_url: &str, message_id: &str) -> bool {
        lock(&self.queues)
            .get_mut(queue_url)
            .is_some_and(|s| s.in_flight.remove(message_id).is_some())
    }

    /// Hand an in-flight message back (failed processing).
    pub fn release(&self, queue_url: &str, message_id: &str) -> ReleaseOutcome {
        let mut queues = lock(&self.queues);
        let Some(state) = queues.get_mut(queue_url) else {
            return ReleaseOutcome::Unknown;
        };
        let Some(mut msg) = state.in_flight.remove(message_id) else {
            return ReleaseOutcome::Unknown;
        };

        if msg.receive_count >= self.max_receive_count {
            state.dead_letters.push(msg);
            ReleaseOutcome::DeadLettered
        } else {
            msg.visible_at = Utc::now();
            state.waiting.push(msg);
            ReleaseOutcome::Requeued
        }
    }

    /// Messages waiting (visible or delayed), excluding in-flight ones.
    pub fn depth(&self, queue_url: &str) -> usize {
        lock(&self.queues)
            .get(queue_url)
            .map_or(0, |s| s.waiting.len())
    }

    pub fn dead_letters(&self, queue_url: &str) -> Vec<ReceivedMessage> {
        lock(&self.queues).get(queue_url).map_or_else(Vec::new, |s| {
            s.dead_letters.iter().map(StoredMessage::to_received).collect()
        })
    }
}

#[async_trait]
impl QueueClient for InMemoryQueueClient {
    async fn send_message(&self, request: SendMessageRequest) -> Result<String, ClientError> {
        let now = Utc::now();
        let mut queues = lock(&self.queues);
        let state = queues
            .get_mut(&request.queue_url)
            .ok_or_else(|| ClientError::NotFound(request.queue_url.clone()))?;

        if let Some(dedup_id) = &request.message_deduplication_id {
            state
                .dedup
                .retain(|_, (_, seen)| now - *seen < ChronoDuration::seconds(DEDUP_WINDOW_SECS));
            if let Some((message_id, _)) = state.dedup.get(dedup_id) {
                return Ok(message_id.clone());
            }
        }

        let message_id = Uuid::now_v7().to_string();
        if let Some(dedup_id) = &request.message_deduplication_id {
            state
                .dedup
                .insert(dedup_id.clone(), (message_id.clone(), now));
        }
        state.waiting.push(StoredMessage {
            message_id: message_id.clone(),
            body: request.body.clone(),
            sent_at: now,
            visible_at: now + ChronoDuration::seconds(i64::from(request.delay_seconds)),
            receive_count: 0,
            message_group_id: request.message_group_id.clone(),
        });
        drop(queues);

        lock(&self.sent).push(request);
        Ok(message_id)
    }
}

/// In-memory scheduling service.
///
/// Schedules fire only when [`fire_due`](Self::fire_due) is called, which
/// makes delivery timing deterministic in tests.
#[derive(Debug, Default)]
pub struct InMemorySchedulerClient {
    schedules: Mutex<BTreeMap<String, CreateScheduleRequest>>,
}

fn schedule_key(name: &str, group_name: Option<&str>) -> String {
    format!("{}/{}", group_name.unwrap_or("default"), name)
}

impl InMemorySchedulerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pending schedules, ordered by group/name.
    pub fn schedules(&self) -> Vec<CreateScheduleRequest> {
        lock(&self.schedules).values().cloned().collect()
    }

    /// Deliver every schedule due at `now` to its target queue.
    ///
    /// Fired schedules that asked for it are removed. Returns how many fired.
    pub async fn fire_due(
        &self,
        now: DateTime<Utc>,
        queue: &dyn QueueClient,
    ) -> Result<usize, ClientError> {
        let due: Vec<(String, CreateScheduleRequest)> = {
            let mut schedules = lock(&self.schedules);
            let keys: Vec<String> = schedules
                .iter()
                .filter(|(_, s)| s.fire_at <= now)
                .map(|(k, _)| k.clone())
                .collect();
            keys.into_iter()
                .filter_map(|k| {
                    let s = schedules.get(&k)?.clone();
                    if s.delete_after_completion {
                        schedules.remove(&k);
                    }
                    Some((k, s))
                })
                .collect()
        };

        let mut fired = 0;
        for (key, schedule) in due {
            let mut req = SendMessageRequest::new(&schedule.target.queue_url, &schedule.target.input);
            if let Some(group) = &schedule.target.message_group_id {
                req.message_group_id = Some(group.clone());
                req.message_deduplication_id = Some(key);
            }
            queue.send_message(req).await?;
            fired += 1;
        }
        Ok(fired)
    }
}

#[async_trait]
impl SchedulerClient for InMemorySchedulerClient {
    async fn create_schedule(&self, request: CreateScheduleRequest) -> Result<String, ClientError> {
        let key = schedule_key(&request.name, request.group_name.as_deref());
        let mut schedules = lock(&self.schedules);
        if schedules.contains_key(&key) {
            return Err(ClientError::Conflict(key));
        }
        let arn = format!("arn:aws:scheduler:local:000000000000:schedule/{key}");
        schedules.insert(key, request);
        Ok(arn)
    }

    async fn delete_schedule(
        &self,
        name: &str,
        group_name: Option<&str>,
    ) -> Result<(), ClientError> {
        let key = schedule_key(name, group_name);
        lock(&self.schedules)
            .remove(&key)
            .map(|_| ())
            .ok_or(ClientError::NotFound(key))
    }
}
