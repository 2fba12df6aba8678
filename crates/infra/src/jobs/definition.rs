//! Job definitions and handlers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use courier_core::{JobResult, PayloadSchema, RetryConfig, RetrySpec, TypedSchema};
use courier_queue::JobMessage;

use super::execution::JobContext;

/// Async job handler.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, payload: JsonValue, ctx: JobContext) -> JobResult;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JsonValue, JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    async fn handle(&self, payload: JsonValue, ctx: JobContext) -> JobResult {
        (self.0)(payload, ctx).await
    }
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn(JsonValue, JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

type KeyFn = Arc<dyn Fn(&JsonValue) -> String + Send + Sync>;

/// Derives a stable dedup key from a payload.
#[derive(Clone)]
pub struct Uniqueness {
    key: KeyFn,
    /// Advisory; the queue's own dedup window applies.
    pub window: Option<Duration>,
}

impl Uniqueness {
    pub fn new(key: impl Fn(&JsonValue) -> String + Send + Sync + 'static) -> Self {
        Self {
            key: Arc::new(key),
            window: None,
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }

    pub fn key_for(&self, payload: &JsonValue) -> String {
        (self.key)(payload)
    }
}

/// A registered job. Immutable once registered.
#[derive(Clone)]
pub struct JobDefinition {
    name: String,
    queue: Option<String>,
    schema: Option<Arc<dyn PayloadSchema>>,
    retry: RetrySpec,
    uniqueness: Option<Uniqueness>,
    handler: Arc<dyn JobHandler>,
}

impl core::fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("queue", &self.queue)
            .field("has_schema", &self.schema.is_some())
            .field("retry", &self.retry)
            .field("unique", &self.uniqueness.is_some())
            .finish()
    }
}

impl JobDefinition {
    pub fn new(name: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            name: name.into(),
            queue: None,
            schema: None,
            retry: RetrySpec::Default,
            uniqueness: None,
            handler,
        }
    }

    pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(JsonValue, JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        Self::new(name, handler_fn(f))
    }

    /// Handler over a typed payload; the type doubles as the payload schema.
    pub fn typed<T, F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T, JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        let f = Arc::new(f);
        let handler = handler_fn(move |payload: JsonValue, ctx: JobContext| {
            let f = Arc::clone(&f);
            async move {
                let typed: T = serde_json::from_value(payload)?;
                (*f)(typed, ctx).await
            }
        });
        Self::new(name, handler).with_schema(TypedSchema::<T>::new())
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_schema(mut self, schema: impl PayloadSchema + 'static) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    pub fn with_retry(mut self, retry: RetrySpec) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_uniqueness(mut self, uniqueness: Uniqueness) -> Self {
        self.uniqueness = Some(uniqueness);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    pub fn schema(&self) -> Option<&dyn PayloadSchema> {
        self.schema.as_deref()
    }

    pub fn retry(&self) -> RetrySpec {
        self.retry
    }

    pub fn retry_config(&self) -> RetryConfig {
        self.retry.normalize()
    }

    pub fn uniqueness(&self) -> Option<&Uniqueness> {
        self.uniqueness.as_ref()
    }

    pub fn handler(&self) -> &Arc<dyn JobHandler> {
        &self.handler
    }

    /// Message for `payload`, targeting this job's queue. With a uniqueness
    /// descriptor the key becomes the job id, so ordered queues dedup on it.
    pub fn to_message(&self, payload: JsonValue) -> JobMessage {
        let key = self.uniqueness.as_ref().map(|u| u.key_for(&payload));
        let mut message = JobMessage::new(&self.name, payload);
        if let Some(queue) = &self.queue {
            message = message.with_queue(queue);
        }
        if let Some(key) = key {
            message = message.with_job_id(key);
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::JobId;
    use serde_json::json;

    fn noop() -> Arc<dyn JobHandler> {
        handler_fn(|_, _| async { Ok(()) })
    }

    #[test]
    fn message_uses_queue_and_uniqueness_key() {
        let def = JobDefinition::new("invoice", noop())
            .with_queue("billing.fifo")
            .with_uniqueness(
                Uniqueness::new(|p| format!("invoice-{}", p["id"])).with_window(Duration::from_secs(60)),
            );

        let msg = def.to_message(json!({"id": 42}));

        assert_eq!(msg.queue.as_deref(), Some("billing.fifo"));
        assert_eq!(msg.job_id, Some(JobId::from("invoice-42")));
    }

    #[test]
    fn plain_definition_leaves_routing_to_driver() {
        let msg = JobDefinition::new("ping", noop()).to_message(json!(null));
        assert!(msg.queue.is_none());
        assert!(msg.job_id.is_none());
    }

    #[test]
    fn typed_definition_declares_schema() {
        #[derive(serde::Deserialize)]
        #[allow(dead_code)]
        struct Ping {
            n: u32,
        }

        let def = JobDefinition::typed::<Ping, _, _>("ping", |_, _| async { Ok(()) });
        let schema = def.schema().unwrap();
        assert!(schema.validate(&json!({"n": 1})).is_ok());
        assert!(schema.validate(&json!({"n": "one"})).is_err());
    }

    #[test]
    fn retry_defaults_to_documented_policy() {
        let def = JobDefinition::new("ping", noop());
        assert_eq!(def.retry_config(), RetryConfig::default());
        assert!(
            def.with_retry(RetrySpec::Disabled)
                .retry_config()
                .is_disabled()
        );
    }
}
