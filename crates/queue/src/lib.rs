//! Producer-side queue contracts.
//!
//! This crate defines:
//! - the wire [`JobEnvelope`] every queue message carries
//! - the [`QueueDriver`] trait producers hold
//! - the [`QueueClient`] / [`SchedulerClient`] seams drivers talk through
//! - in-memory clients for tests and local development
//!
//! Concrete drivers (managed queue, scheduler delegation, Redis Streams) live
//! in `courier-infra`.

pub mod client;
pub mod driver;
pub mod envelope;
pub mod in_memory;

pub use client::{
    ClientError, CreateScheduleRequest, QueueClient, ScheduleTarget, SchedulerClient,
    SendMessageRequest,
};
pub use driver::{QueueDriver, QueueError};
pub use envelope::{
    EnqueueResult, EnvelopeError, JobEnvelope, JobMessage, ScheduleResult, ScheduleTrigger,
};
pub use in_memory::{
    InMemoryQueueClient, InMemorySchedulerClient, LOCAL_QUEUE_BASE_URL, ReceivedMessage,
    ReleaseOutcome,
};
