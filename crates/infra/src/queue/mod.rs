//! Queue and scheduler drivers.

pub mod address;
pub mod client_slot;
pub mod managed;
pub mod scheduler;

#[cfg(feature = "redis")]
pub mod redis_streams;

pub use address::{QueueAddress, is_fifo_url, queue_arn_from_url};
pub use client_slot::{ClientSlot, SlotError};
pub use managed::ManagedQueueDriver;
pub use scheduler::{ScheduledDelivery, SchedulerDriver};

#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsQueueClient, StreamDelivery, DEFAULT_CONSUMER_GROUP};
