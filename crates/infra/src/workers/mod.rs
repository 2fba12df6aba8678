//! Worker side: host invocation adapter and polling hosts.

pub mod entry_point;
pub mod event;
pub mod local_host;
#[cfg(feature = "redis")]
pub mod redis_host;

pub use entry_point::{WorkerEntryPoint, WorkerError};
pub use event::{
    BatchEvent, BatchItemFailure, BatchResponse, DirectResponse, DirectStatus,
    InvocationResponse, QueueRecord, RecordAttributes,
};
pub use local_host::{LocalHost, LocalHostHandle, PollReport};
#[cfg(feature = "redis")]
pub use redis_host::RedisHost;
