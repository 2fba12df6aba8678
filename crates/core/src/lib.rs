//! `courier-core`: shared building blocks for producers and workers.
//!
//! This crate is **pure**: no IO, no async runtime. It holds the identifiers,
//! the error taxonomy the executor classifies on, the retry policy normalizer
//! and payload schemas.

pub mod error;
pub mod id;
pub mod retry;
pub mod schema;

pub use error::{ConfigError, ErrorKind, JobError, JobResult};
pub use id::JobId;
pub use retry::{MaxAttempts, RetryConfig, RetrySpec, DEFAULT_MAX_ATTEMPTS};
pub use schema::{FnSchema, PayloadSchema, TypedSchema, ValidationIssue};
