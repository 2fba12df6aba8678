//! Payload schemas.
//!
//! A job may declare a schema; the executor validates the delivered payload
//! against it before the handler runs. Failures become
//! [`JobError::InvalidPayload`](crate::JobError::InvalidPayload), which is
//! retryable so old in-flight messages drain through retry-then-dead-letter
//! when a schema evolves.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One structured validation problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Location inside the payload (`$` for the root).
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn root(message: impl Into<String>) -> Self {
        Self::new("$", message)
    }
}

impl core::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validates a JSON payload.
pub trait PayloadSchema: Send + Sync {
    fn validate(&self, payload: &JsonValue) -> Result<(), Vec<ValidationIssue>>;
}

/// Schema that accepts any payload deserializable into `T`.
#[derive(Debug)]
pub struct TypedSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for TypedSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PayloadSchema for TypedSchema<T>
where
    T: DeserializeOwned,
{
    fn validate(&self, payload: &JsonValue) -> Result<(), Vec<ValidationIssue>> {
        T::deserialize(payload)
            .map(|_| ())
            .map_err(|e| vec![ValidationIssue::root(e.to_string())])
    }
}

/// Schema backed by a closure.
pub struct FnSchema<F> {
    check: F,
}

impl<F> FnSchema<F>
where
    F: Fn(&JsonValue) -> Result<(), Vec<ValidationIssue>> + Send + Sync,
{
    pub fn new(check: F) -> Self {
        Self { check }
    }
}

impl<F> PayloadSchema for FnSchema<F>
where
    F: Fn(&JsonValue) -> Result<(), Vec<ValidationIssue>> + Send + Sync,
{
    fn validate(&self, payload: &JsonValue) -> Result<(), Vec<ValidationIssue>> {
        (self.check)(payload)
    }
}
