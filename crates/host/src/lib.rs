//! Development host: an HTTP surface over the worker entry point and the
//! queue driver, backed by in-memory queue and scheduler clients.

pub mod app;
pub mod demo;
pub mod errors;
pub mod stack;

pub use app::{build_app, AppState};
pub use stack::{DevStack, DEFAULT_QUEUE_NAME};
