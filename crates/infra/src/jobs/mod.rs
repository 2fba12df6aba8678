//! Job model and executor.
//!
//! ## Design
//!
//! - Jobs are declared in [`JobModule`]s and flattened into one name-keyed
//!   [`JobRegistry`] plus a [`ServiceContainer`]
//! - Every execution runs in a fresh dependency [`Scope`], closed exactly once
//! - Failures are classified by [`courier_core::ErrorKind`] and turned into an
//!   explicit retry / dead-letter / discard decision
//! - Observers ([`JobHooks`]) are best-effort and never mask an outcome
//!
//! ## Components
//!
//! - `JobDefinition`: name, queue, schema, retry policy, uniqueness, handler
//! - `ModuleGraph`: validates imports (unknown, duplicate, circular)
//! - `JobExecutor`: runs one `JobExecution` and applies the decision table

pub mod definition;
pub mod execution;
pub mod executor;
pub mod hooks;
pub mod module;
pub mod registry;
pub mod scope;

pub use definition::{JobDefinition, JobHandler, Uniqueness, handler_fn};
pub use execution::{JobContext, JobExecution};
pub use executor::{ExecutionError, JobExecutor, Outcome};
pub use hooks::{HookError, JobHooks, JobObserver};
pub use module::{Application, JobModule, ModuleGraph};
pub use registry::JobRegistry;
pub use scope::{
    Scope, ScopeError, ScopeFactory, ScopeGuard, ScopedProvider, ServiceContainer, Services,
};
