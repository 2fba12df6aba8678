//! Per-execution dependency scopes.
//!
//! A [`ServiceContainer`] holds process-wide singletons plus scoped
//! providers. Every job execution gets a fresh [`Scope`]: the singletons,
//! and whatever the scoped providers build for that one execution. The
//! executor closes the scope exactly once through a [`ScopeGuard`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use courier_core::JobError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    #[error("failed to create dependency scope: {0}")]
    Create(String),
}

/// Type-keyed service map.
#[derive(Clone, Default)]
pub struct Services {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl core::fmt::Debug for Services {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Services")
            .field("len", &self.entries.len())
            .finish()
    }
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Send + Sync + 'static>(&mut self, value: Arc<T>) {
        self.entries.insert(TypeId::of::<T>(), value);
    }

    pub fn with<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.insert(Arc::new(value));
        self
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|v| Arc::clone(v).downcast::<T>().ok())
    }

    /// Like [`get`](Self::get), but a missing service is a permanent job failure.
    pub fn require<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, JobError> {
        self.get::<T>().ok_or_else(|| {
            JobError::permanent(format!(
                "service `{}` is not registered",
                std::any::type_name::<T>()
            ))
        })
    }

    /// Copy every entry of `other` in, replacing same-typed entries.
    pub fn extend(&mut self, other: &Services) {
        self.entries
            .extend(other.entries.iter().map(|(k, v)| (*k, Arc::clone(v))));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

type Disposer = Box<dyn FnOnce() + Send>;

/// Services for one execution, plus cleanup to run when it ends.
#[derive(Default)]
pub struct Scope {
    services: Services,
    disposers: Vec<Disposer>,
}

impl core::fmt::Debug for Scope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scope")
            .field("services", &self.services)
            .field("disposers", &self.disposers.len())
            .finish()
    }
}

impl Scope {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            disposers: Vec::new(),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn services_mut(&mut self) -> &mut Services {
        &mut self.services
    }

    /// Run `f` when the scope is disposed. Disposers run in reverse order.
    pub fn on_dispose(&mut self, f: impl FnOnce() + Send + 'static) {
        self.disposers.push(Box::new(f));
    }

    pub fn dispose(mut self) {
        while let Some(disposer) = self.disposers.pop() {
            disposer();
        }
    }
}

/// Creates a fresh scope per execution.
#[async_trait]
pub trait ScopeFactory: Send + Sync {
    async fn create_scope(&self) -> Result<Scope, ScopeError>;
}

#[async_trait]
impl<F> ScopeFactory for Arc<F>
where
    F: ScopeFactory + ?Sized,
{
    async fn create_scope(&self) -> Result<Scope, ScopeError> {
        (**self).create_scope().await
    }
}

pub type ScopedProvider = Arc<dyn Fn(&mut Scope) -> Result<(), ScopeError> + Send + Sync>;

/// Singletons plus scoped providers.
#[derive(Clone, Default)]
pub struct ServiceContainer {
    singletons: Services,
    scoped: Vec<ScopedProvider>,
}

impl core::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("singletons", &self.singletons)
            .field("scoped", &self.scoped.len())
            .finish()
    }
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn singleton<T: Send + Sync + 'static>(&mut self, value: Arc<T>) {
        self.singletons.insert(value);
    }

    pub fn singletons(&self) -> &Services {
        &self.singletons
    }

    pub fn scoped<F>(&mut self, provider: F)
    where
        F: Fn(&mut Scope) -> Result<(), ScopeError> + Send + Sync + 'static,
    {
        self.scoped.push(Arc::new(provider));
    }

    /// Merge another container in; its singletons win on type collisions.
    pub fn merge(&mut self, singletons: &Services, scoped: &[ScopedProvider]) {
        self.singletons.extend(singletons);
        self.scoped.extend(scoped.iter().cloned());
    }
}

#[async_trait]
impl ScopeFactory for ServiceContainer {
    async fn create_scope(&self) -> Result<Scope, ScopeError> {
        let mut scope = Scope::new(self.singletons.clone());
        for provider in &self.scoped {
            if let Err(err) = provider(&mut scope) {
                scope.dispose();
                return Err(err);
            }
        }
        Ok(scope)
    }
}

/// Disposes its scope exactly once: on [`close`](Self::close), or on drop
/// (panic, cancellation) if never closed.
#[derive(Debug)]
pub struct ScopeGuard {
    scope: Option<Scope>,
}

impl ScopeGuard {
    pub fn new(scope: Scope) -> Self {
        Self { scope: Some(scope) }
    }

    pub fn services(&self) -> Services {
        self.scope
            .as_ref()
            .map(|s| s.services().clone())
            .unwrap_or_default()
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(scope) = self.scope.take() {
            scope.dispose();
        }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if self.scope.is_some() {
            warn!("dependency scope released without an explicit close");
            self.release();
        }
    }
}
