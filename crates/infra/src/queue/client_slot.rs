//! Lazily-created network client with an explicit lifecycle.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use courier_queue::ClientError;

type Factory<C> = Box<dyn Fn() -> Result<Arc<C>, ClientError> + Send + Sync>;

enum SlotState<C: ?Sized> {
    Uninitialized,
    Ready(Arc<C>),
    Disposed,
}

struct Inner<C: ?Sized> {
    state: SlotState<C>,
    factory: Option<Factory<C>>,
}

#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    #[error("client has been disposed")]
    Disposed,

    #[error(transparent)]
    Create(#[from] ClientError),
}

/// `uninitialized -> ready -> disposed`.
///
/// The factory runs at most once on success; a failed creation leaves the
/// slot uninitialized so the next call tries again. Disposal drops both the
/// client and the factory.
pub struct ClientSlot<C: ?Sized> {
    inner: Mutex<Inner<C>>,
}

impl<C: ?Sized> core::fmt::Debug for ClientSlot<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = match self.lock().state {
            SlotState::Uninitialized => "uninitialized",
            SlotState::Ready(_) => "ready",
            SlotState::Disposed => "disposed",
        };
        f.debug_struct("ClientSlot").field("state", &state).finish()
    }
}

impl<C: ?Sized + Send + Sync + 'static> ClientSlot<C> {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Arc<C>, ClientError> + Send + Sync + 'static,
    {
        Self {
            inner: Mutex::new(Inner {
                state: SlotState::Uninitialized,
                factory: Some(Box::new(factory)),
            }),
        }
    }

    /// Slot whose factory hands out an existing client.
    pub fn from_client(client: Arc<C>) -> Self {
        Self::new(move || Ok(Arc::clone(&client)))
    }
}

impl<C: ?Sized> ClientSlot<C> {
    fn lock(&self) -> MutexGuard<'_, Inner<C>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current client, creating it on first use.
    pub fn get(&self) -> Result<Arc<C>, SlotError> {
        let mut inner = self.lock();
        match &inner.state {
            SlotState::Ready(client) => return Ok(Arc::clone(client)),
            SlotState::Disposed => return Err(SlotError::Disposed),
            SlotState::Uninitialized => {}
        }

        let factory = inner.factory.as_ref().ok_or(SlotError::Disposed)?;
        let client = factory()?;
        inner.state = SlotState::Ready(Arc::clone(&client));
        Ok(client)
    }

    /// Release the client. Returns `false` if already disposed.
    pub fn dispose(&self) -> bool {
        let mut inner = self.lock();
        if matches!(inner.state, SlotState::Disposed) {
            return false;
        }
        inner.state = SlotState::Disposed;
        inner.factory = None;
        true
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.lock().state, SlotState::Ready(_))
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self.lock().state, SlotState::Disposed)
    }
}
