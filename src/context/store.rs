use crate::error::GateError;
use std::future::Future;
use tokio::task::LocalKey;
use tokio::task::futures::TaskLocalFuture;

/// Handle over one task-local context slot.
///
/// A value set with [`ContextStore::run`] is visible to the future and every
/// continuation polled inside it, across `.await` points and worker threads,
/// and is never visible to other tasks. Nested `run` calls shadow the outer
/// value until the inner future completes. Tasks started with `tokio::spawn`
/// do not inherit the value.
pub struct ContextStore<T: 'static> {
    name: &'static str,
    key: &'static LocalKey<T>,
}

impl<T: 'static> Clone for ContextStore<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: 'static> Copy for ContextStore<T> {}

impl<T: Clone + 'static> ContextStore<T> {
    pub const fn new(name: &'static str, key: &'static LocalKey<T>) -> Self {
        Self { name, key }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn run<F>(&self, value: T, future: F) -> TaskLocalFuture<T, F>
    where
        F: Future,
    {
        self.key.scope(value, future)
    }

    pub fn run_sync<F, R>(&self, value: T, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.key.sync_scope(value, f)
    }

    pub fn get(&self) -> Option<T> {
        self.key.try_with(|value| value.clone()).ok()
    }

    /// Reads the active value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.key.try_with(f).ok()
    }

    pub fn is_active(&self) -> bool {
        self.key.try_with(|_| ()).is_ok()
    }

    pub fn require(&self) -> Result<T, GateError> {
        self.get()
            .ok_or(GateError::ContextMissing { store: self.name })
    }
}
