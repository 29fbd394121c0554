use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Cancellation signal shared by every stage of a run.
///
/// Clones share the same signal. Once cancelled it stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct Context(Arc<(Mutex<bool>, Condvar)>);

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cancellation signal. All threads waiting on this [`Context`] are notified.
    pub fn cancel(&self) {
        let (lck, cvar) = &*self.0;
        *lck.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (lck, _) = &*self.0;
        *lck.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks for up to `timeout` or until the context is cancelled. Returns whether it is cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lck, cvar) = &*self.0;
        let guard = lck.lock().unwrap_or_else(PoisonError::into_inner);
        let (cancelled, _) = cvar
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled
    }
}
