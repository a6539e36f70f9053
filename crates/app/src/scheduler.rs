//! Tokio-backed [`DelayedActionScheduler`].
//!
//! Each armed action is a sleeping task. A shared handle table decides,
//! under one lock, whether a handle is cancelled or fired, so the two
//! outcomes never both happen.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::AbortHandle;

use crate::ports::{DelayedActionScheduler, TimerAction, TimerHandle};

#[derive(Default)]
struct Inner {
    timers: Mutex<HashMap<TimerHandle, AbortHandle>>,
    next_id: AtomicU64,
}

impl Inner {
    fn timers(&self) -> MutexGuard<'_, HashMap<TimerHandle, AbortHandle>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scheduler running timers as tokio tasks.
///
/// Must be used from within a tokio runtime. Dropping the scheduler aborts
/// every pending timer; share it between rooms through an `Arc`.
#[derive(Default)]
pub struct TokioScheduler {
    inner: Arc<Inner>,
}

impl TokioScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of timers armed and not yet fired or cancelled.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.timers().len()
    }
}

impl DelayedActionScheduler for TokioScheduler {
    fn arm(&self, delay: Duration, action: TimerAction) -> TimerHandle {
        let handle = TimerHandle::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let inner = Arc::clone(&self.inner);

        // hold the table until the abort handle is stored so that a
        // zero-delay task cannot look itself up too early
        let mut timers = self.inner.timers();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let armed = inner.timers().remove(&handle).is_some();
            if armed {
                tracing::trace!(%handle, "timer fired");
                action();
            }
        });
        timers.insert(handle, task.abort_handle());
        tracing::trace!(%handle, ?delay, "timer armed");
        handle
    }

    fn cancel(&self, handle: TimerHandle) {
        if let Some(task) = self.inner.timers().remove(&handle) {
            task.abort();
            tracing::trace!(%handle, "timer cancelled");
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, task) in self.inner.timers().drain() {
            task.abort();
        }
    }
}
