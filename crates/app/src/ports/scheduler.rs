//! Delayed action scheduler port — cancellable one-shot timers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Callback run when a timer fires.
pub type TimerAction = Box<dyn FnOnce() + Send + 'static>;

/// Opaque handle to an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Arms single-fire callbacks.
///
/// Implementations must guarantee that for a given handle at most one of
/// "cancel took effect" and "action ran" is observed.
pub trait DelayedActionScheduler {
    /// Run `action` once after `delay`.
    fn arm(&self, delay: Duration, action: TimerAction) -> TimerHandle;

    /// Prevent a pending action from running.
    ///
    /// Cancelling twice, or after the action fired, is a no-op.
    fn cancel(&self, handle: TimerHandle);
}

impl<T: DelayedActionScheduler> DelayedActionScheduler for Arc<T> {
    fn arm(&self, delay: Duration, action: TimerAction) -> TimerHandle {
        (**self).arm(delay, action)
    }

    fn cancel(&self, handle: TimerHandle) {
        (**self).cancel(handle);
    }
}
