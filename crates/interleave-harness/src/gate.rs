//! One-shot, auto-resetting release signal.
//!
//! A worker blocks on its gate before entering its body and again at every
//! checkpoint it is paused at. The controller fires the gate to release it.
//! Consuming the signal resets it, so one gate serves every pause point of a
//! worker.

use std::{
    sync::{Condvar, Mutex, PoisonError},
    time::Duration,
};

/// Binary semaphore with a single waiter.
#[derive(Debug, Default)]
pub(crate) struct Gate {
    /// Whether the gate has been fired and not yet consumed.
    signaled: Mutex<bool>,
    /// Wakes the waiter on `fire`.
    condvar: Condvar,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Set the signal and wake the waiter. No-op if already signaled.
    pub(crate) fn fire(&self) {
        let mut signaled = self.signaled.lock().unwrap_or_else(PoisonError::into_inner);
        if *signaled {
            return;
        }

        *signaled = true;
        self.condvar.notify_one();
    }

    /// Wait until fired or until `timeout` elapses.
    ///
    /// Returns whether the gate was fired. The signal is reset either way.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let signaled = self.signaled.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut signaled, _) = self
            .condvar
            .wait_timeout_while(signaled, timeout, |signaled| !*signaled)
            .unwrap_or_else(PoisonError::into_inner);

        let fired = *signaled;
        *signaled = false;
        fired
    }
}
