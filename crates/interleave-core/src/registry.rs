//! Process-wide checkpoint registry.
//!
//! Two pieces of state decide whether a checkpoint does anything:
//!
//! - The enabled flag, shared by every thread in the process. It is set at
//!   test setup and cleared at teardown; nothing scopes it to a single test.
//! - The interceptor slot, local to each thread. A harness installs an
//!   interceptor on the worker thread it controls and other threads never
//!   see it.

use std::{
    cell::RefCell,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::name::CheckpointName;

static ENABLED: AtomicBool = AtomicBool::new(false);

thread_local! {
    static INTERCEPTOR: RefCell<Option<Arc<dyn Interceptor>>> = const { RefCell::new(None) };
}

/// Receives checkpoint notifications for the thread it is installed on.
///
/// An implementation may block the calling thread (to pause it at the
/// checkpoint) or unwind it (to abort the worker). Either way the call happens
/// on the thread that hit the checkpoint, inside whatever code placed it.
pub trait Interceptor {
    /// Called when the current thread reaches a checkpoint.
    fn on_checkpoint(&self, name: &CheckpointName);
}

/// Denotes an interesting place in concurrent code.
///
/// No-op unless the registry is enabled and the calling thread has an
/// interceptor installed.
#[inline]
pub fn checkpoint(owner: &str, name: &str) {
    if !ENABLED.load(Ordering::Relaxed) {
        return;
    }

    intercept(owner, name);
}

#[cold]
fn intercept(owner: &str, name: &str) {
    // Clone out of the slot so the interceptor may block or reinstall.
    let installed = INTERCEPTOR.try_with(|slot| slot.borrow().clone()).ok().flatten();

    if let Some(interceptor) = installed {
        interceptor.on_checkpoint(&CheckpointName::new(owner, name));
    }
}

/// Whether checkpoints are currently enabled.
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Enable checkpoints for the whole process.
pub fn enable() {
    if !ENABLED.swap(true, Ordering::SeqCst) {
        tracing::debug!("checkpoints enabled");
    }
}

/// Disable checkpoints for the whole process.
pub fn disable() {
    if ENABLED.swap(false, Ordering::SeqCst) {
        tracing::debug!("checkpoints disabled");
    }
}

/// Install (or with `None`, remove) the interceptor of the calling thread.
pub fn set_interceptor(interceptor: Option<Arc<dyn Interceptor>>) {
    // Slot is gone during thread-local destruction; nothing left to intercept.
    let _ = INTERCEPTOR.try_with(|slot| *slot.borrow_mut() = interceptor);
}
