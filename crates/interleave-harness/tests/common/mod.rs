//! Shared helpers for simulator integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Owner of the checkpoints placed by [`StepByStep`].
pub const OWNER: &str = module_path!();

/// Install log output (`RUST_LOG=interleave_harness=debug`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry().with(fmt::layer().with_test_writer()).with(filter).try_init();
}

/// Install log output and enable checkpoints.
///
/// The enabled flag is process-wide and tests in one binary run in parallel,
/// so tests never disable it.
pub fn setup() {
    init_tracing();
    interleave_core::enable();
}

/// Worker that passes checkpoints `foo` then `bar`, recording where it is.
#[derive(Clone)]
pub struct StepByStep {
    current: Arc<Mutex<&'static str>>,
}

impl StepByStep {
    pub fn new() -> Self {
        Self { current: Arc::new(Mutex::new("init")) }
    }

    /// Last stage the worker entered.
    pub fn current(&self) -> &'static str {
        *self.current.lock().expect("mutex poisoned")
    }

    fn enter(&self, stage: &'static str) {
        *self.current.lock().expect("mutex poisoned") = stage;
    }

    /// The worker body.
    pub fn body(&self) -> impl FnOnce() + Send + 'static {
        let this = self.clone();
        move || {
            this.enter("foo");
            interleave_core::checkpoint!("foo");

            this.enter("bar");
            interleave_core::checkpoint!("bar");

            this.enter("end");
        }
    }
}

/// Shared event log written by workers, read by oracles.
#[derive(Clone, Default)]
pub struct EventLog<T> {
    events: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone> EventLog<T> {
    pub fn push(&self, event: T) {
        self.events.lock().expect("mutex poisoned").push(event);
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.events.lock().expect("mutex poisoned").clone()
    }
}
