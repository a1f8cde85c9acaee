//! Worker threads and the interceptor that pauses them at checkpoints.
//!
//! Every registered worker runs on its own thread. The thread installs a
//! [`CheckpointInterceptor`] for itself, then parks on its gate before
//! touching the worker body. From then on it only moves when the controller
//! assigns a step:
//!
//! ```text
//! Created -> Paused -> Running -> AtCheckpoint -> Running -> ... -> Finished
//!                                                               |  Failed
//!                                                               |  Interrupted
//! ```
//!
//! # Invariants
//!
//! - At most one assignment (step + batch countdown) is pending per worker
//! - Each assignment is counted down exactly once: at its target checkpoint,
//!   or when the worker stops running
//! - A failure is recorded before the countdown it releases, so the
//!   controller always sees it after the batch wait

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};

use interleave_core::{CheckpointName, Interceptor};

use crate::{
    config::SimulatorConfig,
    error::{BoxError, SimulatorError, WorkerFailure},
    gate::Gate,
    latch::Countdown,
    step::Step,
};

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Lower bound on a pause round, so a zero step timeout does not spin.
const MIN_PAUSE_SLICE: Duration = Duration::from_millis(10);

/// Handle identifying a registered worker.
///
/// Handles are unique across every simulator in the process, so two workers
/// with the same name (or the same body) are still told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl WorkerId {
    fn next() -> Self {
        Self(NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker #{}", self.0)
    }
}

/// Observable lifecycle state of a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    /// Registered, thread not started.
    Created,
    /// Thread started, waiting for its first step.
    Paused,
    /// Executing its body.
    Running,
    /// Paused at this checkpoint, waiting for the next step.
    AtCheckpoint(CheckpointName),
    /// Body returned normally.
    Finished,
    /// Body returned an error or panicked.
    Failed,
    /// Stopped by the simulator before finishing.
    Interrupted,
}

impl WorkerState {
    /// Whether the worker thread has stopped running its body for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Interrupted)
    }
}

/// Result types a worker body may return.
///
/// Implemented for `()` and for `Result<(), E>` with any error convertible
/// into a boxed error, so both plain closures and fallible ones register
/// without adapters.
pub trait IntoWorkerResult {
    /// Convert into the captured form.
    fn into_worker_result(self) -> Result<(), BoxError>;
}

impl IntoWorkerResult for () {
    fn into_worker_result(self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<E> IntoWorkerResult for Result<(), E>
where
    E: Into<BoxError>,
{
    fn into_worker_result(self) -> Result<(), BoxError> {
        self.map_err(Into::into)
    }
}

/// Type-erased worker body.
pub(crate) type WorkerBody = Box<dyn FnOnce() -> Result<(), BoxError> + Send>;

/// Unwound through worker code when the simulator stops the worker.
struct Interrupted;

/// Step currently assigned to a worker, with the countdown of its batch.
struct Assignment {
    step: Arc<Step>,
    countdown: Arc<Countdown>,
}

/// How a worker thread ended.
enum Outcome {
    Finished,
    Failed(WorkerFailure),
    Interrupted,
}

/// State shared between the controller and one worker thread.
pub(crate) struct WorkerContext {
    /// Stable handle.
    id: WorkerId,
    /// Display name, not unique.
    name: String,
    /// Release signal for every pause point.
    gate: Gate,
    /// Pending step. Set by the controller, cleared by the worker.
    assignment: Mutex<Option<Assignment>>,
    /// First failure raised by the body.
    failure: Mutex<Option<Arc<WorkerFailure>>>,
    /// Lifecycle state, for observation only.
    state: Mutex<WorkerState>,
    /// Set by `stop()`.
    stop_requested: AtomicBool,
    /// Opens when the worker thread is about to exit.
    exited: Countdown,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Poisoning means a worker unwound while holding the lock; its failure
    // has already been captured.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WorkerContext {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            id: WorkerId::next(),
            name: name.into(),
            gate: Gate::new(),
            assignment: Mutex::new(None),
            failure: Mutex::new(None),
            state: Mutex::new(WorkerState::Created),
            stop_requested: AtomicBool::new(false),
            exited: Countdown::new(1),
        }
    }

    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state(&self) -> WorkerState {
        lock(&self.state).clone()
    }

    fn set_state(&self, state: WorkerState) {
        *lock(&self.state) = state;
    }

    pub(crate) fn failure(&self) -> Option<Arc<WorkerFailure>> {
        lock(&self.failure).clone()
    }

    pub(crate) fn has_assignment(&self) -> bool {
        lock(&self.assignment).is_some()
    }

    /// Hand the worker its next step and release it.
    ///
    /// Fails without touching state if a step is already pending.
    pub(crate) fn assign(&self, step: Arc<Step>, countdown: Arc<Countdown>) -> Result<(), SimulatorError> {
        {
            let mut assignment = lock(&self.assignment);
            if assignment.is_some() {
                return Err(SimulatorError::WorkerBusy { name: self.name.clone() });
            }
            *assignment = Some(Assignment { step, countdown });
        }

        tracing::debug!("{} => fired", self.name);
        self.gate.fire();
        Ok(())
    }

    /// Ask the worker to abort at its next pause point or checkpoint.
    pub(crate) fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.gate.fire();
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Wait for the worker thread to reach its exit.
    pub(crate) fn wait_exit(&self, timeout: Duration) -> bool {
        self.exited.wait(timeout)
    }

    /// Block until released. Returns `false` if stopped instead.
    ///
    /// Waits in `slice`-sized rounds so a long pause shows up in the log.
    fn pause(&self, slice: Duration) -> bool {
        let slice = slice.max(MIN_PAUSE_SLICE);
        tracing::debug!("{} => waiting", self.name);

        loop {
            if self.stop_requested() {
                return false;
            }

            if self.gate.wait(slice) {
                if self.stop_requested() {
                    return false;
                }

                tracing::debug!("{} => resumed", self.name);
                return true;
            }

            tracing::debug!("{} => still paused after {:?}", self.name, slice);
        }
    }

    /// Pause here if `name` is the target of the pending step.
    fn on_checkpoint(&self, name: &CheckpointName, slice: Duration) {
        tracing::trace!("{} => @{}", self.name, name);

        if self.stop_requested() {
            panic::resume_unwind(Box::new(Interrupted));
        }

        let reached = {
            let mut assignment = lock(&self.assignment);
            let matched = assignment.as_ref().is_some_and(|pending| pending.step.targets(name));
            if matched { assignment.take() } else { None }
        };

        let Some(Assignment { step, countdown }) = reached else {
            return;
        };

        tracing::debug!("{} => reached {}", self.name, name);
        self.set_state(WorkerState::AtCheckpoint(name.clone()));
        step.mark_checkpoint_reached();
        countdown.count_down();

        if !self.pause(slice) {
            panic::resume_unwind(Box::new(Interrupted));
        }

        self.set_state(WorkerState::Running);
    }

    /// Record the body's failure. Only the first one is kept.
    fn record_failure(&self, failure: WorkerFailure) {
        let mut slot = lock(&self.failure);
        match slot.as_ref() {
            None => *slot = Some(Arc::new(failure)),
            Some(first) => {
                tracing::warn!("{} => ignoring failure '{}' after '{}'", self.name, failure, first);
            },
        }
    }

    /// Settle the pending step (if any) once the worker stops running.
    fn finish(&self, outcome: Outcome) {
        let pending = lock(&self.assignment).take();

        match outcome {
            Outcome::Finished => {
                tracing::debug!("{} => finished", self.name);
                self.set_state(WorkerState::Finished);
            },
            Outcome::Failed(failure) => {
                tracing::error!("{} => failed: {}", self.name, failure);
                self.record_failure(failure);
                self.set_state(WorkerState::Failed);
            },
            Outcome::Interrupted => {
                tracing::debug!("{} => interrupted", self.name);
                self.set_state(WorkerState::Interrupted);
            },
        }

        if let Some(Assignment { step, countdown }) = pending {
            step.mark_worker_finished();
            countdown.count_down();
        }
    }
}

/// Checkpoint interceptor installed on a worker thread.
struct CheckpointInterceptor {
    context: Arc<WorkerContext>,
    /// Pause slice, the simulator's step timeout.
    slice: Duration,
}

impl Interceptor for CheckpointInterceptor {
    fn on_checkpoint(&self, name: &CheckpointName) {
        self.context.on_checkpoint(name, self.slice);
    }
}

/// Start the worker thread, paused before its body.
pub(crate) fn spawn(
    context: &Arc<WorkerContext>,
    body: WorkerBody,
    config: &SimulatorConfig,
) -> Result<JoinHandle<()>, SimulatorError> {
    let slice = config.step_timeout;
    context.set_state(WorkerState::Paused);

    let thread_context = Arc::clone(context);
    std::thread::Builder::new()
        .name(config.thread_name(context.name()))
        .spawn(move || run(thread_context, body, slice))
        .map_err(|source| SimulatorError::Spawn { name: context.name.clone(), source })
}

fn run(context: Arc<WorkerContext>, body: WorkerBody, slice: Duration) {
    interleave_core::set_interceptor(Some(Arc::new(CheckpointInterceptor {
        context: Arc::clone(&context),
        slice,
    })));
    tracing::debug!("{} => started", context.name);

    let outcome = if context.pause(slice) {
        context.set_state(WorkerState::Running);
        execute(body)
    } else {
        Outcome::Interrupted
    };

    interleave_core::set_interceptor(None);
    context.finish(outcome);
    context.exited.count_down();
}

fn execute(body: WorkerBody) -> Outcome {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => Outcome::Finished,
        Ok(Err(err)) => Outcome::Failed(WorkerFailure::Error(err)),
        Err(payload) if payload.is::<Interrupted>() => Outcome::Interrupted,
        Err(payload) => Outcome::Failed(WorkerFailure::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
