//! Step-by-step interleaving simulator.
//!
//! The simulator owns the worker threads and the declared schedule. Each
//! `drive()` releases the schedule one batch at a time:
//!
//! 1. Take the next batch: a step plus every following concurrent step
//! 2. Assign each step to its worker, which releases the worker's gate
//! 3. Wait for every worker in the batch to reach its target or stop running
//! 4. Fail if any worker (in this batch or not) has captured a failure
//! 5. Fail if a step's target was not the one observed
//!
//! Batches never overlap, so everything released by one batch happens before
//! anything released by the next. Inside a batch, workers run freely.

use std::{sync::Arc, thread::JoinHandle, time::Duration};

use interleave_core::CheckpointName;

use crate::{
    config::SimulatorConfig,
    error::{AggregatedFailure, FailureEntry, SimulatorError, WorkerFailure},
    latch::Countdown,
    step::{Step, StepTarget, batch_len},
    worker::{self, IntoWorkerResult, WorkerBody, WorkerContext, WorkerId, WorkerState},
};

/// A registered worker and its thread.
struct WorkerSlot {
    context: Arc<WorkerContext>,
    /// Body, until the thread is started.
    body: Option<WorkerBody>,
    /// Thread handle, until joined or abandoned by `stop()`.
    thread: Option<JoinHandle<()>>,
}

/// Controls worker threads step by step through their checkpoints.
///
/// # Example
///
/// ```rust
/// use interleave_harness::Simulator;
///
/// # fn main() -> Result<(), interleave_harness::SimulatorError> {
/// interleave_core::enable();
///
/// let mut sim = Simulator::new().with_step_timeout_secs(1);
/// let a = sim.worker("A", || interleave_core::checkpoint("demo", "half"));
/// let b = sim.worker("B", || ());
/// sim.start()?;
///
/// // A stops at "half", then A and B both run to the end together.
/// sim.run(a)?.till("demo", "half")?.drive()?;
/// sim.run(a)?.till_end()?.run(b)?.concurrent().till_end()?.drive()?;
///
/// sim.stop();
/// # Ok(())
/// # }
/// ```
pub struct Simulator {
    config: SimulatorConfig,
    workers: Vec<WorkerSlot>,
    /// Declared schedule. Steps before `cursor` have been released.
    steps: Vec<Arc<Step>>,
    cursor: usize,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    /// Simulator with the default configuration.
    pub fn new() -> Self {
        Self::with_config(SimulatorConfig::default())
    }

    /// Simulator with the given configuration.
    pub fn with_config(config: SimulatorConfig) -> Self {
        Self { config, workers: Vec::new(), steps: Vec::new(), cursor: 0 }
    }

    /// Set the step timeout.
    ///
    /// Applies to workers started after this call.
    #[must_use]
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.config.step_timeout = timeout;
        self
    }

    /// Set the step timeout in seconds.
    #[must_use]
    pub fn with_step_timeout_secs(self, seconds: u64) -> Self {
        self.with_step_timeout(Duration::from_secs(seconds))
    }

    /// Set the step timeout in milliseconds.
    #[must_use]
    pub fn with_step_timeout_millis(self, milliseconds: u64) -> Self {
        self.with_step_timeout(Duration::from_millis(milliseconds))
    }

    /// The active configuration.
    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Register a worker. It runs on its own thread once started.
    ///
    /// The body may return `()` or `Result<(), E>`; an error or a panic is
    /// captured and reported by the next `drive()`.
    pub fn worker<F, R>(&mut self, name: impl Into<String>, body: F) -> WorkerId
    where
        F: FnOnce() -> R + Send + 'static,
        R: IntoWorkerResult,
    {
        let context = Arc::new(WorkerContext::new(name));
        let id = context.id();
        let body: WorkerBody = Box::new(move || body().into_worker_result());

        tracing::debug!("registered worker '{}' as {}", context.name(), id);
        self.workers.push(WorkerSlot { context, body: Some(body), thread: None });
        id
    }

    /// Start every registered worker that is not running yet.
    ///
    /// Each worker pauses before entering its body.
    pub fn start(&mut self) -> Result<(), SimulatorError> {
        for slot in &mut self.workers {
            if let Some(body) = slot.body.take() {
                slot.thread = Some(worker::spawn(&slot.context, body, &self.config)?);
            }
        }

        Ok(())
    }

    /// Declare a step for `worker`.
    ///
    /// Steps run one after another unless marked
    /// [`concurrent`](StepBuilder::concurrent). The worker must be started
    /// and still running its body.
    pub fn run(&mut self, worker: WorkerId) -> Result<StepBuilder<'_>, SimulatorError> {
        let index = self.index_of(worker)?;
        Ok(StepBuilder { simulator: self, worker: index, concurrent: false })
    }

    /// Release the declared steps batch by batch.
    ///
    /// Returns once every step reached its target; the schedule is then
    /// cleared so the next one can be declared. On error the failing batch
    /// counts as released and later steps stay queued; a batch rejected
    /// before release stays queued as a whole (see
    /// [`pending_steps`](Self::pending_steps) and
    /// [`discard_steps`](Self::discard_steps)).
    pub fn drive(&mut self) -> Result<(), SimulatorError> {
        while self.cursor < self.steps.len() {
            let start = self.cursor;
            let len = batch_len(&self.steps[start..]);
            let batch = self.steps[start..start + len].to_vec();

            self.check_batch(&batch)?;
            self.cursor += len;
            self.release(&batch)?;
        }

        self.discard_steps();
        Ok(())
    }

    /// Interrupt every worker and wait for the threads to exit.
    ///
    /// Never fails: a thread that does not exit within the step timeout is
    /// logged and left behind. Safe to call more than once.
    pub fn stop(&mut self) {
        for slot in &self.workers {
            slot.context.request_stop();
        }

        let timeout = self.config.step_timeout;
        for slot in &mut self.workers {
            slot.body = None;

            let Some(thread) = slot.thread.take() else {
                continue;
            };

            if !slot.context.wait_exit(timeout) {
                tracing::warn!("{} => join timed out after {:?}", slot.context.name(), timeout);
                continue;
            }

            if thread.join().is_err() {
                tracing::warn!("{} => thread panicked outside its body", slot.context.name());
            }
        }
    }

    /// Lifecycle state of `worker`.
    pub fn state(&self, worker: WorkerId) -> Option<WorkerState> {
        self.slot(worker).map(|slot| slot.context.state())
    }

    /// Failure captured for `worker`, if any.
    pub fn failure(&self, worker: WorkerId) -> Option<Arc<WorkerFailure>> {
        self.slot(worker).and_then(|slot| slot.context.failure())
    }

    /// Name `worker` was registered with.
    pub fn worker_name(&self, worker: WorkerId) -> Option<&str> {
        self.slot(worker).map(|slot| slot.context.name())
    }

    /// Number of declared steps not yet released.
    pub fn pending_steps(&self) -> usize {
        self.steps.len() - self.cursor
    }

    /// Drop every declared step that has not been released.
    pub fn discard_steps(&mut self) {
        self.steps.clear();
        self.cursor = 0;
    }

    fn slot(&self, worker: WorkerId) -> Option<&WorkerSlot> {
        self.workers.iter().find(|slot| slot.context.id() == worker)
    }

    fn index_of(&self, worker: WorkerId) -> Result<usize, SimulatorError> {
        self.workers
            .iter()
            .position(|slot| slot.context.id() == worker)
            .ok_or(SimulatorError::UnknownWorker(worker))
    }

    fn push_step(
        &mut self,
        worker: usize,
        target: StepTarget,
        concurrent: bool,
    ) -> Result<&mut Self, SimulatorError> {
        let slot = &self.workers[worker];
        let context = &slot.context;

        if slot.body.is_some() {
            return Err(SimulatorError::NotStarted { name: context.name().to_string() });
        }
        if context.state().is_terminal() {
            return Err(SimulatorError::WorkerStopped { name: context.name().to_string() });
        }

        // The open batch is the undriven tail starting at the last
        // non-concurrent step; a concurrent step would join it.
        let undriven = &self.steps[self.cursor..];
        let open = undriven
            .iter()
            .rposition(|step| !step.is_concurrent())
            .map_or(undriven, |at| &undriven[at..]);
        let joins_busy_batch = concurrent && open.iter().any(|step| step.worker() == context.id());

        if joins_busy_batch || context.has_assignment() {
            return Err(SimulatorError::WorkerBusy { name: context.name().to_string() });
        }

        self.steps.push(Arc::new(Step::new(context.id(), context.name(), target, concurrent)));
        Ok(self)
    }

    /// Check that every worker in `batch` can take its step.
    ///
    /// Runs before anything is released, so a bad step leaves the whole
    /// batch queued.
    fn check_batch(&self, batch: &[Arc<Step>]) -> Result<(), SimulatorError> {
        for step in batch {
            let slot = self.slot(step.worker()).ok_or(SimulatorError::UnknownWorker(step.worker()))?;
            if slot.body.is_some() {
                return Err(SimulatorError::NotStarted { name: step.worker_name().to_string() });
            }
            if slot.context.has_assignment() {
                return Err(SimulatorError::WorkerBusy { name: step.worker_name().to_string() });
            }
        }

        Ok(())
    }

    /// Release one checked batch and check the outcome.
    fn release(&self, batch: &[Arc<Step>]) -> Result<(), SimulatorError> {
        let countdown = Arc::new(Countdown::new(batch.len()));
        tracing::debug!("releasing batch of {}", batch.len());

        for step in batch {
            let slot = self.slot(step.worker()).ok_or(SimulatorError::UnknownWorker(step.worker()))?;
            slot.context.assign(Arc::clone(step), Arc::clone(&countdown))?;
        }

        let timeout = self.config.step_timeout;
        if !countdown.wait(timeout) {
            let waiting = batch
                .iter()
                .filter(|step| !step.is_settled())
                .map(|step| step.worker_name().to_string())
                .collect();
            return Err(SimulatorError::Timeout { timeout, waiting });
        }

        self.collect_failures()?;

        for step in batch {
            step.validate()?;
        }

        Ok(())
    }

    /// Failures captured by any worker, in registration order.
    fn collect_failures(&self) -> Result<(), AggregatedFailure> {
        let causes = self
            .workers
            .iter()
            .filter_map(|slot| {
                slot.context.failure().map(|failure| FailureEntry {
                    worker: slot.context.id(),
                    name: slot.context.name().to_string(),
                    failure,
                })
            })
            .collect();

        AggregatedFailure::from_entries(causes).map_or(Ok(()), Err)
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Builder for one step; finish it with [`till`](Self::till),
/// [`till_checkpoint`](Self::till_checkpoint) or [`till_end`](Self::till_end).
pub struct StepBuilder<'a> {
    simulator: &'a mut Simulator,
    worker: usize,
    concurrent: bool,
}

impl<'a> StepBuilder<'a> {
    /// Run this step in the same batch as the step declared before it.
    #[must_use]
    pub fn concurrent(mut self) -> Self {
        self.concurrent = true;
        self
    }

    /// Run until the checkpoint `owner#name` and pause there.
    pub fn till(self, owner: &str, name: &str) -> Result<&'a mut Simulator, SimulatorError> {
        if name.is_empty() {
            return Err(SimulatorError::EmptyCheckpoint);
        }

        self.checkpoint_step(CheckpointName::new(owner, name))
    }

    /// Run until `checkpoint` and pause there.
    pub fn till_checkpoint(self, checkpoint: CheckpointName) -> Result<&'a mut Simulator, SimulatorError> {
        if checkpoint.local().is_empty() {
            return Err(SimulatorError::EmptyCheckpoint);
        }

        self.checkpoint_step(checkpoint)
    }

    /// Run until the worker body returns.
    pub fn till_end(self) -> Result<&'a mut Simulator, SimulatorError> {
        self.simulator.push_step(self.worker, StepTarget::End, self.concurrent)
    }

    fn checkpoint_step(self, checkpoint: CheckpointName) -> Result<&'a mut Simulator, SimulatorError> {
        if !interleave_core::is_enabled() {
            return Err(SimulatorError::CheckpointsDisabled);
        }

        self.simulator.push_step(self.worker, StepTarget::Checkpoint(checkpoint), self.concurrent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_worker_is_rejected() {
        let mut other = Simulator::new();
        let foreign = other.worker("foreign", || ());

        let mut sim = Simulator::new();
        sim.worker("local", || ());

        assert!(matches!(sim.run(foreign), Err(SimulatorError::UnknownWorker(id)) if id == foreign));
    }

    #[test]
    fn concurrent_step_for_same_worker_is_busy() {
        let mut sim = Simulator::new();
        let a = sim.worker("A", || ());
        let b = sim.worker("B", || ());
        sim.start().expect("start");

        sim.run(a).and_then(StepBuilder::till_end).expect("first step");
        sim.run(b).map(StepBuilder::concurrent).and_then(StepBuilder::till_end).expect("other worker");

        let err = sim.run(a).map(StepBuilder::concurrent).and_then(StepBuilder::till_end);
        assert!(matches!(err, Err(SimulatorError::WorkerBusy { ref name }) if name == "A"));
        assert_eq!(sim.pending_steps(), 2);

        // Sequential is fine: the first step completes before the second.
        sim.run(a).and_then(StepBuilder::till_end).expect("sequential step");
        assert_eq!(sim.pending_steps(), 3);
    }

    #[test]
    fn empty_checkpoint_is_rejected() {
        let mut sim = Simulator::new();
        let a = sim.worker("A", || ());

        let err = sim.run(a).and_then(|step| step.till("owner", ""));
        assert!(matches!(err, Err(SimulatorError::EmptyCheckpoint)));

        let err = sim.run(a).and_then(|step| step.till_checkpoint(CheckpointName::new("owner", "")));
        assert!(matches!(err, Err(SimulatorError::EmptyCheckpoint)));
        assert_eq!(sim.pending_steps(), 0);
    }

    #[test]
    fn unstarted_worker_is_rejected_at_declaration() {
        let mut sim = Simulator::new().with_step_timeout_millis(50);
        let a = sim.worker("A", || ());

        let err = sim.run(a).and_then(StepBuilder::till_end);
        assert!(matches!(err, Err(SimulatorError::NotStarted { ref name }) if name == "A"));
        assert_eq!(sim.pending_steps(), 0);
        assert_eq!(sim.state(a), Some(WorkerState::Created));
    }

    #[test]
    fn unreleasable_batch_releases_nothing() {
        let mut sim = Simulator::new().with_step_timeout_millis(50);
        let a = sim.worker("A", || ());
        sim.start().expect("start");
        let b = sim.worker("B", || ());

        // Bypass declaration checks to reach the release-time backstop.
        sim.steps.push(Arc::new(Step::new(a, "A", StepTarget::End, false)));
        sim.steps.push(Arc::new(Step::new(b, "B", StepTarget::End, true)));

        let err = sim.drive().expect_err("B not started");
        assert!(matches!(err, SimulatorError::NotStarted { ref name } if name == "B"));
        assert_eq!(sim.pending_steps(), 2);
        assert_eq!(sim.state(a), Some(WorkerState::Paused));
        assert!(!sim.workers[0].context.has_assignment());
    }

    #[test]
    fn checkpoint_names_containing_separator_are_not_empty() {
        let mut sim = Simulator::new();
        let a = sim.worker("A", || ());
        sim.start().expect("start");

        let result = sim.run(a).and_then(|step| step.till_checkpoint(CheckpointName::new("owner", "x#")));
        assert!(!matches!(result, Err(SimulatorError::EmptyCheckpoint)));
    }

    #[test]
    fn step_timeout_builders() {
        assert_eq!(Simulator::new().with_step_timeout_secs(2).config().step_timeout, Duration::from_secs(2));
        assert_eq!(
            Simulator::new().with_step_timeout_millis(150).config().step_timeout,
            Duration::from_millis(150)
        );
    }

    #[test]
    fn registration_reports_name_and_state() {
        let mut sim = Simulator::new();
        let a = sim.worker("A", || ());

        assert_eq!(sim.worker_name(a), Some("A"));
        assert_eq!(sim.state(a), Some(WorkerState::Created));
        assert!(sim.failure(a).is_none());
    }
}
