//! Scheduling steps and batch validation.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use interleave_core::CheckpointName;

use crate::{error::CheckpointError, worker::WorkerId};

/// Where a step should leave its worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepTarget {
    /// Paused at this checkpoint.
    Checkpoint(CheckpointName),
    /// Done running its body.
    End,
}

impl fmt::Display for StepTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Checkpoint(name) => write!(f, "reach checkpoint '{name}'"),
            Self::End => f.write_str("finish"),
        }
    }
}

/// One scheduling directive: run `worker` until `target`.
///
/// The observation flags are written by the worker thread and read by the
/// controller after the batch countdown completes.
#[derive(Debug)]
pub(crate) struct Step {
    /// Worker this step releases.
    worker: WorkerId,
    /// Worker name, for diagnostics.
    worker_name: String,
    /// Where the worker should stop.
    target: StepTarget,
    /// Whether this step joins the batch of the step before it.
    concurrent: bool,
    /// Set when the worker paused at the target checkpoint.
    checkpoint_reached: AtomicBool,
    /// Set when the worker stopped running while this step was pending.
    worker_finished: AtomicBool,
}

impl Step {
    pub(crate) fn new(worker: WorkerId, worker_name: &str, target: StepTarget, concurrent: bool) -> Self {
        Self {
            worker,
            worker_name: worker_name.to_string(),
            target,
            concurrent,
            checkpoint_reached: AtomicBool::new(false),
            worker_finished: AtomicBool::new(false),
        }
    }

    pub(crate) fn worker(&self) -> WorkerId {
        self.worker
    }

    pub(crate) fn worker_name(&self) -> &str {
        &self.worker_name
    }

    pub(crate) fn is_concurrent(&self) -> bool {
        self.concurrent
    }

    /// Whether `name` is this step's target checkpoint.
    pub(crate) fn targets(&self, name: &CheckpointName) -> bool {
        matches!(&self.target, StepTarget::Checkpoint(target) if target == name)
    }

    pub(crate) fn mark_checkpoint_reached(&self) {
        self.checkpoint_reached.store(true, Ordering::Release);
    }

    pub(crate) fn mark_worker_finished(&self) {
        self.worker_finished.store(true, Ordering::Release);
    }

    /// Whether the worker has counted this step down, either way.
    pub(crate) fn is_settled(&self) -> bool {
        self.checkpoint_reached.load(Ordering::Acquire) || self.worker_finished.load(Ordering::Acquire)
    }

    /// Check that the declared target was observed.
    pub(crate) fn validate(&self) -> Result<(), CheckpointError> {
        let met = match self.target {
            StepTarget::Checkpoint(_) => self.checkpoint_reached.load(Ordering::Acquire),
            StepTarget::End => self.worker_finished.load(Ordering::Acquire),
        };

        if met { Ok(()) } else { Err(CheckpointError::new(&self.worker_name, self.target.clone())) }
    }
}

/// Length of the batch at the head of `steps`.
///
/// The first step always opens a batch; every following step with the
/// concurrency flag set joins it.
pub(crate) fn batch_len(steps: &[Arc<Step>]) -> usize {
    match steps.split_first() {
        None => 0,
        Some((_, rest)) => 1 + rest.iter().take_while(|step| step.is_concurrent()).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(concurrent: bool) -> Arc<Step> {
        Arc::new(Step::new(WorkerId::from_raw(1), "A", StepTarget::End, concurrent))
    }

    #[test]
    fn batch_len_groups_following_concurrent_steps() {
        let steps = vec![step(false), step(true), step(true), step(false), step(true)];
        assert_eq!(batch_len(&steps), 3);
        assert_eq!(batch_len(&steps[3..]), 2);
        assert_eq!(batch_len(&[]), 0);
    }

    #[test]
    fn leading_concurrent_flag_still_opens_a_batch() {
        let steps = vec![step(true), step(false)];
        assert_eq!(batch_len(&steps), 1);
    }

    #[test]
    fn checkpoint_step_requires_reached_flag() {
        let name = CheckpointName::new("owner", "foo");
        let step = Step::new(WorkerId::from_raw(1), "A", StepTarget::Checkpoint(name.clone()), false);

        assert!(step.targets(&name));
        assert!(!step.targets(&CheckpointName::new("owner", "bar")));

        step.mark_worker_finished();
        let err = step.validate().expect_err("finishing is not reaching the checkpoint");
        assert_eq!(err.worker(), "A");
        assert_eq!(err.target(), &StepTarget::Checkpoint(name));

        step.mark_checkpoint_reached();
        assert!(step.validate().is_ok());
    }

    #[test]
    fn end_step_requires_finished_flag() {
        let step = step(false);
        assert!(!step.is_settled());
        assert!(step.validate().is_err());

        step.mark_worker_finished();
        assert!(step.is_settled());
        assert!(step.validate().is_ok());
    }
}
