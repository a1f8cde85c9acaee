//! Simulator error types.

use std::{fmt, sync::Arc, time::Duration};

use thiserror::Error;

use crate::{step::StepTarget, worker::WorkerId};

/// Boxed error returned by a failing worker body.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from simulator operations.
#[derive(Debug, Error)]
pub enum SimulatorError {
    /// A batch did not reach its targets within the step timeout.
    ///
    /// Usually a worker blocked outside a checkpoint (for example on a lock
    /// held by a paused worker) or a checkpoint that is never hit.
    #[error("batch timed out after {timeout:?}; still waiting on: {}", .waiting.join(", "))]
    Timeout {
        /// The configured step timeout.
        timeout: Duration,
        /// Names of the workers whose steps had not settled.
        waiting: Vec<String>,
    },

    /// A step's declared target was not observed after its batch completed.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// One or more workers failed.
    #[error(transparent)]
    Aggregated(#[from] AggregatedFailure),

    /// A step was declared for a worker that already has one outstanding.
    #[error("worker '{name}' already has a pending step")]
    WorkerBusy {
        /// Worker name.
        name: String,
    },

    /// The worker handle does not belong to this simulator.
    #[error("no worker registered for {0}")]
    UnknownWorker(WorkerId),

    /// A step was declared for a worker whose thread was never started.
    #[error("worker '{name}' has not been started")]
    NotStarted {
        /// Worker name.
        name: String,
    },

    /// A step was declared for a worker that already finished, failed or
    /// was interrupted.
    #[error("worker '{name}' is no longer running")]
    WorkerStopped {
        /// Worker name.
        name: String,
    },

    /// Checkpoint targets need a non-empty name.
    #[error("checkpoint name must not be empty")]
    EmptyCheckpoint,

    /// Checkpoint targets are pointless while the registry is disabled.
    #[error("checkpoints are disabled; call interleave_core::enable() first")]
    CheckpointsDisabled,

    /// The OS refused to create a worker thread.
    #[error("failed to spawn thread for worker '{name}': {source}")]
    Spawn {
        /// Worker name.
        name: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl SimulatorError {
    /// Returns true if this error is a mistake in the declared schedule.
    ///
    /// Usage errors are raised while declaring steps, before any worker is
    /// released. The other errors come out of `drive()` and mean the run no
    /// longer matches the declared schedule.
    pub fn is_usage(&self) -> bool {
        match self {
            Self::WorkerBusy { .. }
            | Self::UnknownWorker(_)
            | Self::NotStarted { .. }
            | Self::WorkerStopped { .. }
            | Self::EmptyCheckpoint
            | Self::CheckpointsDisabled => true,

            Self::Timeout { .. }
            | Self::Checkpoint(_)
            | Self::Aggregated(_)
            | Self::Spawn { .. } => false,
        }
    }
}

/// A step's target was not observed after its batch completed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("worker '{worker}' didn't {target} as expected")]
pub struct CheckpointError {
    worker: String,
    target: StepTarget,
}

impl CheckpointError {
    pub(crate) fn new(worker: impl Into<String>, target: StepTarget) -> Self {
        Self { worker: worker.into(), target }
    }

    /// Name of the worker that missed its target.
    pub fn worker(&self) -> &str {
        &self.worker
    }

    /// The unmet target.
    pub fn target(&self) -> &StepTarget {
        &self.target
    }
}

/// Failure raised by a worker body.
#[derive(Debug, Error)]
pub enum WorkerFailure {
    /// The body returned an error.
    #[error("{0}")]
    Error(BoxError),

    /// The body panicked.
    #[error("panicked: {0}")]
    Panicked(String),
}

impl WorkerFailure {
    /// The returned error, if it is of type `E`.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            Self::Error(err) => err.downcast_ref::<E>(),
            Self::Panicked(_) => None,
        }
    }

    /// Whether the body panicked rather than returning an error.
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }
}

/// One worker's captured failure.
#[derive(Debug, Clone)]
pub struct FailureEntry {
    /// Handle of the failed worker.
    pub worker: WorkerId,
    /// Name of the failed worker.
    pub name: String,
    /// The captured failure.
    pub failure: Arc<WorkerFailure>,
}

/// Failures collected from every worker at the end of a batch wait.
///
/// Entries keep registration order. Failures are sticky: a worker that failed
/// in an earlier batch is reported again by every later `drive()`.
#[derive(Debug, Clone)]
pub struct AggregatedFailure {
    causes: Vec<FailureEntry>,
}

impl AggregatedFailure {
    /// Wrap the collected entries, or `None` if nothing failed.
    pub(crate) fn from_entries(causes: Vec<FailureEntry>) -> Option<Self> {
        if causes.is_empty() { None } else { Some(Self { causes }) }
    }

    /// The failure captured for `worker`, if it failed.
    pub fn cause_for(&self, worker: WorkerId) -> Option<&WorkerFailure> {
        self.causes.iter().find(|entry| entry.worker == worker).map(|entry| &*entry.failure)
    }

    /// The failure captured for the first worker named `name`.
    pub fn cause_named(&self, name: &str) -> Option<&WorkerFailure> {
        self.causes.iter().find(|entry| entry.name == name).map(|entry| &*entry.failure)
    }

    /// All entries in worker registration order.
    pub fn iter(&self) -> impl Iterator<Item = &FailureEntry> {
        self.causes.iter()
    }

    /// Number of failed workers.
    pub fn len(&self) -> usize {
        self.causes.len()
    }

    /// Always false; an aggregate is only built from at least one failure.
    pub fn is_empty(&self) -> bool {
        self.causes.is_empty()
    }
}

impl fmt::Display for AggregatedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "the following workers failed:")?;
        for entry in &self.causes {
            writeln!(f, "  {}: {}", entry.name, entry.failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregatedFailure {}
