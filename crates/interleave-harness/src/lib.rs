//! Deterministic interleaving harness for race-condition tests.
//!
//! Production code marks interesting places with
//! [`interleave_core::checkpoint`]. A test registers the competing code paths
//! as workers on a [`Simulator`], then declares which worker runs to which
//! checkpoint, in which order:
//!
//! ```text
//! sim.run(a)?.till(OWNER, "before_commit")?      // A reads, pauses
//!    .run(b)?.concurrent().till_end()?           // B commits meanwhile
//!    .drive()?;
//! sim.run(a)?.till_end()?.drive()                // A commits: conflict
//! ```
//!
//! The race that happens once in a thousand runs now happens every run.
//!
//! # Architecture
//!
//! ```text
//! interleave-harness
//!   ├─ Simulator       (schedule, batches, validation, failure aggregation)
//!   ├─ WorkerContext   (per-thread interceptor, pending step, captured failure)
//!   ├─ Gate            (auto-resetting release signal)
//!   └─ Countdown       (per-batch completion latch)
//! ```
//!
//! # Error Surfacing
//!
//! Worker failures never cross threads as panics. Each worker captures its
//! first error or panic, and the next `drive()` reports every captured
//! failure as one [`AggregatedFailure`], queryable per [`WorkerId`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod gate;
mod latch;
mod simulator;
mod step;
mod worker;

pub use config::{DEFAULT_STEP_TIMEOUT, SimulatorConfig};
pub use error::{AggregatedFailure, BoxError, CheckpointError, FailureEntry, SimulatorError, WorkerFailure};
pub use interleave_core::CheckpointName;
pub use simulator::{Simulator, StepBuilder};
pub use step::StepTarget;
pub use worker::{IntoWorkerResult, WorkerId, WorkerState};
