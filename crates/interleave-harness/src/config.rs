//! Simulator configuration.

use std::time::Duration;

/// Default bound on every batch wait, worker pause slice and thread join.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Simulator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorConfig {
    /// How long `drive()` waits for a batch to reach its targets, and how long
    /// `stop()` waits for each worker thread to exit.
    pub step_timeout: Duration,
    /// Prefix for worker thread names (`<prefix>-<worker name>`).
    pub thread_prefix: String,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self { step_timeout: DEFAULT_STEP_TIMEOUT, thread_prefix: "interleave".to_string() }
    }
}

impl SimulatorConfig {
    /// Configuration with the given step timeout.
    pub fn with_step_timeout(step_timeout: Duration) -> Self {
        Self { step_timeout, ..Self::default() }
    }

    pub(crate) fn thread_name(&self, worker: &str) -> String {
        format!("{}-{}", self.thread_prefix, worker)
    }
}
