//! Checkpoint markers for deterministic interleaving tests.
//!
//! Production code calls [`checkpoint`] (or the [`checkpoint!`] macro) at the
//! places where a concurrent race can happen. In production the registry is
//! disabled and a checkpoint costs one relaxed atomic load. A test harness
//! enables the registry and installs an [`Interceptor`] on each worker thread,
//! which lets it pause that thread exactly at a named checkpoint and decide
//! which thread runs next.
//!
//! # Example
//!
//! ```rust
//! fn commit(version: &mut u64) {
//!     // Another transaction may commit between read and write.
//!     interleave_core::checkpoint!("before_commit");
//!     *version += 1;
//! }
//!
//! let mut version = 0;
//! commit(&mut version);
//! assert_eq!(version, 1);
//! ```
//!
//! # Invariants
//!
//! - Transparency: a checkpoint with no matching interceptor has no
//!   observable effect on the calling code
//! - Isolation: an interceptor only sees checkpoints hit by the thread that
//!   installed it

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod name;
mod registry;

pub use name::CheckpointName;
pub use registry::{Interceptor, checkpoint, disable, enable, is_enabled, set_interceptor};

/// Marks a checkpoint owned by the enclosing module.
///
/// Expands to [`checkpoint`] with `module_path!()` as the owner, so the
/// matching target is `CheckpointName::new(module_path!(), name)` evaluated
/// in the same module.
#[macro_export]
macro_rules! checkpoint {
    ($name:expr) => {
        $crate::checkpoint(::core::module_path!(), $name)
    };
}
