//! Checkpoint naming.

use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
};

/// Separator between the owner and the local checkpoint name.
const SEPARATOR: char = '#';

/// Fully qualified checkpoint name: `<owner>#<name>`.
///
/// The owner identifies the component declaring the checkpoint (usually a
/// module path or type name), which keeps short local names such as
/// `"before_commit"` from colliding across components. Equality is exact
/// string identity.
#[derive(Debug, Clone)]
pub struct CheckpointName {
    full: String,
    /// Byte offset of the local name in `full`.
    local_at: usize,
}

impl CheckpointName {
    /// Combine an owner identifier and a local name.
    pub fn new(owner: &str, name: &str) -> Self {
        let mut full = String::with_capacity(owner.len() + name.len() + 1);
        full.push_str(owner);
        full.push(SEPARATOR);
        full.push_str(name);
        Self { full, local_at: owner.len() + SEPARATOR.len_utf8() }
    }

    /// Checkpoint owned by type `T`, using its type name as the owner.
    pub fn of<T: ?Sized>(name: &str) -> Self {
        Self::new(std::any::type_name::<T>(), name)
    }

    /// The combined name.
    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// The local name, as passed to [`new`](Self::new).
    pub fn local(&self) -> &str {
        &self.full[self.local_at..]
    }
}

impl PartialEq for CheckpointName {
    fn eq(&self, other: &Self) -> bool {
        self.full == other.full
    }
}

impl Eq for CheckpointName {}

impl Hash for CheckpointName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.full.hash(state);
    }
}

impl PartialOrd for CheckpointName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CheckpointName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.full.cmp(&other.full)
    }
}

impl fmt::Display for CheckpointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl PartialEq<str> for CheckpointName {
    fn eq(&self, other: &str) -> bool {
        self.full == other
    }
}

impl AsRef<str> for CheckpointName {
    fn as_ref(&self) -> &str {
        &self.full
    }
}
