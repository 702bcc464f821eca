//! Strongly-typed identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for unique [`BufferId`] allocation.
static BUFFER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique per-instance identifier for a growable buffer.
///
/// Allocated from a monotonic atomic counter via [`BufferId::next`]. Used in
/// leak reports and log fields so that two buffers allocated at the same
/// address at different times are never confused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    /// Allocate a fresh, unique id. Thread-safe.
    pub fn next() -> Self {
        Self(BUFFER_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw counter value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
