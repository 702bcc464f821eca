//! Allocator labels naming the memory domain a buffer draws from.

use std::fmt;

/// Names the backing memory domain (and therefore the lifetime policy) of an
/// allocation.
///
/// Every allocation/free pair tied to one buffer uses the same label. The
/// label is a pure value: it carries no state and can be copied freely.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum AllocatorLabel {
    /// No allocator assigned. Cannot allocate from the heap.
    None = 0,
    /// Sentinel for "not yet assigned". Passing it to any `init` call is a
    /// programming error and fails immediately.
    #[default]
    Invalid = 1,
    /// Long-lived heap memory, freed explicitly by its owner.
    Persistent = 2,
    /// Short-lived memory expected to be released within one frame.
    FrameTemp = 3,
    /// Temporary memory owned by a single worker thread for one job.
    ThreadTemp = 4,
    /// Memory supplied by the caller (scratch blocks, page ranges).
    UserProvided = 5,
}

impl AllocatorLabel {
    /// All labels, in declaration order.
    pub const ALL: [AllocatorLabel; 6] = [
        Self::None,
        Self::Invalid,
        Self::Persistent,
        Self::FrameTemp,
        Self::ThreadTemp,
        Self::UserProvided,
    ];

    /// Whether this label is the `Invalid` sentinel.
    pub fn is_invalid(self) -> bool {
        self == Self::Invalid
    }

    /// Whether the general-purpose heap may serve allocations for this label.
    ///
    /// `None` and `UserProvided` name memory the heap does not own; `Invalid`
    /// is never allowed anywhere.
    pub fn is_heap_backed(self) -> bool {
        matches!(self, Self::Persistent | Self::FrameTemp | Self::ThreadTemp)
    }

    /// Dense index in `0..ALL.len()`, used for per-label tables.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Short lowercase name used in diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Invalid => "invalid",
            Self::Persistent => "persistent",
            Self::FrameTemp => "frame-temp",
            Self::ThreadTemp => "thread-temp",
            Self::UserProvided => "user-provided",
        }
    }
}

impl fmt::Display for AllocatorLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
