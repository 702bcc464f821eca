//! Error types for the Ballast buffer framework.
//!
//! Organized by subsystem: allocation strategies (including the scratch
//! allocator) and growable buffers. Virtual-memory errors live in
//! `ballast-vm` because they carry platform sub-codes.

use std::error::Error;
use std::fmt;

use crate::label::AllocatorLabel;

/// Errors from a backing allocation strategy or the scratch allocator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// The request named a label that cannot serve it. Always raised for
    /// [`AllocatorLabel::Invalid`].
    InvalidAllocator {
        /// The offending label.
        label: AllocatorLabel,
    },
    /// Size/alignment do not form a valid layout (alignment not a power of
    /// two, or size overflows when rounded up to the alignment).
    InvalidLayout {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },
    /// The system allocator (or page backend) refused the request.
    OutOfMemory {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
        /// Label the request was made under.
        label: AllocatorLabel,
    },
    /// A fixed-size block cannot hold the request.
    CapacityExceeded {
        /// Bytes the request would occupy, including alignment padding.
        requested: usize,
        /// Bytes still free in the block.
        available: usize,
    },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAllocator { label } => {
                write!(f, "allocator label '{label}' cannot serve allocations")
            }
            Self::InvalidLayout { size, align } => {
                write!(f, "invalid layout: size {size}, alignment {align}")
            }
            Self::OutOfMemory { size, align, label } => {
                write!(
                    f,
                    "out of memory: {size} bytes at alignment {align} ({label})"
                )
            }
            Self::CapacityExceeded {
                requested,
                available,
            } => {
                write!(
                    f,
                    "capacity exceeded: requested {requested} bytes, {available} bytes available"
                )
            }
        }
    }
}

impl Error for AllocError {}

/// Errors from growable-buffer operations and their views.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BufferError {
    /// The buffer was created with a label that cannot allocate.
    InvalidAllocator {
        /// The offending label.
        label: AllocatorLabel,
    },
    /// An argument violates an operation precondition
    /// (e.g. shrinking capacity below the current length).
    InvalidArgument {
        /// Human-readable description of the violated precondition.
        reason: String,
    },
    /// Bounds violation on get/set/remove.
    IndexOutOfRange {
        /// The requested index.
        index: usize,
        /// The buffer length at the time of the call.
        len: usize,
    },
    /// The buffer (or the buffer behind a view) has been disposed.
    UseAfterFree,
    /// A view was invalidated by a structural mutation of its buffer.
    StaleView {
        /// Secondary generation recorded by the view.
        view_generation: u32,
        /// Secondary generation of the buffer now.
        current_generation: u32,
    },
    /// A no-resize append found the buffer full.
    CapacityExceeded {
        /// Capacity of the buffer.
        capacity: usize,
    },
    /// A bucket partition is already claimed by another consumer.
    BucketBusy {
        /// The contended bucket.
        bucket: usize,
    },
    /// The backing strategy failed to provide storage.
    Alloc(AllocError),
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAllocator { label } => {
                write!(f, "buffer created with unusable allocator label '{label}'")
            }
            Self::InvalidArgument { reason } => write!(f, "invalid argument: {reason}"),
            Self::IndexOutOfRange { index, len } => {
                write!(f, "index {index} out of range for length {len}")
            }
            Self::UseAfterFree => write!(f, "buffer used after it was disposed"),
            Self::StaleView {
                view_generation,
                current_generation,
            } => {
                write!(
                    f,
                    "stale view: taken at generation {view_generation}, buffer is at {current_generation}"
                )
            }
            Self::CapacityExceeded { capacity } => {
                write!(f, "buffer is full (capacity {capacity})")
            }
            Self::BucketBusy { bucket } => {
                write!(f, "bucket {bucket} is claimed by another consumer")
            }
            Self::Alloc(e) => write!(f, "allocation failed: {e}"),
        }
    }
}

impl Error for BufferError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Alloc(e) => Some(e),
            _ => None,
        }
    }
}

impl From<AllocError> for BufferError {
    fn from(e: AllocError) -> Self {
        match e {
            AllocError::InvalidAllocator { label } => Self::InvalidAllocator { label },
            other => Self::Alloc(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_allocator_maps_to_buffer_variant() {
        let e: BufferError = AllocError::InvalidAllocator {
            label: AllocatorLabel::Invalid,
        }
        .into();
        assert_eq!(
            e,
            BufferError::InvalidAllocator {
                label: AllocatorLabel::Invalid
            }
        );
    }

    #[test]
    fn other_alloc_errors_are_wrapped_with_source() {
        let e: BufferError = AllocError::OutOfMemory {
            size: 64,
            align: 8,
            label: AllocatorLabel::Persistent,
        }
        .into();
        assert!(matches!(e, BufferError::Alloc(AllocError::OutOfMemory { .. })));
        assert!(e.source().is_some());
    }

    #[test]
    fn display_mentions_index_and_len() {
        let e = BufferError::IndexOutOfRange { index: 7, len: 3 };
        assert_eq!(e.to_string(), "index 7 out of range for length 3");
    }
}
