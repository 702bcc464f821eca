//! Ballast: native buffers, pluggable allocators and virtual memory ranges
//! for workloads that manage memory outside any collector.
//!
//! This is the top-level facade crate that re-exports the public API from all
//! Ballast sub-crates.
//!
//! # Quick start
//!
//! ```rust
//! use ballast::prelude::*;
//!
//! let mut list = NativeList::<u32>::with_capacity(1, AllocatorLabel::Persistent).unwrap();
//! for v in [10, 20, 30, 40] {
//!     list.add(v).unwrap();
//! }
//! let view = list.as_flat_view().unwrap();
//! assert_eq!(view.to_vec().unwrap(), vec![10, 20, 30, 40]);
//!
//! list.remove_at_swap_back(1).unwrap();
//! assert!(matches!(view.get(0), Err(BufferError::StaleView { .. })));
//! assert_eq!(list.to_vec().unwrap(), vec![10, 40, 30]);
//!
//! list.dispose().unwrap();
//! assert_eq!(list.get(0), Err(BufferError::UseAfterFree));
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `ballast-core` | Labels, errors, ids, configuration |
//! | [`alloc`] | `ballast-alloc` | Strategies, labeled heap, sentinels, scratch allocator |
//! | [`vm`] | `ballast-vm` | Page sizes, virtual memory ranges, page-backed strategy |
//! | [`buffer`] | `ballast-buffer` | `NativeList`, views, safety tracking, bucket partitions |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Labels, error types, ids and configuration (`ballast-core`).
pub use ballast_core as types;

/// Backing strategies, the labeled heap, leak sentinels and the scratch
/// allocator (`ballast-alloc`).
pub use ballast_alloc as alloc;

/// Page-size discovery, [`vm::VmRange`] and [`vm::PageAllocator`]
/// (`ballast-vm`).
pub use ballast_vm as vm;

/// Growable buffers and their views (`ballast-buffer`).
pub use ballast_buffer as buffer;

/// Common imports for typical Ballast usage.
pub mod prelude {
    // Core types
    pub use ballast_core::{
        AllocError, AllocatorLabel, BufferError, BufferId, LeakDetectionMode, ListConfig,
    };

    // Strategies
    pub use ballast_alloc::{
        BackingAllocator, CountedAllocator, LabeledHeap, LeakSentinel, ScratchAllocator,
        ScratchStrategy,
    };

    // Virtual memory
    pub use ballast_vm::{page_size_info, PageAllocator, VmError, VmRange};

    // Buffers
    pub use ballast_buffer::{BucketPartition, DeferredView, FlatView, NativeList};
}
