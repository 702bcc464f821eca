//! Virtual memory ranges for Ballast.
//!
//! Reserve address space in pages of a discovered size, commit it for use,
//! decommit it to hand the memory back while keeping the addresses, and
//! free it. The platform is reached only through a [`PageBackend`]:
//!
//! ```text
//! VmRange<B>       reserve / commit / decommit / free, #[track_caller] errors
//! PageAllocator<B> BackingAllocator serving each init from its own range
//! PageBackend      SystemPages (mmap on Unix) | HeapPages (global allocator)
//! page_size_info   default size + available-size bitmask, cached once
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod backend;
pub mod error;
pub mod page_size;
pub mod range;
pub mod strategy;

#[cfg(unix)]
pub use backend::SystemPages;
pub use backend::{DefaultPages, HeapPages, PageBackend};
pub use error::{OsFailure, VmError, VmErrorKind, VmOp};
pub use page_size::{page_size_info, PageSizeInfo, FALLBACK_PAGE_SIZE};
pub use range::{RangeState, VmRange};
pub use strategy::PageAllocator;
