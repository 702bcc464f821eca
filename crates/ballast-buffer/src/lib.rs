//! Growable native buffers with generation-checked views.
//!
//! # Architecture
//!
//! ```text
//! NativeList<T, A, S>   {ptr, len, cap} + strategy A + leak sentinel S
//!   │
//!   ├── Arc<Shared> ── AtomicSafetyHandle {generation, secondary, readers}
//!   │        │           + published ptr/len
//!   │        ├── FlatView<T>       snapshot, checked on every read
//!   │        └── DeferredView<T>   resolved against the list at use
//!   │
//!   ├── ParallelWriter      concurrent appends into reserved capacity
//!   └── BucketPartition     exclusive per-bucket access over a view
//! ```
//!
//! Storage comes from any [`ballast_alloc::BackingAllocator`]: the labeled
//! heap by default, a scratch block, or page ranges from `ballast-vm`.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod bucket;
pub mod list;
pub mod parallel;
pub mod safety;
pub mod view;

pub use bucket::{BucketClaim, BucketPartition};
pub use list::NativeList;
pub use parallel::ParallelWriter;
pub use safety::{AtomicSafetyHandle, ReadGuard};
pub use view::{DeferredView, FlatView};
