//! Pluggable backing allocators for Ballast buffers.
//!
//! # Architecture
//!
//! ```text
//! BackingAllocator (trait: init / dispose)
//! ├── LabeledHeap          pass-through to the labeled heap (default)
//! ├── CountedAllocator<A>  shared live-allocation counter around any strategy
//! └── ScratchStrategy      bump allocation out of a caller-supplied block
//!
//! labeled   process-wide heap keyed by AllocatorLabel, per-label counters
//! sentinel  LeakSentinel guards: TrackedSentinel / NoLeakCheck
//! scratch   ScratchAllocator (bump pointer, no per-allocation free)
//! ```
//!
//! The page-backed strategy lives in `ballast-vm` so that this crate stays
//! free of OS bindings.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod labeled;
pub mod scratch;
pub mod sentinel;
pub mod strategy;

pub use labeled::LabelStats;
pub use scratch::{ScratchAllocator, ScratchStrategy};
pub use sentinel::{
    take_leak_reports, take_leak_reports_for, DefaultSentinel, LeakReport, LeakSentinel,
    NoLeakCheck, TrackedSentinel,
};
pub use strategy::{BackingAllocator, CountedAllocator, LabeledHeap};
