//! Process-wide general-purpose allocator keyed by [`AllocatorLabel`].
//!
//! Forwards to the global Rust allocator and keeps per-label counters of live
//! bytes and allocations so that owners of a memory domain (e.g. a frame
//! allocator) can verify everything was returned.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use ballast_core::{AllocError, AllocatorLabel};
use indexmap::IndexMap;

struct LabelCounters {
    live_bytes: AtomicUsize,
    live_allocations: AtomicUsize,
    total_allocations: AtomicU64,
}

impl LabelCounters {
    const fn new() -> Self {
        Self {
            live_bytes: AtomicUsize::new(0),
            live_allocations: AtomicUsize::new(0),
            total_allocations: AtomicU64::new(0),
        }
    }
}

static COUNTERS: [LabelCounters; AllocatorLabel::ALL.len()] =
    [const { LabelCounters::new() }; AllocatorLabel::ALL.len()];

/// Point-in-time usage of one label.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LabelStats {
    /// Bytes currently allocated and not yet freed.
    pub live_bytes: usize,
    /// Allocations currently outstanding.
    pub live_allocations: usize,
    /// Allocations served since process start.
    pub total_allocations: u64,
}

/// Validate `size`/`align` into a [`Layout`].
pub fn layout_for(size: usize, align: usize) -> Result<Layout, AllocError> {
    Layout::from_size_align(size, align).map_err(|_| AllocError::InvalidLayout { size, align })
}

/// A well-aligned, non-null pointer for zero-sized requests.
pub fn dangling(align: usize) -> NonNull<u8> {
    // `align` is a validated non-zero power of two.
    NonNull::new(std::ptr::without_provenance_mut(align.max(1))).unwrap_or(NonNull::dangling())
}

/// Allocate `size` bytes at `align` from the heap under `label`.
///
/// Zero-size requests return a dangling pointer and are not counted.
/// Labels that are not heap-backed fail with
/// [`AllocError::InvalidAllocator`].
pub fn allocate(size: usize, align: usize, label: AllocatorLabel) -> Result<NonNull<u8>, AllocError> {
    if !label.is_heap_backed() {
        return Err(AllocError::InvalidAllocator { label });
    }
    let layout = layout_for(size, align)?;
    if size == 0 {
        return Ok(dangling(align));
    }
    // SAFETY: `layout` has a non-zero size.
    let raw = unsafe { alloc::alloc(layout) };
    let ptr = NonNull::new(raw).ok_or(AllocError::OutOfMemory { size, align, label })?;

    let counters = &COUNTERS[label.index()];
    counters.live_bytes.fetch_add(size, Ordering::Relaxed);
    counters.live_allocations.fetch_add(1, Ordering::Relaxed);
    counters.total_allocations.fetch_add(1, Ordering::Relaxed);
    Ok(ptr)
}

/// Return memory obtained from [`allocate`].
///
/// # Safety
///
/// `ptr` must come from [`allocate`] with the same `size`, `align` and
/// `label`, and must not be freed twice.
pub unsafe fn free(ptr: NonNull<u8>, size: usize, align: usize, label: AllocatorLabel) {
    if size == 0 {
        return;
    }
    // SAFETY: the caller passes the layout the block was allocated with,
    // which was validated by `allocate`.
    unsafe {
        let layout = Layout::from_size_align_unchecked(size, align);
        alloc::dealloc(ptr.as_ptr(), layout);
    }
    let counters = &COUNTERS[label.index()];
    counters.live_bytes.fetch_sub(size, Ordering::Relaxed);
    counters.live_allocations.fetch_sub(1, Ordering::Relaxed);
}

/// Current usage counters for `label`.
pub fn stats(label: AllocatorLabel) -> LabelStats {
    let counters = &COUNTERS[label.index()];
    LabelStats {
        live_bytes: counters.live_bytes.load(Ordering::Relaxed),
        live_allocations: counters.live_allocations.load(Ordering::Relaxed),
        total_allocations: counters.total_allocations.load(Ordering::Relaxed),
    }
}

/// Usage of every heap-backed label, in declaration order.
pub fn snapshot() -> IndexMap<AllocatorLabel, LabelStats> {
    AllocatorLabel::ALL
        .iter()
        .copied()
        .filter(|l| l.is_heap_backed())
        .map(|l| (l, stats(l)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // FrameTemp is reserved for this module's counter test; other unit tests
    // in this crate allocate under Persistent or ThreadTemp.
    #[test]
    fn counters_track_live_allocation() {
        let before = stats(AllocatorLabel::FrameTemp);
        let ptr = allocate(128, 16, AllocatorLabel::FrameTemp).unwrap();
        let during = stats(AllocatorLabel::FrameTemp);
        assert_eq!(during.live_bytes, before.live_bytes + 128);
        assert_eq!(during.live_allocations, before.live_allocations + 1);
        assert!(during.total_allocations > before.total_allocations);

        unsafe { free(ptr, 128, 16, AllocatorLabel::FrameTemp) };
        let after = stats(AllocatorLabel::FrameTemp);
        assert_eq!(after.live_bytes, before.live_bytes);
        assert_eq!(after.live_allocations, before.live_allocations);
    }

    #[test]
    fn non_heap_labels_rejected() {
        for label in [
            AllocatorLabel::None,
            AllocatorLabel::Invalid,
            AllocatorLabel::UserProvided,
        ] {
            assert_eq!(
                allocate(8, 8, label),
                Err(AllocError::InvalidAllocator { label })
            );
        }
    }

    #[test]
    fn zero_size_is_aligned_and_uncounted() {
        let ptr = allocate(0, 64, AllocatorLabel::ThreadTemp).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 64, 0);
        unsafe { free(ptr, 0, 64, AllocatorLabel::ThreadTemp) };
    }

    #[test]
    fn bad_alignment_is_invalid_layout() {
        assert_eq!(
            allocate(8, 3, AllocatorLabel::Persistent),
            Err(AllocError::InvalidLayout { size: 8, align: 3 })
        );
    }

    #[test]
    fn snapshot_lists_heap_labels_in_order() {
        let keys: Vec<_> = snapshot().keys().copied().collect();
        assert_eq!(
            keys,
            vec![
                AllocatorLabel::Persistent,
                AllocatorLabel::FrameTemp,
                AllocatorLabel::ThreadTemp
            ]
        );
    }
}
