//! The backing-allocator capability and its stock implementations.
//!
//! A [`BackingAllocator`] materializes raw storage for a buffer. Buffers are
//! generic over the strategy, so the hot `add`/`get`/`set` paths are
//! monomorphized per concrete strategy with no dynamic dispatch.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ballast_core::{AllocError, AllocatorLabel};

use crate::labeled;

/// Strategy that provides and reclaims raw storage for a buffer.
///
/// # Contract
///
/// - [`init`](BackingAllocator::init) fails with
///   [`AllocError::InvalidAllocator`] when `label` is
///   [`AllocatorLabel::Invalid`], and with [`AllocError::InvalidLayout`] when
///   `align` is not a power of two.
/// - A zero-size request returns a dangling, `align`-aligned pointer;
///   disposing it is a no-op.
/// - Every successful `init` is paired with exactly one
///   [`dispose`](BackingAllocator::dispose) on the same instance (or a clone
///   sharing its state) with the same size and alignment.
pub trait BackingAllocator {
    /// The label this strategy was created with.
    fn label(&self) -> AllocatorLabel;

    /// Allocate `size` bytes aligned to `align` under `label`.
    fn init(
        &mut self,
        size: usize,
        align: usize,
        label: AllocatorLabel,
    ) -> Result<NonNull<u8>, AllocError>;

    /// Release memory previously returned by [`init`](BackingAllocator::init).
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `init` on this strategy with the same
    /// `size` and `align`, and must not be disposed twice.
    unsafe fn dispose(&mut self, ptr: NonNull<u8>, size: usize, align: usize);
}

/// Shared preamble for strategies: label and layout validation, zero-size
/// short circuit. Returns `Ok(Some(ptr))` when the request is already served.
pub fn precheck(
    size: usize,
    align: usize,
    label: AllocatorLabel,
) -> Result<Option<NonNull<u8>>, AllocError> {
    if label.is_invalid() {
        return Err(AllocError::InvalidAllocator { label });
    }
    labeled::layout_for(size, align)?;
    if size == 0 {
        return Ok(Some(labeled::dangling(align)));
    }
    Ok(None)
}

/// Default strategy: a direct pass-through to the labeled heap.
///
/// Holds nothing but its label and keeps no bookkeeping of its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LabeledHeap {
    label: AllocatorLabel,
}

impl LabeledHeap {
    /// Create a pass-through strategy for `label`.
    pub fn new(label: AllocatorLabel) -> Self {
        Self { label }
    }
}

impl BackingAllocator for LabeledHeap {
    fn label(&self) -> AllocatorLabel {
        self.label
    }

    #[inline]
    fn init(
        &mut self,
        size: usize,
        align: usize,
        label: AllocatorLabel,
    ) -> Result<NonNull<u8>, AllocError> {
        if let Some(ptr) = precheck(size, align, label)? {
            return Ok(ptr);
        }
        labeled::allocate(size, align, label)
    }

    #[inline]
    unsafe fn dispose(&mut self, ptr: NonNull<u8>, size: usize, align: usize) {
        // SAFETY: forwarded caller contract; `self.label` is the label every
        // allocation of this strategy was made under.
        unsafe { labeled::free(ptr, size, align, self.label) }
    }
}

/// Strategy wrapper that counts outstanding allocations.
///
/// Clones share the counter, so a family of buffers built from one
/// `CountedAllocator` can be checked for full release with
/// [`live_allocations`](CountedAllocator::live_allocations).
#[derive(Clone, Debug)]
pub struct CountedAllocator<A> {
    inner: A,
    live: Arc<AtomicUsize>,
}

impl<A: BackingAllocator> CountedAllocator<A> {
    /// Wrap `inner` with a fresh counter.
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Allocations made through this family that have not been disposed.
    pub fn live_allocations(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Number of strategy instances sharing the counter.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.live)
    }
}

impl<A: BackingAllocator> BackingAllocator for CountedAllocator<A> {
    fn label(&self) -> AllocatorLabel {
        self.inner.label()
    }

    fn init(
        &mut self,
        size: usize,
        align: usize,
        label: AllocatorLabel,
    ) -> Result<NonNull<u8>, AllocError> {
        let ptr = self.inner.init(size, align, label)?;
        self.live.fetch_add(1, Ordering::AcqRel);
        Ok(ptr)
    }

    unsafe fn dispose(&mut self, ptr: NonNull<u8>, size: usize, align: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.dispose(ptr, size, align) };
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}
