//! Bump allocation over a caller-supplied block.
//!
//! [`ScratchAllocator`] hands out aligned sub-ranges of a pre-sized block by
//! advancing a cursor. Individual allocations are never reclaimed; the whole
//! block goes back to its owner as one unit. It is meant for short-lived,
//! append-only scratch space inside one logical operation, e.g. several small
//! buffers built inside one pre-sized stack frame.
//!
//! Not thread-safe: `allocate` takes `&mut self`. Use one scratch allocator
//! per worker.

use std::marker::PhantomData;
use std::mem::{self, MaybeUninit};
use std::ptr::{self, NonNull};

use ballast_core::{AllocError, AllocatorLabel};

use crate::labeled;
use crate::strategy::{precheck, BackingAllocator};

/// Bump allocator over a fixed block of `capacity` bytes.
///
/// Invariant: `used <= capacity`, and `used` only ever grows.
pub struct ScratchAllocator<'a> {
    /// Start of the block. Dangling when `capacity == 0`.
    base: NonNull<u8>,
    /// Size of the block in bytes.
    capacity: usize,
    /// Bump cursor: bytes consumed so far, including alignment padding.
    used: usize,
    _block: PhantomData<&'a mut [u8]>,
}

impl<'a> ScratchAllocator<'a> {
    /// Create a scratch allocator borrowing `block` for its whole lifetime.
    pub fn new(block: &'a mut [MaybeUninit<u8>]) -> Self {
        let capacity = block.len();
        let base = NonNull::new(block.as_mut_ptr().cast::<u8>()).unwrap_or(NonNull::dangling());
        Self {
            base,
            capacity,
            used: 0,
            _block: PhantomData,
        }
    }

    /// Create a scratch allocator over raw memory.
    ///
    /// # Safety
    ///
    /// `base..base + capacity` must be valid for reads and writes for `'a`
    /// and must not be accessed through any other path while the allocator
    /// or any slice it returned is alive.
    pub unsafe fn from_raw(base: NonNull<u8>, capacity: usize) -> Self {
        Self {
            base,
            capacity,
            used: 0,
            _block: PhantomData,
        }
    }

    /// Bump-allocate `size` bytes aligned to `align`.
    ///
    /// Returns a null pointer for `size == 0` without consuming space. Fails
    /// with [`AllocError::CapacityExceeded`] if the aligned end would pass
    /// the block's capacity; `used` is left unchanged on failure.
    pub fn allocate(&mut self, size: usize, align: usize) -> Result<*mut u8, AllocError> {
        if !align.is_power_of_two() {
            return Err(AllocError::InvalidLayout { size, align });
        }
        if size == 0 {
            return Ok(ptr::null_mut());
        }
        let offset = self.aligned_offset(align)?;
        let end = offset.checked_add(size).ok_or(AllocError::InvalidLayout { size, align })?;
        if end > self.capacity {
            return Err(AllocError::CapacityExceeded {
                requested: end - self.used,
                available: self.remaining(),
            });
        }
        self.used = end;
        // SAFETY: offset < end <= capacity, so the result stays in the block.
        Ok(unsafe { self.base.as_ptr().add(offset) })
    }

    /// Allocate `len` elements of `T`, each initialised to `fill`.
    ///
    /// The slice lives as long as the underlying block; slices returned by
    /// successive calls never overlap.
    pub fn allocate_slice<T: Copy>(&mut self, len: usize, fill: T) -> Result<&'a mut [T], AllocError> {
        let size = mem::size_of::<T>()
            .checked_mul(len)
            .ok_or(AllocError::InvalidLayout {
                size: usize::MAX,
                align: mem::align_of::<T>(),
            })?;
        if size == 0 {
            return Ok(&mut []);
        }
        let ptr = self.allocate(size, mem::align_of::<T>())?.cast::<T>();
        // SAFETY: `ptr` is aligned for T, points at `len` freshly reserved
        // elements inside the block, and no other slice covers them.
        unsafe {
            for i in 0..len {
                ptr.add(i).write(fill);
            }
            Ok(std::slice::from_raw_parts_mut(ptr, len))
        }
    }

    /// Offset of the next `align`-aligned address at or after the cursor.
    fn aligned_offset(&self, align: usize) -> Result<usize, AllocError> {
        let addr = (self.base.as_ptr() as usize)
            .checked_add(self.used)
            .ok_or(AllocError::InvalidLayout { size: 0, align })?;
        let padding = addr.wrapping_neg() & (align - 1);
        self.used
            .checked_add(padding)
            .ok_or(AllocError::InvalidLayout { size: 0, align })
    }

    /// Bytes consumed so far, including alignment padding.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Total size of the block in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.capacity - self.used
    }

    /// Start of the block.
    pub fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }
}

impl std::fmt::Debug for ScratchAllocator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchAllocator")
            .field("base", &self.base)
            .field("capacity", &self.capacity)
            .field("used", &self.used)
            .finish()
    }
}

/// A [`BackingAllocator`] that draws from a [`ScratchAllocator`].
///
/// Disposal is a no-op: scratch memory is reclaimed with its block. A buffer
/// that grows while backed by scratch space consumes a fresh region for each
/// reallocation.
pub struct ScratchStrategy<'s, 'a> {
    scratch: &'s mut ScratchAllocator<'a>,
}

impl<'s, 'a> ScratchStrategy<'s, 'a> {
    /// Borrow `scratch` as a backing strategy.
    pub fn new(scratch: &'s mut ScratchAllocator<'a>) -> Self {
        Self { scratch }
    }

    /// The scratch allocator behind this strategy.
    pub fn scratch(&self) -> &ScratchAllocator<'a> {
        self.scratch
    }
}

impl BackingAllocator for ScratchStrategy<'_, '_> {
    fn label(&self) -> AllocatorLabel {
        AllocatorLabel::UserProvided
    }

    fn init(
        &mut self,
        size: usize,
        align: usize,
        label: AllocatorLabel,
    ) -> Result<NonNull<u8>, AllocError> {
        if let Some(ptr) = precheck(size, align, label)? {
            return Ok(ptr);
        }
        let raw = self.scratch.allocate(size, align)?;
        Ok(NonNull::new(raw).unwrap_or_else(|| labeled::dangling(align)))
    }

    unsafe fn dispose(&mut self, _ptr: NonNull<u8>, _size: usize, _align: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(64))]
    struct Block<const N: usize>([MaybeUninit<u8>; N]);

    impl<const N: usize> Block<N> {
        fn new() -> Self {
            Self([MaybeUninit::uninit(); N])
        }
    }

    #[test]
    fn second_allocation_past_capacity_fails_and_keeps_cursor() {
        let mut block = Block::<64>::new();
        let mut scratch = ScratchAllocator::new(&mut block.0);

        let first = scratch.allocate(32, 16).unwrap();
        assert_eq!(first, scratch.base());
        assert_eq!(scratch.used(), 32);

        let second = scratch.allocate(40, 16);
        assert!(matches!(second, Err(AllocError::CapacityExceeded { .. })));
        assert_eq!(scratch.used(), 32);
    }

    #[test]
    fn zero_size_returns_null_without_consuming() {
        let mut block = Block::<64>::new();
        let mut scratch = ScratchAllocator::new(&mut block.0);
        let p = scratch.allocate(0, 8).unwrap();
        assert!(p.is_null());
        assert_eq!(scratch.used(), 0);
    }

    #[test]
    fn padding_is_inserted_for_alignment() {
        let mut block = Block::<128>::new();
        let mut scratch = ScratchAllocator::new(&mut block.0);
        scratch.allocate(3, 1).unwrap();
        let p = scratch.allocate(8, 8).unwrap();
        assert_eq!(p as usize % 8, 0);
        assert_eq!(scratch.used(), 16);
    }

    #[test]
    fn exact_fit_succeeds() {
        let mut block = Block::<64>::new();
        let mut scratch = ScratchAllocator::new(&mut block.0);
        assert!(scratch.allocate(64, 64).is_ok());
        assert_eq!(scratch.remaining(), 0);
        assert!(scratch.allocate(1, 1).is_err());
    }

    #[test]
    fn non_power_of_two_alignment_rejected() {
        let mut block = Block::<64>::new();
        let mut scratch = ScratchAllocator::new(&mut block.0);
        assert_eq!(
            scratch.allocate(8, 12),
            Err(AllocError::InvalidLayout { size: 8, align: 12 })
        );
    }

    #[test]
    fn slices_do_not_overlap() {
        let mut block = Block::<256>::new();
        let mut scratch = ScratchAllocator::new(&mut block.0);
        let a = scratch.allocate_slice::<u32>(4, 1).unwrap();
        let b = scratch.allocate_slice::<u64>(4, 2).unwrap();
        a[3] = 7;
        b[0] = 9;
        assert_eq!(a, &[1, 1, 1, 7]);
        assert_eq!(b, &[9, 2, 2, 2]);
        let a_end = a.as_ptr_range().end as usize;
        assert!(b.as_ptr() as usize >= a_end);
    }

    #[test]
    fn strategy_serves_from_block_and_labels_user_provided() {
        let mut block = Block::<64>::new();
        let mut scratch = ScratchAllocator::new(&mut block.0);
        let base = scratch.base() as usize;
        let mut strategy = ScratchStrategy::new(&mut scratch);
        assert_eq!(strategy.label(), AllocatorLabel::UserProvided);

        let p = strategy.init(16, 8, AllocatorLabel::UserProvided).unwrap();
        assert!(p.as_ptr() as usize >= base && (p.as_ptr() as usize) < base + 64);
        unsafe { strategy.dispose(p, 16, 8) };
        assert_eq!(strategy.scratch().used(), 16);
    }

    #[test]
    fn strategy_rejects_invalid_label() {
        let mut block = Block::<64>::new();
        let mut scratch = ScratchAllocator::new(&mut block.0);
        let mut strategy = ScratchStrategy::new(&mut scratch);
        assert!(matches!(
            strategy.init(8, 8, AllocatorLabel::Invalid),
            Err(AllocError::InvalidAllocator { .. })
        ));
    }

    #[cfg(not(miri))]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn successful_ranges_are_disjoint_and_bounded(
                reqs in proptest::collection::vec((0usize..48, 0u32..6), 1..40),
            ) {
                let mut block = Block::<256>::new();
                let mut scratch = ScratchAllocator::new(&mut block.0);
                let base = scratch.base() as usize;
                let mut ranges: Vec<(usize, usize)> = Vec::new();
                for (size, align_exp) in reqs {
                    let align = 1usize << align_exp;
                    let used_before = scratch.used();
                    match scratch.allocate(size, align) {
                        Ok(p) if size > 0 => {
                            let start = p as usize - base;
                            prop_assert_eq!(start % align, 0);
                            prop_assert!(start + size <= scratch.capacity());
                            for &(s, e) in &ranges {
                                prop_assert!(start >= e || start + size <= s);
                            }
                            ranges.push((start, start + size));
                        }
                        Ok(_) => prop_assert_eq!(scratch.used(), used_before),
                        Err(AllocError::CapacityExceeded { .. }) => {
                            prop_assert_eq!(scratch.used(), used_before);
                        }
                        Err(e) => prop_assert!(false, "unexpected error {e}"),
                    }
                    prop_assert!(scratch.used() >= used_before);
                    prop_assert!(scratch.used() <= scratch.capacity());
                }
            }
        }
    }
}
