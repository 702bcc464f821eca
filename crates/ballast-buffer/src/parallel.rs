//! Concurrent appends into a list's reserved capacity.

use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use ballast_alloc::{BackingAllocator, LeakSentinel};
use ballast_core::BufferError;

use crate::list::NativeList;

/// Appends into spare capacity from many threads at once.
///
/// Obtained from [`NativeList::parallel_writer`]. Slots are claimed with an
/// atomic counter, so no two writers touch the same element; appends never
/// reallocate and fail with [`BufferError::CapacityExceeded`] once the
/// capacity is used up. Dropping the writer sets the list's length to the
/// number of successful appends.
pub struct ParallelWriter<'a, T, A, S>
where
    T: Copy,
    A: BackingAllocator,
    S: LeakSentinel,
{
    list: &'a mut NativeList<T, A, S>,
    ptr: NonNull<T>,
    cap: usize,
    next: AtomicUsize,
}

// SAFETY: writers only ever move `T` values into distinct slots; the
// borrowed list is otherwise only read.
unsafe impl<T, A, S> Sync for ParallelWriter<'_, T, A, S>
where
    T: Copy + Send,
    A: BackingAllocator + Sync,
    S: LeakSentinel + Sync,
{
}

impl<'a, T, A, S> ParallelWriter<'a, T, A, S>
where
    T: Copy,
    A: BackingAllocator,
    S: LeakSentinel,
{
    /// The list must already be inside an open write.
    pub(crate) fn new(
        list: &'a mut NativeList<T, A, S>,
        ptr: NonNull<T>,
        len: usize,
        cap: usize,
    ) -> Self {
        Self {
            list,
            ptr,
            cap,
            next: AtomicUsize::new(len),
        }
    }

    /// Append `value`, returning the index it landed at.
    pub fn add_no_resize(&self, value: T) -> Result<usize, BufferError> {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        if index >= self.cap {
            return Err(BufferError::CapacityExceeded { capacity: self.cap });
        }
        // SAFETY: index < cap, and the counter hands each index out once.
        unsafe { self.ptr.as_ptr().add(index).write(value) };
        Ok(index)
    }

    /// Elements written so far, including those present before the writer
    /// was created.
    pub fn len(&self) -> usize {
        self.next.load(Ordering::Relaxed).min(self.cap)
    }

    /// Whether no element is present.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity of the underlying list.
    pub fn capacity(&self) -> usize {
        self.cap
    }
}

impl<T, A, S> Drop for ParallelWriter<'_, T, A, S>
where
    T: Copy,
    A: BackingAllocator,
    S: LeakSentinel,
{
    fn drop(&mut self) {
        let len = self.len();
        self.list.finish_parallel(len);
    }
}

impl<T, A, S> fmt::Debug for ParallelWriter<'_, T, A, S>
where
    T: Copy,
    A: BackingAllocator,
    S: LeakSentinel,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelWriter")
            .field("list", &self.list.id())
            .field("len", &self.len())
            .field("capacity", &self.cap)
            .finish()
    }
}
