//! Growable native buffer.
//!
//! [`NativeList`] owns a `{ptr, len, cap}` header over storage obtained from
//! a [`BackingAllocator`]. Every operation returns a `Result`; indexing via
//! `list[i]` panics instead, for call sites that treat a bad index as a bug.
//!
//! # Lifecycle
//!
//! A list is disposed exactly once, either explicitly through
//! [`dispose`](NativeList::dispose) or implicitly on drop. Explicit disposal
//! disarms the leak sentinel; dropping an undisposed list still releases its
//! storage, but the sentinel reports the leak with the construction site.
//!
//! # Views
//!
//! [`FlatView`]s do not borrow the list. Every mutation, including `set`,
//! advances the list's `secondary` generation, which makes every earlier
//! view stale.

use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::{Index, IndexMut};
use std::panic::Location;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use ballast_alloc::{BackingAllocator, DefaultSentinel, LabeledHeap, LeakSentinel};
use ballast_core::{AllocError, AllocatorLabel, BufferError, BufferId, ListConfig};

use crate::parallel::ParallelWriter;
use crate::safety::AtomicSafetyHandle;
use crate::view::{DeferredView, FlatView, Shared};

/// Growable buffer of `T` backed by strategy `A`, guarded by sentinel `S`.
///
/// Invariants while live: `1 <= cap`, `len <= cap`, `ptr` points at `cap`
/// elements of storage obtained from `strategy` under `label`.
pub struct NativeList<T, A = LabeledHeap, S = DefaultSentinel>
where
    T: Copy,
    A: BackingAllocator,
    S: LeakSentinel,
{
    ptr: NonNull<T>,
    len: usize,
    cap: usize,
    label: AllocatorLabel,
    id: BufferId,
    capture_depth: u16,
    disposed: bool,
    strategy: A,
    shared: Arc<Shared>,
    sentinel: S,
    _marker: PhantomData<T>,
}

// SAFETY: the list uniquely owns its storage; it may move to another thread
// whenever its elements, strategy and sentinel may.
unsafe impl<T: Copy + Send, A: BackingAllocator + Send, S: LeakSentinel + Send> Send
    for NativeList<T, A, S>
{
}
// SAFETY: `&NativeList` only reads.
unsafe impl<T: Copy + Sync, A: BackingAllocator + Sync, S: LeakSentinel + Sync> Sync
    for NativeList<T, A, S>
{
}

fn capacity_overflow<T>() -> BufferError {
    BufferError::Alloc(AllocError::InvalidLayout {
        size: usize::MAX,
        align: mem::align_of::<T>(),
    })
}

fn byte_size<T>(count: usize) -> Result<usize, BufferError> {
    mem::size_of::<T>()
        .checked_mul(count)
        .ok_or_else(capacity_overflow::<T>)
}

impl<T: Copy> NativeList<T> {
    /// Create a list on the labeled heap.
    ///
    /// A `capacity` below 1 is rounded up to 1.
    #[track_caller]
    pub fn with_capacity(capacity: usize, label: AllocatorLabel) -> Result<Self, BufferError> {
        Self::from_config(&ListConfig::new(capacity, label))
    }

    /// Create a list on the labeled heap from a validated config.
    #[track_caller]
    pub fn from_config(config: &ListConfig) -> Result<Self, BufferError> {
        Self::with_config_in(config, LabeledHeap::new(config.label))
    }
}

impl<T, A, S> NativeList<T, A, S>
where
    T: Copy,
    A: BackingAllocator,
    S: LeakSentinel,
{
    /// Create a list drawing storage from `strategy`, under the strategy's
    /// label.
    #[track_caller]
    pub fn new_in(capacity: usize, strategy: A) -> Result<Self, BufferError> {
        let config = ListConfig::new(capacity, strategy.label());
        Self::with_config_in(&config, strategy)
    }

    /// Create a list from `config`, drawing storage from `strategy`.
    ///
    /// Fails with [`BufferError::InvalidAllocator`] for an unusable label,
    /// [`BufferError::InvalidArgument`] for zero-sized `T` or a bad config,
    /// and [`BufferError::Alloc`] when the strategy cannot serve the request.
    #[track_caller]
    pub fn with_config_in(config: &ListConfig, mut strategy: A) -> Result<Self, BufferError> {
        config.validate()?;
        if mem::size_of::<T>() == 0 {
            return Err(BufferError::InvalidArgument {
                reason: "zero-sized element types are not supported".to_string(),
            });
        }
        let cap = config.effective_capacity();
        let label = config.label;
        let ptr = strategy
            .init(byte_size::<T>(cap)?, mem::align_of::<T>(), label)?
            .cast::<T>();
        let id = BufferId::next();
        let sentinel = S::arm(id, label, Location::caller(), config.capture_depth);
        tracing::trace!(buffer = %id, %label, capacity = cap, "native list created");
        Ok(Self {
            ptr,
            len: 0,
            cap,
            label,
            id,
            capture_depth: config.capture_depth,
            disposed: false,
            strategy,
            shared: Arc::new(Shared::new(ptr.as_ptr().cast(), 0)),
            sentinel,
            _marker: PhantomData,
        })
    }

    // ── Header ───────────────────────────────────────────────────

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the list holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of elements the current storage can hold. 0 once disposed.
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Label the storage is allocated under.
    pub fn label(&self) -> AllocatorLabel {
        self.label
    }

    /// Unique id of this list, as used in leak reports.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Whether [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// The backing strategy.
    pub fn strategy(&self) -> &A {
        &self.strategy
    }

    /// The leak sentinel.
    pub fn sentinel(&self) -> &S {
        &self.sentinel
    }

    /// The safety handle shared with this list's views.
    ///
    /// Containers built on a list call
    /// [`check_write_and_bump`](AtomicSafetyHandle::check_write_and_bump) and
    /// [`finish_write`](AtomicSafetyHandle::finish_write) around their own
    /// structural changes.
    pub fn safety_handle(&self) -> &AtomicSafetyHandle {
        &self.shared.safety
    }

    /// Raw pointer to the storage. Dangling once disposed.
    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    // ── Internals ────────────────────────────────────────────────

    #[inline]
    fn ensure_live(&self) -> Result<(), BufferError> {
        if self.disposed {
            return Err(BufferError::UseAfterFree);
        }
        Ok(())
    }

    #[inline]
    fn check_index(&self, index: usize) -> Result<(), BufferError> {
        self.ensure_live()?;
        if index >= self.len {
            return Err(BufferError::IndexOutOfRange {
                index,
                len: self.len,
            });
        }
        Ok(())
    }

    /// Run `f` inside an open write: outstanding views go stale first, and
    /// the new pointer and length are published for deferred views after.
    #[inline]
    fn mutate<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R, BufferError>,
    ) -> Result<R, BufferError> {
        self.ensure_live()?;
        self.shared.safety.check_write_and_bump()?;
        let out = f(self);
        self.shared.publish(self.ptr.as_ptr().cast(), self.len);
        self.shared.safety.finish_write();
        out
    }

    /// Move the contents into fresh storage of `new_cap` elements.
    fn reallocate(&mut self, new_cap: usize) -> Result<(), BufferError> {
        debug_assert!(new_cap >= self.len && new_cap > 0);
        let new_ptr = self
            .strategy
            .init(byte_size::<T>(new_cap)?, mem::align_of::<T>(), self.label)?
            .cast::<T>();
        // SAFETY: both blocks hold at least `len` elements and are distinct
        // allocations.
        unsafe { ptr::copy_nonoverlapping(self.ptr.as_ptr(), new_ptr.as_ptr(), self.len) };
        let old_ptr = mem::replace(&mut self.ptr, new_ptr);
        let old_cap = mem::replace(&mut self.cap, new_cap);
        // SAFETY: `old_ptr` came from this strategy with exactly this layout.
        unsafe {
            self.strategy.dispose(
                old_ptr.cast(),
                old_cap * mem::size_of::<T>(),
                mem::align_of::<T>(),
            )
        };
        tracing::trace!(buffer = %self.id, from = old_cap, to = new_cap, "native list reallocated");
        Ok(())
    }

    /// Ensure room for `additional` more elements, growing to
    /// `len + 2 * additional` when short.
    fn grow_for(&mut self, additional: usize) -> Result<(), BufferError> {
        let needed = self
            .len
            .checked_add(additional)
            .ok_or_else(capacity_overflow::<T>)?;
        if needed <= self.cap {
            return Ok(());
        }
        let target = additional
            .checked_mul(2)
            .and_then(|d| self.len.checked_add(d))
            .unwrap_or(needed);
        self.reallocate(target)
    }

    /// Return the storage to the strategy.
    ///
    /// # Safety
    ///
    /// Storage must be live and no view read may be in flight.
    unsafe fn free_storage(&mut self) {
        let ptr = mem::replace(&mut self.ptr, NonNull::dangling());
        let cap = mem::replace(&mut self.cap, 0);
        self.len = 0;
        // SAFETY: caller contract; `ptr` came from this strategy with `cap`
        // elements.
        unsafe {
            self.strategy
                .dispose(ptr.cast(), cap * mem::size_of::<T>(), mem::align_of::<T>())
        };
    }

    // ── Element access ───────────────────────────────────────────

    /// Element at `index`.
    #[inline]
    pub fn get(&self, index: usize) -> Result<T, BufferError> {
        self.check_index(index)?;
        // SAFETY: index < len <= cap.
        Ok(unsafe { self.ptr.as_ptr().add(index).read() })
    }

    /// Overwrite the element at `index`.
    #[inline]
    pub fn set(&mut self, index: usize, value: T) -> Result<(), BufferError> {
        self.check_index(index)?;
        self.mutate(|list| {
            // SAFETY: index < len <= cap.
            unsafe { list.ptr.as_ptr().add(index).write(value) };
            Ok(())
        })
    }

    /// The elements as a slice.
    pub fn as_slice(&self) -> Result<&[T], BufferError> {
        self.ensure_live()?;
        // SAFETY: the first `len` elements are initialised.
        Ok(unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) })
    }

    /// The elements as a mutable slice. Outstanding views go stale.
    pub fn as_mut_slice(&mut self) -> Result<&mut [T], BufferError> {
        self.mutate(|_| Ok(()))?;
        // SAFETY: the first `len` elements are initialised; `&mut self` is
        // exclusive and the bump above keeps view reads out.
        Ok(unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) })
    }

    /// Iterate over the elements.
    pub fn iter(&self) -> Result<std::slice::Iter<'_, T>, BufferError> {
        Ok(self.as_slice()?.iter())
    }

    /// Copy the elements into a `Vec`.
    pub fn to_vec(&self) -> Result<Vec<T>, BufferError> {
        Ok(self.as_slice()?.to_vec())
    }

    /// Whether any element equals `value`.
    pub fn contains(&self, value: &T) -> Result<bool, BufferError>
    where
        T: PartialEq,
    {
        Ok(self.as_slice()?.contains(value))
    }

    /// Index of the first element equal to `value`.
    pub fn index_of(&self, value: &T) -> Result<Option<usize>, BufferError>
    where
        T: PartialEq,
    {
        Ok(self.as_slice()?.iter().position(|v| v == value))
    }

    // ── Growth ───────────────────────────────────────────────────

    /// Append `value`, doubling the capacity when full.
    #[inline]
    pub fn add(&mut self, value: T) -> Result<(), BufferError> {
        self.mutate(|list| {
            if list.len == list.cap {
                let target = list
                    .cap
                    .checked_mul(2)
                    .ok_or_else(capacity_overflow::<T>)?
                    .max(1);
                list.reallocate(target)?;
            }
            // SAFETY: len < cap after the growth above.
            unsafe { list.ptr.as_ptr().add(list.len).write(value) };
            list.len += 1;
            Ok(())
        })
    }

    /// Append `value` only if there is spare capacity.
    pub fn add_no_resize(&mut self, value: T) -> Result<(), BufferError> {
        self.ensure_live()?;
        if self.len == self.cap {
            return Err(BufferError::CapacityExceeded { capacity: self.cap });
        }
        self.mutate(|list| {
            // SAFETY: len < cap checked above.
            unsafe { list.ptr.as_ptr().add(list.len).write(value) };
            list.len += 1;
            Ok(())
        })
    }

    /// Append every element of `items`.
    pub fn add_range(&mut self, items: &[T]) -> Result<(), BufferError> {
        self.ensure_live()?;
        if items.is_empty() {
            return Ok(());
        }
        self.mutate(|list| {
            list.grow_for(items.len())?;
            // SAFETY: room for `items.len()` more was ensured; `items` cannot
            // alias this list's storage while `&mut self` is held.
            unsafe {
                ptr::copy_nonoverlapping(
                    items.as_ptr(),
                    list.ptr.as_ptr().add(list.len),
                    items.len(),
                )
            };
            list.len += items.len();
            Ok(())
        })
    }

    /// Append the contents of `view`, which may be a view of this list.
    pub fn add_view(&mut self, view: &FlatView<T>) -> Result<(), BufferError> {
        self.ensure_live()?;
        if !view.shares_storage_with(&self.shared) {
            return view.read(|items| self.add_range(items))?;
        }
        // A valid view of this list covers its current prefix.
        let count = view.read(|items| items.len())?;
        self.mutate(|list| {
            list.grow_for(count)?;
            // SAFETY: count <= len, so source `[0, count)` and destination
            // `[len, len + count)` do not overlap and both fit in cap.
            unsafe {
                ptr::copy_nonoverlapping(
                    list.ptr.as_ptr(),
                    list.ptr.as_ptr().add(list.len),
                    count,
                )
            };
            list.len += count;
            Ok(())
        })
    }

    /// Grow so at least `min_capacity` elements fit, to
    /// `max(min_capacity, 2 * capacity)`.
    pub fn ensure_capacity(&mut self, min_capacity: usize) -> Result<(), BufferError> {
        self.ensure_live()?;
        if min_capacity <= self.cap {
            return Ok(());
        }
        let target = min_capacity.max(self.cap.saturating_mul(2));
        self.mutate(|list| list.reallocate(target))
    }

    /// Reallocate to exactly `capacity` elements (at least 1).
    ///
    /// Fails with [`BufferError::InvalidArgument`] when `capacity < len`.
    pub fn set_capacity(&mut self, capacity: usize) -> Result<(), BufferError> {
        self.ensure_live()?;
        if capacity < self.len {
            return Err(BufferError::InvalidArgument {
                reason: format!("capacity {capacity} is below length {}", self.len),
            });
        }
        let capacity = capacity.max(1);
        if capacity == self.cap {
            return Ok(());
        }
        self.mutate(|list| list.reallocate(capacity))
    }

    /// Shrink the capacity to the length.
    pub fn trim_excess(&mut self) -> Result<(), BufferError> {
        self.set_capacity(self.len)
    }

    /// Set the length to `len`, growing capacity as needed, without
    /// initialising new elements.
    ///
    /// # Safety
    ///
    /// Elements in `old_len..len` must be written before they are read.
    pub unsafe fn resize_uninitialized(&mut self, len: usize) -> Result<(), BufferError> {
        self.ensure_capacity(len)?;
        self.mutate(|list| {
            list.len = len;
            Ok(())
        })
    }

    /// Set the length to `len`, filling new elements with `fill`.
    pub fn resize(&mut self, len: usize, fill: T) -> Result<(), BufferError> {
        self.ensure_capacity(len)?;
        self.mutate(|list| {
            for i in list.len..len {
                // SAFETY: i < len <= cap.
                unsafe { list.ptr.as_ptr().add(i).write(fill) };
            }
            list.len = len;
            Ok(())
        })
    }

    // ── Removal ──────────────────────────────────────────────────

    /// Remove the element at `index`, moving the last element into its slot.
    pub fn remove_at_swap_back(&mut self, index: usize) -> Result<T, BufferError> {
        self.check_index(index)?;
        self.mutate(|list| {
            let base = list.ptr.as_ptr();
            let last = list.len - 1;
            // SAFETY: index and last are both < len.
            let removed = unsafe {
                let removed = base.add(index).read();
                base.add(index).write(base.add(last).read());
                removed
            };
            list.len = last;
            Ok(removed)
        })
    }

    /// Remove the element at `index`, shifting the tail down one slot.
    pub fn remove_at(&mut self, index: usize) -> Result<T, BufferError> {
        self.check_index(index)?;
        self.mutate(|list| {
            let base = list.ptr.as_ptr();
            // SAFETY: index < len; the shifted tail stays within len.
            let removed = unsafe {
                let removed = base.add(index).read();
                ptr::copy(base.add(index + 1), base.add(index), list.len - index - 1);
                removed
            };
            list.len -= 1;
            Ok(removed)
        })
    }

    /// Remove `count` elements starting at `index`, filling the gap with
    /// elements taken from the end.
    pub fn remove_range_swap_back(&mut self, index: usize, count: usize) -> Result<(), BufferError> {
        self.ensure_live()?;
        let end = index
            .checked_add(count)
            .filter(|&end| end <= self.len)
            .ok_or(BufferError::IndexOutOfRange {
                index: index.saturating_add(count),
                len: self.len,
            })?;
        if count == 0 {
            return Ok(());
        }
        self.mutate(|list| {
            let tail_start = (list.len - count).max(end);
            let moved = list.len - tail_start;
            // SAFETY: `[tail_start, len)` and `[index, index + moved)` are in
            // bounds and disjoint because index + moved <= end <= tail_start.
            unsafe {
                let base = list.ptr.as_ptr();
                ptr::copy_nonoverlapping(base.add(tail_start), base.add(index), moved);
            }
            list.len -= count;
            Ok(())
        })
    }

    /// Set the length to 0, keeping the capacity.
    pub fn clear(&mut self) -> Result<(), BufferError> {
        self.mutate(|list| {
            list.len = 0;
            Ok(())
        })
    }

    // ── Views ────────────────────────────────────────────────────

    /// Snapshot view of the current contents.
    pub fn as_flat_view(&self) -> Result<FlatView<T>, BufferError> {
        self.ensure_live()?;
        let secondary = self.shared.safety.secondary();
        // SAFETY: `&self` excludes writers, so the storage and `secondary`
        // agree right now; later reads re-check `secondary`.
        Ok(unsafe {
            FlatView::from_raw_parts(self.ptr.as_ptr(), self.len, Arc::clone(&self.shared), secondary)
        })
    }

    /// View resolved against the list's contents at each use.
    pub fn as_deferred_view(&self) -> Result<DeferredView<T>, BufferError> {
        self.ensure_live()?;
        Ok(DeferredView::new(Arc::clone(&self.shared)))
    }

    /// Writer that appends from many threads into the spare capacity.
    ///
    /// The list is borrowed mutably until the writer is dropped, at which
    /// point the length is updated.
    pub fn parallel_writer(&mut self) -> Result<ParallelWriter<'_, T, A, S>, BufferError> {
        self.ensure_live()?;
        self.shared.safety.check_write_and_bump()?;
        let (ptr, len, cap) = (self.ptr, self.len, self.cap);
        Ok(ParallelWriter::new(self, ptr, len, cap))
    }

    /// Close the write opened by [`parallel_writer`](Self::parallel_writer).
    pub(crate) fn finish_parallel(&mut self, len: usize) {
        debug_assert!(len <= self.cap);
        self.len = len;
        self.shared.publish(self.ptr.as_ptr().cast(), self.len);
        self.shared.safety.finish_write();
    }

    // ── Copy & teardown ──────────────────────────────────────────

    /// Deep copy with the same capacity, label and a clone of the strategy.
    #[track_caller]
    pub fn try_clone(&self) -> Result<Self, BufferError>
    where
        A: Clone,
    {
        self.ensure_live()?;
        let config = ListConfig::new(self.cap, self.label).with_capture_depth(self.capture_depth);
        let mut copy = Self::with_config_in(&config, self.strategy.clone())?;
        copy.add_range(self.as_slice()?)?;
        Ok(copy)
    }

    /// Release the storage and invalidate every view. Must be called
    /// exactly once; every other operation fails with
    /// [`BufferError::UseAfterFree`] afterwards.
    ///
    /// # Panics
    ///
    /// On a second call, and if a view read is in flight on another thread.
    /// In the latter case the storage is never reclaimed.
    #[track_caller]
    pub fn dispose(&mut self) -> Result<(), BufferError> {
        if self.disposed {
            panic!("double dispose of native list {}", self.id);
        }
        self.disposed = true;
        self.sentinel.clear();
        let quiescent = self.shared.safety.release();
        self.shared.publish(ptr::null_mut(), 0);
        if !quiescent {
            self.ptr = NonNull::dangling();
            self.cap = 0;
            self.len = 0;
            panic!("concurrent access: buffer disposed while a view read is in progress");
        }
        // SAFETY: live storage, no reader in flight.
        unsafe { self.free_storage() };
        tracing::trace!(buffer = %self.id, "native list disposed");
        Ok(())
    }
}

impl<T, A, S> Drop for NativeList<T, A, S>
where
    T: Copy,
    A: BackingAllocator,
    S: LeakSentinel,
{
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        // The sentinel is still armed and reports when it drops after this.
        if self.shared.safety.release() {
            // SAFETY: live storage, no reader in flight.
            unsafe { self.free_storage() };
        } else {
            tracing::error!(
                buffer = %self.id,
                "native list dropped during a view read; storage not reclaimed"
            );
        }
        self.shared.publish(ptr::null_mut(), 0);
    }
}

impl<T, A, S> Index<usize> for NativeList<T, A, S>
where
    T: Copy,
    A: BackingAllocator,
    S: LeakSentinel,
{
    type Output = T;

    fn index(&self, index: usize) -> &T {
        if let Err(e) = self.check_index(index) {
            panic!("{e}");
        }
        // SAFETY: index < len <= cap.
        unsafe { &*self.ptr.as_ptr().add(index) }
    }
}

impl<T, A, S> IndexMut<usize> for NativeList<T, A, S>
where
    T: Copy,
    A: BackingAllocator,
    S: LeakSentinel,
{
    fn index_mut(&mut self, index: usize) -> &mut T {
        if let Err(e) = self.check_index(index).and_then(|()| self.mutate(|_| Ok(()))) {
            panic!("{e}");
        }
        // SAFETY: index < len <= cap; views went stale above.
        unsafe { &mut *self.ptr.as_ptr().add(index) }
    }
}

impl<T, A, S> Extend<T> for NativeList<T, A, S>
where
    T: Copy,
    A: BackingAllocator,
    S: LeakSentinel,
{
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        let (lower, _) = iter.size_hint();
        if let Err(e) = self.ensure_capacity(self.len.saturating_add(lower)) {
            panic!("extend failed: {e}");
        }
        for value in iter {
            if let Err(e) = self.add(value) {
                panic!("extend failed: {e}");
            }
        }
    }
}

impl<T, A, S> fmt::Debug for NativeList<T, A, S>
where
    T: Copy,
    A: BackingAllocator,
    S: LeakSentinel,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeList")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("len", &self.len)
            .field("capacity", &self.cap)
            .field("disposed", &self.disposed)
            .finish()
    }
}
