//! Zero-copy views over a buffer's contents.
//!
//! A [`FlatView`] is a non-owning `(ptr, len)` pair plus the safety handle
//! of the buffer it came from and the `secondary` generation it was taken
//! at. It does not borrow the buffer, so it can be sent to other threads;
//! every read goes through the safety handle and fails once the buffer has
//! been mutated or disposed.
//!
//! A [`DeferredView`] carries no length. It resolves the buffer's current
//! pointer and length each time it is used, which lets a consumer be wired
//! up before the producer has filled the buffer.

use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

use ballast_core::BufferError;

use crate::safety::AtomicSafetyHandle;

/// State a buffer shares with its views: the safety handle and the last
/// published storage pointer and length.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) safety: AtomicSafetyHandle,
    ptr: AtomicPtr<u8>,
    len: AtomicUsize,
}

impl Shared {
    pub(crate) fn new(ptr: *mut u8, len: usize) -> Self {
        Self {
            safety: AtomicSafetyHandle::new(),
            ptr: AtomicPtr::new(ptr),
            len: AtomicUsize::new(len),
        }
    }

    /// Store the buffer's storage pointer and length for deferred views.
    /// Called by the owning buffer inside an open write.
    pub(crate) fn publish(&self, ptr: *mut u8, len: usize) {
        self.ptr.store(ptr, Ordering::Release);
        self.len.store(len, Ordering::Release);
    }
}

/// Snapshot view over `len` elements of a live buffer.
pub struct FlatView<T> {
    ptr: *const T,
    len: usize,
    shared: Arc<Shared>,
    secondary: u32,
    _marker: PhantomData<T>,
}

// SAFETY: a view only hands out `&[T]` under a read guard; sharing or
// sending it is sound exactly when `&T` may cross threads.
unsafe impl<T: Sync> Send for FlatView<T> {}
// SAFETY: as above.
unsafe impl<T: Sync> Sync for FlatView<T> {}

impl<T> FlatView<T> {
    /// # Safety
    ///
    /// `ptr..ptr + len` must be initialised storage owned by the buffer
    /// behind `shared`, valid for as long as `shared.safety.secondary()`
    /// stays equal to `secondary`.
    pub(crate) unsafe fn from_raw_parts(
        ptr: *const T,
        len: usize,
        shared: Arc<Shared>,
        secondary: u32,
    ) -> Self {
        Self {
            ptr,
            len,
            shared,
            secondary,
            _marker: PhantomData,
        }
    }

    /// Number of elements in the view.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The `secondary` generation the view was taken at.
    pub fn secondary_generation(&self) -> u32 {
        self.secondary
    }

    /// Whether a read would currently succeed.
    pub fn is_valid(&self) -> bool {
        !self.shared.safety.is_disposed() && self.shared.safety.secondary() == self.secondary
    }

    /// The safety handle of the underlying buffer.
    pub fn safety_handle(&self) -> &AtomicSafetyHandle {
        &self.shared.safety
    }

    pub(crate) fn shares_storage_with(&self, shared: &Arc<Shared>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }

    /// Run `f` over the viewed elements.
    ///
    /// Fails with [`BufferError::UseAfterFree`] if the buffer was disposed
    /// and [`BufferError::StaleView`] if it was mutated since the view was
    /// taken. The buffer cannot be mutated while `f` runs.
    pub fn read<R>(&self, f: impl FnOnce(&[T]) -> R) -> Result<R, BufferError> {
        let _guard = self.shared.safety.begin_read(self.secondary)?;
        // SAFETY: the guard proves the storage is unchanged since the view was
        // taken and blocks writers until it drops.
        let items = unsafe { std::slice::from_raw_parts(self.ptr, self.len) };
        Ok(f(items))
    }
}

impl<T: Copy> FlatView<T> {
    /// Element at `index`.
    pub fn get(&self, index: usize) -> Result<T, BufferError> {
        self.read(|items| items.get(index).copied())?
            .ok_or(BufferError::IndexOutOfRange {
                index,
                len: self.len,
            })
    }

    /// Copy the viewed elements into a fresh `Vec`.
    pub fn to_vec(&self) -> Result<Vec<T>, BufferError> {
        self.read(|items| items.to_vec())
    }

    /// Copy the viewed elements into the front of `dst`, returning how many
    /// were copied.
    pub fn copy_to(&self, dst: &mut [T]) -> Result<usize, BufferError> {
        self.read(|items| {
            let n = items.len().min(dst.len());
            dst[..n].copy_from_slice(&items[..n]);
            n
        })
    }
}

impl<T> Clone for FlatView<T> {
    fn clone(&self) -> Self {
        Self {
            ptr: self.ptr,
            len: self.len,
            shared: Arc::clone(&self.shared),
            secondary: self.secondary,
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for FlatView<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlatView")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("secondary", &self.secondary)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// View whose pointer and length are resolved against the live buffer at
/// each use.
pub struct DeferredView<T> {
    shared: Arc<Shared>,
    _marker: PhantomData<fn() -> T>,
}

// SAFETY: resolution produces a `FlatView`, which carries its own bounds.
unsafe impl<T: Sync> Send for DeferredView<T> {}
// SAFETY: as above.
unsafe impl<T: Sync> Sync for DeferredView<T> {}

impl<T> DeferredView<T> {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            _marker: PhantomData,
        }
    }

    /// Resolve into a snapshot of the buffer's current contents.
    ///
    /// Fails with [`BufferError::UseAfterFree`] once the buffer is disposed
    /// and with [`BufferError::StaleView`] if a mutation is in progress.
    pub fn resolve(&self) -> Result<FlatView<T>, BufferError> {
        let safety = &self.shared.safety;
        let before = safety.secondary();
        safety.check_read()?;
        let ptr = self.shared.ptr.load(Ordering::Acquire);
        let len = self.shared.len.load(Ordering::Acquire);
        let after = safety.secondary();
        if before & 1 == 1 || before != after {
            return Err(BufferError::StaleView {
                view_generation: before,
                current_generation: after,
            });
        }
        let ptr = if ptr.is_null() {
            ptr::NonNull::<T>::dangling().as_ptr()
        } else {
            ptr.cast::<T>()
        };
        // SAFETY: ptr/len were published by the buffer while quiescent at
        // `before`; the view is checked against that generation on every read.
        Ok(unsafe { FlatView::from_raw_parts(ptr, len, Arc::clone(&self.shared), before) })
    }

    /// Current length of the buffer.
    pub fn len(&self) -> Result<usize, BufferError> {
        Ok(self.resolve()?.len())
    }

    /// Whether the buffer is currently empty.
    pub fn is_empty(&self) -> Result<bool, BufferError> {
        Ok(self.len()? == 0)
    }

    /// Resolve and run `f` over the current contents.
    pub fn read<R>(&self, f: impl FnOnce(&[T]) -> R) -> Result<R, BufferError> {
        self.resolve()?.read(f)
    }

    /// Whether the buffer behind the view has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.shared.safety.is_disposed()
    }
}

impl<T> Clone for DeferredView<T> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.shared))
    }
}

impl<T> fmt::Debug for DeferredView<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredView")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
