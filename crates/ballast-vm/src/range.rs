//! Page-granular virtual memory ranges.
//!
//! A [`VmRange`] moves through `Reserved → Committed → Reserved → … → Freed`.
//! Reserved pages own address space but cannot be touched; committed pages
//! are readable and writable; a freed range is terminal and every further
//! operation fails with [`VmErrorKind::InvalidAddressRange`].
//!
//! Operations are synchronous and never retried. Failures are logged at
//! `debug` and returned with the caller's location attached.

use std::fmt;
use std::panic::Location;
use std::ptr::NonNull;

use crate::backend::{DefaultPages, PageBackend};
use crate::error::{OsFailure, VmError, VmErrorKind, VmOp};

/// Lifecycle state of a [`VmRange`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeState {
    /// Address space held, pages inaccessible.
    Reserved,
    /// Pages readable and writable.
    Committed,
    /// Released. Terminal.
    Freed,
}

/// A contiguous run of `page_count` pages of `page_size` bytes.
pub struct VmRange<B: PageBackend = DefaultPages> {
    ptr: NonNull<u8>,
    page_size: usize,
    page_count: usize,
    state: RangeState,
    backend: B,
}

// SAFETY: the range exclusively owns its pages; moving it between threads
// moves that ownership. Shared access only exposes `&[u8]`.
unsafe impl<B: PageBackend + Send> Send for VmRange<B> {}
// SAFETY: see above; `&VmRange` grants no mutation.
unsafe impl<B: PageBackend + Sync> Sync for VmRange<B> {}

fn fail(op: VmOp, failure: OsFailure, location: &'static Location<'static>) -> VmError {
    let err = VmError::new(op, failure, location);
    tracing::debug!(
        op = %err.op,
        kind = %err.kind,
        os_code = err.os_code,
        location = %err.location,
        "vm operation failed"
    );
    err
}

impl VmRange<DefaultPages> {
    /// Reserve `page_count` pages of `page_size` bytes from the default
    /// backend.
    ///
    /// `page_size` must be one of the discovered page sizes; sizes above
    /// the default yield a range aligned to `page_size`.
    #[track_caller]
    pub fn reserve(page_count: usize, page_size: usize) -> Result<Self, VmError> {
        Self::reserve_in(DefaultPages::default(), page_count, page_size)
    }

    /// Reserve `page_count` pages of the platform's default size.
    #[track_caller]
    pub fn reserve_default(page_count: usize) -> Result<Self, VmError> {
        let backend = DefaultPages::default();
        let page_size = backend.page_sizes().default_page_size();
        Self::reserve_in(backend, page_count, page_size)
    }
}

impl<B: PageBackend> VmRange<B> {
    /// Reserve `page_count` pages of `page_size` bytes from `backend`.
    #[track_caller]
    pub fn reserve_in(backend: B, page_count: usize, page_size: usize) -> Result<Self, VmError> {
        let location = Location::caller();
        if !page_size.is_power_of_two() || !backend.page_sizes().supports(page_size) {
            return Err(fail(
                VmOp::Reserve,
                OsFailure::new(VmErrorKind::InvalidPageSize),
                location,
            ));
        }
        let bytes = match page_size.checked_mul(page_count) {
            Some(b) if b > 0 && b <= isize::MAX as usize => b,
            _ => {
                return Err(fail(
                    VmOp::Reserve,
                    OsFailure::new(VmErrorKind::InvalidAddressRange),
                    location,
                ))
            }
        };
        let ptr = backend
            .reserve(bytes, page_size)
            .map_err(|f| fail(VmOp::Reserve, f, location))?;
        Ok(Self {
            ptr,
            page_size,
            page_count,
            state: RangeState::Reserved,
            backend,
        })
    }

    /// Make every page readable and writable. Committing a committed range
    /// is a no-op.
    #[track_caller]
    pub fn commit(&mut self) -> Result<(), VmError> {
        let location = Location::caller();
        match self.state {
            RangeState::Freed => Err(self.freed(VmOp::Commit, location)),
            RangeState::Committed => Ok(()),
            RangeState::Reserved => {
                // SAFETY: the range is a live reservation of this backend.
                unsafe { self.backend.commit(self.ptr, self.size_in_bytes()) }
                    .map_err(|f| fail(VmOp::Commit, f, location))?;
                self.state = RangeState::Committed;
                Ok(())
            }
        }
    }

    /// Discard page contents and make the pages inaccessible again. The
    /// address space stays reserved.
    #[track_caller]
    pub fn decommit(&mut self) -> Result<(), VmError> {
        let location = Location::caller();
        match self.state {
            RangeState::Freed => Err(self.freed(VmOp::Decommit, location)),
            RangeState::Reserved => Ok(()),
            RangeState::Committed => {
                // SAFETY: `&mut self` proves no slice into the range is live.
                unsafe { self.backend.decommit(self.ptr, self.size_in_bytes()) }
                    .map_err(|f| fail(VmOp::Decommit, f, location))?;
                self.state = RangeState::Reserved;
                Ok(())
            }
        }
    }

    /// Release the range. Terminal: every later operation fails.
    #[track_caller]
    pub fn free(&mut self) -> Result<(), VmError> {
        let location = Location::caller();
        if self.state == RangeState::Freed {
            return Err(self.freed(VmOp::Free, location));
        }
        // SAFETY: ptr/bytes/align are those of the reservation, released once
        // because the state moves to Freed below.
        unsafe {
            self.backend
                .release(self.ptr, self.size_in_bytes(), self.page_size)
        }
        .map_err(|f| fail(VmOp::Free, f, location))?;
        self.state = RangeState::Freed;
        Ok(())
    }

    fn freed(&self, op: VmOp, location: &'static Location<'static>) -> VmError {
        fail(op, OsFailure::new(VmErrorKind::InvalidAddressRange), location)
    }

    /// Base address of the range.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages.
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// `page_size * page_count`.
    pub fn size_in_bytes(&self) -> usize {
        self.page_size * self.page_count
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RangeState {
        self.state
    }

    /// The committed bytes, or `None` unless committed.
    pub fn as_slice(&self) -> Option<&[u8]> {
        (self.state == RangeState::Committed)
            // SAFETY: committed pages are readable for the whole range.
            .then(|| unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.size_in_bytes()) })
    }

    /// The committed bytes, mutably, or `None` unless committed.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        if self.state != RangeState::Committed {
            return None;
        }
        // SAFETY: committed pages are writable; `&mut self` is exclusive.
        Some(unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size_in_bytes()) })
    }

    /// Bytes of page `index`, or `None` if not committed or out of range.
    pub fn page_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        let page_size = self.page_size;
        if index >= self.page_count {
            return None;
        }
        self.as_mut_slice()
            .map(|all| &mut all[index * page_size..(index + 1) * page_size])
    }

    /// The backend serving this range.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Give up ownership without releasing the pages.
    ///
    /// Returns the base pointer and the backend, or `None` if the range was
    /// already freed. The caller becomes responsible for calling
    /// [`PageBackend::release`] with this range's
    /// [`size_in_bytes`](Self::size_in_bytes) and
    /// [`page_size`](Self::page_size).
    pub fn into_raw(self) -> Option<(NonNull<u8>, B)> {
        let this = std::mem::ManuallyDrop::new(self);
        if this.state == RangeState::Freed {
            // SAFETY: `this` is never used or dropped again.
            drop(unsafe { std::ptr::read(&this.backend) });
            return None;
        }
        // SAFETY: as above; the backend is moved out exactly once.
        let backend = unsafe { std::ptr::read(&this.backend) };
        Some((this.ptr, backend))
    }
}

impl<B: PageBackend> Drop for VmRange<B> {
    fn drop(&mut self) {
        if self.state != RangeState::Freed {
            // SAFETY: the reservation is still live and released exactly once.
            let released = unsafe {
                self.backend
                    .release(self.ptr, self.size_in_bytes(), self.page_size)
            };
            if let Err(failure) = released {
                tracing::debug!(
                    kind = %failure.kind,
                    os_code = failure.os_code,
                    "vm release on drop failed"
                );
            }
        }
    }
}

impl<B: PageBackend> fmt::Debug for VmRange<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmRange")
            .field("ptr", &self.ptr)
            .field("page_size", &self.page_size)
            .field("page_count", &self.page_count)
            .field("state", &self.state)
            .finish()
    }
}
