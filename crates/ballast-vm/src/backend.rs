//! Page backends: the boundary between [`VmRange`](crate::VmRange) and the
//! platform.
//!
//! A backend performs the four raw transitions (reserve, commit, decommit,
//! release) on byte ranges that the range type has already validated. It
//! reports failures as [`OsFailure`]; the range attaches the operation and
//! caller location.
//!
//! [`SystemPages`] maps anonymous memory through `libc` on Unix.
//! [`HeapPages`] serves ranges from the global allocator and is the default
//! elsewhere; it cannot protect pages, so reserved memory stays accessible.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::error::{OsFailure, VmErrorKind};
use crate::page_size::{PageSizeInfo, FALLBACK_PAGE_SIZE};

/// Raw page operations.
///
/// Callers guarantee that `bytes` is a non-zero multiple of a page size the
/// backend reported in [`page_sizes`](PageBackend::page_sizes), and that
/// `align` is that page size.
pub trait PageBackend {
    /// Page sizes this backend can reserve.
    fn page_sizes(&self) -> PageSizeInfo;

    /// Reserve `bytes` of address space aligned to `align`. The pages are
    /// inaccessible until committed.
    fn reserve(&self, bytes: usize, align: usize) -> Result<NonNull<u8>, OsFailure>;

    /// Make reserved pages readable and writable.
    ///
    /// # Safety
    ///
    /// `ptr..ptr + bytes` must lie within a range returned by
    /// [`reserve`](PageBackend::reserve) on this backend that has not been
    /// released.
    unsafe fn commit(&self, ptr: NonNull<u8>, bytes: usize) -> Result<(), OsFailure>;

    /// Return committed pages to the reserved state, discarding contents.
    ///
    /// # Safety
    ///
    /// As for [`commit`](PageBackend::commit); additionally no live
    /// reference may point into the range.
    unsafe fn decommit(&self, ptr: NonNull<u8>, bytes: usize) -> Result<(), OsFailure>;

    /// Release the whole range.
    ///
    /// # Safety
    ///
    /// `ptr`, `bytes` and `align` must be exactly those of one earlier
    /// successful `reserve`, released at most once.
    unsafe fn release(&self, ptr: NonNull<u8>, bytes: usize, align: usize)
        -> Result<(), OsFailure>;
}

/// Backend used by [`VmRange`](crate::VmRange) unless one is named.
#[cfg(unix)]
pub type DefaultPages = SystemPages;

/// Backend used by [`VmRange`](crate::VmRange) unless one is named.
#[cfg(not(unix))]
pub type DefaultPages = HeapPages;

// ── System pages ─────────────────────────────────────────────────

/// Anonymous private mappings via `mmap`/`mprotect`/`madvise`/`munmap`.
#[cfg(unix)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SystemPages;

#[cfg(unix)]
fn last_os_failure() -> OsFailure {
    let os_code = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
    let kind = if os_code == libc::ENOMEM {
        VmErrorKind::OutOfMemory
    } else {
        VmErrorKind::InvalidAddressRange
    };
    OsFailure { kind, os_code }
}

#[cfg(unix)]
fn check(rc: libc::c_int) -> Result<(), OsFailure> {
    if rc == 0 {
        Ok(())
    } else {
        Err(last_os_failure())
    }
}

#[cfg(unix)]
impl SystemPages {
    #[cfg(target_os = "linux")]
    const RESERVE_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANON | libc::MAP_NORESERVE;
    #[cfg(not(target_os = "linux"))]
    const RESERVE_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANON;

    fn map(bytes: usize) -> Result<*mut u8, OsFailure> {
        // SAFETY: a fresh anonymous mapping at a kernel-chosen address does
        // not alias any existing memory.
        let raw = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                bytes,
                libc::PROT_NONE,
                Self::RESERVE_FLAGS,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(last_os_failure());
        }
        Ok(raw.cast())
    }

    fn unmap(ptr: *mut u8, bytes: usize) -> Result<(), OsFailure> {
        if bytes == 0 {
            return Ok(());
        }
        // SAFETY: callers pass sub-ranges of mappings they own exclusively.
        check(unsafe { libc::munmap(ptr.cast(), bytes) })
    }
}

/// Unmap the head and tail of an over-sized mapping of `total` bytes so
/// that `bytes` bytes starting on an `align` boundary remain.
///
/// If either unmap fails, whatever is still mapped is unmapped before the
/// error is returned.
#[cfg(unix)]
fn trim_to_alignment(
    raw: *mut u8,
    total: usize,
    bytes: usize,
    align: usize,
    mut unmap: impl FnMut(*mut u8, usize) -> Result<(), OsFailure>,
) -> Result<*mut u8, OsFailure> {
    let head = (raw as usize).wrapping_neg() & (align - 1);
    let tail = total - head - bytes;
    let aligned = raw.wrapping_add(head);
    if let Err(e) = unmap(raw, head) {
        let _ = unmap(raw, total);
        return Err(e);
    }
    if let Err(e) = unmap(aligned.wrapping_add(bytes), tail) {
        let _ = unmap(aligned, bytes + tail);
        return Err(e);
    }
    Ok(aligned)
}

#[cfg(unix)]
impl PageBackend for SystemPages {
    fn page_sizes(&self) -> PageSizeInfo {
        crate::page_size::page_size_info()
    }

    fn reserve(&self, bytes: usize, align: usize) -> Result<NonNull<u8>, OsFailure> {
        let base_page = self.page_sizes().default_page_size();
        if align <= base_page {
            let ptr = Self::map(bytes)?;
            return NonNull::new(ptr).ok_or(OsFailure::new(VmErrorKind::InvalidAddressRange));
        }

        // Over-reserve, then trim head and tail so the kept range starts on
        // an `align` boundary.
        let total = bytes
            .checked_add(align - base_page)
            .ok_or(OsFailure::new(VmErrorKind::InvalidAddressRange))?;
        let raw = Self::map(total)?;
        let aligned = trim_to_alignment(raw, total, bytes, align, Self::unmap)?;

        #[cfg(target_os = "linux")]
        {
            // Advisory only; transparent huge pages may be disabled.
            // SAFETY: the range is mapped and owned by this call.
            let _ = unsafe { libc::madvise(aligned.cast(), bytes, libc::MADV_HUGEPAGE) };
        }

        NonNull::new(aligned).ok_or(OsFailure::new(VmErrorKind::InvalidAddressRange))
    }

    unsafe fn commit(&self, ptr: NonNull<u8>, bytes: usize) -> Result<(), OsFailure> {
        // SAFETY: caller contract; the range is part of a live reservation.
        check(unsafe {
            libc::mprotect(
                ptr.as_ptr().cast(),
                bytes,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        })
    }

    unsafe fn decommit(&self, ptr: NonNull<u8>, bytes: usize) -> Result<(), OsFailure> {
        // SAFETY: caller contract; nothing references the range any more.
        check(unsafe { libc::madvise(ptr.as_ptr().cast(), bytes, libc::MADV_DONTNEED) })?;
        // SAFETY: as above.
        check(unsafe { libc::mprotect(ptr.as_ptr().cast(), bytes, libc::PROT_NONE) })
    }

    unsafe fn release(
        &self,
        ptr: NonNull<u8>,
        bytes: usize,
        _align: usize,
    ) -> Result<(), OsFailure> {
        Self::unmap(ptr.as_ptr(), bytes)
    }
}

// ── Heap pages ───────────────────────────────────────────────────

/// Page ranges carved from the global allocator.
///
/// Only the fallback page size is offered. Commit is a no-op because
/// reserved memory is already zeroed and accessible; decommit zeroes the
/// range so that recommitted pages read as zero, like fresh OS pages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapPages;

impl PageBackend for HeapPages {
    fn page_sizes(&self) -> PageSizeInfo {
        PageSizeInfo::new(FALLBACK_PAGE_SIZE, &[])
    }

    fn reserve(&self, bytes: usize, align: usize) -> Result<NonNull<u8>, OsFailure> {
        let layout = Layout::from_size_align(bytes, align)
            .map_err(|_| OsFailure::new(VmErrorKind::InvalidAddressRange))?;
        if layout.size() == 0 {
            return Err(OsFailure::new(VmErrorKind::InvalidAddressRange));
        }
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        NonNull::new(raw).ok_or(OsFailure::new(VmErrorKind::OutOfMemory))
    }

    unsafe fn commit(&self, _ptr: NonNull<u8>, _bytes: usize) -> Result<(), OsFailure> {
        Ok(())
    }

    unsafe fn decommit(&self, ptr: NonNull<u8>, bytes: usize) -> Result<(), OsFailure> {
        // SAFETY: caller contract; the range lies inside a live block.
        unsafe { ptr.as_ptr().write_bytes(0, bytes) };
        Ok(())
    }

    unsafe fn release(&self, ptr: NonNull<u8>, bytes: usize, align: usize) -> Result<(), OsFailure> {
        let layout = Layout::from_size_align(bytes, align)
            .map_err(|_| OsFailure::new(VmErrorKind::InvalidAddressRange))?;
        // SAFETY: caller contract; same layout as the reserving call.
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn trim_with_failure_at(call: usize) -> (Result<*mut u8, OsFailure>, Vec<(usize, usize)>) {
        let raw = 0x1_1000 as *mut u8;
        let mut calls = Vec::new();
        let out = trim_to_alignment(raw, 0x7000, 0x4000, 0x4000, |ptr, bytes| {
            calls.push((ptr as usize, bytes));
            if calls.len() == call {
                Err(OsFailure::new(VmErrorKind::InvalidAddressRange))
            } else {
                Ok(())
            }
        });
        (out, calls)
    }

    #[cfg(unix)]
    #[test]
    fn trim_keeps_aligned_body() {
        let (out, calls) = trim_with_failure_at(usize::MAX);
        assert_eq!(out.unwrap() as usize, 0x1_4000);
        assert_eq!(calls, vec![(0x1_1000, 0x3000), (0x1_8000, 0)]);
    }

    #[cfg(unix)]
    #[test]
    fn failed_head_trim_unmaps_whole_mapping() {
        let (out, calls) = trim_with_failure_at(1);
        assert!(out.is_err());
        assert_eq!(calls, vec![(0x1_1000, 0x3000), (0x1_1000, 0x7000)]);
    }

    #[cfg(unix)]
    #[test]
    fn failed_tail_trim_unmaps_body_and_tail() {
        let raw = 0x1_2000 as *mut u8;
        let mut calls = Vec::new();
        let out = trim_to_alignment(raw, 0x7000, 0x4000, 0x4000, |ptr, bytes| {
            calls.push((ptr as usize, bytes));
            if calls.len() == 2 {
                Err(OsFailure::new(VmErrorKind::InvalidAddressRange))
            } else {
                Ok(())
            }
        });
        assert!(out.is_err());
        assert_eq!(
            calls,
            vec![(0x1_2000, 0x2000), (0x1_8000, 0x1000), (0x1_4000, 0x5000)]
        );
    }

    #[test]
    fn heap_pages_roundtrip_zeroes_on_decommit() {
        let backend = HeapPages;
        let bytes = 2 * FALLBACK_PAGE_SIZE;
        let ptr = backend.reserve(bytes, FALLBACK_PAGE_SIZE).unwrap();
        assert_eq!(ptr.as_ptr() as usize % FALLBACK_PAGE_SIZE, 0);
        unsafe {
            backend.commit(ptr, bytes).unwrap();
            ptr.as_ptr().add(10).write(0xAB);
            backend.decommit(ptr, bytes).unwrap();
            backend.commit(ptr, bytes).unwrap();
            assert_eq!(ptr.as_ptr().add(10).read(), 0);
            backend.release(ptr, bytes, FALLBACK_PAGE_SIZE).unwrap();
        }
    }

    #[test]
    fn heap_pages_offers_only_fallback_size() {
        let sizes = HeapPages.page_sizes();
        assert_eq!(sizes.default_page_size(), FALLBACK_PAGE_SIZE);
        assert_eq!(sizes.sizes().as_slice(), &[FALLBACK_PAGE_SIZE]);
    }

    #[cfg(all(unix, not(miri)))]
    #[test]
    fn system_pages_commit_write_decommit() {
        let backend = SystemPages;
        let page = backend.page_sizes().default_page_size();
        let ptr = backend.reserve(page, page).unwrap();
        unsafe {
            backend.commit(ptr, page).unwrap();
            ptr.as_ptr().write(7);
            assert_eq!(ptr.as_ptr().read(), 7);
            backend.decommit(ptr, page).unwrap();
            backend.release(ptr, page, page).unwrap();
        }
    }

    #[cfg(all(unix, not(miri)))]
    #[test]
    fn system_pages_over_aligned_reserve_is_aligned() {
        let backend = SystemPages;
        let page = backend.page_sizes().default_page_size();
        let align = page * 16;
        let ptr = backend.reserve(page * 2, align).unwrap();
        assert_eq!(ptr.as_ptr() as usize % align, 0);
        unsafe { backend.release(ptr, page * 2, align).unwrap() };
    }
}
