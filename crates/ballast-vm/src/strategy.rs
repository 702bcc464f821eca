//! Page-backed allocation strategy.

use std::ptr::NonNull;

use ballast_alloc::strategy::precheck;
use ballast_alloc::BackingAllocator;
use ballast_core::{AllocError, AllocatorLabel};

use crate::backend::{DefaultPages, PageBackend};
use crate::range::VmRange;

/// A [`BackingAllocator`] that serves each allocation from its own freshly
/// reserved and committed page range.
///
/// Sizes are rounded up to whole pages. The page size is the backend's
/// default, or the smallest supported size that satisfies a larger
/// alignment. Suited to large, long-lived buffers; every growth maps new
/// pages.
#[derive(Clone, Debug)]
pub struct PageAllocator<B: PageBackend + Clone = DefaultPages> {
    label: AllocatorLabel,
    backend: B,
}

impl PageAllocator<DefaultPages> {
    /// Page allocator over the default backend.
    pub fn new(label: AllocatorLabel) -> Self {
        Self::with_backend(label, DefaultPages::default())
    }
}

impl<B: PageBackend + Clone> PageAllocator<B> {
    /// Page allocator over `backend`.
    pub fn with_backend(label: AllocatorLabel, backend: B) -> Self {
        Self { label, backend }
    }

    /// Page size and page count used for a `size`/`align` request.
    pub fn geometry(&self, size: usize, align: usize) -> Result<(usize, usize), AllocError> {
        let info = self.backend.page_sizes();
        let page_size = info
            .smallest_at_least(align)
            .ok_or(AllocError::InvalidLayout { size, align })?;
        let pages = size.div_ceil(page_size);
        Ok((page_size, pages))
    }
}

impl<B: PageBackend + Clone> BackingAllocator for PageAllocator<B> {
    fn label(&self) -> AllocatorLabel {
        self.label
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
        let (page_size, pages) = self.geometry(size, align)?;
        let oom = |_| AllocError::OutOfMemory { size, align, label };
        let mut range =
            VmRange::reserve_in(self.backend.clone(), pages, page_size).map_err(oom)?;
        range.commit().map_err(oom)?;
        let (ptr, _backend) = range
            .into_raw()
            .ok_or(AllocError::OutOfMemory { size, align, label })?;
        Ok(ptr)
    }

    unsafe fn dispose(&mut self, ptr: NonNull<u8>, size: usize, align: usize) {
        if size == 0 {
            return;
        }
        let Ok((page_size, pages)) = self.geometry(size, align) else {
            return;
        };
        // SAFETY: caller contract: `ptr` came from `init` with this size and
        // alignment, which map to the same geometry.
        let released = unsafe { self.backend.release(ptr, page_size * pages, page_size) };
        if let Err(failure) = released {
            tracing::debug!(
                kind = %failure.kind,
                os_code = failure.os_code,
                size,
                "page allocator release failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeapPages;
    use crate::page_size::{page_size_info, FALLBACK_PAGE_SIZE};

    #[test]
    fn allocation_is_page_aligned_and_writable() {
        let mut pages = PageAllocator::new(AllocatorLabel::Persistent);
        let page = page_size_info().default_page_size();
        let ptr = pages.init(100, 8, AllocatorLabel::Persistent).unwrap();
        assert_eq!(ptr.as_ptr() as usize % page, 0);
        unsafe {
            ptr.as_ptr().write_bytes(0x11, 100);
            assert_eq!(ptr.as_ptr().add(99).read(), 0x11);
            pages.dispose(ptr, 100, 8);
        }
    }

    #[test]
    fn geometry_rounds_up_to_pages() {
        let pages = PageAllocator::with_backend(AllocatorLabel::Persistent, HeapPages);
        assert_eq!(pages.geometry(1, 1).unwrap(), (FALLBACK_PAGE_SIZE, 1));
        assert_eq!(
            pages.geometry(FALLBACK_PAGE_SIZE + 1, 16).unwrap(),
            (FALLBACK_PAGE_SIZE, 2)
        );
    }

    #[test]
    fn alignment_beyond_any_page_size_is_invalid_layout() {
        let mut pages = PageAllocator::with_backend(AllocatorLabel::Persistent, HeapPages);
        let align = FALLBACK_PAGE_SIZE * 2;
        assert_eq!(
            pages.init(16, align, AllocatorLabel::Persistent),
            Err(AllocError::InvalidLayout { size: 16, align })
        );
    }

    #[test]
    fn invalid_label_and_zero_size_are_prechecked() {
        let mut pages = PageAllocator::with_backend(AllocatorLabel::Persistent, HeapPages);
        assert!(matches!(
            pages.init(16, 8, AllocatorLabel::Invalid),
            Err(AllocError::InvalidAllocator { .. })
        ));
        let p = pages.init(0, 8, AllocatorLabel::Persistent).unwrap();
        unsafe { pages.dispose(p, 0, 8) };
    }
}
