//! Lists backed by scratch blocks and page ranges.

use std::mem::MaybeUninit;

use ballast_alloc::{NoLeakCheck, ScratchAllocator, ScratchStrategy};
use ballast_buffer::NativeList;
use ballast_core::{AllocatorLabel, BufferError};
use ballast_vm::{page_size_info, PageAllocator};

#[test]
fn scratch_backed_list_grows_until_block_is_exhausted() {
    let mut block = [MaybeUninit::<u8>::uninit(); 256];
    let mut scratch = ScratchAllocator::new(&mut block);
    {
        let strategy = ScratchStrategy::new(&mut scratch);
        let mut list = NativeList::<u32, _, NoLeakCheck>::new_in(2, strategy).unwrap();
        assert_eq!(list.label(), AllocatorLabel::UserProvided);

        let mut pushed = 0u32;
        let err = loop {
            match list.add(pushed) {
                Ok(()) => pushed += 1,
                Err(e) => break e,
            }
        };
        assert!(matches!(err, BufferError::Alloc(_)));
        // 8 + 16 + 32 + 64 + 128 bytes fit in 256; the next growth does not.
        assert_eq!(pushed, 32);
        assert_eq!(list.to_vec().unwrap(), (0..32).collect::<Vec<_>>());
        list.dispose().unwrap();
    }
    assert!(scratch.used() <= scratch.capacity());
}

#[test]
fn page_backed_list_lands_on_page_boundaries() {
    let page = page_size_info().default_page_size();
    let strategy = PageAllocator::new(AllocatorLabel::Persistent);
    let mut list = NativeList::<u64, _, NoLeakCheck>::new_in(16, strategy).unwrap();
    assert_eq!(list.as_ptr() as usize % page, 0);

    list.extend(0..10_000u64);
    assert_eq!(list.as_ptr() as usize % page, 0);
    assert_eq!(list.get(9_999).unwrap(), 9_999);
    list.dispose().unwrap();
}
