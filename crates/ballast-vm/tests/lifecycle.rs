//! Range lifecycle across every page size the host reports.

use ballast_vm::{page_size_info, RangeState, VmErrorKind, VmOp, VmRange};

#[test]
fn lifecycle_for_each_discovered_page_size() {
    ballast_test_utils::init_tracing();
    let info = page_size_info();
    for page_size in info.sizes() {
        let mut range = VmRange::reserve(2, page_size)
            .unwrap_or_else(|e| panic!("reserve {page_size}: {e}"));
        assert_eq!(range.as_ptr() as usize % page_size, 0);
        assert_eq!(range.size_in_bytes(), 2 * page_size);

        range.commit().unwrap();
        {
            let bytes = range.as_mut_slice().unwrap();
            bytes[0] = 1;
            bytes[2 * page_size - 1] = 2;
        }
        let bytes = range.as_slice().unwrap();
        assert_eq!((bytes[0], bytes[2 * page_size - 1]), (1, 2));

        range.decommit().unwrap();
        assert_eq!(range.state(), RangeState::Reserved);
        range.commit().unwrap();
        range.decommit().unwrap();
        range.free().unwrap();

        let err = range.commit().unwrap_err();
        assert_eq!(err.kind, VmErrorKind::InvalidAddressRange);
    }
}

#[test]
fn failure_renders_into_fixed_buffer() {
    let mut range = VmRange::reserve_default(1).unwrap();
    range.free().unwrap();
    let err = range.decommit().unwrap_err();
    assert_eq!(err.op, VmOp::Decommit);

    let mut buf = [0u8; 128];
    let text = std::str::from_utf8(err.render(&mut buf)).unwrap();
    assert!(text.starts_with("vm decommit failed: invalid address range"));
}

#[test]
fn page_size_not_in_set_is_rejected() {
    let info = page_size_info();
    let odd = info.default_page_size() + 1;
    let err = VmRange::reserve(1, odd).unwrap_err();
    assert_eq!(err.kind, VmErrorKind::InvalidPageSize);
}
