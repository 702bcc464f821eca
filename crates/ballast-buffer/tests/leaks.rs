//! Leak reporting for lists dropped without `dispose()`.

#![cfg(feature = "leak-check")]

use ballast_alloc::{take_leak_reports_for, LeakSentinel, TrackedSentinel};
use ballast_buffer::NativeList;
use ballast_core::{set_leak_detection_mode, AllocatorLabel, LeakDetectionMode, ListConfig};

#[test]
fn undisposed_list_reports_its_construction_site() {
    ballast_test_utils::init_tracing();
    set_leak_detection_mode(LeakDetectionMode::Enabled);
    let list = NativeList::<u32>::with_capacity(4, AllocatorLabel::ThreadTemp).unwrap();
    let id = list.id();
    let line = line!() - 2;
    drop(list);

    let reports = take_leak_reports_for(id);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].label, AllocatorLabel::ThreadTemp);
    assert_eq!(reports[0].origin.file(), file!());
    assert_eq!(reports[0].origin.line(), line);
}

#[test]
fn disposed_list_reports_nothing() {
    let mut list = NativeList::<u32>::from_config(&ListConfig::default()).unwrap();
    let id = list.id();
    list.add(1).unwrap();
    list.dispose().unwrap();
    assert!(!list.sentinel().is_armed());
    drop(list);
    assert!(take_leak_reports_for(id).is_empty());
}

#[test]
fn sentinel_records_origin_at_construction() {
    let mut list = NativeList::<u8>::with_capacity(1, AllocatorLabel::Persistent).unwrap();
    let sentinel: &TrackedSentinel = list.sentinel();
    assert_eq!(sentinel.origin().file(), file!());
    list.dispose().unwrap();
}
