//! Bus Scanner Integration Tests
//!
//! # Test Scenarios
//! - Scan results, states and ordering
//! - Failure classification and skipped entries
//! - The three find forms
//! - Concurrent scans
//!
//! Run with: `cargo test -p usbkit --test scanner_tests`

use std::thread;
use usbkit::test_utils::{FakeBus, FakeDevice};
use usbkit::{
    Context, DeviceInfo, DeviceState, find_devices, find_first_device, find_valid_devices,
    scan_devices,
};

const VID: u16 = 0x1209;
const PID: u16 = 0x0D32;

fn context(bus: &FakeBus) -> Context<FakeBus> {
    Context::with_backend(bus.clone())
}

// ============================================================================
// scan_devices
// ============================================================================

#[test]
fn test_scan_reports_open_and_unsupported_in_order() {
    let bus = FakeBus::with_devices(vec![
        FakeDevice::new(0x1111, 0x2222).product("WidgetA"),
        FakeDevice::new(0x3333, 0x4444).open_error(rusb::Error::NotSupported),
    ]);

    let found = scan_devices(&context(&bus));

    assert_eq!(found.len(), 2);
    assert_eq!(found[0].vendor_id, 0x1111);
    assert_eq!(found[0].product_id, 0x2222);
    assert_eq!(found[0].description, "WidgetA");
    assert_eq!(found[0].state, DeviceState::Open);

    assert_eq!(found[1].vendor_id, 0x3333);
    assert_eq!(found[1].product_id, 0x4444);
    assert_eq!(found[1].description, "");
    assert_eq!(found[1].state, DeviceState::InUseOrUnsupported);
}

#[test]
fn test_scan_classifies_open_failures() {
    let bus = FakeBus::with_devices(vec![
        FakeDevice::new(0x0001, 0x0001).open_error(rusb::Error::NotFound),
        FakeDevice::new(0x0002, 0x0002).open_error(rusb::Error::Access),
        FakeDevice::new(0x0003, 0x0003).open_error(rusb::Error::NotSupported),
    ]);

    let states: Vec<DeviceState> = scan_devices(&context(&bus))
        .into_iter()
        .map(|d| d.state)
        .collect();

    assert_eq!(
        states,
        vec![
            DeviceState::InvalidDriver,
            DeviceState::OtherError,
            DeviceState::InUseOrUnsupported,
        ]
    );
}

#[test]
fn test_scan_skips_unreadable_descriptor_and_string() {
    let bus = FakeBus::with_devices(vec![
        FakeDevice::new(0x0001, 0x0001).descriptor_error(rusb::Error::Io),
        FakeDevice::new(0x0002, 0x0002).string_error(rusb::Error::Pipe),
        FakeDevice::new(0x0003, 0x0003).product("kept"),
    ]);

    let found = scan_devices(&context(&bus));

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].description, "kept");
    // The device whose string failed was still closed again
    assert_eq!(bus.counters().opens, bus.counters().closes);
}

#[test]
fn test_scan_enumeration_failure_is_empty() {
    let bus = FakeBus::with_devices(vec![FakeDevice::new(VID, PID)]);
    bus.fail_enumeration(true);

    assert!(scan_devices(&context(&bus)).is_empty());
    assert_eq!(bus.counters().opens, 0);

    bus.fail_enumeration(false);
    assert_eq!(scan_devices(&context(&bus)).len(), 1);
}

#[test]
fn test_scan_sees_device_held_open_as_in_use() {
    let bus = FakeBus::with_devices(vec![FakeDevice::new(VID, PID).product("ODrive")]);
    let ctx = context(&bus);

    let held = find_first_device(VID, PID, &ctx).unwrap();
    let found = scan_devices(&ctx);
    assert_eq!(found[0].state, DeviceState::InUseOrUnsupported);

    drop(held);
    let found = scan_devices(&ctx);
    assert_eq!(found[0].state, DeviceState::Open);
}

// ============================================================================
// find_devices / find_valid_devices / find_first_device
// ============================================================================

#[test]
fn test_find_devices_includes_unusable_entries() {
    let bus = FakeBus::with_devices(vec![
        FakeDevice::new(VID, PID).product("one"),
        FakeDevice::new(0xAAAA, 0xBBBB).product("other"),
        FakeDevice::new(VID, PID).open_error(rusb::Error::NotFound),
    ]);

    let devices = find_devices(VID, PID, &context(&bus));

    assert_eq!(devices.len(), 2);
    assert!(devices[0].is_open());
    assert_eq!(devices[0].info().description, "one");
    assert!(!devices[1].is_open());
    assert_eq!(devices[1].state(), DeviceState::InvalidDriver);

    // Open entries stay open until dropped
    assert!(bus.is_in_use(0));
    drop(devices);
    assert!(!bus.is_in_use(0));
}

#[test]
fn test_find_devices_keeps_device_without_product_string() {
    let bus = FakeBus::with_devices(vec![FakeDevice::new(VID, PID).string_error(rusb::Error::Io)]);

    let devices = find_devices(VID, PID, &context(&bus));

    assert_eq!(devices.len(), 1);
    assert!(devices[0].is_open());
    assert_eq!(devices[0].info().description, "");
}

#[test]
fn test_find_valid_devices_filters_to_open() {
    let bus = FakeBus::with_devices(vec![
        FakeDevice::new(VID, PID).open_error(rusb::Error::NotSupported),
        FakeDevice::new(VID, PID).product("usable"),
    ]);

    let devices = find_valid_devices(VID, PID, &context(&bus));

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].info().description, "usable");
    assert_eq!(devices[0].state(), DeviceState::Open);
}

#[test]
fn test_find_first_device_none_when_absent() {
    let bus = FakeBus::with_devices(vec![FakeDevice::new(0xAAAA, 0xBBBB)]);

    assert!(find_first_device(VID, PID, &context(&bus)).is_none());
    assert_eq!(bus.counters().opens, 0);
}

#[test]
fn test_find_first_device_does_not_open_the_rest() {
    let bus = FakeBus::with_devices(vec![
        FakeDevice::new(VID, PID),
        FakeDevice::new(VID, PID),
        FakeDevice::new(VID, PID),
    ]);

    let device = find_first_device(VID, PID, &context(&bus)).unwrap();

    assert!(device.is_open());
    assert_eq!(bus.counters().opens, 1);
    assert!(bus.is_in_use(0));
    assert!(!bus.is_in_use(1));
}

#[test]
fn test_found_info_matches_scan_identity() {
    let bus = FakeBus::with_devices(vec![FakeDevice::new(VID, PID).product("ODrive")]);
    let ctx = context(&bus);

    let scanned = scan_devices(&ctx);
    let device = find_first_device(VID, PID, &ctx).unwrap();

    let expected = DeviceInfo::unavailable(VID, PID, DeviceState::Closed);
    assert_eq!(scanned[0], expected);
    assert_eq!(*device.info(), expected);
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_scans_never_leak_handles() {
    let bus = FakeBus::with_devices(vec![
        FakeDevice::new(0x0001, 0x0001).product("a"),
        FakeDevice::new(0x0002, 0x0002).product("b"),
    ]);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ctx = context(&bus);
            thread::spawn(move || {
                for _ in 0..20 {
                    // Serialized scans never see each other's temporary opens
                    let found = scan_devices(&ctx);
                    assert!(found.iter().all(|d| d.state == DeviceState::Open));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let counters = bus.counters();
    assert_eq!(counters.opens, counters.closes);
    assert_eq!(counters.enumerations, 8 * 20);
}

#[test]
fn test_scans_and_finds_race_without_leaks() {
    let bus = FakeBus::with_devices(vec![
        FakeDevice::new(VID, PID).product("a"),
        FakeDevice::new(VID, PID).product("b"),
        FakeDevice::new(0x0002, 0x0002).product("other"),
    ]);

    let handles: Vec<_> = (0..9)
        .map(|i| {
            let ctx = context(&bus);
            thread::spawn(move || {
                for _ in 0..20 {
                    match i % 3 {
                        0 => {
                            let found = scan_devices(&ctx);
                            assert_eq!(found.len(), 3);
                        }
                        1 => {
                            let devices = find_devices(VID, PID, &ctx);
                            assert_eq!(devices.len(), 2);
                        }
                        _ => {
                            let device = find_first_device(VID, PID, &ctx);
                            drop(device);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let counters = bus.counters();
    assert_eq!(counters.opens, counters.closes);
    assert!((0..3).all(|id| !bus.is_in_use(id)));
    assert_eq!(scan_devices(&context(&bus)).len(), 3);
}
