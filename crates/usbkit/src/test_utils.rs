//! Test utilities for usbkit
//!
//! [`FakeBus`] is an in-memory [`Backend`] with scripted devices. It counts
//! every native call, so tests can check what the library did and did not
//! touch, and it refuses to open a device that is already open (with
//! `NotSupported`, as libusb does for a device held elsewhere).
//!
//! # Example
//!
//! ```
//! use usbkit::test_utils::{FakeBus, FakeDevice};
//! use usbkit::{Context, scan_devices};
//!
//! let bus = FakeBus::with_devices(vec![FakeDevice::new(0x1234, 0x5678).product("Widget")]);
//! let context = Context::with_backend(bus.clone());
//!
//! let devices = scan_devices(&context);
//! assert_eq!(devices[0].description, "Widget");
//! assert_eq!(bus.counters().closes, 1);
//! ```

use crate::backend::{Backend, NativeHandle, RawDescriptor};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// String index reported for devices that have a product string
const PRODUCT_STRING_INDEX: u8 = 2;

/// Number of native calls observed by a [`FakeBus`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FakeCounters {
    pub enumerations: usize,
    pub opens: usize,
    pub closes: usize,
    pub claims: usize,
    pub releases: usize,
    pub transfers: usize,
}

/// Scripted device for a [`FakeBus`]
#[derive(Debug, Clone)]
pub struct FakeDevice {
    vendor_id: u16,
    product_id: u16,
    product: Option<String>,
    descriptor_error: Option<rusb::Error>,
    open_error: Option<rusb::Error>,
    string_error: Option<rusb::Error>,
    kernel_driver: bool,
    detach_error: Option<rusb::Error>,
    claim_error: Option<rusb::Error>,
    reads: VecDeque<rusb::Result<Vec<u8>>>,
    write_error: Option<rusb::Error>,
}

impl FakeDevice {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            product: None,
            descriptor_error: None,
            open_error: None,
            string_error: None,
            kernel_driver: false,
            detach_error: None,
            claim_error: None,
            reads: VecDeque::new(),
            write_error: None,
        }
    }

    pub fn product(mut self, product: &str) -> Self {
        self.product = Some(product.to_string());
        self
    }

    pub fn descriptor_error(mut self, err: rusb::Error) -> Self {
        self.descriptor_error = Some(err);
        self
    }

    pub fn open_error(mut self, err: rusb::Error) -> Self {
        self.open_error = Some(err);
        self
    }

    /// Fail reading the product string (implies the device has one)
    pub fn string_error(mut self, err: rusb::Error) -> Self {
        self.product.get_or_insert_with(String::new);
        self.string_error = Some(err);
        self
    }

    pub fn kernel_driver(mut self, active: bool) -> Self {
        self.kernel_driver = active;
        self
    }

    pub fn detach_error(mut self, err: rusb::Error) -> Self {
        self.detach_error = Some(err);
        self
    }

    pub fn claim_error(mut self, err: rusb::Error) -> Self {
        self.claim_error = Some(err);
        self
    }

    /// Queue the result of the next bulk read. With nothing queued reads
    /// time out.
    pub fn read_result(mut self, result: rusb::Result<Vec<u8>>) -> Self {
        self.reads.push_back(result);
        self
    }

    pub fn write_error(mut self, err: rusb::Error) -> Self {
        self.write_error = Some(err);
        self
    }
}

#[derive(Debug)]
struct Slot {
    device: FakeDevice,
    attached: bool,
    written: Vec<Vec<u8>>,
}

#[derive(Debug, Default)]
struct BusState {
    slots: Vec<Slot>,
    in_use: HashSet<usize>,
    fail_enumeration: bool,
    counters: FakeCounters,
}

/// In-memory USB bus
///
/// Clones share the same bus, so a test can keep one while the library owns
/// another inside a [`Context`](crate::Context).
#[derive(Debug, Clone, Default)]
pub struct FakeBus {
    state: Arc<Mutex<BusState>>,
}

impl FakeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: Vec<FakeDevice>) -> Self {
        let bus = Self::new();
        for device in devices {
            bus.attach(device);
        }
        bus
    }

    /// Plug a device in; returns its slot id
    pub fn attach(&self, device: FakeDevice) -> usize {
        let mut state = self.lock();
        state.slots.push(Slot {
            device,
            attached: true,
            written: Vec::new(),
        });
        state.slots.len() - 1
    }

    /// Unplug a device. Open handles to it fail further transfers with
    /// `NoDevice`.
    pub fn detach(&self, id: usize) {
        if let Some(slot) = self.lock().slots.get_mut(id) {
            slot.attached = false;
        }
    }

    /// Plug a previously detached device back in
    pub fn reattach(&self, id: usize) {
        if let Some(slot) = self.lock().slots.get_mut(id) {
            slot.attached = true;
        }
    }

    /// Make `devices()` fail until turned off again
    pub fn fail_enumeration(&self, fail: bool) {
        self.lock().fail_enumeration = fail;
    }

    /// Queue another bulk read result on an attached device
    pub fn push_read(&self, id: usize, result: rusb::Result<Vec<u8>>) {
        if let Some(slot) = self.lock().slots.get_mut(id) {
            slot.device.reads.push_back(result);
        }
    }

    pub fn counters(&self) -> FakeCounters {
        self.lock().counters
    }

    /// Whether the library currently holds the device open
    pub fn is_in_use(&self, id: usize) -> bool {
        self.lock().in_use.contains(&id)
    }

    /// Payloads of every successful bulk write to the device
    pub fn written(&self, id: usize) -> Vec<Vec<u8>> {
        self.lock()
            .slots
            .get(id)
            .map(|slot| slot.written.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<BusState>) -> MutexGuard<'_, BusState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Enumerated device on a [`FakeBus`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeDeviceRef(usize);

/// Open handle on a [`FakeBus`]; dropping it counts as a native close
#[derive(Debug)]
pub struct FakeHandle {
    id: usize,
    state: Arc<Mutex<BusState>>,
}

impl FakeHandle {
    fn with_slot<R>(&self, f: impl FnOnce(&mut Slot, &mut FakeCounters) -> R) -> rusb::Result<R> {
        let mut state = lock_state(&self.state);
        let state = &mut *state;
        let slot = state.slots.get_mut(self.id).ok_or(rusb::Error::NoDevice)?;
        Ok(f(slot, &mut state.counters))
    }
}

impl Backend for FakeBus {
    type Device = FakeDeviceRef;
    type Handle = FakeHandle;

    fn devices(&self) -> rusb::Result<Vec<FakeDeviceRef>> {
        let mut state = self.lock();
        state.counters.enumerations += 1;
        if state.fail_enumeration {
            return Err(rusb::Error::NoMem);
        }

        Ok(state
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.attached)
            .map(|(id, _)| FakeDeviceRef(id))
            .collect())
    }

    fn descriptor(&self, device: &FakeDeviceRef) -> rusb::Result<RawDescriptor> {
        let state = self.lock();
        let slot = state.slots.get(device.0).ok_or(rusb::Error::NoDevice)?;
        if let Some(err) = slot.device.descriptor_error {
            return Err(err);
        }

        Ok(RawDescriptor {
            vendor_id: slot.device.vendor_id,
            product_id: slot.device.product_id,
            product_string_index: slot.device.product.as_ref().map(|_| PRODUCT_STRING_INDEX),
        })
    }

    fn open(&self, device: &FakeDeviceRef) -> rusb::Result<FakeHandle> {
        let mut state = self.lock();
        state.counters.opens += 1;

        let slot = state.slots.get(device.0).ok_or(rusb::Error::NoDevice)?;
        if !slot.attached {
            return Err(rusb::Error::NoDevice);
        }
        if let Some(err) = slot.device.open_error {
            return Err(err);
        }
        if !state.in_use.insert(device.0) {
            return Err(rusb::Error::NotSupported);
        }

        Ok(FakeHandle {
            id: device.0,
            state: Arc::clone(&self.state),
        })
    }
}

impl NativeHandle for FakeHandle {
    fn product_string(&self, index: u8) -> rusb::Result<String> {
        if index != PRODUCT_STRING_INDEX {
            return Err(rusb::Error::InvalidParam);
        }
        self.with_slot(|slot, _| match slot.device.string_error {
            Some(err) => Err(err),
            None => slot.device.product.clone().ok_or(rusb::Error::InvalidParam),
        })?
    }

    fn kernel_driver_active(&self, _interface: u8) -> rusb::Result<bool> {
        self.with_slot(|slot, _| slot.device.kernel_driver)
    }

    fn detach_kernel_driver(&mut self, _interface: u8) -> rusb::Result<()> {
        self.with_slot(|slot, _| match slot.device.detach_error {
            Some(err) => Err(err),
            None => {
                slot.device.kernel_driver = false;
                Ok(())
            }
        })?
    }

    fn claim(&mut self, _interface: u8) -> rusb::Result<()> {
        self.with_slot(|slot, counters| {
            counters.claims += 1;
            slot.device.claim_error.map_or(Ok(()), Err)
        })?
    }

    fn release(&mut self, _interface: u8) -> rusb::Result<()> {
        self.with_slot(|_, counters| counters.releases += 1)
    }

    fn bulk_in(&self, _endpoint: u8, buf: &mut [u8], _timeout: Duration) -> rusb::Result<usize> {
        self.with_slot(|slot, counters| {
            counters.transfers += 1;
            if !slot.attached {
                return Err(rusb::Error::NoDevice);
            }
            match slot.device.reads.pop_front() {
                Some(Ok(data)) => {
                    let len = data.len().min(buf.len());
                    buf[..len].copy_from_slice(&data[..len]);
                    Ok(len)
                }
                Some(Err(err)) => Err(err),
                None => Err(rusb::Error::Timeout),
            }
        })?
    }

    fn bulk_out(&self, _endpoint: u8, buf: &[u8], _timeout: Duration) -> rusb::Result<usize> {
        self.with_slot(|slot, counters| {
            counters.transfers += 1;
            if !slot.attached {
                return Err(rusb::Error::NoDevice);
            }
            if let Some(err) = slot.device.write_error {
                return Err(err);
            }
            slot.written.push(buf.to_vec());
            Ok(buf.len())
        })?
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        let mut state = lock_state(&self.state);
        state.counters.closes += 1;
        state.in_use.remove(&self.id);
    }
}
