//! Bus scanning
//!
//! The scanner is the single source of truth for what is on the bus right
//! now. [`scan_devices`] probes every device and closes it again;
//! [`find_devices`] and friends open the devices matching a vendor/product id
//! and hand them out as [`DeviceHandle`]s.
//!
//! Enumerating and opening devices is not safe to run concurrently inside the
//! native library, so every function here holds one process-wide lock for the
//! whole enumerate/open/read/close sequence.

use crate::backend::{Backend, NativeHandle, RawDescriptor};
use crate::context::Context;
use crate::device::{DeviceHandle, UsbDevice};
use crate::device_info::{DeviceInfo, DeviceState};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

static SCAN_LOCK: Mutex<()> = Mutex::new(());

fn scan_lock() -> MutexGuard<'static, ()> {
    SCAN_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Enumerate the bus, or log and return nothing if the list is unavailable
fn enumerate<B: Backend>(context: &Context<B>) -> Vec<(B::Device, RawDescriptor)> {
    let devices = match context.backend().devices() {
        Ok(devices) => devices,
        Err(e) => {
            error!("Failed to retrieve USB device list: {}", e);
            return Vec::new();
        }
    };

    devices
        .into_iter()
        .filter_map(|device| match context.backend().descriptor(&device) {
            Ok(descriptor) => Some((device, descriptor)),
            Err(e) => {
                warn!("Failed to read device descriptor, skipping device: {}", e);
                None
            }
        })
        .collect()
}

fn read_product<H: NativeHandle>(
    handle: &H,
    descriptor: &RawDescriptor,
) -> rusb::Result<String> {
    match descriptor.product_string_index {
        Some(index) => handle.product_string(index),
        None => Ok(String::new()),
    }
}

/// List every device on the bus with its accessibility state
///
/// Each device is opened just long enough to read its product string and is
/// closed again before the next one is probed. Devices that cannot be opened
/// are still listed, with an empty description and the reason as state, so
/// callers can point the user at a driver problem. Results keep enumeration
/// order.
pub fn scan_devices<B: Backend>(context: &Context<B>) -> Vec<DeviceInfo> {
    let _guard = scan_lock();

    let mut found = Vec::new();
    for (device, descriptor) in enumerate(context) {
        let RawDescriptor {
            vendor_id,
            product_id,
            ..
        } = descriptor;

        match context.backend().open(&device) {
            Ok(handle) => match read_product(&handle, &descriptor) {
                Ok(description) => {
                    found.push(DeviceInfo::new(
                        vendor_id,
                        product_id,
                        description,
                        DeviceState::Open,
                    ));
                }
                Err(e) => {
                    warn!(
                        "Failed to read product string of 0x{:04X}/0x{:04X}, skipping device: {}",
                        vendor_id, product_id, e
                    );
                }
            },
            Err(e) => {
                let state = DeviceState::from_open_error(e);
                debug!(
                    "Could not open 0x{:04X}/0x{:04X}: {} ({})",
                    vendor_id, product_id, e, state
                );
                found.push(DeviceInfo::unavailable(vendor_id, product_id, state));
            }
        }
    }

    debug!("Scanned {} devices", found.len());
    found
}

/// Open every device matching the ids
///
/// Devices that fail to open are included too, closed and carrying the
/// failure state, so "present but unusable" can be told apart from "absent".
/// Every returned handle that is open stays open until it is dropped.
pub fn find_devices<B: Backend>(
    vendor_id: u16,
    product_id: u16,
    context: &Context<B>,
) -> Vec<DeviceHandle<B>> {
    let _guard = scan_lock();

    let devices: Vec<DeviceHandle<B>> = enumerate(context)
        .into_iter()
        .filter(|(_, d)| d.vendor_id == vendor_id && d.product_id == product_id)
        .map(|(device, descriptor)| Arc::new(open_device(context, &device, &descriptor)))
        .collect();

    debug!(
        "Found {} devices matching 0x{:04X}/0x{:04X}",
        devices.len(),
        vendor_id,
        product_id
    );
    devices
}

/// Like [`find_devices`], keeping only the devices that actually opened
pub fn find_valid_devices<B: Backend>(
    vendor_id: u16,
    product_id: u16,
    context: &Context<B>,
) -> Vec<DeviceHandle<B>> {
    find_devices(vendor_id, product_id, context)
        .into_iter()
        .filter(|device| device.is_open())
        .collect()
}

/// Open the first matching device that is available
///
/// Handles that are kept alive stay claimed, so with several identical
/// devices attached each call opens the next one until none is left.
pub fn find_first_device<B: Backend>(
    vendor_id: u16,
    product_id: u16,
    context: &Context<B>,
) -> Option<DeviceHandle<B>> {
    let _guard = scan_lock();

    for (device, descriptor) in enumerate(context) {
        if descriptor.vendor_id != vendor_id || descriptor.product_id != product_id {
            continue;
        }

        let opened = open_device(context, &device, &descriptor);
        if opened.is_open() {
            info!("Opened {}", opened.info());
            return Some(Arc::new(opened));
        }
    }

    debug!(
        "No usable device matching 0x{:04X}/0x{:04X}",
        vendor_id, product_id
    );
    None
}

/// Open one device and keep it open; on failure return a closed entry
/// carrying the reason
fn open_device<B: Backend>(
    context: &Context<B>,
    device: &B::Device,
    descriptor: &RawDescriptor,
) -> UsbDevice<B> {
    let (vendor_id, product_id) = (descriptor.vendor_id, descriptor.product_id);

    match context.backend().open(device) {
        Ok(handle) => {
            let description = read_product(&handle, descriptor).unwrap_or_else(|e| {
                warn!(
                    "Failed to read product string of 0x{:04X}/0x{:04X}: {}",
                    vendor_id, product_id, e
                );
                String::new()
            });
            let info = DeviceInfo::new(vendor_id, product_id, description, DeviceState::Open);
            UsbDevice::opened(info, handle)
        }
        Err(e) => {
            let state = DeviceState::from_open_error(e);
            debug!(
                "Could not open 0x{:04X}/0x{:04X}: {} ({})",
                vendor_id, product_id, e, state
            );
            UsbDevice::unavailable(DeviceInfo::unavailable(vendor_id, product_id, state))
        }
    }
}
