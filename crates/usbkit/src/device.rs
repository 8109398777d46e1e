//! Open USB device
//!
//! A [`UsbDevice`] exclusively owns one native handle and the interfaces
//! claimed through it. It is shared as a [`DeviceHandle`] (`Arc`); the native
//! handle is closed when the last clone is dropped or [`UsbDevice::close`] is
//! called, whichever comes first.
//!
//! Every operation takes the device's own lock, so reads, writes, claims and
//! close on one device are serialized while other devices stay independent.
//! Operational failures are logged and reported through the return value.

use crate::backend::{Backend, NativeHandle, RusbBackend};
use crate::device_info::{DeviceInfo, DeviceState};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Default buffer size for bulk reads (8 KiB)
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Default timeout for bulk transfers (1 second)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Shared, reference-counted device
pub type DeviceHandle<B = RusbBackend> = Arc<UsbDevice<B>>;

struct Inner<H> {
    handle: Option<H>,
    interfaces: Vec<u8>,
    open: bool,
}

impl<H: NativeHandle> Inner<H> {
    /// Release every claimed interface, then the native handle.
    ///
    /// Safe to call repeatedly: the handle is taken on the first call, so
    /// later calls find nothing to release.
    fn close(&mut self, info: &DeviceInfo) {
        self.open = false;

        let Some(mut handle) = self.handle.take() else {
            self.interfaces.clear();
            return;
        };

        for interface in self.interfaces.drain(..) {
            if let Err(e) = handle.release(interface) {
                warn!("Failed to release interface {} on {}: {}", interface, info, e);
            }
        }
        drop(handle);

        debug!("Closed device {}", info);
    }
}

/// USB device wrapper with its discovery-time info
pub struct UsbDevice<B: Backend = RusbBackend> {
    /// Captured when the device was found; not refreshed
    info: DeviceInfo,
    inner: Mutex<Inner<B::Handle>>,
}

impl<B: Backend> UsbDevice<B> {
    pub(crate) fn opened(info: DeviceInfo, handle: B::Handle) -> Self {
        Self {
            info,
            inner: Mutex::new(Inner {
                handle: Some(handle),
                interfaces: Vec::new(),
                open: true,
            }),
        }
    }

    /// A device that exists on the bus but could not be opened
    pub(crate) fn unavailable(info: DeviceInfo) -> Self {
        Self {
            info,
            inner: Mutex::new(Inner {
                handle: None,
                interfaces: Vec::new(),
                open: false,
            }),
        }
    }

    /// Device info as captured when the device was found
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Current state: the discovery state, or `Closed` once an open device
    /// has been closed
    pub fn state(&self) -> DeviceState {
        match self.info.state {
            DeviceState::Open if !self.is_open() => DeviceState::Closed,
            state => state,
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn claimed_interfaces(&self) -> Vec<u8> {
        self.lock().interfaces.clone()
    }

    /// Claim an interface, detaching a bound kernel driver first
    ///
    /// Returns false if the device is closed, the kernel driver could not be
    /// detached or the claim itself failed. A failed claim leaves the device
    /// open. Claiming the same interface twice claims it twice natively.
    pub fn claim_interface(&self, interface: u8) -> bool {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let open = inner.open;
        let Some(handle) = inner.handle.as_mut().filter(|_| open) else {
            warn!(
                "Cannot claim interface {} on {}: device is closed",
                interface, self.info
            );
            return false;
        };

        match handle.kernel_driver_active(interface) {
            Ok(true) => {
                debug!(
                    "Detaching kernel driver from interface {} on {}",
                    interface, self.info
                );
                if let Err(e) = handle.detach_kernel_driver(interface) {
                    warn!(
                        "Failed to detach kernel driver from interface {} on {}: {}",
                        interface, self.info, e
                    );
                    return false;
                }
            }
            Ok(false) => {}
            // No kernel-driver semantics on this platform
            Err(rusb::Error::NotSupported) => {}
            Err(e) => {
                debug!(
                    "Could not check kernel driver status for interface {}: {}",
                    interface, e
                );
            }
        }

        if let Err(e) = handle.claim(interface) {
            warn!("Failed to claim interface {} on {}: {}", interface, self.info, e);
            return false;
        }

        inner.interfaces.push(interface);
        debug!("Claimed interface {} on {}", interface, self.info);
        true
    }

    /// Blocking bulk IN transfer
    ///
    /// Returns up to `max_size` bytes, or an empty buffer on timeout or error.
    pub fn bulk_read(&self, endpoint: u8, max_size: usize, timeout: Duration) -> Vec<u8> {
        let mut guard = self.lock();

        let open = guard.open;
        let Some(handle) = guard.handle.as_ref().filter(|_| open) else {
            warn!(
                "Cannot read from endpoint {:#x} on {}: device is closed",
                endpoint, self.info
            );
            return Vec::new();
        };

        let mut buffer = vec![0u8; max_size];
        match handle.bulk_in(endpoint, &mut buffer, timeout) {
            Ok(len) => {
                trace!("Bulk read {} bytes from endpoint {:#x}", len, endpoint);
                buffer.truncate(len);
                buffer
            }
            Err(e) => {
                self.transfer_failed(&mut guard, "read", endpoint, e);
                Vec::new()
            }
        }
    }

    /// Blocking bulk OUT transfer
    ///
    /// Accepts anything byte-like (`&[u8]`, `Vec<u8>`, `&str`, `String`).
    /// Returns the number of bytes transferred, or 0 on timeout or error.
    pub fn bulk_write(&self, data: impl AsRef<[u8]>, endpoint: u8, timeout: Duration) -> usize {
        let data = data.as_ref();
        let mut guard = self.lock();

        let open = guard.open;
        let Some(handle) = guard.handle.as_ref().filter(|_| open) else {
            warn!(
                "Cannot write to endpoint {:#x} on {}: device is closed",
                endpoint, self.info
            );
            return 0;
        };

        match handle.bulk_out(endpoint, data, timeout) {
            Ok(len) => {
                trace!("Bulk wrote {}/{} bytes to endpoint {:#x}", len, data.len(), endpoint);
                len
            }
            Err(e) => {
                self.transfer_failed(&mut guard, "write", endpoint, e);
                0
            }
        }
    }

    /// Release all interfaces and close the native handle
    pub fn close(&self) {
        self.lock().close(&self.info);
    }

    /// A timeout is not an error. An I/O failure means the device is gone, so
    /// the handle is closed for good.
    fn transfer_failed(
        &self,
        inner: &mut Inner<B::Handle>,
        direction: &str,
        endpoint: u8,
        err: rusb::Error,
    ) {
        match err {
            rusb::Error::Timeout => {
                debug!("Bulk {} on endpoint {:#x} timed out", direction, endpoint);
            }
            rusb::Error::Io | rusb::Error::NoDevice => {
                warn!(
                    "Bulk {} on endpoint {:#x} failed: {}; closing {} (device presumed disconnected)",
                    direction, endpoint, err, self.info
                );
                inner.close(&self.info);
            }
            _ => {
                warn!("Bulk {} on endpoint {:#x} failed: {}", direction, endpoint, err);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<B::Handle>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<B: Backend> Drop for UsbDevice<B> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        inner.close(&self.info);
    }
}

impl<B: Backend> std::fmt::Debug for UsbDevice<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbDevice")
            .field("info", &self.info)
            .field("open", &self.is_open())
            .finish()
    }
}
