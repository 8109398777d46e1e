//! Native USB capability
//!
//! Everything this crate needs from the host USB stack goes through the
//! [`Backend`] and [`NativeHandle`] traits. [`RusbBackend`] is the real
//! implementation on top of libusb; tests substitute
//! [`FakeBus`](crate::test_utils::FakeBus).
//!
//! Errors crossing this seam are plain [`rusb::Error`] values, whatever the
//! implementation.

use rusb::UsbContext;
use std::time::Duration;

/// The parts of a device descriptor the scanner reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub product_string_index: Option<u8>,
}

/// Enumeration and open capability of a USB host stack
pub trait Backend: Send + Sync + 'static {
    /// Reference to an enumerated (not necessarily opened) device
    type Device: Clone + Send;
    /// Open native handle. Dropping it closes the device.
    type Handle: NativeHandle;

    /// List every device currently attached, in enumeration order.
    fn devices(&self) -> rusb::Result<Vec<Self::Device>>;

    fn descriptor(&self, device: &Self::Device) -> rusb::Result<RawDescriptor>;

    fn open(&self, device: &Self::Device) -> rusb::Result<Self::Handle>;
}

/// Operations on an open native device handle
pub trait NativeHandle: Send + 'static {
    fn product_string(&self, index: u8) -> rusb::Result<String>;

    /// Whether a kernel driver is bound to `interface`.
    ///
    /// Platforms without kernel-driver semantics report
    /// [`rusb::Error::NotSupported`].
    fn kernel_driver_active(&self, interface: u8) -> rusb::Result<bool>;

    fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()>;

    fn claim(&mut self, interface: u8) -> rusb::Result<()>;

    fn release(&mut self, interface: u8) -> rusb::Result<()>;

    fn bulk_in(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize>;

    fn bulk_out(&self, endpoint: u8, buf: &[u8], timeout: Duration) -> rusb::Result<usize>;
}

/// libusb-backed implementation
#[derive(Debug, Clone)]
pub struct RusbBackend {
    context: rusb::Context,
}

impl RusbBackend {
    /// Start a new libusb session
    pub fn new() -> rusb::Result<Self> {
        Ok(Self {
            context: rusb::Context::new()?,
        })
    }

    pub fn context(&self) -> &rusb::Context {
        &self.context
    }
}

impl Backend for RusbBackend {
    type Device = rusb::Device<rusb::Context>;
    type Handle = rusb::DeviceHandle<rusb::Context>;

    fn devices(&self) -> rusb::Result<Vec<Self::Device>> {
        Ok(self.context.devices()?.iter().collect())
    }

    fn descriptor(&self, device: &Self::Device) -> rusb::Result<RawDescriptor> {
        let desc = device.device_descriptor()?;
        Ok(RawDescriptor {
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
            product_string_index: desc.product_string_index(),
        })
    }

    fn open(&self, device: &Self::Device) -> rusb::Result<Self::Handle> {
        device.open()
    }
}

impl NativeHandle for rusb::DeviceHandle<rusb::Context> {
    fn product_string(&self, index: u8) -> rusb::Result<String> {
        self.read_string_descriptor_ascii(index)
    }

    fn kernel_driver_active(&self, interface: u8) -> rusb::Result<bool> {
        rusb::DeviceHandle::kernel_driver_active(self, interface)
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()> {
        rusb::DeviceHandle::detach_kernel_driver(self, interface)
    }

    fn claim(&mut self, interface: u8) -> rusb::Result<()> {
        self.claim_interface(interface)
    }

    fn release(&mut self, interface: u8) -> rusb::Result<()> {
        self.release_interface(interface)
    }

    fn bulk_in(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize> {
        self.read_bulk(endpoint, buf, timeout)
    }

    fn bulk_out(&self, endpoint: u8, buf: &[u8], timeout: Duration) -> rusb::Result<usize> {
        self.write_bulk(endpoint, buf, timeout)
    }
}
