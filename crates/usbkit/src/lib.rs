//! usbkit
//!
//! A small convenience layer over libusb (via `rusb`):
//! - Bus scanning with per-device accessibility state
//! - Finding and opening devices by vendor/product id
//! - Shared device handles with deterministic close, interface claiming and
//!   blocking bulk transfers
//! - Polling hotplug detection, in the foreground or on a background thread
//!
//! # Example
//!
//! ```no_run
//! use usbkit::{Context, DeviceState, scan_devices};
//!
//! # fn main() -> common::Result<()> {
//! let context = Context::new()?;
//! for info in scan_devices(&context) {
//!     if info.state == DeviceState::Open {
//!         println!("{}", info);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod async_hotplug;
pub mod backend;
pub mod context;
pub mod device;
pub mod device_info;
pub mod hotplug;
pub mod scanner;
pub mod test_utils;

pub use async_hotplug::AsyncHotplugListener;
pub use backend::{Backend, NativeHandle, RawDescriptor, RusbBackend};
pub use context::Context;
pub use device::{DEFAULT_BUFFER_SIZE, DEFAULT_TIMEOUT, DeviceHandle, UsbDevice};
pub use device_info::{DeviceInfo, DeviceState, state_str};
pub use hotplug::{DEFAULT_RESCAN_INTERVAL, HotplugCallback, HotplugListener};
pub use scanner::{find_devices, find_first_device, find_valid_devices, scan_devices};
