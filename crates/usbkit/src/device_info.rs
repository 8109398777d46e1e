//! Device identity and accessibility state

use std::fmt;
use std::hash::{Hash, Hasher};

/// Accessibility of a device as observed when it was scanned or opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    /// Known but not currently held open
    Closed,
    /// Open failed with "not supported": the device is held by someone else,
    /// or no libusb-compatible driver is bound to it
    InUseOrUnsupported,
    /// Open failed with "not found": the bound driver is not usable
    InvalidDriver,
    /// Any other open failure
    OtherError,
    Open,
}

impl DeviceState {
    /// Name used in logs and CLI output
    ///
    /// `OtherError` prints as `INVALID_STATE`; downstream tooling parses these
    /// strings, so they must not change.
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceState::Closed => "CLOSED",
            DeviceState::InUseOrUnsupported => "IN_USE_OR_UNSUPPORTED",
            DeviceState::InvalidDriver => "INVALID_DRIVER",
            DeviceState::Open => "OPEN",
            DeviceState::OtherError => "INVALID_STATE",
        }
    }

    /// Classify a native open failure
    pub fn from_open_error(err: rusb::Error) -> Self {
        match err {
            rusb::Error::NotSupported => DeviceState::InUseOrUnsupported,
            rusb::Error::NotFound => DeviceState::InvalidDriver,
            _ => DeviceState::OtherError,
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-function form of [`DeviceState::as_str`]
pub fn state_str(state: DeviceState) -> &'static str {
    state.as_str()
}

/// A device at a bus position
///
/// Two `DeviceInfo` values are equal when their vendor and product ids match;
/// description and state are ignored. Hotplug diffing relies on this so that
/// a device changing state is not reported again. The flip side is that two
/// physical devices with the same ids cannot be told apart by identity.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub description: String,
    pub state: DeviceState,
}

impl DeviceInfo {
    pub fn new(vendor_id: u16, product_id: u16, description: impl Into<String>, state: DeviceState) -> Self {
        Self {
            vendor_id,
            product_id,
            description: description.into(),
            state,
        }
    }

    /// Entry for a device that could not be opened
    pub fn unavailable(vendor_id: u16, product_id: u16, state: DeviceState) -> Self {
        Self::new(vendor_id, product_id, String::new(), state)
    }

    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl PartialEq for DeviceInfo {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other.vendor_id, other.product_id)
    }
}

impl Eq for DeviceInfo {}

impl Hash for DeviceInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.vendor_id.hash(state);
        self.product_id.hash(state);
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.state == DeviceState::Open {
            write!(
                f,
                "0x{:04X}/0x{:04X} -> {}",
                self.vendor_id, self.product_id, self.description
            )
        } else {
            write!(
                f,
                "0x{:04X}/0x{:04X} ({})",
                self.vendor_id, self.product_id, self.state
            )
        }
    }
}
