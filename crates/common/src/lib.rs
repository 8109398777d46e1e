//! Common utilities for usb-hotplug
//!
//! This crate provides the pieces shared between the `usbkit` library and the
//! `usb-hotplug` CLI: the error type and process-wide logging setup.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
pub use logging::{LogLevel, set_log_level, set_logging_enabled, setup_logging};
