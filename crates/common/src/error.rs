//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The native USB session could not be started. Not retried.
    #[error("libusb could not be initialized: {0}")]
    Init(rusb::Error),

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_error_message() {
        let err = Error::Init(rusb::Error::NoMem);
        assert!(err.to_string().starts_with("libusb could not be initialized"));
    }

    #[test]
    fn test_usb_error_from() {
        let err: Error = rusb::Error::Access.into();
        assert!(matches!(err, Error::Usb(rusb::Error::Access)));
    }
}
