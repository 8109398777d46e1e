//! USB session context
//!
//! A [`Context`] owns the native library session. It is read-only after
//! construction and cheap to clone; every scan, open and hotplug listener
//! borrows the session through it. Native handles keep the session alive on
//! their own, so a context may be dropped before the devices opened from it.

use crate::backend::{Backend, RusbBackend};
use common::Error;
use std::sync::Arc;
use tracing::debug;

/// Shared handle to a USB backend session
pub struct Context<B: Backend = RusbBackend> {
    backend: Arc<B>,
}

impl Context<RusbBackend> {
    /// Start a libusb session
    ///
    /// Failure is fatal and is not retried.
    pub fn new() -> common::Result<Self> {
        let backend = RusbBackend::new().map_err(Error::Init)?;
        debug!("libusb context initialized");
        Ok(Self::with_backend(backend))
    }
}

impl<B: Backend> Context<B> {
    /// Build a context around an already initialized backend
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: Backend> Clone for Context<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: Backend> std::fmt::Debug for Context<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("backend", &std::any::type_name::<B>())
            .finish()
    }
}
