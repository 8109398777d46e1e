//! Background hotplug loop
//!
//! [`AsyncHotplugListener`] drives a [`HotplugListener`] from a dedicated
//! thread. The thread ticks the listener, then sleeps for a fraction of the
//! rescan interval, until a stop is requested.

use crate::backend::{Backend, RusbBackend};
use crate::context::Context;
use crate::device::DeviceHandle;
use crate::hotplug::HotplugListener;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info};

/// The loop sleeps `interval / POLL_DIVISOR` between ticks
const POLL_DIVISOR: u32 = 10;

/// Lower bound on the loop sleep
const MIN_POLL_SLEEP: Duration = Duration::from_millis(1);

/// Hotplug listener running on its own thread
pub struct AsyncHotplugListener<B: Backend = RusbBackend> {
    listener: Arc<Mutex<HotplugListener<B>>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl<B: Backend> AsyncHotplugListener<B> {
    pub fn new(context: Context<B>) -> Self {
        Self::from_listener(HotplugListener::new(context))
    }

    pub fn with_interval(context: Context<B>, interval: Duration) -> Self {
        Self::from_listener(HotplugListener::with_interval(context, interval))
    }

    pub fn from_listener(listener: HotplugListener<B>) -> Self {
        Self {
            listener: Arc::new(Mutex::new(listener)),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// See [`HotplugListener::register_callback`]
    pub fn register_callback<F>(&self, callback: F)
    where
        F: FnMut(DeviceHandle<B>) + Send + 'static,
    {
        self.listener().register_callback(callback);
    }

    /// See [`HotplugListener::register_filtered_callback`]
    pub fn register_filtered_callback<F>(&self, vendor_id: u16, product_id: u16, callback: F)
    where
        F: FnMut(DeviceHandle<B>) + Send + 'static,
    {
        self.listener()
            .register_filtered_callback(vendor_id, product_id, callback);
    }

    pub fn clear_callback(&self) {
        self.listener().clear_callback();
    }

    /// Tick once on the calling thread
    pub fn tick(&self) {
        self.listener().tick();
    }

    /// Scan right away on the calling thread, ignoring the interval
    pub fn scan_once(&self) {
        self.listener().scan_once();
    }

    /// Run `f` with the wrapped listener locked
    pub fn with_listener<R>(&self, f: impl FnOnce(&mut HotplugListener<B>) -> R) -> R {
        f(&mut self.listener())
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
            && self.running.load(Ordering::Acquire)
    }

    /// Start the background loop
    ///
    /// Does nothing if the loop is already running. A panic raised by the
    /// callback is logged and the loop keeps scanning.
    pub fn run_async(&mut self) {
        if self.thread.is_some() {
            debug!("Hotplug loop already running");
            return;
        }

        let listener = Arc::clone(&self.listener);
        let running = Arc::clone(&self.running);
        let sleep = (self.listener().interval() / POLL_DIVISOR).max(MIN_POLL_SLEEP);

        running.store(true, Ordering::Release);
        let spawned = std::thread::Builder::new()
            .name("usb-hotplug".to_string())
            .spawn(move || {
                info!("Hotplug loop started");
                while running.load(Ordering::Acquire) {
                    let ticked = panic::catch_unwind(AssertUnwindSafe(|| {
                        listener
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .tick();
                    }));
                    if ticked.is_err() {
                        error!("Hotplug callback panicked, continuing to scan");
                    }
                    std::thread::sleep(sleep);
                }
                info!("Hotplug loop stopped");
            });

        match spawned {
            Ok(handle) => self.thread = Some(handle),
            Err(e) => {
                self.running.store(false, Ordering::Release);
                error!("Failed to spawn hotplug thread: {}", e);
            }
        }
    }

    /// Stop the background loop and wait for it to exit
    ///
    /// Once this returns the callback will not be invoked again by the loop.
    pub fn stop_async(&mut self) {
        self.running.store(false, Ordering::Release);

        if let Some(handle) = self.thread.take()
            && handle.join().is_err()
        {
            error!("Hotplug thread panicked");
        }
    }

    fn listener(&self) -> MutexGuard<'_, HotplugListener<B>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<B: Backend> Drop for AsyncHotplugListener<B> {
    fn drop(&mut self) {
        self.stop_async();
    }
}
