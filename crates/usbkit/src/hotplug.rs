//! Polling hotplug detection
//!
//! [`HotplugListener`] re-scans the bus at most once per interval and hands
//! newly usable devices to a single registered callback. It has no thread of
//! its own: call [`HotplugListener::tick`] from a loop, or wrap it in an
//! [`AsyncHotplugListener`](crate::AsyncHotplugListener).
//!
//! # Modes
//!
//! - **Discovery** ([`HotplugListener::register_callback`]): each scan is
//!   diffed against the previous one by vendor/product id. The callback runs
//!   once per id that was not in the previous scan. The stored snapshot is
//!   replaced by the new scan every time, so a device missed by a single scan
//!   is reported again when it reappears.
//! - **Filtered** ([`HotplugListener::register_filtered_callback`]): every
//!   scan opens whatever matching device is available and reports it, with
//!   no history. A device whose handle is dropped becomes available again and
//!   **is reported again on the next scan**. Keep every handle you receive
//!   alive to get exactly one report per physical device.

use crate::backend::{Backend, RusbBackend};
use crate::context::Context;
use crate::device::DeviceHandle;
use crate::device_info::{DeviceInfo, DeviceState};
use crate::scanner::{find_first_device, scan_devices};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default time between two bus scans (1 second)
pub const DEFAULT_RESCAN_INTERVAL: Duration = Duration::from_millis(1000);

/// Callback receiving each reported device
pub type HotplugCallback<B = RusbBackend> = Box<dyn FnMut(DeviceHandle<B>) + Send>;

/// The single active registration
struct Subscription<B: Backend> {
    /// `(vendor_id, product_id)` in filtered mode
    filter: Option<(u16, u16)>,
    callback: HotplugCallback<B>,
}

/// Interval-gated bus scanner with one callback slot
pub struct HotplugListener<B: Backend = RusbBackend> {
    context: Context<B>,
    interval: Duration,
    last_scan: Option<Instant>,
    known_devices: Vec<DeviceInfo>,
    subscription: Option<Subscription<B>>,
}

impl<B: Backend> HotplugListener<B> {
    pub fn new(context: Context<B>) -> Self {
        Self::with_interval(context, DEFAULT_RESCAN_INTERVAL)
    }

    pub fn with_interval(context: Context<B>, interval: Duration) -> Self {
        Self {
            context,
            interval,
            last_scan: None,
            known_devices: Vec::new(),
            subscription: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Report every newly appeared device, whatever its ids
    ///
    /// Replaces any previous registration.
    pub fn register_callback<F>(&mut self, callback: F)
    where
        F: FnMut(DeviceHandle<B>) + Send + 'static,
    {
        self.subscription = Some(Subscription {
            filter: None,
            callback: Box::new(callback),
        });
        debug!("Registered hotplug callback (discovery mode)");
    }

    /// Report every available device with these ids on every scan
    ///
    /// Replaces any previous registration. See the module docs: a device is
    /// reported again on each scan unless its handle is kept alive.
    pub fn register_filtered_callback<F>(&mut self, vendor_id: u16, product_id: u16, callback: F)
    where
        F: FnMut(DeviceHandle<B>) + Send + 'static,
    {
        self.subscription = Some(Subscription {
            filter: Some((vendor_id, product_id)),
            callback: Box::new(callback),
        });
        debug!(
            "Registered hotplug callback for 0x{:04X}/0x{:04X}",
            vendor_id, product_id
        );
    }

    /// Drop the registration; further ticks touch nothing
    pub fn clear_callback(&mut self) {
        self.subscription = None;
    }

    pub fn has_callback(&self) -> bool {
        self.subscription.is_some()
    }

    /// Devices seen by the most recent discovery-mode scan
    pub fn known_devices(&self) -> &[DeviceInfo] {
        &self.known_devices
    }

    /// Scan if the interval has elapsed since the last scan
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// [`tick`](Self::tick) against an explicit clock reading
    ///
    /// The interval gate is checked first. When it passes the scan time is
    /// reset even if no callback is registered, but the bus is only touched
    /// when there is one.
    pub fn tick_at(&mut self, now: Instant) {
        if let Some(last) = self.last_scan
            && now.saturating_duration_since(last) < self.interval
        {
            return;
        }
        self.last_scan = Some(now);

        if self.subscription.is_some() {
            self.scan();
        }
    }

    /// Scan and report right away, ignoring the interval
    pub fn scan_once(&mut self) {
        self.last_scan = Some(Instant::now());
        self.scan();
    }

    fn scan(&mut self) {
        let Some(subscription) = self.subscription.as_mut() else {
            return;
        };

        let scanned = scan_devices(&self.context);

        match subscription.filter {
            Some((vendor_id, product_id)) => {
                let available = scanned
                    .iter()
                    .filter(|d| {
                        d.matches(vendor_id, product_id)
                            && d.state != DeviceState::InUseOrUnsupported
                    })
                    .count();

                // Held until the pass ends so each iteration opens a different
                // physical device even if the callback drops its handle.
                let mut held = Vec::with_capacity(available);
                for _ in 0..available {
                    let Some(device) = find_first_device(vendor_id, product_id, &self.context)
                    else {
                        break;
                    };
                    info!("Hotplug: {}", device.info());
                    held.push(device.clone());
                    (subscription.callback)(device);
                }
            }
            None => {
                let mut reported: Vec<&DeviceInfo> = Vec::new();
                for candidate in &scanned {
                    if self.known_devices.contains(candidate)
                        || reported.contains(&candidate)
                        || candidate.state == DeviceState::InUseOrUnsupported
                    {
                        continue;
                    }
                    reported.push(candidate);

                    if let Some(device) = find_first_device(
                        candidate.vendor_id,
                        candidate.product_id,
                        &self.context,
                    ) {
                        info!("Hotplug: new device {}", device.info());
                        (subscription.callback)(device);
                    }
                }
                self.known_devices = scanned;
            }
        }
    }
}

impl<B: Backend> std::fmt::Debug for HotplugListener<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotplugListener")
            .field("interval", &self.interval)
            .field("last_scan", &self.last_scan)
            .field("known_devices", &self.known_devices.len())
            .field(
                "filter",
                &self.subscription.as_ref().and_then(|s| s.filter),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeBus, FakeDevice};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_first_tick_scans_immediately() {
        let bus = FakeBus::with_devices(vec![FakeDevice::new(0x1234, 0x0001)]);
        let mut listener = HotplugListener::new(Context::with_backend(bus.clone()));
        listener.register_callback(|_| {});

        listener.tick();
        assert_eq!(bus.counters().enumerations, 2); // scan + find_first
    }

    #[test]
    fn test_reregistering_replaces_callback() {
        let bus = FakeBus::with_devices(vec![FakeDevice::new(0x1234, 0x0001)]);
        let mut listener = HotplugListener::new(Context::with_backend(bus));

        let first = Arc::new(Mutex::new(0));
        let second = Arc::new(Mutex::new(0));
        let f = first.clone();
        listener.register_callback(move |_| *f.lock().unwrap() += 1);
        let s = second.clone();
        listener.register_callback(move |_| *s.lock().unwrap() += 1);

        listener.scan_once();
        assert_eq!(*first.lock().unwrap(), 0);
        assert_eq!(*second.lock().unwrap(), 1);
    }

    #[test]
    fn test_clear_callback_returns_to_idle() {
        let bus = FakeBus::with_devices(vec![FakeDevice::new(0x1234, 0x0001)]);
        let mut listener = HotplugListener::new(Context::with_backend(bus.clone()));
        listener.register_callback(|_| {});
        listener.clear_callback();

        assert!(!listener.has_callback());
        listener.tick();
        assert_eq!(bus.counters().enumerations, 0);
    }
}
