//! usb-hotplug
//!
//! Command line front end for the usbkit library: list the devices on the
//! bus, open devices by id, watch for newly plugged devices and run a quick
//! bulk transfer against a device.

mod config;

use anyhow::{Context as _, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use common::{set_logging_enabled, setup_logging};
use config::{CliConfig, TransferSettings, parse_usb_id};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use usbkit::{
    AsyncHotplugListener, Context, DeviceHandle, DeviceInfo, DeviceState, find_devices,
    find_first_device, find_valid_devices, scan_devices,
};

#[derive(Parser, Debug)]
#[command(name = "usb-hotplug")]
#[command(author, version, about = "Scan, open and watch USB devices")]
#[command(long_about = "
Scan, open and watch USB devices through libusb.

EXAMPLES:
    # List every device and whether it can be opened
    usb-hotplug scan

    # Open every 0x1209/0x0D32 device that is usable
    usb-hotplug find --vid 0x1209 --pid 0x0d32 --valid

    # Report devices as they are plugged in
    usb-hotplug watch

    # Keep one handle per matching device, reporting each once
    usb-hotplug watch --vid 0x1209 --pid 0x0d32

    # Claim interface 2, send a line and read the reply
    usb-hotplug transfer --vid 0x1209 --pid 0x0d32 --interface 2 --write 'r vbus_voltage\\n'

CONFIGURATION:
    The configuration file is looked up in the following order:
    1. Path specified with --config
    2. ~/.config/usb-hotplug/config.toml
    3. /etc/usb-hotplug/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Disable log output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every device on the bus with its state (default)
    Scan,

    /// Open the devices matching a vendor/product id
    Find {
        #[arg(long, value_parser = parse_usb_id)]
        vid: u16,
        #[arg(long, value_parser = parse_usb_id)]
        pid: u16,
        /// Only list devices that could be opened
        #[arg(long, conflicts_with = "first")]
        valid: bool,
        /// Open only the first usable device
        #[arg(long)]
        first: bool,
    },

    /// Report devices as they appear, until Ctrl+C
    Watch {
        #[arg(long, value_parser = parse_usb_id, requires = "pid")]
        vid: Option<u16>,
        #[arg(long, value_parser = parse_usb_id, requires = "vid")]
        pid: Option<u16>,
        /// Rescan interval in milliseconds
        #[arg(long, value_name = "MS")]
        interval_ms: Option<u64>,
    },

    /// Claim an interface, optionally write, then read once
    Transfer {
        #[arg(long, value_parser = parse_usb_id)]
        vid: u16,
        #[arg(long, value_parser = parse_usb_id)]
        pid: u16,
        #[arg(long, default_value_t = 0)]
        interface: u8,
        #[arg(long, default_value = "0x81", value_parser = parse_endpoint)]
        endpoint_in: u8,
        #[arg(long, default_value = "0x01", value_parser = parse_endpoint)]
        endpoint_out: u8,
        /// Text to send before reading
        #[arg(long)]
        write: Option<String>,
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
        #[arg(long, value_name = "BYTES")]
        buffer_size: Option<usize>,
    },
}

fn parse_endpoint(s: &str) -> Result<u8> {
    let id = parse_usb_id(s)?;
    u8::try_from(id).map_err(|_| anyhow!("Endpoint address '{}' does not fit in a byte", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = CliConfig::default();
        let path = CliConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        CliConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        CliConfig::load_or_default()
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    setup_logging(log_level).context("Failed to setup logging")?;
    if args.quiet {
        set_logging_enabled(false).context("Failed to disable logging")?;
    }

    info!("usb-hotplug v{}", env!("CARGO_PKG_VERSION"));

    let context = Context::new().context("Failed to initialize USB context")?;

    match args.command.unwrap_or(Command::Scan) {
        Command::Scan => run_blocking(move || scan_mode(&context)).await,
        Command::Find {
            vid,
            pid,
            valid,
            first,
        } => run_blocking(move || find_mode(&context, vid, pid, valid, first)).await,
        Command::Watch {
            vid,
            pid,
            interval_ms,
        } => {
            let interval = interval_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.hotplug.interval());
            if interval.is_zero() {
                bail!("Rescan interval must be greater than 0");
            }
            watch_mode(context, vid.zip(pid), interval).await
        }
        Command::Transfer {
            vid,
            pid,
            interface,
            endpoint_in,
            endpoint_out,
            write,
            timeout_ms,
            buffer_size,
        } => {
            let settings = TransferSettings {
                buffer_size: buffer_size.unwrap_or(config.transfer.buffer_size),
                timeout_ms: timeout_ms.unwrap_or(config.transfer.timeout_ms),
            };
            run_blocking(move || {
                transfer_mode(
                    &context,
                    (vid, pid),
                    interface,
                    (endpoint_in, endpoint_out),
                    write,
                    &settings,
                )
            })
            .await
        }
    }
}

/// USB calls block; keep them off the async runtime
async fn run_blocking<F>(f: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("USB task panicked")?
}

/// List every device and its state
fn scan_mode(context: &Context) -> Result<()> {
    println!("Searching for devices...");

    let devices = scan_devices(context);
    println!("{} devices found", devices.len());
    for device in &devices {
        println!(" -- {}", device);
    }

    if devices
        .iter()
        .any(|d| d.state == DeviceState::InvalidDriver)
    {
        println!();
        println!(
            "Devices marked {} are bound to a driver libusb cannot use.",
            DeviceState::InvalidDriver
        );
        println!("On Windows, a driver replacement utility such as Zadig can switch them to WinUSB.");
    }

    Ok(())
}

/// Open the devices matching the ids and report their state
fn find_mode(context: &Context, vid: u16, pid: u16, valid: bool, first: bool) -> Result<()> {
    println!("Looking for devices 0x{:04X}/0x{:04X}", vid, pid);

    if first {
        match find_first_device(vid, pid, context) {
            Some(device) => println!("Device state: {}", device.state()),
            None => println!("No device found"),
        }
        return Ok(());
    }

    let devices = if valid {
        find_valid_devices(vid, pid, context)
    } else {
        find_devices(vid, pid, context)
    };

    println!("{} devices found", devices.len());
    for device in &devices {
        println!("Device state: {}", device.state());
    }

    // Handles close here as `devices` goes out of scope
    Ok(())
}

/// Run the background listener until Ctrl+C
async fn watch_mode(context: Context, filter: Option<(u16, u16)>, interval: Duration) -> Result<()> {
    let (tx, rx) = async_channel::unbounded::<DeviceInfo>();
    let mut listener = AsyncHotplugListener::with_interval(context, interval);

    match filter {
        Some((vid, pid)) => {
            // Dropping a handle would get the device reported again on the
            // next scan, so hold on to every one we are given
            let mut held: Vec<DeviceHandle> = Vec::new();
            listener.register_filtered_callback(vid, pid, move |device| {
                held.retain(|d| d.is_open());
                if let Err(e) = tx.send_blocking(device.info().clone()) {
                    error!("Failed to forward hotplug event: {}", e);
                }
                held.push(device);
            });
            println!("Watching for 0x{:04X}/0x{:04X} devices", vid, pid);
        }
        None => {
            listener.register_callback(move |device| {
                if let Err(e) = tx.send_blocking(device.info().clone()) {
                    error!("Failed to forward hotplug event: {}", e);
                }
            });
            println!("Watching for new devices");
        }
    }

    listener.run_async();
    println!("Press Ctrl+C to stop");

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(info) => println!(" ++ {}", info),
                Err(_) => break,
            },
            result = signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Received Ctrl+C, stopping"),
                    Err(e) => error!("Error waiting for Ctrl+C: {}", e),
                }
                break;
            }
        }
    }

    // Joins the listener thread, which may be in the middle of a scan
    tokio::task::spawn_blocking(move || listener.stop_async())
        .await
        .context("Failed to stop hotplug listener")?;

    info!("Hotplug listener stopped");
    Ok(())
}

/// Claim an interface, optionally write a string, then read one reply
fn transfer_mode(
    context: &Context,
    (vid, pid): (u16, u16),
    interface: u8,
    (endpoint_in, endpoint_out): (u8, u8),
    write: Option<String>,
    settings: &TransferSettings,
) -> Result<()> {
    let device = find_first_device(vid, pid, context)
        .ok_or_else(|| anyhow!("No usable device 0x{:04X}/0x{:04X} found", vid, pid))?;
    println!("Opened {}", device.info());

    if !device.claim_interface(interface) {
        bail!("Failed to claim interface {}", interface);
    }

    if let Some(data) = write {
        let data = data.replace("\\n", "\n");
        let written = device.bulk_write(&data, endpoint_out, settings.timeout());
        println!("Wrote {}/{} bytes to endpoint {:#04x}", written, data.len(), endpoint_out);
        if !device.is_open() {
            bail!("Device disconnected during write");
        }
    }

    let reply = device.bulk_read(endpoint_in, settings.buffer_size, settings.timeout());
    if reply.is_empty() {
        println!("No data received from endpoint {:#04x}", endpoint_in);
    } else {
        println!(
            "Received {} bytes: {}",
            reply.len(),
            String::from_utf8_lossy(&reply).trim_end()
        );
    }

    Ok(())
}
