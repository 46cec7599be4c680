//! Blocking bulk-transfer channel to the spectrometer.
//!
//! The protocol layers are written against the [`BulkTransport`] trait so
//! they can run over a scripted transport in tests. [`UsbTransport`] is the
//! real thing: an opened, configured libusb handle that undoes its
//! configuration when dropped.

use std::time::Duration;

use rusb::UsbContext;
use tracing::{debug, info, warn};

use crate::constants::{PID, VID};
use crate::error::Error;

/// Synchronous bulk-transfer channel.
///
/// Every call blocks the calling thread until completion, timeout, or
/// failure. Transfers are addressed by raw endpoint number, matching the
/// device's fixed endpoint layout.
pub trait BulkTransport {
    /// Write `data` to an OUT endpoint. Returns the number of bytes
    /// actually transferred.
    fn write_bulk(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize, Error>;

    /// Read into `buf` from an IN endpoint. Returns the number of bytes
    /// actually read, which may be shorter than `buf`.
    fn read_bulk(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize, Error>;
}

/// Transfer timeouts for the two classes of traffic on the command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Short timeout for command writes and fixed-length binary replies.
    pub command: Duration,
    /// Longer timeout for string/numeric queries and standard-speed
    /// spectrum packets.
    pub query: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command: Duration::from_millis(10),
            query: Duration::from_millis(1000),
        }
    }
}

/// Owns the libusb context and device enumeration.
///
/// Enumeration results live in this explicitly owned value and are passed
/// into session construction by the caller; there is no process-wide device
/// cache.
pub struct DeviceManager {
    context: rusb::Context,
}

impl DeviceManager {
    pub fn new() -> Result<Self, Error> {
        let context = rusb::Context::new()?;
        Ok(Self { context })
    }

    /// True if a USB4000 is currently attached to the bus.
    pub fn device_present(&self) -> bool {
        matches!(self.find_device(), Ok(Some(_)))
    }

    /// Open and configure the attached USB4000.
    pub fn open_spectrometer(&self) -> Result<UsbTransport, Error> {
        let device = self.find_device()?.ok_or(Error::DeviceNotFound)?;
        UsbTransport::configure(device)
    }

    fn find_device(&self) -> Result<Option<rusb::Device<rusb::Context>>, Error> {
        for device in self.context.devices()?.iter() {
            let Ok(descriptor) = device.device_descriptor() else {
                continue;
            };
            if descriptor.vendor_id() == VID && descriptor.product_id() == PID {
                return Ok(Some(device));
            }
        }
        Ok(None)
    }
}

/// An opened, configured USB4000: the owned device handle plus everything
/// needed to undo the configuration on drop.
pub struct UsbTransport {
    handle: rusb::DeviceHandle<rusb::Context>,
    interface: u8,
    alt_setting: u8,
    configuration: u8,
    needs_reattach: bool,
    bus_number: u8,
    port_numbers: Vec<u8>,
}

impl UsbTransport {
    const INTERFACE: u8 = 0;
    const ALT_SETTING: u8 = 0;

    /// Reset, configure, and claim the device.
    ///
    /// If a kernel driver is bound to the interface it is detached and the
    /// fact recorded so [`Drop`] can reattach it. Any failure here returns
    /// [`Error::Configuration`] and leaves no partially claimed handle
    /// behind.
    fn configure(device: rusb::Device<rusb::Context>) -> Result<Self, Error> {
        let stage = |stage: &'static str| move |source: rusb::Error| Error::Configuration { stage, source };

        let mut handle = device.open().map_err(stage("open"))?;
        handle.reset().map_err(stage("reset"))?;

        let configuration = handle.active_configuration().map_err(stage("get configuration"))?;
        handle
            .set_active_configuration(configuration)
            .map_err(stage("set configuration"))?;

        let mut needs_reattach = false;
        match handle.kernel_driver_active(Self::INTERFACE) {
            Ok(true) => {
                handle
                    .detach_kernel_driver(Self::INTERFACE)
                    .map_err(stage("detach kernel driver"))?;
                needs_reattach = true;
            }
            Ok(false) | Err(rusb::Error::NotSupported) => {}
            Err(source) => return Err(stage("probe kernel driver")(source)),
        }

        handle
            .claim_interface(Self::INTERFACE)
            .map_err(stage("claim interface"))?;
        handle
            .set_alternate_setting(Self::INTERFACE, Self::ALT_SETTING)
            .map_err(stage("set alt setting"))?;

        let bus_number = device.bus_number();
        let port_numbers = device.port_numbers().unwrap_or_default();
        info!(bus = bus_number, "USB4000 interface claimed and configured");

        Ok(Self {
            handle,
            interface: Self::INTERFACE,
            alt_setting: Self::ALT_SETTING,
            configuration,
            needs_reattach,
            bus_number,
            port_numbers,
        })
    }

    pub fn bus_number(&self) -> u8 {
        self.bus_number
    }

    pub fn port_numbers(&self) -> &[u8] {
        &self.port_numbers
    }

    pub fn alt_setting(&self) -> u8 {
        self.alt_setting
    }

    /// The `/sys/bus/usb/devices` entry for the claimed interface.
    pub fn sysfs_path(&self) -> String {
        let mut path = format!("/sys/bus/usb/devices/{}", self.bus_number);
        for (i, port) in self.port_numbers.iter().enumerate() {
            path.push(if i == 0 { '-' } else { '.' });
            path.push_str(&port.to_string());
        }
        path.push_str(&format!(":{}.{}", self.configuration, self.interface));
        path
    }
}

impl BulkTransport for UsbTransport {
    fn write_bulk(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize, Error> {
        let written = self.handle.write_bulk(endpoint, data, timeout)?;
        debug!(endpoint = format!("{endpoint:#04x}"), bytes = hex::encode(data), "USB write");
        Ok(written)
    }

    fn read_bulk(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize, Error> {
        let read = self.handle.read_bulk(endpoint, buf, timeout)?;
        debug!(endpoint = format!("{endpoint:#04x}"), bytes = hex::encode(&buf[..read]), "USB read");
        Ok(read)
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        // Teardown errors cannot propagate from drop; keep going so the
        // kernel driver is reattached even if the release fails.
        if let Err(e) = self.handle.release_interface(self.interface) {
            warn!(error = %e, "failed to release interface during teardown");
        }
        if self.needs_reattach {
            if let Err(e) = self.handle.attach_kernel_driver(self.interface) {
                warn!(error = %e, "failed to reattach kernel driver during teardown");
            }
        }
    }
}
