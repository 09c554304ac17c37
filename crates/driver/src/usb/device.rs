//! Claimed headset interface
//!
//! Wraps an open rusb handle whose control interface has been claimed. The
//! interface is released, and a detached kernel driver reattached, when the
//! wrapper is dropped.

use protocol::UsbId;
use rusb::{Context, Device, DeviceHandle};
use tracing::{debug, warn};

/// How the host side takes over a headset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindOptions {
    pub interface: u8,
    pub detach_kernel_driver: bool,
}

impl Default for BindOptions {
    fn default() -> Self {
        Self {
            interface: 0,
            detach_kernel_driver: true,
        }
    }
}

/// Read the vendor and product ID of a device
pub fn usb_id(device: &Device<Context>) -> Result<UsbId, rusb::Error> {
    let descriptor = device.device_descriptor()?;
    Ok(UsbId::new(descriptor.vendor_id(), descriptor.product_id()))
}

pub struct ClaimedInterface {
    handle: DeviceHandle<Context>,
    interface: u8,
    /// Whether we detached a kernel driver that should be given the interface back
    reattach: bool,
}

impl ClaimedInterface {
    /// Open the device and claim its control interface
    pub fn open(device: &Device<Context>, options: BindOptions) -> Result<Self, rusb::Error> {
        let handle = device.open().inspect_err(|e| {
            warn!(
                "Failed to open device {:03}:{:03}: {}",
                device.bus_number(),
                device.address(),
                e
            );
        })?;
        let interface = options.interface;

        let mut reattach = false;
        if options.detach_kernel_driver {
            match handle.kernel_driver_active(interface) {
                Ok(true) => {
                    debug!("Detaching kernel driver from interface {}", interface);
                    handle.detach_kernel_driver(interface)?;
                    reattach = true;
                }
                Ok(false) => {
                    debug!("No kernel driver active on interface {}", interface);
                }
                Err(e) => {
                    debug!(
                        "Could not check kernel driver status for interface {}: {}",
                        interface, e
                    );
                }
            }
        }

        if let Err(e) = handle.claim_interface(interface) {
            warn!("Failed to claim interface {}: {}", interface, e);
            if reattach {
                let _ = handle.attach_kernel_driver(interface);
            }
            return Err(e);
        }

        debug!(
            "Claimed interface {} on device {:03}:{:03}",
            interface,
            device.bus_number(),
            device.address()
        );
        Ok(Self {
            handle,
            interface,
            reattach,
        })
    }

    pub fn handle(&self) -> &DeviceHandle<Context> {
        &self.handle
    }
}

impl Drop for ClaimedInterface {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(self.interface) {
            debug!("Failed to release interface {}: {}", self.interface, e);
        }

        if self.reattach {
            if let Err(e) = self.handle.attach_kernel_driver(self.interface) {
                debug!(
                    "Could not reattach kernel driver to interface {}: {}",
                    self.interface, e
                );
            } else {
                debug!("Reattached kernel driver to interface {}", self.interface);
            }
        }
    }
}
