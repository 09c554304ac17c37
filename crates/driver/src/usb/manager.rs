//! USB device manager
//!
//! Finds headsets on the bus, claims them and binds them to the
//! [`LifecycleManager`]. Hot-plug notifications are queued by the libusb
//! callback and handled on the thread that owns the manager.

use super::device::{BindOptions, ClaimedInterface, usb_id};
use super::transfers::RusbTransport;
use crate::lifecycle::{LifecycleError, LifecycleManager};
use async_channel::{Receiver, Sender, unbounded};
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BindError {
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("Failed to start transfer threads: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Hot-plug notification queued for the manager's thread
#[derive(Debug)]
pub enum HotplugEvent {
    Arrived(Device<Context>),
    Left { bus: u8, address: u8 },
}

pub struct DeviceManager {
    context: Context,
    lifecycle: Arc<LifecycleManager>,
    options: BindOptions,
    /// Bound headsets: (bus, address) -> registry index
    bound: HashMap<(u8, u8), u32>,
    _hotplug_registration: Option<Registration<Context>>,
    hotplug_tx: Sender<HotplugEvent>,
    hotplug_rx: Receiver<HotplugEvent>,
}

impl DeviceManager {
    pub fn new(lifecycle: Arc<LifecycleManager>, options: BindOptions) -> Result<Self, rusb::Error> {
        let context = Context::new()?;
        let (hotplug_tx, hotplug_rx) = unbounded();

        Ok(Self {
            context,
            lifecycle,
            options,
            bound: HashMap::new(),
            _hotplug_registration: None,
            hotplug_tx,
            hotplug_rx,
        })
    }

    /// Bind every headset currently on the bus
    pub fn enumerate_devices(&mut self) -> Result<(), rusb::Error> {
        let devices = self.context.devices()?;

        for device in devices.iter() {
            if let Err(e) = self.bind_device(device) {
                warn!("Failed to bind device during enumeration: {}", e);
            }
        }

        info!("Enumeration bound {} headset(s)", self.bound.len());
        Ok(())
    }

    /// Register hot-plug callbacks, if libusb supports them here
    pub fn register_hotplug(&mut self) -> Result<(), rusb::Error> {
        if !rusb::has_hotplug() {
            warn!("Hot-plug not supported on this platform, only enumerated devices are bound");
            return Ok(());
        }

        let callback = HotplugCallback {
            event_sender: self.hotplug_tx.clone(),
        };

        let registration = HotplugBuilder::new()
            .enumerate(false)
            .register(&self.context, Box::new(callback))?;

        self._hotplug_registration = Some(registration);
        debug!("Hot-plug callbacks registered");
        Ok(())
    }

    /// Claim a device and bind it if the device table recognises it
    ///
    /// Returns the registry index, or `None` for devices that are not ours.
    fn bind_device(&mut self, device: Device<Context>) -> Result<Option<u32>, BindError> {
        let key = (device.bus_number(), device.address());
        if let Some(&index) = self.bound.get(&key) {
            return Ok(Some(index));
        }

        let id = usb_id(&device)?;
        if !self.lifecycle.table().recognizes(id) {
            return Ok(None);
        }

        let label = format!("{:03}:{:03}", key.0, key.1);
        debug!("Binding {} at {}", id, label);

        let interface = ClaimedInterface::open(&device, self.options)?;
        let transport = RusbTransport::new(interface, &label)?;
        let index = self.lifecycle.attach(id, Arc::new(transport))?;

        self.bound.insert(key, index);
        Ok(Some(index))
    }

    pub fn handle_device_arrived(&mut self, device: Device<Context>) {
        let (bus, address) = (device.bus_number(), device.address());
        match self.bind_device(device) {
            Ok(Some(index)) => {
                debug!("Hot-plugged headset at {:03}:{:03} is {}", bus, address, index);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Failed to bind arrived device {:03}:{:03}: {}", bus, address, e);
            }
        }
    }

    pub fn handle_device_left(&mut self, bus: u8, address: u8) {
        if let Some(index) = self.bound.remove(&(bus, address))
            && let Err(e) = self.lifecycle.detach(index)
        {
            warn!("Failed to detach {:03}:{:03}: {}", bus, address, e);
        }
    }

    /// Handle every queued hot-plug notification
    pub fn process_hotplug_events(&mut self) {
        while let Ok(event) = self.hotplug_rx.try_recv() {
            match event {
                HotplugEvent::Arrived(device) => self.handle_device_arrived(device),
                HotplugEvent::Left { bus, address } => self.handle_device_left(bus, address),
            }
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Number of headsets bound through this manager
    pub fn bound_count(&self) -> usize {
        self.bound.len()
    }
}

/// Forwards libusb hot-plug notifications to the manager's thread
struct HotplugCallback {
    event_sender: Sender<HotplugEvent>,
}

impl Hotplug<Context> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug callback: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        let _ = self.event_sender.try_send(HotplugEvent::Arrived(device));
    }

    fn device_left(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug callback: device left (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        let _ = self.event_sender.try_send(HotplugEvent::Left {
            bus: device.bus_number(),
            address: device.address(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_creation() {
        let lifecycle = Arc::new(LifecycleManager::default());

        // Context creation may fail without USB access
        match DeviceManager::new(lifecycle, BindOptions::default()) {
            Ok(manager) => assert_eq!(manager.bound_count(), 0),
            Err(e) => eprintln!("USB context creation failed (expected without USB): {}", e),
        }
    }

    #[test]
    fn test_left_for_unknown_device_is_ignored() {
        let lifecycle = Arc::new(LifecycleManager::default());
        if let Ok(mut manager) = DeviceManager::new(lifecycle.clone(), BindOptions::default()) {
            manager.handle_device_left(1, 2);
            assert!(lifecycle.devices().is_empty());
        }
    }
}
