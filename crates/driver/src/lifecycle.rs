//! Device lifecycle management
//!
//! The [`LifecycleManager`] is the process-wide owner of the device table and
//! the registry of bound headsets. The host integration calls
//! [`LifecycleManager::attach`] when a recognised device appears and
//! [`LifecycleManager::detach`] when it disappears; clients open and close
//! sessions through it.
//!
//! A single registry lock covers attach, detach, open and close, so a session
//! can never be opened against a device that is halfway through being torn
//! down. A device carries at most one open session, since the perpetual read
//! transfer belongs to it. A session that is open when its device disappears
//! is marked detached and lives on until its owner closes it.

use crate::session::{DeviceSession, SessionLink};
use common::Transport;
use protocol::{ProtocolError, SUPPORTED_DEVICES, UsbId};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

/// First minor number handed out to a headset
pub const MINOR_BASE: u32 = 155;

/// Number of headsets that can be bound at once
pub const MAX_DEVICES: u32 = 16;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Device {0} is not in the device table")]
    Unsupported(UsbId),

    #[error("No device bound at index {index}")]
    NoDevice { index: u32 },

    #[error("Device at index {index} is already open")]
    Busy { index: u32 },

    #[error("All {max} device slots are in use")]
    NoFreeSlot { max: u32 },

    #[error("Failed to open session: {0}")]
    Open(#[from] ProtocolError),
}

/// Device node name for a registry index
pub fn node_name(index: u32) -> String {
    format!("z800:{}", index)
}

/// Minor number for a registry index
pub fn minor_number(index: u32) -> u32 {
    MINOR_BASE + index
}

/// One half of a device filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdPattern {
    Any,
    Exact(u16),
}

impl IdPattern {
    fn matches(self, value: u16) -> bool {
        match self {
            IdPattern::Any => true,
            IdPattern::Exact(expected) => expected == value,
        }
    }

    fn parse(part: &str, name: &str) -> Result<Self, String> {
        if part == "*" {
            return Ok(IdPattern::Any);
        }

        let hex = part
            .strip_prefix("0x")
            .or_else(|| part.strip_prefix("0X"))
            .ok_or_else(|| {
                format!(
                    "Invalid {} '{}', must start with '0x' (e.g., '0x1641')",
                    name, part
                )
            })?;

        if hex.is_empty() || hex.len() > 4 {
            return Err(format!(
                "Invalid {} '{}', hex part must be 1-4 digits",
                name, part
            ));
        }

        u16::from_str_radix(hex, 16)
            .map(IdPattern::Exact)
            .map_err(|_| format!("Invalid {} '{}', not a valid hex number", name, part))
    }
}

impl fmt::Display for IdPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdPattern::Any => write!(f, "*"),
            IdPattern::Exact(value) => write!(f, "{:#06x}", value),
        }
    }
}

/// A `VID:PID` pattern such as `0x1641:0x0120` or `0x1641:*`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFilter {
    vendor: IdPattern,
    product: IdPattern,
}

impl DeviceFilter {
    pub fn exact(id: UsbId) -> Self {
        Self {
            vendor: IdPattern::Exact(id.vendor_id),
            product: IdPattern::Exact(id.product_id),
        }
    }

    pub fn matches(&self, id: UsbId) -> bool {
        self.vendor.matches(id.vendor_id) && self.product.matches(id.product_id)
    }
}

impl FromStr for DeviceFilter {
    type Err = String;

    fn from_str(filter: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            return Err(format!(
                "Invalid filter format '{}', expected VID:PID (e.g., '0x1641:0x0120' or '0x1641:*')",
                filter
            ));
        }

        Ok(Self {
            vendor: IdPattern::parse(parts[0], "VID")?,
            product: IdPattern::parse(parts[1], "PID")?,
        })
    }
}

impl fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.vendor, self.product)
    }
}

/// The set of USB IDs the driver binds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTable {
    filters: Vec<DeviceFilter>,
}

impl DeviceTable {
    /// Build a table from filters; an empty list means the built-in IDs
    pub fn new(filters: Vec<DeviceFilter>) -> Self {
        if filters.is_empty() {
            return Self::default();
        }
        Self { filters }
    }

    pub fn recognizes(&self, id: UsbId) -> bool {
        self.filters.iter().any(|filter| filter.matches(id))
    }

    pub fn filters(&self) -> &[DeviceFilter] {
        &self.filters
    }
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self {
            filters: SUPPORTED_DEVICES.iter().copied().map(DeviceFilter::exact).collect(),
        }
    }
}

/// Registry listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundDeviceInfo {
    pub index: u32,
    pub minor: u32,
    pub node: String,
    pub id: UsbId,
    pub in_use: bool,
}

struct BoundDevice {
    id: UsbId,
    transport: Arc<dyn Transport>,
    session: Option<SessionLink>,
}

impl BoundDevice {
    /// Forget a session that has been dropped
    fn prune(&mut self) {
        if self.session.as_ref().is_some_and(|link| !link.is_live()) {
            self.session = None;
        }
    }
}

pub struct LifecycleManager {
    table: DeviceTable,
    registry: Mutex<BTreeMap<u32, BoundDevice>>,
}

impl LifecycleManager {
    pub fn new(table: DeviceTable) -> Self {
        info!(
            "Device table: {}",
            table
                .filters()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Self {
            table,
            registry: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn table(&self) -> &DeviceTable {
        &self.table
    }

    /// Bind a newly arrived device; returns its registry index
    ///
    /// The lowest free index is reused, so a replugged headset gets its old
    /// node name back when nothing else took it.
    pub fn attach(
        &self,
        id: UsbId,
        transport: Arc<dyn Transport>,
    ) -> Result<u32, LifecycleError> {
        if !self.table.recognizes(id) {
            return Err(LifecycleError::Unsupported(id));
        }

        let mut registry = self.lock();
        let index = (0..MAX_DEVICES)
            .find(|index| !registry.contains_key(index))
            .ok_or(LifecycleError::NoFreeSlot { max: MAX_DEVICES })?;

        registry.insert(
            index,
            BoundDevice {
                id,
                transport,
                session: None,
            },
        );

        info!(
            "Device {} registered as {} (minor {})",
            id,
            node_name(index),
            minor_number(index)
        );
        Ok(index)
    }

    /// Unbind a device that has gone away
    ///
    /// A session still open on it is marked detached.
    pub fn detach(&self, index: u32) -> Result<(), LifecycleError> {
        let mut registry = self.lock();
        let device = registry
            .remove(&index)
            .ok_or(LifecycleError::NoDevice { index })?;

        let detached = device.session.as_ref().is_some_and(SessionLink::detach);
        info!(
            "Device {} ({}) disconnected{}",
            device.id,
            node_name(index),
            if detached { ", open session detached" } else { "" }
        );
        Ok(())
    }

    /// Open a session on a bound device
    pub fn open(&self, index: u32) -> Result<DeviceSession, LifecycleError> {
        let mut registry = self.lock();
        let device = registry
            .get_mut(&index)
            .ok_or(LifecycleError::NoDevice { index })?;

        device.prune();
        if device.session.is_some() {
            return Err(LifecycleError::Busy { index });
        }

        let session = DeviceSession::open(device.transport.clone())?;
        device.session = Some(session.link());

        debug!("Session {} opened on {}", session.id(), node_name(index));
        Ok(session)
    }

    /// Close a session, excluding a concurrent detach
    pub fn close(&self, session: DeviceSession) {
        let mut registry = self.lock();
        session.close();
        for device in registry.values_mut() {
            device.prune();
        }
    }

    /// Snapshot of bound devices
    pub fn devices(&self) -> Vec<BoundDeviceInfo> {
        self.lock()
            .iter_mut()
            .map(|(&index, device)| {
                device.prune();
                BoundDeviceInfo {
                    index,
                    minor: minor_number(index),
                    node: node_name(index),
                    id: device.id,
                    in_use: device.session.is_some(),
                }
            })
            .collect()
    }

    /// Unbind every device
    pub fn shutdown(&self) {
        let mut registry = self.lock();
        for (index, device) in std::mem::take(&mut *registry) {
            if let Some(link) = &device.session {
                link.detach();
            }
            debug!("Released {}", node_name(index));
        }
        info!("Lifecycle manager shut down");
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u32, BoundDevice>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new(DeviceTable::default())
    }
}
