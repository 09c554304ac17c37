//! Host-side driver for the eMagin Z800 3DVisor headset
//!
//! The headset is controlled through a pair of interrupt endpoints: commands
//! go out as two-byte frames, and EEPROM peek replies come back on a read
//! transfer that is kept outstanding for the life of a session.
//!
//! - [`session`]: per-open session state, transfer slots and the peek engine
//! - [`control`]: the user-facing operations (firmware, sleep, 3D, ...)
//! - [`lifecycle`]: device table, registry and attach/detach handling
//! - [`usb`]: binding real headsets through libusb
//! - [`config`]: TOML configuration
//!
//! # Example
//!
//! ```no_run
//! use driver::{LifecycleManager, control};
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let lifecycle = Arc::new(LifecycleManager::default());
//! let mut manager = driver::usb::DeviceManager::new(lifecycle.clone(), Default::default())?;
//! manager.enumerate_devices()?;
//!
//! let session = lifecycle.open(0)?;
//! println!("firmware {}", control::get_firmware_version(&session)?);
//! lifecycle.close(session);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod control;
pub mod lifecycle;
pub mod session;
pub mod usb;

pub use config::DriverConfig;
pub use control::ControlReply;
pub use lifecycle::{
    BoundDeviceInfo, DeviceFilter, DeviceTable, LifecycleError, LifecycleManager, MAX_DEVICES,
    MINOR_BASE,
};
pub use session::{DeviceSession, SessionState, SessionStats};
