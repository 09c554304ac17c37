//! USB host integration
//!
//! Binds real headsets through libusb (via rusb):
//! - Enumeration and hot-plug detection
//! - Claiming the control interface
//! - A [`Transport`](common::Transport) over the interrupt endpoints
//!
//! Hot-plug events are pumped on a dedicated worker thread; transfers run on
//! per-device I/O threads owned by [`RusbTransport`].

pub mod device;
pub mod manager;
pub mod transfers;
pub mod worker;

pub use device::{BindOptions, ClaimedInterface};
pub use manager::{BindError, DeviceManager};
pub use transfers::{RusbTransport, map_rusb_error};
pub use worker::{UsbWorkerThread, spawn_usb_worker};
