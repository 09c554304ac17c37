//! USB worker thread
//!
//! Dedicated thread that pumps libusb events so hot-plug callbacks fire, and
//! binds or unbinds headsets as they come and go. Runs until the shared
//! running flag is cleared.

use super::device::BindOptions;
use super::manager::DeviceManager;
use crate::lifecycle::LifecycleManager;
use rusb::UsbContext;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound on one `handle_events` wait
const EVENT_TIMEOUT: Duration = Duration::from_millis(100);

pub struct UsbWorkerThread {
    manager: DeviceManager,
    running: Arc<AtomicBool>,
}

impl UsbWorkerThread {
    /// Create the manager, bind present headsets and register for hot-plug
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        options: BindOptions,
        running: Arc<AtomicBool>,
    ) -> Result<Self, rusb::Error> {
        let mut manager = DeviceManager::new(lifecycle, options)?;
        manager.enumerate_devices()?;
        manager.register_hotplug()?;

        Ok(Self { manager, running })
    }

    pub fn run(mut self) -> Result<(), rusb::Error> {
        info!("USB worker thread started");

        while self.running.load(Ordering::Acquire) {
            match self.manager.context().handle_events(Some(EVENT_TIMEOUT)) {
                Ok(()) => {}
                Err(rusb::Error::Interrupted) => {
                    debug!("USB event handling interrupted");
                }
                Err(e) => {
                    warn!("Error handling USB events: {}", e);
                    std::thread::sleep(EVENT_TIMEOUT);
                }
            }

            self.manager.process_hotplug_events();
        }

        info!("USB worker thread stopped");
        Ok(())
    }
}

/// Spawn the USB worker thread
///
/// The thread runs until `running` is cleared.
pub fn spawn_usb_worker(
    lifecycle: Arc<LifecycleManager>,
    options: BindOptions,
    running: Arc<AtomicBool>,
) -> io::Result<JoinHandle<Result<(), rusb::Error>>> {
    std::thread::Builder::new()
        .name("usb-worker".to_string())
        .spawn(move || {
            let worker_thread = UsbWorkerThread::new(lifecycle, options, running)?;
            worker_thread.run()
        })
}
