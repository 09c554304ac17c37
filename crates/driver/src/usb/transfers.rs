//! rusb-backed transport
//!
//! Each bound headset gets one writer and one reader thread. Transfers are
//! queued to them over channels and executed with blocking interrupt I/O, and
//! completions run on those threads, so neither `submit` nor `cancel` ever
//! completes a transfer on the caller's thread.
//!
//! The reader waits in short slices so a cancel request is noticed within
//! [`READ_SLICE`]. Writes are bounded by [`WRITE_TIMEOUT`] instead.

use super::device::ClaimedInterface;
use async_channel::{Receiver, Sender, unbounded};
use common::{Rejected, Transfer, TransferStatus, Transport};
use protocol::{BUFFER_SIZE, Direction, READ_ENDPOINT, TransferError, WRITE_ENDPOINT};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout for a single interrupt OUT transfer
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Slice of a blocking interrupt IN wait between cancel checks
pub const READ_SLICE: Duration = Duration::from_millis(100);

/// Pause before reporting a failed read, so a resubmitting caller does not spin
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Flags shared between the transport and its I/O threads
#[derive(Default)]
struct Flags {
    cancel_read: AtomicBool,
    removed: AtomicBool,
}

pub struct RusbTransport {
    writes: Sender<Transfer>,
    reads: Sender<Transfer>,
    flags: Arc<Flags>,
}

impl RusbTransport {
    /// Start the I/O threads for a claimed headset
    ///
    /// `label` names the threads, e.g. `003:007` for bus 3, address 7.
    pub fn new(interface: ClaimedInterface, label: &str) -> io::Result<Self> {
        let interface = Arc::new(interface);
        let flags = Arc::new(Flags::default());
        let (writes, write_jobs) = unbounded();
        let (reads, read_jobs) = unbounded();

        let writer_interface = interface.clone();
        let writer_flags = flags.clone();
        std::thread::Builder::new()
            .name(format!("z800-write-{}", label))
            .spawn(move || run_writer(&writer_interface, write_jobs, &writer_flags))?;

        let reader_flags = flags.clone();
        std::thread::Builder::new()
            .name(format!("z800-read-{}", label))
            .spawn(move || run_reader(&interface, read_jobs, &reader_flags))?;

        Ok(Self {
            writes,
            reads,
            flags,
        })
    }

    /// Whether the device has been reported gone
    pub fn is_removed(&self) -> bool {
        self.flags.removed.load(Ordering::Acquire)
    }
}

impl Transport for RusbTransport {
    fn submit(&self, transfer: Transfer) -> Result<(), Rejected> {
        if self.is_removed() {
            return Err(Rejected::new(TransferError::NoDevice, transfer));
        }
        if transfer.length > BUFFER_SIZE {
            return Err(Rejected::new(TransferError::Overflow, transfer));
        }

        let queue = match transfer.direction {
            Direction::Read => {
                self.flags.cancel_read.store(false, Ordering::Release);
                &self.reads
            }
            Direction::Write => &self.writes,
        };

        queue
            .try_send(transfer)
            .map_err(|e| Rejected::new(TransferError::NoDevice, e.into_inner()))
    }

    fn cancel(&self, direction: Direction) {
        match direction {
            Direction::Read => self.flags.cancel_read.store(true, Ordering::Release),
            // Writes finish or fail within WRITE_TIMEOUT
            Direction::Write => {}
        }
    }
}

impl Drop for RusbTransport {
    fn drop(&mut self) {
        self.flags.cancel_read.store(true, Ordering::Release);
        self.writes.close();
        self.reads.close();
    }
}

fn run_writer(interface: &ClaimedInterface, jobs: Receiver<Transfer>, flags: &Flags) {
    while let Ok(transfer) = jobs.recv_blocking() {
        if flags.removed.load(Ordering::Acquire) {
            transfer.complete(TransferStatus::Removed, 0);
            continue;
        }

        let length = transfer.length;
        let result = interface.handle().write_interrupt(
            WRITE_ENDPOINT,
            &transfer.buffer[..length],
            WRITE_TIMEOUT,
        );
        let (status, written) = match result {
            Ok(written) => (TransferStatus::Completed, written),
            Err(rusb::Error::NoDevice) => {
                flags.removed.store(true, Ordering::Release);
                (TransferStatus::Removed, 0)
            }
            Err(e) => {
                warn!("Interrupt OUT transfer failed: {}", e);
                (TransferStatus::Failed(map_rusb_error(e)), 0)
            }
        };
        transfer.complete(status, written);
    }
    debug!("Writer thread exiting");
}

fn run_reader(interface: &ClaimedInterface, jobs: Receiver<Transfer>, flags: &Flags) {
    while let Ok(mut transfer) = jobs.recv_blocking() {
        let length = transfer.length;
        let (status, received) = loop {
            if flags.removed.load(Ordering::Acquire) {
                break (TransferStatus::Removed, 0);
            }
            if flags.cancel_read.load(Ordering::Acquire) {
                break (TransferStatus::Cancelled, 0);
            }

            match interface.handle().read_interrupt(
                READ_ENDPOINT,
                &mut transfer.buffer[..length],
                READ_SLICE,
            ) {
                Ok(received) => break (TransferStatus::Completed, received),
                Err(rusb::Error::Timeout) => continue,
                Err(rusb::Error::NoDevice) => {
                    flags.removed.store(true, Ordering::Release);
                    break (TransferStatus::Removed, 0);
                }
                Err(e) => {
                    debug!("Interrupt IN transfer failed: {}", e);
                    std::thread::sleep(READ_ERROR_BACKOFF);
                    break (TransferStatus::Failed(map_rusb_error(e)), 0);
                }
            }
        };
        transfer.complete(status, received);
    }
    debug!("Reader thread exiting");
}

/// Map rusb errors to transfer errors
pub fn map_rusb_error(err: rusb::Error) -> TransferError {
    match err {
        rusb::Error::Timeout => TransferError::Timeout,
        rusb::Error::Pipe => TransferError::Pipe,
        rusb::Error::NoDevice => TransferError::NoDevice,
        rusb::Error::Overflow => TransferError::Overflow,
        rusb::Error::Io => TransferError::Io,
        rusb::Error::Access => TransferError::Access,
        _ => TransferError::Other {
            message: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_rusb_error() {
        assert_eq!(map_rusb_error(rusb::Error::Timeout), TransferError::Timeout);
        assert_eq!(map_rusb_error(rusb::Error::Pipe), TransferError::Pipe);
        assert_eq!(map_rusb_error(rusb::Error::NoDevice), TransferError::NoDevice);
        assert_eq!(map_rusb_error(rusb::Error::Access), TransferError::Access);
        assert!(matches!(
            map_rusb_error(rusb::Error::Busy),
            TransferError::Other { .. }
        ));
    }

    #[test]
    fn test_endpoint_direction() {
        assert!((READ_ENDPOINT & 0x80) != 0);
        assert!((WRITE_ENDPOINT & 0x80) == 0);
    }
}
