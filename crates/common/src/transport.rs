//! Transport seam between the driver core and a USB host stack
//!
//! The driver never talks to a host controller directly. It hands owned
//! buffers to a [`Transport`] and is told about the outcome through a
//! completion callback, the same shape as URB submission in a kernel driver
//! or an asynchronous libusb transfer.
//!
//! # Contract
//!
//! - A submitted buffer belongs to the transport until its completion runs;
//!   the completion hands it back.
//! - Neither [`Transport::submit`] nor [`Transport::cancel`] may invoke a
//!   completion on the calling thread. Completions run on a thread owned by
//!   the transport. Callers rely on this to submit while holding their own
//!   locks, including from inside a completion.
//! - Every accepted submission completes exactly once, with
//!   [`TransferStatus::Cancelled`] if it was cancelled.

use protocol::{BUFFER_SIZE, Direction, TransferError};

/// Owned transfer buffer
pub type Buffer = Box<[u8; BUFFER_SIZE]>;

/// Allocate a zeroed transfer buffer
pub fn new_buffer() -> Buffer {
    Box::new([0u8; BUFFER_SIZE])
}

/// Completion status reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    /// The transfer finished; `actual_length` bytes are valid
    Completed,
    /// The transfer was cancelled on request (shutdown noise, not an error)
    Cancelled,
    /// The device or its session was removed
    Removed,
    /// The transfer failed
    Failed(TransferError),
}

impl TransferStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferStatus::Completed)
    }
}

/// Outcome of one transfer, delivered to its completion callback
#[derive(Debug)]
pub struct Completion {
    pub status: TransferStatus,
    /// The buffer that was submitted, returned to its owner
    pub buffer: Buffer,
    /// Bytes transferred (for reads: bytes received)
    pub actual_length: usize,
}

/// Completion callback, run once on a transport thread
pub type CompletionFn = Box<dyn FnOnce(Completion) + Send + 'static>;

/// One transfer handed to the transport
pub struct Transfer {
    pub direction: Direction,
    pub buffer: Buffer,
    /// Declared transfer length, at most the buffer capacity
    pub length: usize,
    pub on_complete: CompletionFn,
}

impl Transfer {
    /// Run the completion callback, handing the buffer back
    pub fn complete(self, status: TransferStatus, actual_length: usize) {
        let Transfer {
            buffer,
            on_complete,
            ..
        } = self;
        on_complete(Completion {
            status,
            buffer,
            actual_length,
        });
    }
}

impl std::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transfer")
            .field("direction", &self.direction)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// A submission the transport refused; the buffer comes back with the error
#[derive(Debug)]
pub struct Rejected {
    pub error: TransferError,
    pub buffer: Buffer,
}

impl Rejected {
    pub fn new(error: TransferError, transfer: Transfer) -> Self {
        Self {
            error,
            buffer: transfer.buffer,
        }
    }
}

/// Asynchronous transfer submission on the headset's interrupt endpoints
pub trait Transport: Send + Sync + 'static {
    /// Queue a transfer; its completion runs later on a transport thread
    fn submit(&self, transfer: Transfer) -> Result<(), Rejected>;

    /// Cancel the outstanding transfer in `direction`, if any
    ///
    /// Returns immediately. A cancelled transfer still completes, with
    /// [`TransferStatus::Cancelled`].
    fn cancel(&self, direction: Direction);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_is_zeroed() {
        let buffer = new_buffer();
        assert_eq!(buffer.len(), BUFFER_SIZE);
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_rejected_returns_buffer() {
        let mut buffer = new_buffer();
        buffer[0] = 0x85;
        let transfer = Transfer {
            direction: Direction::Write,
            buffer,
            length: 35,
            on_complete: Box::new(|_| {}),
        };

        let rejected = Rejected::new(TransferError::NoDevice, transfer);
        assert_eq!(rejected.error, TransferError::NoDevice);
        assert_eq!(rejected.buffer[0], 0x85);
    }

    #[test]
    fn test_status_success() {
        assert!(TransferStatus::Completed.is_success());
        assert!(!TransferStatus::Cancelled.is_success());
        assert!(!TransferStatus::Failed(TransferError::Pipe).is_success());
    }
}
