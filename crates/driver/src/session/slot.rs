//! Transfer slots
//!
//! A slot owns one reusable 64-byte buffer bound to one direction. While a
//! transfer is outstanding the buffer is lent to the transport, so "in
//! flight" is simply "buffer not at home". That makes a second submission on
//! the same slot impossible to express: there is nothing left to lend.

use common::{Buffer, new_buffer};
use protocol::{Direction, TransferError};

#[derive(Debug)]
pub struct TransferSlot {
    direction: Direction,
    buffer: Option<Buffer>,
}

impl TransferSlot {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            buffer: Some(new_buffer()),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Whether the buffer is currently lent to the transport
    pub fn in_flight(&self) -> bool {
        self.buffer.is_none()
    }

    /// Lend the buffer out for one submission
    pub fn lend(&mut self) -> Result<Buffer, TransferError> {
        self.buffer.take().ok_or(TransferError::InFlight)
    }

    /// Take the buffer back after completion or rejection
    pub fn restore(&mut self, buffer: Buffer) {
        debug_assert!(
            self.buffer.is_none(),
            "{:?} slot restored while idle",
            self.direction
        );
        self.buffer = Some(buffer);
    }

    /// Buffer contents, when the slot is idle
    pub fn contents(&self) -> Option<&[u8]> {
        self.buffer.as_deref().map(|b| &b[..])
    }
}
