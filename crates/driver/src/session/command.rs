//! Request/response correlation over the read channel
//!
//! The headset has no request IDs. A peek is answered by a frame on the
//! perpetually outstanding read transfer whose byte 2 echoes the peek verb,
//! so correlation is positional: at most one peek may be outstanding per
//! session, and the caller blocks until the reply lands in the session's
//! [`PendingRead`] or the fixed one-second window closes.
//!
//! # Known limitation
//!
//! A data byte of zero doubles as "no reply yet". A device byte that really
//! is zero cannot be returned; such a peek times out.

use super::DeviceSession;
use protocol::{Command, ProtocolError, Response, decode_response};
use std::num::NonZeroU8;
use std::sync::PoisonError;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Interval between checks for a peek reply
pub const PEEK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Checks before a peek gives up (20 × 50 ms ≈ 1 s)
pub const PEEK_MAX_POLLS: u32 = 20;

/// EEPROM address of the firmware version's major byte
pub const FIRMWARE_MSB_ADDRESS: u8 = 0;

/// EEPROM address of the firmware version's minor byte
pub const FIRMWARE_LSB_ADDRESS: u8 = 1;

/// The single outstanding peek of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingRead {
    awaited: bool,
    value: Option<NonZeroU8>,
}

impl PendingRead {
    /// Start waiting for a reply, discarding any previous value
    pub fn arm(&mut self) {
        self.awaited = true;
        self.value = None;
    }

    /// Record a reply byte; ignored when no peek is outstanding
    ///
    /// Returns whether the byte was accepted. Zero is accepted but leaves the
    /// value empty.
    pub fn record(&mut self, byte: u8) -> bool {
        if !self.awaited {
            return false;
        }
        self.value = NonZeroU8::new(byte);
        true
    }

    /// Take the reply, ending the wait
    pub fn take(&mut self) -> Option<u8> {
        let value = self.value?;
        self.clear();
        Some(value.get())
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_awaited(&self) -> bool {
        self.awaited
    }
}

/// Route an inbound payload into the pending read
///
/// Returns whether the payload answered an outstanding peek.
pub(super) fn inspect_response(payload: &[u8], pending: &mut PendingRead) -> bool {
    match decode_response(payload) {
        Some(Response::EepromByte(byte)) => pending.record(byte),
        None => false,
    }
}

impl DeviceSession {
    /// Read one EEPROM byte
    ///
    /// Issues a peek and blocks, checking every [`PEEK_POLL_INTERVAL`], until
    /// a nonzero reply arrives ([`ProtocolError::Timeout`] after
    /// [`PEEK_MAX_POLLS`] checks) or the device is detached
    /// ([`ProtocolError::DeviceGone`]). Concurrent peeks on one session are
    /// serialised.
    pub fn request_eeprom_byte(&self, address: u8) -> Result<u8, ProtocolError> {
        let shared = &self.shared;
        let _peek = shared
            .peek_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        {
            let mut inner = shared.lock();
            inner.ensure_active()?;
            inner.pending.arm();
        }

        if let Err(e) = self.write_command(Command::peek_eeprom(address)) {
            shared.lock().pending.clear();
            return Err(e);
        }

        let deadline = Instant::now() + PEEK_POLL_INTERVAL * PEEK_MAX_POLLS;
        let mut inner = shared.lock();
        loop {
            if let Err(e) = inner.ensure_active() {
                inner.pending.clear();
                return Err(e);
            }
            if let Some(byte) = inner.pending.take() {
                debug!(
                    "Session {}: EEPROM[{:#04x}] = {:#04x}",
                    shared.id, address, byte
                );
                return Ok(byte);
            }

            let now = Instant::now();
            if now >= deadline {
                inner.pending.clear();
                warn!(
                    "Session {}: no reply to peek of EEPROM[{:#04x}]",
                    shared.id, address
                );
                return Err(ProtocolError::Timeout);
            }
            inner = shared.wait(inner, PEEK_POLL_INTERVAL.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::BUFFER_SIZE;

    fn reply(verb: u8, data: u8) -> [u8; BUFFER_SIZE] {
        let mut frame = [0u8; BUFFER_SIZE];
        frame[2] = verb;
        frame[4] = data;
        frame
    }

    #[test]
    fn test_unsolicited_reply_is_ignored() {
        let mut pending = PendingRead::default();
        assert!(!inspect_response(&reply(0x81, 0x05), &mut pending));
        assert_eq!(pending.take(), None);
    }

    #[test]
    fn test_reply_fills_armed_read() {
        let mut pending = PendingRead::default();
        pending.arm();
        assert!(pending.is_awaited());

        assert!(inspect_response(&reply(0x81, 0x05), &mut pending));
        assert_eq!(pending.take(), Some(0x05));
        assert!(!pending.is_awaited());
        assert_eq!(pending.take(), None);
    }

    #[test]
    fn test_other_verbs_do_not_answer_peek() {
        let mut pending = PendingRead::default();
        pending.arm();
        assert!(!inspect_response(&reply(0x89, 0x05), &mut pending));
        assert!(pending.is_awaited());
        assert_eq!(pending.take(), None);
    }

    #[test]
    fn test_zero_reply_reads_as_no_value() {
        let mut pending = PendingRead::default();
        pending.arm();
        assert!(inspect_response(&reply(0x81, 0x00), &mut pending));
        assert_eq!(pending.take(), None);
        assert!(pending.is_awaited());
    }

    #[test]
    fn test_arm_discards_stale_value() {
        let mut pending = PendingRead::default();
        pending.arm();
        pending.record(0x07);
        pending.arm();
        assert_eq!(pending.take(), None);
    }

    #[test]
    fn test_peek_window() {
        assert_eq!(PEEK_POLL_INTERVAL * PEEK_MAX_POLLS, Duration::from_secs(1));
    }
}
