//! Frame encoding and response decoding
//!
//! Every transfer on the control channel carries a 64-byte buffer. Outbound
//! frames hold the verb in byte 0 and the noun in byte 1, zero-filled after
//! that, and are always declared 35 bytes long: the headset firmware expects
//! exactly that length. Inbound frames echo the originating verb in byte 2;
//! for EEPROM peeks, byte 4 holds the data byte.

use crate::types::{Command, Verb};

/// Capacity of every transfer buffer
pub const BUFFER_SIZE: usize = 64;

/// Declared length of every OUT transfer, independent of payload size
pub const WRITE_TRANSFER_LENGTH: usize = 35;

/// Declared length of every IN transfer
pub const READ_TRANSFER_LENGTH: usize = 64;

/// OUT interrupt endpoint
pub const WRITE_ENDPOINT: u8 = 0x02;

/// IN interrupt endpoint
pub const READ_ENDPOINT: u8 = 0x81;

/// Offset of the echoed verb in an inbound frame
pub const RESPONSE_VERB_OFFSET: usize = 2;

/// Offset of the data byte in a peek response
pub const RESPONSE_DATA_OFFSET: usize = 4;

/// A full transfer buffer
pub type Frame = [u8; BUFFER_SIZE];

/// Encode a command into an outbound frame
///
/// The whole frame is rewritten, so stale bytes from a previous command never
/// leak onto the wire.
pub fn encode_command(command: Command, frame: &mut Frame) {
    frame.fill(0);
    frame[0] = command.verb;
    frame[1] = command.noun;
}

/// A decoded inbound payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Reply to a `PeekEeprom` command
    EepromByte(u8),
}

/// Decode an inbound payload
///
/// Only peek-EEPROM replies carry meaning for the control channel; anything
/// else (including payloads too short to hold the data byte) yields `None`.
pub fn decode_response(payload: &[u8]) -> Option<Response> {
    let verb = *payload.get(RESPONSE_VERB_OFFSET)?;
    if verb != Verb::PeekEeprom.code() {
        return None;
    }
    payload
        .get(RESPONSE_DATA_OFFSET)
        .map(|&byte| Response::EepromByte(byte))
}
