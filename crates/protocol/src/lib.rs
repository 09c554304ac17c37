//! Protocol library for the Z800 control channel
//!
//! This crate defines the byte-level command protocol spoken over the
//! headset's interrupt endpoints: verb codes, the fixed 64-byte frame layout,
//! peek-response decoding, the external control-surface operation codes and
//! the USB IDs of the supported devices.
//!
//! # Example
//!
//! ```
//! use protocol::{BUFFER_SIZE, Command, Response, decode_response, encode_command};
//!
//! let mut frame = [0u8; BUFFER_SIZE];
//! encode_command(Command::peek_eeprom(0), &mut frame);
//! assert_eq!(&frame[..2], &[0x81, 0x00]);
//!
//! let mut reply = [0u8; BUFFER_SIZE];
//! reply[2] = 0x81;
//! reply[4] = 0x01;
//! assert_eq!(decode_response(&reply), Some(Response::EepromByte(0x01)));
//! ```

pub mod codec;
pub mod error;
pub mod types;

pub use codec::{
    BUFFER_SIZE, Frame, READ_ENDPOINT, READ_TRANSFER_LENGTH, Response, WRITE_ENDPOINT,
    WRITE_TRANSFER_LENGTH, decode_response, encode_command,
};
pub use error::{ProtocolError, Result, TransferError};
pub use types::{
    Command, ControlOp, Direction, FirmwareVersion, SUPPORTED_DEVICES, UsbId, Verb, X800_ID,
    Z800_ID,
};
