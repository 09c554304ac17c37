//! Z800 control-channel type definitions
//!
//! This module defines the values that travel over the interrupt endpoints
//! (verbs, commands, firmware versions) and the identifiers used to bind a
//! physical device and address its control surface.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One-byte opcode identifying a device command
///
/// The codes come from the vendor SDK and are fixed by the device firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Verb {
    /// Read one byte of configuration EEPROM (noun = address)
    PeekEeprom = 0x81,
    /// Set the address used by the next `PokeEeprom`
    SetPokeAddr = 0x82,
    /// Write one byte of configuration EEPROM
    PokeEeprom = 0x83,
    /// Reset the headset controller
    Reset = 0x84,
    /// Put the displays to sleep
    Sleep = 0x85,
    /// Read a register of the left OLED
    PeekOled0 = 0x86,
    /// Read a register of the right OLED
    PeekOled1 = 0x87,
    /// Step display brightness to the next level
    StepBrightness = 0x88,
    /// Ask the controller for its state
    QueryState = 0x89,
    /// Wake the displays (also used as keep-alive)
    Wake = 0x8A,
    /// Enable (noun = 1) or disable (noun = 0) stereoscopic mode
    Mode3d = 0x8B,
    /// Swap left/right frames in stereoscopic mode
    Flip3d = 0x8C,
}

impl Verb {
    /// Wire value of the verb
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Verb {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0x81 => Verb::PeekEeprom,
            0x82 => Verb::SetPokeAddr,
            0x83 => Verb::PokeEeprom,
            0x84 => Verb::Reset,
            0x85 => Verb::Sleep,
            0x86 => Verb::PeekOled0,
            0x87 => Verb::PeekOled1,
            0x88 => Verb::StepBrightness,
            0x89 => Verb::QueryState,
            0x8A => Verb::Wake,
            0x8B => Verb::Mode3d,
            0x8C => Verb::Flip3d,
            other => return Err(other),
        })
    }
}

/// A two-byte (verb, noun) command
///
/// Commands are plain values; they live only for the duration of one
/// submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Command {
    pub verb: u8,
    pub noun: u8,
}

impl Command {
    pub const fn new(verb: Verb, noun: u8) -> Self {
        Self {
            verb: verb.code(),
            noun,
        }
    }

    /// Build a command from raw bytes, for verbs outside [`Verb`]
    pub const fn raw(verb: u8, noun: u8) -> Self {
        Self { verb, noun }
    }

    pub const fn peek_eeprom(address: u8) -> Self {
        Self::new(Verb::PeekEeprom, address)
    }

    pub const fn sleep() -> Self {
        Self::new(Verb::Sleep, 0)
    }

    pub const fn wake() -> Self {
        Self::new(Verb::Wake, 0)
    }

    pub const fn step_brightness() -> Self {
        Self::new(Verb::StepBrightness, 0)
    }

    pub const fn stereo_3d(enabled: bool) -> Self {
        Self::new(Verb::Mode3d, if enabled { 1 } else { 0 })
    }

    /// The verb as a known opcode, if it is one
    pub fn known_verb(&self) -> Option<Verb> {
        Verb::try_from(self.verb).ok()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.known_verb() {
            Some(verb) => write!(f, "{:?}({:#04x})", verb, self.noun),
            None => write!(f, "{:#04x}({:#04x})", self.verb, self.noun),
        }
    }
}

/// Firmware version as stored in EEPROM bytes 0 (MSB) and 1 (LSB)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub msb: u8,
    pub lsb: u8,
}

impl FirmwareVersion {
    /// The two bytes handed back to a control-surface caller
    pub fn to_bytes(self) -> [u8; 2] {
        [self.msb, self.lsb]
    }
}

impl From<FirmwareVersion> for (u8, u8) {
    fn from(version: FirmwareVersion) -> Self {
        (version.msb, version.lsb)
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}.{:x}", self.msb, self.lsb)
    }
}

/// External control-surface operation codes
///
/// The numeric values are the ioctl numbers userspace tools already use, so
/// they must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ControlOp {
    GetFirmwareVersion = 1,
    Sleep = 0x85,
    CycleBrightness = 0x88,
    KeepAlive = 0x8A,
    SetEnable3d = 0x8B,
}

impl TryFrom<u32> for ControlOp {
    type Error = ProtocolError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(ControlOp::GetFirmwareVersion),
            0x85 => Ok(ControlOp::Sleep),
            0x88 => Ok(ControlOp::CycleBrightness),
            0x8A => Ok(ControlOp::KeepAlive),
            0x8B => Ok(ControlOp::SetEnable3d),
            code => Err(ProtocolError::UnsupportedOperation { code }),
        }
    }
}

/// USB vendor/product pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsbId {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl UsbId {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl fmt::Display for UsbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// eMagin Z800
pub const Z800_ID: UsbId = UsbId::new(0x1641, 0x0120);

/// Second vendor ID shipped with the same headset
pub const X800_ID: UsbId = UsbId::new(0x1642, 0x0120);

/// Devices bound by the driver; both are driven identically
pub const SUPPORTED_DEVICES: [UsbId; 2] = [Z800_ID, X800_ID];

/// Transfer direction of a slot or submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Device to host (IN endpoint)
    Read,
    /// Host to device (OUT endpoint)
    Write,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verb_codes() {
        assert_eq!(Verb::PeekEeprom.code(), 0x81);
        assert_eq!(Verb::Wake.code(), 0x8A);
        assert_eq!(Verb::Flip3d.code(), 0x8C);
        assert_eq!(Verb::try_from(0x8B), Ok(Verb::Mode3d));
        assert_eq!(Verb::try_from(0x80), Err(0x80));
        assert_eq!(Verb::try_from(0x8D), Err(0x8D));
    }

    #[test]
    fn test_stereo_command_noun() {
        assert_eq!(Command::stereo_3d(true), Command::raw(0x8B, 1));
        assert_eq!(Command::stereo_3d(false), Command::raw(0x8B, 0));
    }

    #[test]
    fn test_command_display() {
        assert_eq!(Command::peek_eeprom(1).to_string(), "PeekEeprom(0x01)");
        assert_eq!(Command::raw(0x42, 7).to_string(), "0x42(0x07)");
    }

    #[test]
    fn test_control_op_codes() {
        assert_eq!(ControlOp::try_from(1).unwrap(), ControlOp::GetFirmwareVersion);
        assert_eq!(ControlOp::try_from(0x8A).unwrap(), ControlOp::KeepAlive);
        assert!(matches!(
            ControlOp::try_from(0x89),
            Err(ProtocolError::UnsupportedOperation { code: 0x89 })
        ));
    }

    #[test]
    fn test_firmware_version_display() {
        let version = FirmwareVersion { msb: 0x01, lsb: 0x08 };
        assert_eq!(version.to_string(), "1.8");
        assert_eq!(version.to_bytes(), [0x01, 0x08]);
        assert_eq!(<(u8, u8)>::from(version), (0x01, 0x08));
    }

    #[test]
    fn test_supported_devices() {
        assert_eq!(SUPPORTED_DEVICES.len(), 2);
        assert_eq!(Z800_ID.to_string(), "1641:0120");
        assert_eq!(X800_ID.vendor_id, 0x1642);
    }
}
