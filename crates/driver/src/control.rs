//! Control surface
//!
//! Maps the externally visible operations onto session calls. `dispatch`
//! mirrors an ioctl-style entry point: an operation code plus an argument in,
//! an optional reply out.

use crate::session::{DeviceSession, FIRMWARE_LSB_ADDRESS, FIRMWARE_MSB_ADDRESS};
use protocol::{Command, ControlOp, FirmwareVersion, ProtocolError};
use tracing::info;

/// Read the two firmware version bytes from EEPROM
pub fn get_firmware_version(session: &DeviceSession) -> Result<FirmwareVersion, ProtocolError> {
    let msb = session.request_eeprom_byte(FIRMWARE_MSB_ADDRESS)?;
    let lsb = session.request_eeprom_byte(FIRMWARE_LSB_ADDRESS)?;
    let version = FirmwareVersion { msb, lsb };
    info!("Session {}: firmware version {}", session.id(), version);
    Ok(version)
}

pub fn sleep(session: &DeviceSession) -> Result<(), ProtocolError> {
    session.write_command(Command::sleep())
}

/// Wake the displays; also serves as keep-alive
pub fn wake(session: &DeviceSession) -> Result<(), ProtocolError> {
    session.write_command(Command::wake())
}

pub fn cycle_brightness(session: &DeviceSession) -> Result<(), ProtocolError> {
    session.write_command(Command::step_brightness())
}

pub fn set_stereo_3d(session: &DeviceSession, enabled: bool) -> Result<(), ProtocolError> {
    session.write_command(Command::stereo_3d(enabled))
}

/// Reply of a dispatched operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlReply {
    None,
    /// Firmware version as (MSB, LSB)
    Bytes([u8; 2]),
}

/// Execute an operation given by its external code
///
/// For `SetEnable3d` any nonzero `arg` enables stereoscopic mode; other
/// operations ignore `arg`.
pub fn dispatch(
    session: &DeviceSession,
    code: u32,
    arg: u64,
) -> Result<ControlReply, ProtocolError> {
    let op = ControlOp::try_from(code)?;
    info!("Session {}: control operation {:?}", session.id(), op);

    match op {
        ControlOp::GetFirmwareVersion => {
            get_firmware_version(session).map(|v| ControlReply::Bytes(v.to_bytes()))
        }
        ControlOp::Sleep => sleep(session).map(|_| ControlReply::None),
        ControlOp::CycleBrightness => cycle_brightness(session).map(|_| ControlReply::None),
        ControlOp::KeepAlive => wake(session).map(|_| ControlReply::None),
        ControlOp::SetEnable3d => set_stereo_3d(session, arg != 0).map(|_| ControlReply::None),
    }
}
