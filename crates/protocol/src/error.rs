//! Protocol error types

use thiserror::Error;

/// A transfer submission or completion failure reported by the transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// The slot already has a submission outstanding
    #[error("Transfer slot already in flight")]
    InFlight,

    /// The device is no longer present
    #[error("Device not present")]
    NoDevice,

    /// The transfer did not complete within the transport timeout
    #[error("Transfer timed out")]
    Timeout,

    /// The endpoint stalled
    #[error("Endpoint stalled")]
    Pipe,

    /// The device sent more data than the buffer holds
    #[error("Transfer overflow")]
    Overflow,

    /// Insufficient permissions on the device node
    #[error("Access denied")]
    Access,

    /// Low-level I/O error
    #[error("I/O error")]
    Io,

    /// Anything the transport could not classify
    #[error("Transfer failed: {message}")]
    Other { message: String },
}

/// Errors surfaced to control-surface callers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// No peek response arrived within the fixed window
    #[error("Timed out waiting for device response")]
    Timeout,

    /// The device was detached; the session stays unusable until discarded
    #[error("Device has been disconnected")]
    DeviceGone,

    /// The session is closing or closed
    #[error("Session is closed")]
    SessionClosed,

    /// Unknown external operation code
    #[error("Unsupported operation code {code:#x}")]
    UnsupportedOperation { code: u32 },

    /// The transport rejected a submission
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
