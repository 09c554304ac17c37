//! Common utilities for the Z800 driver
//!
//! This crate provides what the driver core and its tests share: the
//! transport seam the core submits transfers through, logging setup and error
//! handling. The simulated headset in `test_utils` is built only with the
//! `test-utils` feature.

pub mod error;
pub mod logging;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transport;

pub use error::{Error, Result};
pub use logging::setup_logging;
pub use transport::{
    Buffer, Completion, CompletionFn, Rejected, Transfer, TransferStatus, Transport, new_buffer,
};
