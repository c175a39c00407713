//! Error types for hydrocam.
//!
//! Timeouts, short reads and missing info fields are ordinary outcomes of the
//! camera protocol and are reported through return values (`Option`,
//! [`Status::NoResponse`](crate::Status::NoResponse), byte counts). This type
//! only carries failures of the transport itself and caller-side problems.

use std::io;
use thiserror::Error;

/// Result type for hydrocam operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for hydrocam operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, output sink).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The camera answered with something the driver cannot use.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid caller-supplied configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The embedding application requested the operation to stop.
    #[error("Operation interrupted")]
    Interrupted,
}

impl Error {
    /// Whether this error came from an interruption request.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}
