//! Camera status replies.

use std::fmt;

/// Reply to a successful control command.
pub const OK: &str = "OK\r\n";
/// Reply to a failed control command.
pub const ERR: &str = "ERR\r\n";
/// The camera is still working on a previous command.
pub const BUSY: &str = "BUSY\r\n";
/// Nothing to report.
pub const NONE: &str = "NONE\r\n";

/// `get_status` reply prefixes.
///
/// `get_status` answers `READY` instead of `OK` and keeps writing on the same
/// line (`READY,<image size>\r\n`), so its terminators carry no line ending.
pub mod status_reply {
    /// Camera idle, last image available.
    pub const READY: &str = "READY";
    /// Camera in error.
    pub const ERR: &str = "ERR";
    /// Camera busy.
    pub const BUSY: &str = "BUSY";
    /// No image / unknown state.
    pub const NONE: &str = "NONE";
}

/// Classified camera status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Status {
    /// `OK` or `READY`.
    Ok,
    /// `ERR`.
    Error,
    /// `BUSY`.
    Busy,
    /// `NONE` or unknown.
    None,
    /// Nothing recognizable arrived before the deadline.
    NoResponse,
}

impl Status {
    /// Map a classifier result to a status.
    ///
    /// Terminator sets are always ordered ok, error, busy, none.
    pub fn from_match(index: Option<usize>) -> Self {
        match index {
            Some(0) => Self::Ok,
            Some(1) => Self::Error,
            Some(2) => Self::Busy,
            Some(3) => Self::None,
            _ => Self::NoResponse,
        }
    }

    /// Whether the camera can accept a new command.
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ok | Self::None)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Error => write!(f, "ERR"),
            Self::Busy => write!(f, "BUSY"),
            Self::None => write!(f, "NONE"),
            Self::NoResponse => write!(f, "no response"),
        }
    }
}
