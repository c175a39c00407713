//! HydroCAM serial protocol.
//!
//! Requests are ASCII lines (`#name=arg,arg\r\n`). Control commands answer
//! with a short status line, `get_info` with a multi-line dump and
//! `get_image` with two header bytes followed by raw image bytes.

pub mod command;
pub mod info;
pub mod reader;
pub mod response;
pub mod status;

// Re-export common types
pub use command::Command;
pub use info::{InfoQuery, InfoTiming};
pub use response::{Terminators, wait_response};
pub use status::Status;
