//! ASCII command lines.
//!
//! Every request to the camera is a single line:
//!
//! ```text
//! #<name>[=<arg>[,<arg>...]]\r\n
//! ```

use crate::error::Result;
use crate::port::Port;
use log::trace;
use std::fmt;

/// Encoding mode requested from `get_image`.
pub const RAW_ENCODING: &str = "RAW";

/// A camera command with its already-stringified arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<String>,
}

impl Command {
    /// Create a command without arguments.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl ToString) -> Self {
        self.args
            .push(arg.to_string());
        self
    }

    /// Append several arguments in order.
    #[must_use]
    pub fn args<I, T>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        self.args
            .extend(
                args.into_iter()
                    .map(|a| a.to_string()),
            );
        self
    }

    /// Command name without the leading `#`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `#get_status`
    pub fn get_status() -> Self {
        Self::new("get_status")
    }

    /// `#get_info`
    pub fn get_info() -> Self {
        Self::new("get_info")
    }

    /// `#take_snapshot`
    pub fn take_snapshot() -> Self {
        Self::new("take_snapshot")
    }

    /// `#reset`
    pub fn reset() -> Self {
        Self::new("reset")
    }

    /// `#get_image=<offset>,<length>,RAW`
    pub fn get_image(offset: usize, length: usize) -> Self {
        Self::new("get_image")
            .arg(offset)
            .arg(length)
            .arg(RAW_ENCODING)
    }

    /// Encode the full request line including CR LF.
    pub fn build(&self) -> Vec<u8> {
        self.to_string()
            .into_bytes()
    }

    /// Write the line to the port and flush.
    pub fn send<P: Port + ?Sized>(&self, port: &mut P) -> Result<()> {
        let data = self.build();
        trace!("Sending command {}: {} bytes", self.name, data.len());
        port.write_all_bytes(&data)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.name)?;
        if !self
            .args
            .is_empty()
        {
            write!(f, "={}", self.args.join(","))?;
        }
        f.write_str("\r\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::FakePort;

    #[test]
    fn test_build_with_single_argument() {
        let cmd = Command::new("set_quality").arg(90);
        assert_eq!(cmd.build(), b"#set_quality=90\r\n");
    }

    #[test]
    fn test_build_without_arguments_has_no_equals() {
        assert_eq!(Command::get_status().build(), b"#get_status\r\n");
    }

    #[test]
    fn test_build_joins_arguments_with_commas() {
        let cmd = Command::new("set_wb_offset").args([-3, 0, 12]);
        assert_eq!(cmd.build(), b"#set_wb_offset=-3,0,12\r\n");
    }

    #[test]
    fn test_get_image_request() {
        let cmd = Command::get_image(16384, 512);
        assert_eq!(cmd.name(), "get_image");
        assert_eq!(cmd.build(), b"#get_image=16384,512,RAW\r\n");
    }

    #[test]
    fn test_send_writes_whole_line() {
        let mut port = FakePort::new();
        Command::take_snapshot()
            .send(&mut port)
            .unwrap();
        assert_eq!(port.written(), b"#take_snapshot\r\n");
        assert_eq!(port.commands(), ["#take_snapshot"]);
    }
}
