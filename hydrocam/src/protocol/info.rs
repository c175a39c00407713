//! Info-block scanning.
//!
//! `#get_info` makes the camera dump its whole configuration, one field per
//! line:
//!
//! ```text
//! #device_type:HydroCAM\r\n
//! #quality:77\r\n
//! #autoexposure_region:-20,-10,40,30\r\n
//! ...
//! ```
//!
//! The dump is scanned, not parsed: each query re-issues `#get_info`, looks
//! for one label, optionally skips some comma-separated sub-fields, reads the
//! value up to an end delimiter and throws the rest of the dump away.

use crate::error::Result;
use crate::port::Port;
use crate::protocol::command::Command;
use crate::protocol::reader::{find, parse_leading_int, read_until, wait_available};
use log::{debug, trace};
use std::time::Duration;

/// Digit budget of an integer field. Reading this many bytes without
/// reaching the end delimiter counts as overflow.
const INT_FIELD_LIMIT: usize = 11;

/// Which field to extract from the info dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoQuery<'a> {
    /// Literal text right before the value, e.g. `#quality:`.
    pub label: &'a str,
    /// Byte ending the value.
    pub end: u8,
    /// How many `skip_delimiter`s to pass after the label.
    pub skips: usize,
    /// Sub-field separator.
    pub skip_delimiter: u8,
}

impl<'a> InfoQuery<'a> {
    /// Query the whole value after `label`, up to the carriage return.
    pub const fn new(label: &'a str) -> Self {
        Self {
            label,
            end: b'\r',
            skips: 0,
            skip_delimiter: b',',
        }
    }

    /// Stop at `end` instead of the carriage return.
    #[must_use]
    pub const fn with_end(mut self, end: u8) -> Self {
        self.end = end;
        self
    }

    /// Skip `skips` sub-fields before reading.
    #[must_use]
    pub const fn with_skips(mut self, skips: usize) -> Self {
        self.skips = skips;
        self
    }

    /// Separate sub-fields with `delimiter` instead of a comma.
    #[must_use]
    pub const fn with_skip_delimiter(mut self, delimiter: u8) -> Self {
        self.skip_delimiter = delimiter;
        self
    }

    /// The `n`-th comma-separated sub-field: all but the last end on a comma.
    #[must_use]
    pub const fn field(label: &'a str, n: usize, count: usize) -> Self {
        let query = Self::new(label).with_skips(n);
        if n + 1 < count {
            query.with_end(b',')
        } else {
            query
        }
    }
}

/// Timing of one info query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoTiming {
    /// How long to wait for the dump to start after `#get_info`.
    pub response_timeout: Duration,
    /// Per-byte wait while searching for the label.
    pub search_timeout: Duration,
    /// Per-byte wait once the label was found.
    pub settle_timeout: Duration,
}

impl Default for InfoTiming {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(5),
            search_timeout: Duration::from_millis(1000),
            settle_timeout: Duration::from_millis(15),
        }
    }
}

/// Issue `#get_info` and wait for the dump to start arriving.
///
/// Returns whether any byte arrived within the response timeout.
pub fn request_info<P: Port + ?Sized>(port: &mut P, timing: &InfoTiming) -> Result<bool> {
    Command::get_info().send(port)?;
    Ok(wait_available(port, 1, timing.response_timeout)? > 0)
}

/// Scan an already-arriving dump for `query` and return the raw value bytes.
///
/// `limit` caps the value length. `None` means the label never appeared;
/// the rest of the dump is then left unread.
pub fn scan_raw<P: Port + ?Sized>(
    port: &mut P,
    query: &InfoQuery<'_>,
    limit: Option<usize>,
    timing: &InfoTiming,
) -> Result<Option<Vec<u8>>> {
    if !find(port, query.label.as_bytes(), timing.search_timeout)? {
        debug!("Info label {:?} not found", query.label);
        return Ok(None);
    }

    for _ in 0..query.skips {
        find(port, &[query.skip_delimiter], timing.settle_timeout)?;
    }
    let value = read_until(port, query.end, limit, timing.settle_timeout)?;
    trace!(
        "Info {:?} -> {:?}",
        query.label,
        String::from_utf8_lossy(&value)
    );

    discard_remaining_lines(port, timing.settle_timeout)?;
    Ok(Some(value))
}

/// Read and drop every further `#`-prefixed line of the dump.
fn discard_remaining_lines<P: Port + ?Sized>(port: &mut P, timeout: Duration) -> Result<()> {
    let mut lines = 0usize;
    while find(port, b"#", timeout)? {
        read_until(port, b'\n', None, timeout)?;
        lines += 1;
    }
    trace!("Dropped {lines} trailing info lines");
    Ok(())
}

/// Scan for a text field. `None` when the label is missing.
pub fn scan_string<P: Port + ?Sized>(
    port: &mut P,
    query: &InfoQuery<'_>,
    timing: &InfoTiming,
) -> Result<Option<String>> {
    Ok(scan_raw(port, query, None, timing)?
        .map(|value| String::from_utf8_lossy(&value).into_owned()))
}

/// Scan for an integer field.
///
/// `None` when the label is missing, the value is empty or not numeric, or
/// the value runs to 11 or more bytes (overflow).
pub fn scan_int<P: Port + ?Sized>(
    port: &mut P,
    query: &InfoQuery<'_>,
    timing: &InfoTiming,
) -> Result<Option<i64>> {
    let Some(value) = scan_raw(port, query, Some(INT_FIELD_LIMIT), timing)? else {
        return Ok(None);
    };
    if value.len() >= INT_FIELD_LIMIT {
        debug!("Info {:?} overflows the integer budget", query.label);
        return Ok(None);
    }
    Ok(parse_leading_int(&value))
}

/// `#get_info`, then [`scan_string`].
pub fn query_string<P: Port + ?Sized>(
    port: &mut P,
    query: &InfoQuery<'_>,
    timing: &InfoTiming,
) -> Result<Option<String>> {
    if !request_info(port, timing)? {
        debug!("No reply to get_info");
        return Ok(None);
    }
    scan_string(port, query, timing)
}

/// `#get_info`, then [`scan_int`].
pub fn query_int<P: Port + ?Sized>(
    port: &mut P,
    query: &InfoQuery<'_>,
    timing: &InfoTiming,
) -> Result<Option<i64>> {
    if !request_info(port, timing)? {
        debug!("No reply to get_info");
        return Ok(None);
    }
    scan_int(port, query, timing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::FakePort;

    const DUMP: &[u8] = b"#device_type:HydroCAM\r\n\
#firmware:2.1.4\r\n\
#quality:77\r\n\
#wb_offset:10,20,30\r\n\
#autofocus_point:-5,12\r\n\
#serial_id:123456789012\r\n\
#night_mode:auto\r\n";

    fn timing() -> InfoTiming {
        InfoTiming {
            response_timeout: Duration::from_millis(50),
            search_timeout: Duration::from_millis(20),
            settle_timeout: Duration::from_millis(5),
        }
    }

    fn dump_port() -> FakePort {
        FakePort::with_responder(|line| {
            if line == "#get_info" {
                DUMP.to_vec()
            } else {
                Vec::new()
            }
        })
    }

    #[test]
    fn test_int_field() {
        let mut port = FakePort::with_input(b"...#quality:77\r\n");
        let value = scan_int(&mut port, &InfoQuery::new("#quality:"), &timing()).unwrap();
        assert_eq!(value, Some(77));
    }

    #[test]
    fn test_int_field_with_skip() {
        let mut port = FakePort::with_input(b"#wb_offset:10,20,30\r\n");
        let query = InfoQuery::new("#wb_offset:")
            .with_end(b',')
            .with_skips(1);
        assert_eq!(scan_int(&mut port, &query, &timing()).unwrap(), Some(20));
    }

    #[test]
    fn test_last_sub_field_ends_at_carriage_return() {
        let mut port = FakePort::with_input(b"#wb_offset:10,20,30\r\n");
        let query = InfoQuery::field("#wb_offset:", 2, 3);
        assert_eq!(scan_int(&mut port, &query, &timing()).unwrap(), Some(30));
    }

    #[test]
    fn test_negative_int_field() {
        let mut port = FakePort::with_input(b"#autofocus_point:-5,12\r\n");
        let query = InfoQuery::field("#autofocus_point:", 0, 2);
        assert_eq!(scan_int(&mut port, &query, &timing()).unwrap(), Some(-5));
    }

    #[test]
    fn test_overflowing_int_is_rejected() {
        let mut port = FakePort::with_input(b"#serial_id:123456789012\r\n");
        let value = scan_int(&mut port, &InfoQuery::new("#serial_id:"), &timing()).unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn test_ten_digits_fit() {
        let mut port = FakePort::with_input(b"#serial_id:1234567890\r\n");
        let value = scan_int(&mut port, &InfoQuery::new("#serial_id:"), &timing()).unwrap();
        assert_eq!(value, Some(1_234_567_890));
    }

    #[test]
    fn test_missing_label() {
        let mut port = FakePort::with_input(b"#firmware:2.1.4\r\n");
        let value = scan_string(&mut port, &InfoQuery::new("#quality:"), &timing()).unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn test_query_string_drains_dump() {
        let mut port = dump_port();
        let value = query_string(&mut port, &InfoQuery::new("#firmware:"), &timing()).unwrap();
        assert_eq!(value.as_deref(), Some("2.1.4"));
        assert_eq!(port.pending(), 0);
        assert_eq!(port.commands(), ["#get_info"]);
    }

    #[test]
    fn test_query_each_call_reissues_command() {
        let mut port = dump_port();
        let t = timing();
        assert_eq!(
            query_int(&mut port, &InfoQuery::new("#quality:"), &t).unwrap(),
            Some(77)
        );
        assert_eq!(
            query_string(&mut port, &InfoQuery::new("#night_mode:"), &t)
                .unwrap()
                .as_deref(),
            Some("auto")
        );
        assert_eq!(port.commands().len(), 2);
    }

    #[test]
    fn test_query_without_reply() {
        let mut port = FakePort::new();
        let value = query_int(&mut port, &InfoQuery::new("#quality:"), &timing()).unwrap();
        assert_eq!(value, None);
    }
}
