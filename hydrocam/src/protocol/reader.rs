//! Deadline-bounded reads on top of [`Port`].
//!
//! Every wait here polls `bytes_available` against a monotonic clock with an
//! explicit upper bound. A timeout is an ordinary outcome (`None`, `false`,
//! a short buffer); only transport failures surface as `Err`.

use crate::error::{Error, Result};
use crate::port::Port;
use log::trace;
use std::io::ErrorKind;
use std::thread;
use std::time::{Duration, Instant};

/// Pause between two `bytes_available` polls.
const POLL_INTERVAL: Duration = Duration::from_micros(500);

/// Upper bound on bytes thrown away by a single [`drain`].
const MAX_DRAIN_BYTES: usize = 64 * 1024;

/// Whether an I/O error only means "nothing arrived in time".
pub(crate) fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

/// Wait until at least `min` bytes are buffered or `timeout` elapses.
///
/// Returns the number of bytes available when the wait ended, which is below
/// `min` on timeout. A zero timeout checks exactly once.
pub fn wait_available<P: Port + ?Sized>(port: &mut P, min: usize, timeout: Duration) -> Result<usize> {
    let start = Instant::now();
    loop {
        let available = port.bytes_available()?;
        if available >= min || start.elapsed() >= timeout {
            return Ok(available);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Read one byte, waiting at most `timeout` for it to arrive.
pub fn read_byte<P: Port + ?Sized>(port: &mut P, timeout: Duration) -> Result<Option<u8>> {
    if wait_available(port, 1, timeout)? == 0 {
        return Ok(None);
    }

    let mut buf = [0u8; 1];
    match port.read(&mut buf) {
        Ok(1) => Ok(Some(buf[0])),
        Ok(_) => Ok(None),
        Err(e) if is_timeout(&e) => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Consume bytes until `target` has been seen.
///
/// `timeout` bounds the wait for each individual byte. Returns `false` if the
/// stream went quiet before the target appeared; the bytes consumed so far
/// are lost either way.
pub fn find<P: Port + ?Sized>(port: &mut P, target: &[u8], timeout: Duration) -> Result<bool> {
    if target.is_empty() {
        return Ok(true);
    }

    let mut window: Vec<u8> = Vec::with_capacity(target.len());
    while let Some(byte) = read_byte(port, timeout)? {
        if window.len() == target.len() {
            window.remove(0);
        }
        window.push(byte);
        if window == target {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Read bytes up to `delimiter`.
///
/// The delimiter is consumed but not returned. Reading also stops after
/// `limit` bytes (if given) or when no byte arrives within `timeout`.
pub fn read_until<P: Port + ?Sized>(
    port: &mut P,
    delimiter: u8,
    limit: Option<usize>,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    while limit.is_none_or(|max| out.len() < max) {
        match read_byte(port, timeout)? {
            Some(byte) if byte == delimiter => break,
            Some(byte) => out.push(byte),
            None => break,
        }
    }
    Ok(out)
}

/// Throw away stale bytes sitting in the receive buffer.
///
/// If nothing is buffered yet, waits `settle` once for late arrivals, then
/// reads until the buffer is empty, pausing `spacing` between bytes so a
/// trickling reply is caught too. Returns the number of bytes discarded.
pub fn drain<P: Port + ?Sized>(port: &mut P, settle: Duration, spacing: Duration) -> Result<usize> {
    if port.bytes_available()? == 0 {
        thread::sleep(settle);
    }

    let mut discarded = 0;
    let mut buf = [0u8; 256];
    while discarded < MAX_DRAIN_BYTES && port.bytes_available()? > 0 {
        match port.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => discarded += n,
            Err(e) if is_timeout(&e) => break,
            Err(e) => return Err(Error::Io(e)),
        }
        if !spacing.is_zero() {
            thread::sleep(spacing);
        }
    }

    if discarded > 0 {
        trace!("Discarded {discarded} stale bytes");
    }
    Ok(discarded)
}

/// Parse the leading decimal integer of `text`, like C's `atol`.
///
/// Leading whitespace and one sign are accepted. Returns `None` when no digit
/// follows, or on overflow.
pub fn parse_leading_int(text: &[u8]) -> Option<i64> {
    let text = text.trim_ascii_start();
    let (negative, digits) = match text.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some((b'+', rest)) => (false, rest),
        _ => (false, text),
    };

    let digits: Vec<u8> = digits
        .iter()
        .copied()
        .take_while(u8::is_ascii_digit)
        .collect();
    if digits.is_empty() {
        return None;
    }

    let mut value: i64 = 0;
    for digit in digits {
        value = value
            .checked_mul(10)?
            .checked_add(i64::from(digit - b'0'))?;
    }
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::FakePort;

    const SHORT: Duration = Duration::from_millis(5);

    #[test]
    fn test_wait_available_returns_immediately_when_ready() {
        let mut port = FakePort::with_input(b"abc");
        let start = Instant::now();
        assert_eq!(wait_available(&mut port, 3, Duration::from_secs(5)).unwrap(), 3);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_wait_available_times_out() {
        let mut port = FakePort::with_input(b"a");
        let start = Instant::now();
        assert_eq!(wait_available(&mut port, 3, Duration::from_millis(20)).unwrap(), 1);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_read_byte_none_on_silence() {
        let mut port = FakePort::new();
        assert_eq!(read_byte(&mut port, SHORT).unwrap(), None);
    }

    #[test]
    fn test_find_consumes_through_target() {
        let mut port = FakePort::with_input(b"xx#quality:77\r\n");
        assert!(find(&mut port, b"#quality:", SHORT).unwrap());
        assert_eq!(read_until(&mut port, b'\r', None, SHORT).unwrap(), b"77");
    }

    #[test]
    fn test_find_handles_overlapping_prefix() {
        let mut port = FakePort::with_input(b"aaab");
        assert!(find(&mut port, b"aab", SHORT).unwrap());
        assert_eq!(port.pending(), 0);
    }

    #[test]
    fn test_find_missing_target() {
        let mut port = FakePort::with_input(b"#firmware:1.2\r\n");
        assert!(!find(&mut port, b"#quality:", SHORT).unwrap());
        assert_eq!(port.pending(), 0);
    }

    #[test]
    fn test_read_until_respects_limit() {
        let mut port = FakePort::with_input(b"123456789012345\r");
        let out = read_until(&mut port, b'\r', Some(11), SHORT).unwrap();
        assert_eq!(out.len(), 11);
        assert_eq!(port.pending(), 5);
    }

    #[test]
    fn test_drain_empties_buffer() {
        let mut port = FakePort::with_input(&[0x55; 1000]);
        assert_eq!(drain(&mut port, SHORT, Duration::ZERO).unwrap(), 1000);
        assert_eq!(port.pending(), 0);
    }

    #[test]
    fn test_parse_leading_int() {
        assert_eq!(parse_leading_int(b"77"), Some(77));
        assert_eq!(parse_leading_int(b" -12,4"), Some(-12));
        assert_eq!(parse_leading_int(b"1234\r"), Some(1234));
        assert_eq!(parse_leading_int(b"off"), None);
        assert_eq!(parse_leading_int(b""), None);
        assert_eq!(parse_leading_int(b"99999999999999999999"), None);
    }
}
