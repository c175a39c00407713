//! Response classification.
//!
//! Camera replies are matched by suffix: bytes are accumulated until the
//! text ends with one of up to four expected terminators, or a deadline
//! passes.

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::reader::is_timeout;
use crate::protocol::status::{self, status_reply};
use log::{debug, trace};
use std::thread;
use std::time::{Duration, Instant};

/// Default deadline for a control command reply.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Accumulated text is trimmed to this many bytes when it grows past
/// [`MAX_RESPONSE_LEN`]. Longer than any terminator.
const KEEP_TAIL_LEN: usize = 64;

/// Cap on the accumulation buffer within one wait.
pub const MAX_RESPONSE_LEN: usize = 4096;

const POLL_INTERVAL: Duration = Duration::from_micros(500);

/// Up to four candidate reply terminators, checked in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Terminators<'a> {
    slots: [Option<&'a str>; 4],
}

impl<'a> Terminators<'a> {
    /// Build a set from explicit slots. Empty slots never match.
    pub const fn new(slots: [Option<&'a str>; 4]) -> Self {
        Self { slots }
    }

    /// A set with a single terminator in the first slot.
    pub const fn single(terminator: &'a str) -> Self {
        Self::new([Some(terminator), None, None, None])
    }

    /// Index of the first terminator that `text` ends with.
    pub fn match_suffix(&self, text: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.is_some_and(|t| !t.is_empty() && text.ends_with(t)))
    }

    /// The terminator stored at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&'a str> {
        self.slots
            .get(index)
            .copied()
            .flatten()
    }
}

impl Terminators<'static> {
    /// `OK\r\n`, `ERR\r\n`, `BUSY\r\n`, `NONE\r\n`: replies to control commands.
    pub const COMMAND: Self = Self::new([
        Some(status::OK),
        Some(status::ERR),
        Some(status::BUSY),
        Some(status::NONE),
    ]);

    /// `READY`, `ERR`, `BUSY`, `NONE`: the `get_status` reply prefixes.
    pub const STATUS: Self = Self::new([
        Some(status_reply::READY),
        Some(status_reply::ERR),
        Some(status_reply::BUSY),
        Some(status_reply::NONE),
    ]);
}

impl Default for Terminators<'static> {
    fn default() -> Self {
        Self::COMMAND
    }
}

/// Wait for a reply ending in one of `terminators`.
///
/// Bytes are appended to `data` (zero bytes are skipped) and the suffix is
/// tested after every byte, so the function returns as soon as a terminator
/// completes and leaves anything after it unread. Returns the 0-based index
/// of the matching terminator, or `None` when `timeout` passes first; in that
/// case `data` is cleared.
pub fn wait_response<P: Port + ?Sized>(
    port: &mut P,
    timeout: Duration,
    terminators: &Terminators<'_>,
    data: &mut String,
) -> Result<Option<usize>> {
    data.reserve(32);
    let start = Instant::now();
    let mut buf = [0u8; 1];

    loop {
        while port.bytes_available()? > 0 {
            let byte = match port.read(&mut buf) {
                Ok(1) => buf[0],
                Ok(_) => break,
                Err(e) if is_timeout(&e) => break,
                Err(e) => return Err(Error::Io(e)),
            };
            if byte == 0 {
                continue;
            }

            data.push(char::from(byte));
            if data.len() > MAX_RESPONSE_LEN {
                trim_to_tail(data);
            }

            if let Some(index) = terminators.match_suffix(data) {
                trace!("Matched terminator {index}: {:?}", terminators.get(index));
                return Ok(Some(index));
            }
        }

        if start.elapsed() >= timeout {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    let leftover = data.trim();
    if !leftover.is_empty() {
        debug!("Unrecognized reply discarded: {leftover:?}");
    }
    data.clear();
    Ok(None)
}

/// Keep only the last [`KEEP_TAIL_LEN`] bytes, cut on a char boundary.
fn trim_to_tail(data: &mut String) {
    let mut cut = data
        .len()
        .saturating_sub(KEEP_TAIL_LEN);
    while !data.is_char_boundary(cut) {
        cut += 1;
    }
    data.drain(..cut);
}
