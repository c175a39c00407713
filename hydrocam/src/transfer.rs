//! Chunked JPEG transfer.
//!
//! The camera serves the last snapshot through ranged reads:
//!
//! ```text
//! request:  #get_image=<offset>,<length>,RAW\r\n
//! reply:    +-----+-----+-------------------------------+
//!           | H0  | H1  |  <length> image bytes         |
//!           +-----+-----+-------------------------------+
//!           | header    |  zero padded past end of image |
//! ```
//!
//! Three signals decide when an image is complete, and none of them is
//! reliable on its own:
//!
//! - the declared image size (from `get_status`), which is sometimes wrong;
//! - the JPEG end tag `FF D9`, which can also show up early, e.g. at the end
//!   of an embedded thumbnail that is followed by another `FF D8` start tag;
//! - a wall-clock deadline, for a wedged camera.
//!
//! Bytes following an end tag are held back until the chunk ends. If a start
//! tag reopens the frame within the same chunk they are written out, else
//! they are dropped and the transfer stops. Once the declared size has been
//! written, the first zero payload byte means the camera is padding and the
//! transfer stops as well.

use crate::error::{Error, Result};
use crate::is_interrupted_requested;
use crate::port::Port;
use crate::protocol::command::Command;
use crate::protocol::reader::{drain, is_timeout, read_byte, wait_available};
use log::{debug, info, trace, warn};
use std::io::Write;
use std::time::{Duration, Instant};

/// Undocumented bytes in front of every `get_image` reply.
pub const HEADER_LEN: usize = 2;

/// Extra bytes requested past the declared size so the end tag is not missed.
pub const TRAILING_SLACK: usize = 12;

/// Default bytes per `get_image` request.
pub const DEFAULT_CHUNK_SIZE: usize = 16384;

/// Below this chunk size the camera tends to stall.
pub const MIN_RELIABLE_CHUNK_SIZE: usize = 512;

/// JPEG start-of-image tag.
pub const START_MARKER: [u8; 2] = [0xFF, 0xD8];

/// JPEG end-of-image tag.
pub const END_MARKER: [u8; 2] = [0xFF, 0xD9];

/// Transfer engine configuration.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Bytes requested per `get_image` command.
    pub chunk_size: usize,
    /// Upper bound on the whole transfer.
    pub global_timeout: Duration,
    /// Wait for the first byte after each request.
    pub response_timeout: Duration,
    /// Wait for each following byte of a chunk.
    pub byte_timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            global_timeout: Duration::from_secs(120),
            response_timeout: Duration::from_secs(5),
            byte_timeout: Duration::from_millis(10),
        }
    }
}

impl TransferConfig {
    /// Set the chunk size.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the global deadline.
    #[must_use]
    pub fn with_global_timeout(mut self, timeout: Duration) -> Self {
        self.global_timeout = timeout;
        self
    }

    /// Set the per-request response timeout.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the per-byte timeout.
    #[must_use]
    pub fn with_byte_timeout(mut self, timeout: Duration) -> Self {
        self.byte_timeout = timeout;
        self
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk size must be at least 1 byte".into()));
        }
        if self.chunk_size < MIN_RELIABLE_CHUNK_SIZE {
            warn!(
                "Chunk size {} is below {MIN_RELIABLE_CHUNK_SIZE} bytes, the camera may stall",
                self.chunk_size
            );
        }
        Ok(())
    }
}

/// Timing of a single [`fetch_chunk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkTiming {
    /// Wait for the reply to start.
    pub response_timeout: Duration,
    /// Port read timeout while copying the chunk.
    pub read_timeout: Duration,
    /// Wait for stale bytes before the request when nothing is buffered.
    pub drain_settle: Duration,
    /// Pause between stale bytes while draining.
    pub drain_spacing: Duration,
}

impl Default for ChunkTiming {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_millis(15),
            drain_settle: Duration::from_millis(25),
            drain_spacing: Duration::from_millis(1),
        }
    }
}

/// Fetch `buf.len()` image bytes starting at `offset`.
///
/// Stale input is drained first and the two header bytes are discarded.
/// Returns the number of bytes copied, which is short (possibly 0) when the
/// camera does not answer or stalls mid-chunk. Never copies more than
/// `buf.len()` bytes.
pub fn fetch_chunk<P: Port + ?Sized>(
    port: &mut P,
    buf: &mut [u8],
    offset: usize,
    timing: &ChunkTiming,
) -> Result<usize> {
    drain(port, timing.drain_settle, timing.drain_spacing)?;
    Command::get_image(offset, buf.len()).send(port)?;

    if wait_available(port, HEADER_LEN + 1, timing.response_timeout)? == 0 {
        warn!("No response to get_image at offset {offset}");
        return Ok(0);
    }
    for _ in 0..HEADER_LEN {
        read_byte(port, timing.read_timeout)?;
    }

    let previous = port.timeout();
    port.set_timeout(timing.read_timeout)?;
    let copied = read_bounded(port, buf, timing.read_timeout);
    port.set_timeout(previous)?;
    let copied = copied?;

    if copied != buf.len() {
        warn!(
            "Unexpected byte count: expected {}, read {copied}",
            buf.len()
        );
    }
    Ok(copied)
}

/// Fill `buf` until it is full or the port stays silent for `timeout`.
fn read_bounded<P: Port + ?Sized>(port: &mut P, buf: &mut [u8], timeout: Duration) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match port.read(&mut buf[filled..]) {
            Ok(n) if n > 0 => {
                filled += n;
                continue;
            },
            Ok(_) => {},
            Err(e) if is_timeout(&e) => {},
            Err(e) => return Err(Error::Io(e)),
        }
        if wait_available(port, 1, timeout)? == 0 {
            break;
        }
    }
    Ok(filled)
}

/// Why a transfer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Termination {
    /// A JPEG end tag closed the frame.
    EndMarker,
    /// The declared size was written and the camera started padding.
    LengthExhausted,
    /// The global deadline passed first.
    Deadline,
}

/// Outcome and diagnostics of one transfer.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransferReport {
    /// Declared image size the transfer worked against.
    pub image_size: usize,
    /// Chunk size used for the requests.
    pub chunk_size: usize,
    /// Bytes written to the sink.
    pub bytes_written: usize,
    /// Bytes received from the camera, headers included.
    pub bytes_read: usize,
    /// Rounds that received at least the first byte.
    pub chunks: usize,
    /// Rounds that received fewer bytes than requested.
    pub short_chunks: usize,
    /// Requests the camera never answered.
    pub silent_requests: usize,
    /// Why the transfer stopped.
    pub termination: Termination,
    /// Total transfer time.
    pub elapsed: Duration,
    /// Longest wait for a reply to start.
    pub max_response_latency: Duration,
    /// Longest wait between two bytes of a chunk.
    pub max_byte_spacing: Duration,
}

impl TransferReport {
    /// Whether the image ended on its own rather than on the deadline.
    pub fn is_complete(&self) -> bool {
        self.termination != Termination::Deadline
    }

    /// Written size minus declared size.
    #[allow(clippy::cast_possible_wrap)]
    pub fn size_difference(&self) -> i64 {
        self.bytes_written as i64 - self.image_size as i64
    }
}

/// Last four payload bytes seen.
#[derive(Debug, Default)]
struct MarkerWindow {
    bytes: [u8; 4],
    seen: usize,
}

impl MarkerWindow {
    fn push(&mut self, byte: u8) {
        self.bytes[self.seen % 4] = byte;
        self.seen += 1;
    }

    fn ends_with(&self, marker: [u8; 2]) -> bool {
        if self.seen < 2 {
            return false;
        }
        let last = self.bytes[(self.seen - 1) % 4];
        let prev = self.bytes[(self.seen - 2) % 4];
        [prev, last] == marker
    }
}

/// State of one image pull.
struct Session {
    image_size: usize,
    bytes_remaining: usize,
    next_offset: usize,
    bytes_read: usize,
    bytes_written: usize,
    window: MarkerWindow,
    end_of_frame: Option<Termination>,
    /// An end tag may still be revoked by a following start tag.
    reopenable: bool,
    held: Vec<u8>,
    out: Vec<u8>,
}

impl Session {
    fn new(image_size: usize) -> Self {
        Self {
            image_size,
            bytes_remaining: image_size + HEADER_LEN + TRAILING_SLACK,
            next_offset: 0,
            bytes_read: 0,
            bytes_written: 0,
            window: MarkerWindow::default(),
            end_of_frame: None,
            reopenable: false,
            held: Vec::new(),
            out: Vec::new(),
        }
    }

    fn write_limit(&self) -> usize {
        self.image_size + TRAILING_SLACK
    }

    fn finish(&mut self, reason: Termination) {
        if self
            .end_of_frame
            .is_none()
        {
            self.end_of_frame = Some(reason);
        }
        self.reopenable = false;
        if !self
            .held
            .is_empty()
        {
            trace!("Dropping {} bytes after end tag", self.held.len());
            self.held
                .clear();
        }
    }

    fn is_final(&self) -> bool {
        self.end_of_frame
            .is_some()
            && !self.reopenable
    }

    /// Feed one payload byte (header bytes never get here).
    fn accept(&mut self, byte: u8) {
        if self.is_final() {
            return;
        }

        if byte == 0 && self.bytes_written >= self.image_size {
            if self
                .end_of_frame
                .is_none()
            {
                debug!("Got 0 past the declared size, image data exhausted");
            }
            self.finish(Termination::LengthExhausted);
            return;
        }
        if self
            .end_of_frame
            .is_none()
            && self.bytes_written >= self.write_limit()
        {
            debug!("Declared size plus slack written without an end tag");
            self.finish(Termination::LengthExhausted);
            return;
        }

        if self
            .end_of_frame
            .is_some()
        {
            self.held
                .push(byte);
        } else {
            self.out
                .push(byte);
            self.bytes_written += 1;
        }

        self.window
            .push(byte);
        if self
            .end_of_frame
            .is_none()
            && self
                .window
                .ends_with(END_MARKER)
        {
            debug!("Got FFD9 end tag after {} bytes", self.bytes_written);
            self.end_of_frame = Some(Termination::EndMarker);
            self.reopenable = true;
        } else if self
            .window
            .ends_with(START_MARKER)
        {
            if self.reopenable {
                self.reopen();
            } else {
                trace!("Got FFD8 start tag");
            }
        }
    }

    /// A start tag followed the end tag: the frame goes on.
    fn reopen(&mut self) {
        let room = self
            .write_limit()
            .saturating_sub(self.bytes_written);
        let mut held = std::mem::take(&mut self.held);
        held.truncate(room);
        debug!(
            "Got FFD8 start tag after an end tag, reopening frame ({} held bytes kept)",
            held.len()
        );
        self.bytes_written += held.len();
        self.out
            .extend_from_slice(&held);
        self.end_of_frame = None;
        self.reopenable = false;
    }
}

/// Pull one image from the camera into `sink`.
///
/// `image_size` is the declared JPEG size. Zero fails with [`Error::Protocol`]
/// before any request. `progress` is called after every chunk with
/// (bytes written, declared size).
pub fn transfer_image<P, W, F>(
    port: &mut P,
    sink: &mut W,
    image_size: usize,
    config: &TransferConfig,
    mut progress: F,
) -> Result<TransferReport>
where
    P: Port + ?Sized,
    W: Write + ?Sized,
    F: FnMut(usize, usize),
{
    config.validate()?;
    if image_size == 0 {
        return Err(Error::Protocol("image size must be known before a transfer".into()));
    }

    debug!(
        "Starting image transfer: {image_size} bytes in {} byte chunks",
        config.chunk_size
    );

    let start = Instant::now();
    let mut session = Session::new(image_size);
    let mut chunks = 0usize;
    let mut short_chunks = 0usize;
    let mut silent_requests = 0usize;
    let mut max_response_latency = Duration::ZERO;
    let mut max_byte_spacing = Duration::ZERO;
    let mut resync = false;

    while session
        .end_of_frame
        .is_none()
    {
        if start.elapsed() >= config.global_timeout {
            warn!("Transfer timed out after {:?}", config.global_timeout);
            session.finish(Termination::Deadline);
            break;
        }
        if is_interrupted_requested() {
            sink.write_all(&session.out)?;
            sink.flush()?;
            return Err(Error::Interrupted);
        }

        let request = config
            .chunk_size
            .min(
                session
                    .bytes_remaining
                    .max(1),
            );

        if resync {
            drain(port, Duration::ZERO, Duration::ZERO)?;
            resync = false;
        }

        let request_start = Instant::now();
        Command::get_image(session.next_offset, request).send(port)?;
        let wait = config
            .response_timeout
            .min(
                config
                    .global_timeout
                    .saturating_sub(start.elapsed()),
            );
        if wait_available(port, 1, wait)? == 0 {
            debug!("No response to chunk request at offset {}", session.next_offset);
            silent_requests += 1;
            // A reply to the unanswered request may still come in. Read as the
            // answer to the retry, it would shift every later chunk.
            let settle = config
                .response_timeout
                .min(
                    config
                        .global_timeout
                        .saturating_sub(start.elapsed()),
                );
            let late = drain(port, settle, config.byte_timeout)?;
            if late > 0 {
                warn!("Discarded {late} bytes of a late chunk reply");
            }
            continue;
        }
        max_response_latency = max_response_latency.max(request_start.elapsed());

        let written_before = session.bytes_written;
        let mut round_read = 0usize;
        for i in 0..request + HEADER_LEN {
            let wait_start = Instant::now();
            if wait_available(port, 1, config.byte_timeout)? == 0 {
                debug!("No more bytes after {round_read} of {}", request + HEADER_LEN);
                break;
            }
            max_byte_spacing = max_byte_spacing.max(wait_start.elapsed());
            let Some(byte) = read_byte(port, Duration::ZERO)? else {
                break;
            };
            round_read += 1;
            session.bytes_read += 1;

            if i == HEADER_LEN {
                trace!("Chunk {chunks} payload starts");
            }
            if i >= HEADER_LEN {
                session.accept(byte);
            }

            if start.elapsed() > config.global_timeout {
                warn!("Transfer timed out mid-chunk");
                session.finish(Termination::Deadline);
                break;
            }
        }

        sink.write_all(&session.out)?;
        session
            .out
            .clear();

        let payload = round_read
            .saturating_sub(HEADER_LEN)
            .min(request);
        session.bytes_remaining = session
            .bytes_remaining
            .saturating_sub(payload);
        session.next_offset += payload;
        chunks += 1;
        progress(session.bytes_written, image_size);

        if let Some(reason) = session.end_of_frame {
            session.finish(reason);
            break;
        }

        let written = session.bytes_written - written_before;
        if payload != request || written != request {
            warn!(
                "Unexpected byte count: expected {request}, read {round_read}, written {written}"
            );
            short_chunks += 1;
            resync = payload != request;
        }
    }
    sink.flush()?;

    let report = TransferReport {
        image_size,
        chunk_size: config.chunk_size,
        bytes_written: session.bytes_written,
        bytes_read: session.bytes_read,
        chunks,
        short_chunks,
        silent_requests,
        termination: session
            .end_of_frame
            .unwrap_or(Termination::Deadline),
        elapsed: start.elapsed(),
        max_response_latency,
        max_byte_spacing,
    };

    info!(
        "Used {} chunks to read {} bytes in {} byte chunks",
        report.chunks, report.bytes_read, report.chunk_size
    );
    info!(
        "Wrote {} of expected {} bytes ({:+}), stopped on {:?} after {:?}",
        report.bytes_written,
        report.image_size,
        report.size_difference(),
        report.termination,
        report.elapsed
    );
    debug!(
        "Max response latency {:?}, max byte spacing {:?}",
        report.max_response_latency, report.max_byte_spacing
    );

    Ok(report)
}
