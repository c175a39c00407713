//! Scripted in-memory port.
//!
//! `FakePort` keeps separate receive and transmit buffers. Bytes can be
//! queued up front, or produced by a responder closure that is called once
//! per complete command line written to the port (CR LF stripped). This is
//! enough to stand in for a camera in tests and dry runs.

use crate::error::Result;
use crate::port::Port;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::Duration;

type Responder = Box<dyn FnMut(&str) -> Vec<u8> + Send>;

/// In-memory port with a scripted receive side.
pub struct FakePort {
    name: String,
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    pending_line: Vec<u8>,
    commands: Vec<String>,
    responder: Option<Responder>,
    timeout: Duration,
}

impl Default for FakePort {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePort {
    /// Create an empty port that never answers.
    pub fn new() -> Self {
        Self {
            name: "fake".to_string(),
            rx: VecDeque::new(),
            tx: Vec::new(),
            pending_line: Vec::new(),
            commands: Vec::new(),
            responder: None,
            timeout: Duration::from_millis(1000),
        }
    }

    /// Create a port whose receive buffer is preloaded with `input`.
    pub fn with_input(input: &[u8]) -> Self {
        let mut port = Self::new();
        port.push_input(input);
        port
    }

    /// Create a port that answers each written command line.
    ///
    /// The responder gets the line without its trailing CR LF
    /// (e.g. `#get_image=0,512,RAW`) and returns the bytes to queue.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&str) -> Vec<u8> + Send + 'static,
    {
        let mut port = Self::new();
        port.responder = Some(Box::new(responder));
        port
    }

    /// Queue bytes on the receive side.
    pub fn push_input(&mut self, input: &[u8]) {
        self.rx
            .extend(input.iter().copied());
    }

    /// Everything written to the port so far.
    pub fn written(&self) -> &[u8] {
        &self.tx
    }

    /// Complete command lines written so far, CR LF stripped.
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Bytes still waiting on the receive side.
    pub fn pending(&self) -> usize {
        self.rx
            .len()
    }

    fn feed_line(&mut self, byte: u8) {
        self.pending_line
            .push(byte);
        if !self
            .pending_line
            .ends_with(b"\r\n")
        {
            return;
        }

        let len = self
            .pending_line
            .len()
            - 2;
        let line = String::from_utf8_lossy(&self.pending_line[..len]).into_owned();
        self.pending_line
            .clear();

        if let Some(responder) = self
            .responder
            .as_mut()
        {
            let reply = responder(&line);
            self.rx
                .extend(reply);
        }
        self.commands
            .push(line);
    }
}

impl Port for FakePort {
    fn bytes_available(&mut self) -> Result<usize> {
        Ok(self
            .rx
            .len())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.rx
            .clear();
        self.pending_line
            .clear();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Read for FakePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self
            .rx
            .is_empty()
        {
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf
            .len()
            .min(
                self.rx
                    .len(),
            );
        for (slot, byte) in buf
            .iter_mut()
            .zip(
                self.rx
                    .drain(..n),
            )
        {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for FakePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.tx
            .extend_from_slice(buf);
        for &byte in buf {
            self.feed_line(byte);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
