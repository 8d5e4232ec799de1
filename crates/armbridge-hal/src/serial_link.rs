//! [`SerialLink`] – line-oriented access to the arm's microcontroller.
//!
//! A link is opened once, waits for the controller's boot reset to finish,
//! and is then split into a [`LineReader`] and a [`LineWriter`] so the two
//! directions can live on different threads. Each half owns its own handle
//! to the device; the device is released when both halves are dropped.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use armbridge_types::BridgeError;
use tracing::{debug, error, info};

/// Default baud rate of the arm firmware.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
/// How long a single read waits for bytes before giving up.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);
/// Opening the port resets the controller; it ignores input until booted.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);
/// Pause after a failed read before trying again.
pub const DEFAULT_READ_RETRY_BACKOFF: Duration = Duration::from_millis(100);

const READ_CHUNK: usize = 256;
/// Unterminated input beyond this many bytes is flushed as a line.
const MAX_PENDING: usize = READ_CHUNK * 16;

/// Parameters for [`SerialLink::open`].
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub path: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub settle_delay: Duration,
    pub read_retry_backoff: Duration,
}

impl SerialConfig {
    /// Defaults for everything except the device path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            read_retry_backoff: DEFAULT_READ_RETRY_BACKOFF,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SerialLink
// ────────────────────────────────────────────────────────────────────────────

/// An open, settled connection to the controller.
pub struct SerialLink {
    port: String,
    reader: LineReader,
    writer: LineWriter,
}

impl SerialLink {
    /// Open the device described by `config` and wait out the settle delay.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Connection`] when the device cannot be opened
    /// or its handle cannot be duplicated for the write half. No handle is
    /// left open on failure.
    pub fn open(config: &SerialConfig) -> Result<Self, BridgeError> {
        info!(port = %config.path, baud = config.baud_rate, "opening serial link");

        let connection_error = |e: serialport::Error| BridgeError::Connection {
            port: config.path.clone(),
            details: e.to_string(),
        };

        let read_half = serialport::new(&config.path, config.baud_rate)
            .timeout(config.read_timeout)
            .open()
            .map_err(connection_error)?;
        let write_half = read_half.try_clone().map_err(connection_error)?;

        debug!(delay_ms = config.settle_delay.as_millis() as u64, "waiting for controller reset");
        thread::sleep(config.settle_delay);
        info!(port = %config.path, "serial link established");

        Ok(Self::from_halves(
            &config.path,
            read_half,
            write_half,
            config.read_retry_backoff,
        ))
    }

    /// Build a link from already-open byte streams. No settle delay is
    /// applied.
    pub fn from_halves(
        port: &str,
        read_half: impl Read + Send + 'static,
        write_half: impl Write + Send + 'static,
        read_retry_backoff: Duration,
    ) -> Self {
        Self {
            port: port.to_string(),
            reader: LineReader::new(Box::new(read_half), read_retry_backoff),
            writer: LineWriter::new(Box::new(write_half)),
        }
    }

    /// Device path this link was opened on.
    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn split(self) -> (LineReader, LineWriter) {
        (self.reader, self.writer)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Write half
// ────────────────────────────────────────────────────────────────────────────

/// Sends newline-terminated text lines.
pub struct LineWriter {
    inner: Box<dyn Write + Send>,
}

impl LineWriter {
    fn new(inner: Box<dyn Write + Send>) -> Self {
        Self { inner }
    }

    /// Write `line` followed by `\n` and flush.
    ///
    /// Failures are logged here; callers may ignore the returned error.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Write`] on any I/O failure.
    pub fn send(&mut self, line: &str) -> Result<(), BridgeError> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');

        match self.inner.write_all(&bytes).and_then(|()| self.inner.flush()) {
            Ok(()) => {
                info!("Serial TX: {line}");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, line, "failed to send serial command");
                Err(BridgeError::Write(e.to_string()))
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Read half
// ────────────────────────────────────────────────────────────────────────────

/// Splits the incoming byte stream into trimmed, non-empty text lines.
pub struct LineReader {
    inner: Box<dyn Read + Send>,
    pending: Vec<u8>,
    ready: VecDeque<String>,
    retry_backoff: Duration,
}

impl LineReader {
    fn new(inner: Box<dyn Read + Send>, retry_backoff: Duration) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            ready: VecDeque::new(),
            retry_backoff,
        }
    }

    /// Perform at most one bounded read and return the next line.
    ///
    /// A read timeout ends a partial line: whatever arrived without a
    /// trailing newline is returned as a line of its own. Returns `Ok(None)`
    /// when the read timed out with nothing buffered, or when only part of a
    /// line has arrived so far.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Read`] when the device reports an I/O error or
    /// the stream has ended.
    pub fn poll_line(&mut self) -> Result<Option<String>, BridgeError> {
        if let Some(line) = self.ready.pop_front() {
            return Ok(Some(line));
        }

        let mut chunk = [0u8; READ_CHUNK];
        match self.inner.read(&mut chunk) {
            Ok(0) => Err(BridgeError::Read("serial stream closed".to_string())),
            Ok(n) => {
                self.ingest(&chunk[..n]);
                Ok(self.ready.pop_front())
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                self.flush_pending();
                Ok(self.ready.pop_front())
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(BridgeError::Read(e.to_string())),
        }
    }

    /// Turn this reader into an endless iterator of lines.
    ///
    /// Read errors are logged and retried after the configured backoff. The
    /// iterator only ends once `stop` is set, which is checked after every
    /// timed-out or failed read.
    pub fn into_lines(self, stop: Arc<AtomicBool>) -> Lines {
        Lines { reader: self, stop }
    }

    fn ingest(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            self.push_line(&raw);
        }
        if self.pending.len() >= MAX_PENDING {
            debug!(bytes = self.pending.len(), "no newline in serial input; flushing");
            self.flush_pending();
        }
    }

    fn flush_pending(&mut self) {
        if !self.pending.is_empty() {
            let raw = std::mem::take(&mut self.pending);
            self.push_line(&raw);
        }
    }

    fn push_line(&mut self, raw: &[u8]) {
        let line = decode_lossy(raw);
        let line = line.trim();
        if !line.is_empty() {
            self.ready.push_back(line.to_string());
        }
    }
}

/// Iterator returned by [`LineReader::into_lines`].
pub struct Lines {
    reader: LineReader,
    stop: Arc<AtomicBool>,
}

impl Iterator for Lines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            match self.reader.poll_line() {
                Ok(Some(line)) => return Some(line),
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "serial read failed");
                    thread::sleep(self.reader.retry_backoff);
                }
            }
            if self.stop.load(Ordering::SeqCst) {
                return None;
            }
        }
    }
}

/// Decode bytes as UTF-8, dropping invalid sequences instead of replacing
/// them.
fn decode_lossy(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
    }
    text
}
