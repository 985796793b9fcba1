//! Transport seam and the buffered instruction socket.
//!
//! [`WireRead`] and [`WireWrite`] abstract the two halves of a peer
//! connection so the protocol machinery works identically over a TCP stream
//! and over in-memory pipes in tests. [`WireSocket`] owns the write half
//! behind a mutex: emitters open an [`InstructionWriter`] bracket for each
//! instruction, so concurrent writers interleave whole instructions, never
//! fragments, and an instruction's bytes are coalesced into as few transport
//! writes as possible.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::base64::Base64Encoder;
use crate::error::WireError;
use crate::unicode;

/// Threshold above which the send buffer is flushed at instruction end.
const FLUSH_THRESHOLD: usize = 4096;

/// Blocking read half of a peer connection.
pub trait WireRead: Send {
    /// Reads at least one byte into `buf`, waiting at most `timeout`.
    ///
    /// The timeout is honored at microsecond granularity down to OS limits.
    ///
    /// # Errors
    ///
    /// [`WireError::Timeout`] if no byte arrived in time,
    /// [`WireError::Closed`] on orderly EOF, [`WireError::Io`] otherwise.
    fn read_some(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, WireError>;
}

/// Write half of a peer connection.
pub trait WireWrite: Send {
    /// Writes all of `bytes` or fails.
    ///
    /// # Errors
    ///
    /// [`WireError::Closed`] if the peer is gone, [`WireError::Io`] on any
    /// other transport failure.
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), WireError>;

    /// Best-effort orderly shutdown of the connection.
    fn shutdown(&mut self);
}

impl WireRead for TcpStream {
    fn read_some(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, WireError> {
        // A zero timeout means "block forever" to the OS; clamp up instead.
        let timeout = timeout.max(Duration::from_micros(1));
        self.set_read_timeout(Some(timeout))?;
        match self.read(buf) {
            Ok(0) => Err(WireError::Closed),
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Err(WireError::Timeout)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl WireWrite for TcpStream {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        match Write::write_all(self, bytes) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Err(WireError::Closed),
            Err(e) => Err(e.into()),
        }
    }

    fn shutdown(&mut self) {
        let _ = TcpStream::shutdown(self, std::net::Shutdown::Both);
    }
}

struct SocketInner {
    sink: Box<dyn WireWrite>,
    buf: Vec<u8>,
    encoder: Base64Encoder,
    /// Set after a transport write fails; all further operations fail until
    /// the connection is torn down.
    broken: bool,
}

impl SocketInner {
    fn flush(&mut self) -> Result<(), WireError> {
        if self.broken {
            return Err(WireError::Closed);
        }
        if self.buf.is_empty() {
            return Ok(());
        }
        let result = self.sink.write_all(&self.buf);
        self.buf.clear();
        if let Err(e) = &result {
            tracing::debug!(error = %e, "socket write failed, marking broken");
            self.broken = true;
        }
        result
    }
}

/// Shared, buffered write half of a connection.
///
/// Cloned freely behind an `Arc`; the internal mutex serializes whole
/// instructions across threads.
pub struct WireSocket {
    inner: Mutex<SocketInner>,
}

impl WireSocket {
    /// Wraps a write half.
    #[must_use]
    pub fn new(sink: Box<dyn WireWrite>) -> Self {
        Self {
            inner: Mutex::new(SocketInner {
                sink,
                buf: Vec::with_capacity(crate::MAX_INSTRUCTION_BYTES),
                encoder: Base64Encoder::new(),
                broken: false,
            }),
        }
    }

    /// Begins one atomic instruction. The returned writer holds the socket
    /// lock until [`InstructionWriter::finish`] or drop.
    pub fn instruction_begin(&self) -> InstructionWriter<'_> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        InstructionWriter { inner }
    }

    /// Flushes all buffered instructions to the transport.
    ///
    /// Buffered writes either all reached the transport when this returns
    /// `Ok`, or the first failure is surfaced and the socket is marked
    /// broken.
    ///
    /// # Errors
    ///
    /// The first transport error, or [`WireError::Closed`] once broken.
    pub fn flush(&self) -> Result<(), WireError> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .flush()
    }

    /// Shuts the connection down, waking any blocked reader on the other
    /// half. Buffered but unflushed bytes are discarded.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.broken = true;
        inner.sink.shutdown();
    }

    /// Whether a previous write failed and the socket is unusable.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).broken
    }
}

/// Write bracket for one instruction.
///
/// All writes accumulate in the socket's send buffer; the buffer is pushed to
/// the transport when the instruction finishes with enough bytes pending, or
/// on an explicit [`WireSocket::flush`].
pub struct InstructionWriter<'a> {
    inner: MutexGuard<'a, SocketInner>,
}

impl InstructionWriter<'_> {
    /// Appends literal text.
    pub fn write_text(&mut self, text: &str) {
        self.write_raw(text.as_bytes());
    }

    /// Appends raw bytes.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        if !self.inner.broken {
            self.inner.buf.extend_from_slice(bytes);
        }
    }

    /// Appends an integer in canonical decimal form, no padding.
    pub fn write_int(&mut self, value: i64) {
        if !self.inner.broken {
            let mut digits = [0u8; 20];
            self.inner.buf.extend_from_slice(format_decimal(value, &mut digits));
        }
    }

    /// Appends one length-prefixed string element: the code-point count,
    /// a `.`, then the content.
    pub fn element_text(&mut self, content: &str) {
        self.write_int(unicode::codepoint_count(content.as_bytes()) as i64);
        self.write_text(".");
        self.write_text(content);
    }

    /// Appends one integer-valued element (its decimal form, length-prefixed
    /// like any string).
    pub fn element_int(&mut self, value: i64) {
        let mut digits = [0u8; 20];
        let rendered = format_decimal(value, &mut digits);
        self.write_int(rendered.len() as i64);
        self.write_text(".");
        if !self.inner.broken {
            self.inner.buf.extend_from_slice(rendered);
        }
    }

    /// Streams bytes through the base64 sub-encoder. Residual input carries
    /// over to the next call; terminate with [`flush_base64`](Self::flush_base64).
    pub fn write_base64(&mut self, data: &[u8]) {
        if !self.inner.broken {
            let inner = &mut *self.inner;
            inner.encoder.write(data, &mut inner.buf);
        }
    }

    /// Emits the final base64 quantum and padding for any residual input.
    pub fn flush_base64(&mut self) {
        if !self.inner.broken {
            let inner = &mut *self.inner;
            inner.encoder.finish(&mut inner.buf);
        }
    }

    /// Ends the instruction, flushing the send buffer if enough bytes are
    /// pending.
    ///
    /// # Errors
    ///
    /// The first transport error encountered for this socket; once broken,
    /// every bracket fails until teardown.
    pub fn finish(mut self) -> Result<(), WireError> {
        if self.inner.broken {
            return Err(WireError::Closed);
        }
        if self.inner.buf.len() >= FLUSH_THRESHOLD {
            self.inner.flush()?;
        }
        Ok(())
    }
}

/// Renders `value` as decimal into `scratch`, returning the used suffix.
/// 20 bytes covers any i64 including the sign.
fn format_decimal(value: i64, scratch: &mut [u8; 20]) -> &[u8] {
    let mut n = value.unsigned_abs();
    let mut pos = scratch.len();
    loop {
        pos -= 1;
        scratch[pos] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    if value < 0 {
        pos -= 1;
        scratch[pos] = b'-';
    }
    &scratch[pos..]
}
