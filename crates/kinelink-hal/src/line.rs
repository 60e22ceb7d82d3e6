//! Newline framing over a timeout-driven byte stream.
//!
//! Serial reads return whatever bytes arrived before the timeout, so one
//! frame may be split over several reads.  [`LineAssembler`] keeps the
//! partial tail between calls and only hands out complete lines.  Lines
//! longer than [`MAX_LINE_LENGTH`] are dropped up to their terminator so
//! that one runaway line cannot corrupt the frames after it.

use std::io::{self, BufRead, BufReader, Read};

use tracing::trace;

/// Longest accepted frame, terminator excluded.
pub const MAX_LINE_LENGTH: usize = 256;

/// Accumulates bytes from `R` into complete lines.
pub struct LineAssembler<R> {
    inner: BufReader<R>,
    pending: Vec<u8>,
    /// Set while skipping the remainder of an oversized line.
    discarding: bool,
}

impl<R: Read> LineAssembler<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            pending: Vec::with_capacity(MAX_LINE_LENGTH),
            discarding: false,
        }
    }

    /// Return the next complete line, `Ok(None)` if the underlying read
    /// timed out or brought no complete line.
    ///
    /// At most one read that yields no terminator is made per call, so a
    /// device streaming bytes without newlines still returns control to
    /// the caller after every read.
    ///
    /// A trailing `\r` is stripped.  Invalid UTF-8 is replaced rather than
    /// rejected here; the frame decoder discards such lines anyway.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures of the reader.  End of stream is reported as
    /// [`io::ErrorKind::UnexpectedEof`] because a serial device never ends a
    /// stream on purpose.
    pub fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let available = match self.inner.fill_buf() {
                Ok([]) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "device closed the stream",
                    ));
                }
                Ok(buf) => buf,
                Err(e) if is_timeout(&e) => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            match available.iter().position(|&b| b == b'\n') {
                Some(idx) => {
                    if !self.discarding {
                        self.pending.extend_from_slice(&available[..idx]);
                    }
                    self.inner.consume(idx + 1);

                    if self.discarding || self.pending.len() > MAX_LINE_LENGTH {
                        trace!(len = self.pending.len(), "dropping oversized line");
                        self.discarding = false;
                        self.pending.clear();
                        continue;
                    }

                    let line = String::from_utf8_lossy(&self.pending)
                        .trim_end_matches('\r')
                        .to_owned();
                    self.pending.clear();
                    return Ok(Some(line));
                }
                None => {
                    let consumed = available.len();
                    if !self.discarding {
                        self.pending.extend_from_slice(available);
                    }
                    self.inner.consume(consumed);

                    if self.pending.len() > MAX_LINE_LENGTH {
                        trace!(len = self.pending.len(), "line overflow, discarding until terminator");
                        self.pending.clear();
                        self.discarding = true;
                    }
                    return Ok(None);
                }
            }
        }
    }

    /// Number of bytes buffered for the line currently being received.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}
