//! Growable receive buffer shared by the three decoders of a connection.

use std::io::Read;

use bytes::BytesMut;

use crate::error::GlsError;

/// Default initial capacity: 4 MiB.
pub const DEFAULT_READ_BUFFER: usize = 4 * 1024 * 1024;

/// Default capacity cap: 64 MiB.
pub const MAX_READ_BUFFER: usize = 64 * 1024 * 1024;

/// Byte reservoir accumulating partial frames.
///
/// Valid data lives in `buf[start..end]`. `consume` only moves `start`;
/// the remainder is shifted to the front on the next `get_data`.
#[derive(Debug)]
pub struct ReadBuffer {
    buf: BytesMut,
    start: usize,
    end: usize,
    max: usize,
}

impl ReadBuffer {
    /// A buffer starting at `initial` bytes that may double up to `max`.
    pub fn new(initial: usize, max: usize) -> Self {
        let initial = initial.max(1);
        Self {
            buf: BytesMut::zeroed(initial),
            start: 0,
            end: 0,
            max: max.max(initial),
        }
    }

    /// Currently valid bytes.
    pub fn data(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// Number of valid bytes.
    pub fn valid(&self) -> usize {
        self.end - self.start
    }

    /// Current allocated size.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Size the buffer may grow to.
    pub fn max_capacity(&self) -> usize {
        self.max
    }

    /// Read whatever the stream has into the free tail.
    ///
    /// Returns the number of bytes read; 0 means the peer closed the
    /// connection (or it was force-stopped). Fails with
    /// [`GlsError::FrameTooLarge`] when the buffer is full at its cap.
    pub fn get_data<R: Read>(&mut self, stream: &mut R) -> Result<usize, GlsError> {
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }

        if self.end == self.buf.len() {
            if self.buf.len() >= self.max {
                return Err(GlsError::FrameTooLarge {
                    size: self.buf.len() + 1,
                    max: self.max,
                });
            }
            let grown = (self.buf.len() * 2).min(self.max);
            self.buf.resize(grown, 0);
        }

        loop {
            match stream.read(&mut self.buf[self.end..]) {
                Ok(n) => {
                    self.end += n;
                    return Ok(n);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Discard the first `n` valid bytes.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.valid());
        self.start += n;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }
}

impl Default for ReadBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_READ_BUFFER, MAX_READ_BUFFER)
    }
}
