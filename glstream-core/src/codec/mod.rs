//! Argument and reply codecs for the sub-protocol packets.
//!
//! ## Argument layout
//!
//! ```text
//! scalar:      4 bytes LE (u32 / i32 / f32 bits)
//! in-buffer:   len: u32, then len bytes
//! out-buffer:  len: u32 only; the server writes len bytes into the reply
//! ```
//!
//! A reply holds every out-buffer in argument order, then the 4-byte
//! return value when the call has one, then the checksum suffix.

use bytes::{BufMut, BytesMut};

use crate::checksum::ChecksumEncoder;
use crate::error::GlsError;
use crate::header::{HEADER_SIZE, PacketHeader};

/// Largest output buffer a single call may request: 64 MiB, the same
/// as the default receive buffer cap.
pub const MAX_OUT_BUFFER: usize = 64 * 1024 * 1024;

// ── ArgReader ────────────────────────────────────────────────────

/// Cursor over the argument bytes of one packet.
#[derive(Debug)]
pub struct ArgReader<'a> {
    opcode: u32,
    data: &'a [u8],
    pos: usize,
}

impl<'a> ArgReader<'a> {
    pub fn new(opcode: u32, data: &'a [u8]) -> Self {
        Self {
            opcode,
            data,
            pos: 0,
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], GlsError> {
        let end = self.pos + n;
        if end > self.data.len() {
            return Err(GlsError::TruncatedArguments {
                opcode: self.opcode,
                needed: end - self.data.len(),
            });
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn word(&mut self) -> Result<[u8; 4], GlsError> {
        let b = self.take(4)?;
        Ok([b[0], b[1], b[2], b[3]])
    }

    pub fn u32(&mut self) -> Result<u32, GlsError> {
        Ok(u32::from_le_bytes(self.word()?))
    }

    pub fn i32(&mut self) -> Result<i32, GlsError> {
        Ok(i32::from_le_bytes(self.word()?))
    }

    pub fn f32(&mut self) -> Result<f32, GlsError> {
        Ok(f32::from_le_bytes(self.word()?))
    }

    /// A length-prefixed input buffer.
    pub fn bytes(&mut self) -> Result<&'a [u8], GlsError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    /// A length-prefixed input buffer holding a NUL-terminated string.
    pub fn string(&mut self) -> Result<String, GlsError> {
        let raw = self.bytes()?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    /// The declared size of an output buffer, at most [`MAX_OUT_BUFFER`].
    pub fn out_len(&mut self) -> Result<usize, GlsError> {
        let size = self.u32()? as usize;
        if size > MAX_OUT_BUFFER {
            return Err(GlsError::OutBufferTooLarge {
                opcode: self.opcode,
                size,
                max: MAX_OUT_BUFFER,
            });
        }
        Ok(size)
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

// ── Reply helpers ────────────────────────────────────────────────

/// Write an output buffer of exactly `len` bytes, zero-padding or
/// truncating `data`.
pub fn put_out_buffer(out: &mut BytesMut, data: &[u8], len: usize) {
    let n = data.len().min(len);
    out.put_slice(&data[..n]);
    out.put_bytes(0, len - n);
}

// ── PacketBuilder ────────────────────────────────────────────────

/// Guest-side packet encoder.
///
/// Used by tools that talk to the server and by the tests; the server
/// itself only parses packets.
#[derive(Debug)]
pub struct PacketBuilder {
    opcode: u32,
    args: BytesMut,
}

impl PacketBuilder {
    pub fn new(opcode: u32) -> Self {
        Self {
            opcode,
            args: BytesMut::new(),
        }
    }

    pub fn u32(mut self, v: u32) -> Self {
        self.args.put_u32_le(v);
        self
    }

    pub fn i32(mut self, v: i32) -> Self {
        self.args.put_i32_le(v);
        self
    }

    pub fn f32(mut self, v: f32) -> Self {
        self.args.put_f32_le(v);
        self
    }

    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.args.put_u32_le(data.len() as u32);
        self.args.put_slice(data);
        self
    }

    /// A NUL-terminated string, as guest encoders send `const char*`.
    pub fn string(mut self, s: &str) -> Self {
        self.args.put_u32_le(s.len() as u32 + 1);
        self.args.put_slice(s.as_bytes());
        self.args.put_u8(0);
        self
    }

    pub fn out_len(self, len: usize) -> Self {
        self.u32(len as u32)
    }

    /// Finish the packet, appending the checksum suffix `encoder` selects.
    pub fn build(self, encoder: &mut ChecksumEncoder) -> Vec<u8> {
        let size = HEADER_SIZE + self.args.len() + encoder.suffix_size();
        let header = PacketHeader {
            opcode: self.opcode,
            size: size as u32,
        };
        let mut packet = Vec::with_capacity(size);
        packet.extend_from_slice(&header.encode());
        packet.extend_from_slice(&self.args);
        let suffix = encoder.next_suffix(packet.len());
        packet.extend_from_slice(&suffix);
        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_scalars_and_buffers() {
        let packet = PacketBuilder::new(10012)
            .u32(64)
            .i32(-2)
            .f32(0.5)
            .bytes(b"abc")
            .string("Sprite")
            .out_len(16)
            .build(&mut ChecksumEncoder::new(0));
        let hdr = PacketHeader::decode(&packet).unwrap();
        assert_eq!(hdr.len(), packet.len());

        let mut args = ArgReader::new(hdr.opcode, &packet[HEADER_SIZE..]);
        assert_eq!(args.u32().unwrap(), 64);
        assert_eq!(args.i32().unwrap(), -2);
        assert_eq!(args.f32().unwrap(), 0.5);
        assert_eq!(args.bytes().unwrap(), b"abc");
        assert_eq!(args.string().unwrap(), "Sprite");
        assert_eq!(args.out_len().unwrap(), 16);
        assert_eq!(args.remaining(), 0);
    }

    #[test]
    fn truncated_arguments_are_reported() {
        let mut args = ArgReader::new(7, &[1, 0]);
        match args.u32() {
            Err(GlsError::TruncatedArguments { opcode, needed }) => {
                assert_eq!(opcode, 7);
                assert_eq!(needed, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn oversized_out_buffer_is_refused() {
        let max = (MAX_OUT_BUFFER as u32).to_le_bytes();
        assert_eq!(ArgReader::new(10003, &max).out_len().unwrap(), MAX_OUT_BUFFER);

        let huge = u32::MAX.to_le_bytes();
        match ArgReader::new(10003, &huge).out_len() {
            Err(GlsError::OutBufferTooLarge { opcode, size, max }) => {
                assert_eq!(opcode, 10003);
                assert_eq!(size, u32::MAX as usize);
                assert_eq!(max, MAX_OUT_BUFFER);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn out_buffer_is_padded_to_declared_len() {
        let mut out = BytesMut::new();
        put_out_buffer(&mut out, b"hi", 4);
        assert_eq!(&out[..], b"hi\0\0");

        let mut out = BytesMut::new();
        put_out_buffer(&mut out, b"hello", 3);
        assert_eq!(&out[..], b"hel");
    }

    #[test]
    fn builder_appends_checksum() {
        let mut enc = ChecksumEncoder::new(1);
        let packet = PacketBuilder::new(10000).build(&mut enc);
        assert_eq!(packet.len(), 16);
        assert_eq!(PacketHeader::decode(&packet).unwrap().size, 16);
        assert_eq!(&packet[8..12], &8u32.reverse_bits().to_le_bytes());
    }
}
