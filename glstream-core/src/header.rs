//! Fixed packet header shared by all three sub-protocols.
//!
//! ## Wire format
//!
//! ```text
//! opcode:  u32  (4)   sub-protocol opcode
//! size:    u32  (4)   total packet length, header and checksum included
//! args:    [u8]       call arguments
//! suffix:  [u8]       checksum, 0 or 8 bytes depending on negotiation
//! ```

use crate::error::GlsError;

/// Encoded size of [`PacketHeader`].
pub const HEADER_SIZE: usize = 8;

/// The opcode/size pair at the start of every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub opcode: u32,
    pub size: u32,
}

impl PacketHeader {
    /// Encoded size on the wire.
    pub const SIZE: usize = HEADER_SIZE;

    /// Serialize to bytes (little-endian).
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.opcode.to_le_bytes());
        buf[4..8].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    /// Peek at the header at the front of `data`.
    ///
    /// Returns `None` while fewer than [`Self::SIZE`] bytes are buffered.
    pub fn peek(data: &[u8]) -> Option<Self> {
        let opcode = data.get(0..4)?;
        let size = data.get(4..8)?;
        Some(Self {
            opcode: u32::from_le_bytes([opcode[0], opcode[1], opcode[2], opcode[3]]),
            size: u32::from_le_bytes([size[0], size[1], size[2], size[3]]),
        })
    }

    /// Deserialize from bytes, rejecting a short buffer.
    pub fn decode(data: &[u8]) -> Result<Self, GlsError> {
        Self::peek(data).ok_or(GlsError::InvalidHeader("fewer than 8 bytes"))
    }

    /// Packet length as a buffer index.
    pub fn len(&self) -> usize {
        self.size as usize
    }

    /// Whether the header claims an empty packet, which is never valid.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}
