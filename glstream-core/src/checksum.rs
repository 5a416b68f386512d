//! Per-connection checksum negotiation and validation.
//!
//! ## Wire format (version 1)
//!
//! ```text
//! length:   u32  bit-reversed count of the bytes covered by the checksum
//! counter:  u32  sequence number (packets read, or replies written)
//! ```
//!
//! Version 0 carries no suffix. The guest picks a version with the
//! control-plane `SelectChecksumCalculator` call; every packet after that
//! carries the suffix of the selected version.

use bytes::{BufMut, BytesMut};

use crate::error::GlsError;

/// Highest checksum protocol version the server understands.
pub const MAX_CHECKSUM_VERSION: u32 = 1;

/// Extension string advertising [`MAX_CHECKSUM_VERSION`] to guests.
pub const CHECKSUM_EXTENSION: &str = "ANDROID_EMU_CHECKSUM_HELPER_v1";

const V1_SUFFIX_SIZE: usize = 8;

/// Checksum state for one connection.
#[derive(Debug, Default, Clone)]
pub struct ChecksumCalculator {
    version: u32,
    num_read: u32,
    num_write: u32,
}

impl ChecksumCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Switch protocol version. Versions above [`MAX_CHECKSUM_VERSION`]
    /// are rejected and the current version is kept.
    pub fn set_version(&mut self, version: u32) -> Result<(), GlsError> {
        if version > MAX_CHECKSUM_VERSION {
            return Err(GlsError::UnsupportedVersion(version));
        }
        self.version = version;
        Ok(())
    }

    /// Size of the suffix appended to every packet and reply.
    pub fn suffix_size(&self) -> usize {
        match self.version {
            1 => V1_SUFFIX_SIZE,
            _ => 0,
        }
    }

    /// Check the suffix of an incoming packet.
    ///
    /// `covered` is the packet without its suffix. While a suffix is in
    /// use the read counter advances whether or not it matches.
    pub fn validate(&mut self, covered: &[u8], suffix: &[u8]) -> bool {
        match self.compute(covered.len(), self.num_read) {
            Some(expected) => {
                self.num_read = self.num_read.wrapping_add(1);
                suffix == expected.as_slice()
            }
            None => suffix.is_empty(),
        }
    }

    /// Append the suffix for a reply body of `reply_len` bytes.
    pub fn write_suffix(&mut self, reply_len: usize, out: &mut BytesMut) {
        if let Some(suffix) = self.compute(reply_len, self.num_write) {
            out.put_slice(&suffix);
            self.num_write = self.num_write.wrapping_add(1);
        }
    }

    fn compute(&self, len: usize, counter: u32) -> Option<[u8; V1_SUFFIX_SIZE]> {
        match self.version {
            1 => {
                let mut suffix = [0u8; V1_SUFFIX_SIZE];
                suffix[0..4].copy_from_slice(&(len as u32).reverse_bits().to_le_bytes());
                suffix[4..8].copy_from_slice(&counter.to_le_bytes());
                Some(suffix)
            }
            _ => None,
        }
    }
}

/// Guest-side counterpart: appends the version 1 suffix to outgoing packets.
///
/// The server never sends packets, only replies; this exists for tools and
/// tests that play the guest role.
#[derive(Debug, Default, Clone)]
pub struct ChecksumEncoder {
    version: u32,
    num_write: u32,
    num_read: u32,
}

impl ChecksumEncoder {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    pub fn suffix_size(&self) -> usize {
        if self.version == 1 { V1_SUFFIX_SIZE } else { 0 }
    }

    /// Suffix for the next outgoing packet whose unsuffixed length is `len`.
    pub fn next_suffix(&mut self, len: usize) -> Vec<u8> {
        if self.version != 1 {
            return Vec::new();
        }
        let mut suffix = Vec::with_capacity(V1_SUFFIX_SIZE);
        suffix.extend_from_slice(&(len as u32).reverse_bits().to_le_bytes());
        suffix.extend_from_slice(&self.num_write.to_le_bytes());
        self.num_write = self.num_write.wrapping_add(1);
        suffix
    }

    /// Check a reply's suffix against the expected read counter.
    pub fn check_reply(&mut self, body: &[u8], suffix: &[u8]) -> bool {
        if self.version != 1 {
            return suffix.is_empty();
        }
        let mut expected = Vec::with_capacity(V1_SUFFIX_SIZE);
        expected.extend_from_slice(&(body.len() as u32).reverse_bits().to_le_bytes());
        expected.extend_from_slice(&self.num_read.to_le_bytes());
        self.num_read = self.num_read.wrapping_add(1);
        expected == suffix
    }
}
