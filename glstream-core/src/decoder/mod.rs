//! Sub-protocol decoders sharing one receive buffer.
//!
//! A connection carries three interleaved protocols told apart only by
//! opcode range. The dispatch loop offers the buffered bytes to each
//! decoder in turn; a decoder eats complete packets from the front while
//! the opcode is its own and reports how many bytes it took.
//!
//! ```text
//!   ┌─────────────── ReadBuffer ───────────────┐
//!   │ [v2 pkt][v2 pkt][rc pkt][v1 pkt][partial │
//!   └──────────────────────────────────────────┘
//!     Gles2Decoder ─► 2 pkts   ControlDecoder ─► 1 pkt   Gles1Decoder ─► 1 pkt
//!     next pass: nobody can take the partial packet ─► read more
//! ```

pub mod control;
pub mod gles;

use std::ops::Range;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};

pub use control::{ControlDecoder, RcOpcode};
pub use gles::{Gles1Decoder, Gles2Decoder};

use crate::checksum::ChecksumCalculator;
use crate::compositor::{DisplayInfo, LayerComposer};
use crate::error::GlsError;
use crate::header::{HEADER_SIZE, PacketHeader};
use crate::renderer::Renderer;
use crate::state::RenderThreadInfo;

// ── Opcode ranges ────────────────────────────────────────────────

pub const GLES1_OPCODES: Range<u32> = 1024..2048;
pub const GLES2_OPCODES: Range<u32> = 2048..4096;
pub const CONTROL_OPCODES: Range<u32> = 10000..10037;

const fn disjoint(a: &Range<u32>, b: &Range<u32>) -> bool {
    a.end <= b.start || b.end <= a.start
}

const _: () = assert!(
    disjoint(&GLES1_OPCODES, &GLES2_OPCODES)
        && disjoint(&GLES1_OPCODES, &CONTROL_OPCODES)
        && disjoint(&GLES2_OPCODES, &CONTROL_OPCODES),
    "decoder opcode ranges overlap"
);

/// Whether any decoder owns `opcode`.
pub fn is_known_opcode(opcode: u32) -> bool {
    GLES1_OPCODES.contains(&opcode) || GLES2_OPCODES.contains(&opcode) || CONTROL_OPCODES.contains(&opcode)
}

// ── Shared state ─────────────────────────────────────────────────

/// Process-wide services every decode thread reaches.
#[derive(Debug, Clone)]
pub struct RenderEnv {
    pub renderer: Arc<Renderer>,
    pub display: Arc<DisplayInfo>,
    /// Absent when nothing consumes posted layers.
    pub composer: Option<Arc<LayerComposer>>,
}

/// What a decoder works against for one pass.
pub struct DecodeContext<'a> {
    pub env: &'a RenderEnv,
    pub thread: &'a mut RenderThreadInfo,
    /// Reply bytes queued for the guest, flushed after the pass.
    pub replies: &'a mut BytesMut,
}

impl DecodeContext<'_> {
    pub fn renderer(&self) -> &Renderer {
        &self.env.renderer
    }

    /// Queue a reply body followed by its checksum suffix. An empty body
    /// sends nothing.
    pub fn reply(&mut self, body: &[u8]) {
        if body.is_empty() {
            return;
        }
        self.replies.put_slice(body);
        self.thread.checksum.write_suffix(body.len(), self.replies);
    }
}

// ── Framing ──────────────────────────────────────────────────────

/// One complete, checksum-verified packet.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    pub opcode: u32,
    /// Arguments without header or checksum suffix.
    pub args: &'a [u8],
    /// Bytes the packet occupies in the stream.
    pub len: usize,
}

/// The packet at the front of `buf` when it is complete and its opcode
/// lies in `range`.
pub fn next_packet<'a>(
    buf: &'a [u8],
    range: &Range<u32>,
    checksum: &mut ChecksumCalculator,
) -> Result<Option<Packet<'a>>, GlsError> {
    let Some(header) = PacketHeader::peek(buf) else {
        return Ok(None);
    };
    if !range.contains(&header.opcode) {
        return Ok(None);
    }
    let suffix = checksum.suffix_size();
    if header.len() < HEADER_SIZE + suffix {
        return Err(GlsError::InvalidPacketLength {
            opcode: header.opcode,
            size: header.len(),
        });
    }
    if buf.len() < header.len() {
        return Ok(None);
    }

    let packet = &buf[..header.len()];
    let body_end = header.len() - suffix;
    if !checksum.validate(&packet[..body_end], &packet[body_end..]) {
        return Err(GlsError::ChecksumMismatch {
            opcode: header.opcode,
        });
    }
    Ok(Some(Packet {
        opcode: header.opcode,
        args: &packet[HEADER_SIZE..body_end],
        len: header.len(),
    }))
}

// ── Decoder ──────────────────────────────────────────────────────

pub trait Decoder: Send {
    fn name(&self) -> &'static str;

    fn opcodes(&self) -> Range<u32>;

    /// Execute one packet.
    fn decode_packet(&mut self, packet: Packet<'_>, ctx: &mut DecodeContext<'_>) -> Result<(), GlsError>;

    /// Execute every complete packet of this decoder at the front of
    /// `buf`. Returns the bytes consumed, 0 when the head is not ours or
    /// not complete yet.
    fn try_decode(&mut self, buf: &[u8], ctx: &mut DecodeContext<'_>) -> Result<usize, GlsError> {
        let range = self.opcodes();
        let mut consumed = 0;
        while let Some(packet) = next_packet(&buf[consumed..], &range, &mut ctx.thread.checksum)? {
            self.decode_packet(packet, ctx)?;
            consumed += packet.len;
        }
        Ok(consumed)
    }
}

/// The three decoders of one connection, in dispatch order.
pub fn connection_decoders() -> Vec<Box<dyn Decoder>> {
    vec![
        Box::new(Gles1Decoder::new()),
        Box::new(Gles2Decoder::new()),
        Box::new(ControlDecoder::new()),
    ]
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use bytes::BytesMut;

    use super::*;
    use crate::checksum::ChecksumEncoder;
    use crate::codec::PacketBuilder;
    use crate::host::GlesApi;
    use crate::host::emulated::EmulatedHost;
    use crate::renderer::RendererOptions;

    /// One decode thread's worth of state over an emulated host.
    pub struct Fixture {
        pub host: Arc<EmulatedHost>,
        pub env: RenderEnv,
        pub thread: RenderThreadInfo,
        pub replies: BytesMut,
    }

    impl Fixture {
        pub fn new() -> Self {
            let host = Arc::new(EmulatedHost::new());
            let renderer = Arc::new(Renderer::new(host.clone(), host.clone(), RendererOptions::default()).unwrap());
            Self {
                host,
                env: RenderEnv {
                    renderer,
                    display: Arc::new(DisplayInfo::default()),
                    composer: None,
                },
                thread: RenderThreadInfo::new(),
                replies: BytesMut::new(),
            }
        }

        /// Create a context and a 4x4 surface and make them current.
        pub fn bind(&mut self) -> (u32, u32) {
            let r = &self.env.renderer;
            let ctx = r.create_context(&mut self.thread, 0, 0, GlesApi::V2).unwrap().raw();
            let s = r.create_surface(&mut self.thread, 0, 4, 4).unwrap().raw();
            assert!(r.bind_context(&mut self.thread, ctx, s, s));
            (ctx, s)
        }

        pub fn unbind(&mut self) {
            self.env.renderer.bind_context(&mut self.thread, 0, 0, 0);
        }

        pub fn try_run(&mut self, decoder: &mut dyn Decoder, bytes: &[u8]) -> Result<usize, GlsError> {
            let mut ctx = DecodeContext {
                env: &self.env,
                thread: &mut self.thread,
                replies: &mut self.replies,
            };
            decoder.try_decode(bytes, &mut ctx)
        }

        pub fn run(&mut self, decoder: &mut dyn Decoder, bytes: &[u8]) -> usize {
            self.try_run(decoder, bytes).unwrap()
        }

        /// Take the queued replies.
        pub fn take_replies(&mut self) -> Vec<u8> {
            self.replies.split().to_vec()
        }
    }

    /// Build a packet without checksum.
    pub fn packet(builder: PacketBuilder) -> Vec<u8> {
        builder.build(&mut ChecksumEncoder::new(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumEncoder;
    use crate::codec::PacketBuilder;

    #[test]
    fn ranges_are_disjoint() {
        assert!(disjoint(&GLES1_OPCODES, &GLES2_OPCODES));
        assert!(!disjoint(&(0..10), &(5..15)));
        assert!(is_known_opcode(10036));
        assert!(!is_known_opcode(10037));
        assert!(!is_known_opcode(5000));
    }

    #[test]
    fn next_packet_waits_for_complete_frames() {
        let packet = PacketBuilder::new(10000).u32(7).build(&mut ChecksumEncoder::new(0));
        let mut checksum = ChecksumCalculator::new();

        assert!(next_packet(&packet[..5], &CONTROL_OPCODES, &mut checksum).unwrap().is_none());
        assert!(next_packet(&packet[..10], &CONTROL_OPCODES, &mut checksum).unwrap().is_none());
        assert!(next_packet(&packet, &GLES2_OPCODES, &mut checksum).unwrap().is_none());

        let found = next_packet(&packet, &CONTROL_OPCODES, &mut checksum).unwrap().unwrap();
        assert_eq!(found.opcode, 10000);
        assert_eq!(found.args, &7u32.to_le_bytes());
        assert_eq!(found.len, packet.len());
    }

    #[test]
    fn short_declared_size_is_a_fault() {
        let mut bytes = PacketHeader { opcode: 10000, size: 4 }.encode().to_vec();
        bytes.extend_from_slice(&[0; 8]);
        let mut checksum = ChecksumCalculator::new();
        assert!(matches!(
            next_packet(&bytes, &CONTROL_OPCODES, &mut checksum),
            Err(GlsError::InvalidPacketLength { opcode: 10000, size: 4 })
        ));
    }

    #[test]
    fn checksum_is_verified() {
        let mut encoder = ChecksumEncoder::new(1);
        let mut checksum = ChecksumCalculator::new();
        checksum.set_version(1).unwrap();

        let good = PacketBuilder::new(10000).build(&mut encoder);
        let found = next_packet(&good, &CONTROL_OPCODES, &mut checksum).unwrap().unwrap();
        assert!(found.args.is_empty());

        let mut bad = PacketBuilder::new(10000).build(&mut encoder);
        let last = bad.len() - 1;
        bad[last] ^= 0xff;
        assert!(matches!(
            next_packet(&bad, &CONTROL_OPCODES, &mut checksum),
            Err(GlsError::ChecksumMismatch { opcode: 10000 })
        ));
    }
}
