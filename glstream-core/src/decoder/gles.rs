//! GLES 1.x and 2.x decoders.
//!
//! Only the calls that carry client-array data inline are interpreted
//! here. Their bytes are copied into the current context's pointer store
//! and the host sees a pointer into that store. Everything else goes to
//! the [`GlesDispatch`](crate::host::GlesDispatch) collaborator untouched.

use std::ops::Range;

use tracing::{debug, warn};

use super::{DecodeContext, Decoder, GLES1_OPCODES, GLES2_OPCODES, Packet};
use crate::codec::ArgReader;
use crate::error::GlsError;
use crate::host::{AttribPointer, GlesApi, PointerKind};

pub mod v1 {
    pub const VERTEX_POINTER_DATA: u32 = 1472;
    pub const COLOR_POINTER_DATA: u32 = 1473;
    pub const NORMAL_POINTER_DATA: u32 = 1474;
    pub const TEX_COORD_POINTER_DATA: u32 = 1475;
    pub const POINT_SIZE_POINTER_DATA: u32 = 1476;
    pub const WEIGHT_POINTER_DATA: u32 = 1477;
    pub const MATRIX_INDEX_POINTER_DATA: u32 = 1478;
    pub const DRAW_ELEMENTS_DATA: u32 = 1479;
    pub const FINISH_ROUND_TRIP: u32 = 1480;
}

pub mod v2 {
    pub const VERTEX_ATTRIB_POINTER_DATA: u32 = 2496;
    pub const DRAW_ELEMENTS_DATA: u32 = 2497;
    pub const FINISH_ROUND_TRIP: u32 = 2498;
}

/// Highest texture unit a GLES1 texcoord pointer may name.
const MAX_TEXTURE_UNITS: u32 = 8;

// ── Shared handlers ──────────────────────────────────────────────

/// Store `data` in the current context and hand the host a pointer call
/// over the stored copy, stride 0.
fn pointer_data(
    ctx: &mut DecodeContext<'_>,
    api: GlesApi,
    kind: PointerKind,
    size: i32,
    ty: u32,
    normalized: bool,
    data: &[u8],
) {
    let Some(context) = ctx.thread.current_context() else {
        debug!("{kind:?} pointer data without a current context");
        return;
    };
    let mut store = context.decoder_data();
    store.store_pointer_data(kind.location(), data);
    let Some(stored) = store.pointer_data(kind.location()) else {
        warn!("{kind:?} pointer slot {} out of range", kind.location());
        return;
    };
    let pointer = AttribPointer {
        kind,
        size,
        ty,
        normalized,
        stride: 0,
        data: stored,
    };
    if let Err(e) = ctx.renderer().gles().attrib_pointer(api, &pointer) {
        warn!("{kind:?} pointer: {e}");
    }
}

fn draw_elements_data(ctx: &mut DecodeContext<'_>, api: GlesApi, args: &mut ArgReader<'_>) -> Result<(), GlsError> {
    let mode = args.u32()?;
    let count = args.i32()?;
    let ty = args.u32()?;
    let indices = args.bytes()?;
    if ctx.thread.current_context().is_none() {
        debug!("DrawElementsData without a current context");
        return Ok(());
    }
    if let Err(e) = ctx.renderer().gles().draw_elements(api, mode, count, ty, indices) {
        warn!("DrawElementsData: {e}");
    }
    Ok(())
}

/// `glFinish`, then reply 0 so the guest can wait on it.
fn finish_round_trip(ctx: &mut DecodeContext<'_>, api: GlesApi) {
    if ctx.thread.current_context().is_some() {
        ctx.renderer().gles().finish(api);
    }
    ctx.reply(&0i32.to_le_bytes());
}

fn forward(ctx: &mut DecodeContext<'_>, api: GlesApi, packet: Packet<'_>) {
    if ctx.thread.current_context().is_none() {
        debug!("{api:?} opcode {} without a current context", packet.opcode);
        return;
    }
    match ctx.renderer().gles().execute(api, packet.opcode, packet.args) {
        Ok(reply) => ctx.reply(&reply),
        Err(e) => warn!("{api:?} opcode {}: {e}", packet.opcode),
    }
}

// ── GLES 1 ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Gles1Decoder;

impl Gles1Decoder {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for Gles1Decoder {
    fn name(&self) -> &'static str {
        "GLESv1"
    }

    fn opcodes(&self) -> Range<u32> {
        GLES1_OPCODES
    }

    fn decode_packet(&mut self, packet: Packet<'_>, ctx: &mut DecodeContext<'_>) -> Result<(), GlsError> {
        const API: GlesApi = GlesApi::V1;
        let mut args = ArgReader::new(packet.opcode, packet.args);
        match packet.opcode {
            v1::VERTEX_POINTER_DATA | v1::COLOR_POINTER_DATA | v1::WEIGHT_POINTER_DATA | v1::MATRIX_INDEX_POINTER_DATA => {
                let kind = match packet.opcode {
                    v1::VERTEX_POINTER_DATA => PointerKind::Vertex,
                    v1::COLOR_POINTER_DATA => PointerKind::Color,
                    v1::WEIGHT_POINTER_DATA => PointerKind::Weight,
                    _ => PointerKind::MatrixIndex,
                };
                let size = args.i32()?;
                let ty = args.u32()?;
                let _stride = args.i32()?;
                let data = args.bytes()?;
                pointer_data(ctx, API, kind, size, ty, false, data);
            }
            v1::NORMAL_POINTER_DATA | v1::POINT_SIZE_POINTER_DATA => {
                let (kind, size) = if packet.opcode == v1::NORMAL_POINTER_DATA {
                    (PointerKind::Normal, 3)
                } else {
                    (PointerKind::PointSize, 1)
                };
                let ty = args.u32()?;
                let _stride = args.i32()?;
                let data = args.bytes()?;
                pointer_data(ctx, API, kind, size, ty, false, data);
            }
            v1::TEX_COORD_POINTER_DATA => {
                let unit = args.u32()?;
                let size = args.i32()?;
                let ty = args.u32()?;
                let _stride = args.i32()?;
                let data = args.bytes()?;
                if unit >= MAX_TEXTURE_UNITS {
                    warn!("texcoord pointer for unit {unit} ignored");
                    return Ok(());
                }
                pointer_data(ctx, API, PointerKind::TexCoord(unit as u8), size, ty, false, data);
            }
            v1::DRAW_ELEMENTS_DATA => draw_elements_data(ctx, API, &mut args)?,
            v1::FINISH_ROUND_TRIP => finish_round_trip(ctx, API),
            _ => forward(ctx, API, packet),
        }
        Ok(())
    }
}

// ── GLES 2 ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Gles2Decoder;

impl Gles2Decoder {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for Gles2Decoder {
    fn name(&self) -> &'static str {
        "GLESv2"
    }

    fn opcodes(&self) -> Range<u32> {
        GLES2_OPCODES
    }

    fn decode_packet(&mut self, packet: Packet<'_>, ctx: &mut DecodeContext<'_>) -> Result<(), GlsError> {
        const API: GlesApi = GlesApi::V2;
        let mut args = ArgReader::new(packet.opcode, packet.args);
        match packet.opcode {
            v2::VERTEX_ATTRIB_POINTER_DATA => {
                let index = args.u32()?;
                let size = args.i32()?;
                let ty = args.u32()?;
                let normalized = args.u32()? != 0;
                let _stride = args.i32()?;
                let data = args.bytes()?;
                pointer_data(ctx, API, PointerKind::Attrib(index), size, ty, normalized, data);
            }
            v2::DRAW_ELEMENTS_DATA => draw_elements_data(ctx, API, &mut args)?,
            v2::FINISH_ROUND_TRIP => finish_round_trip(ctx, API),
            _ => forward(ctx, API, packet),
        }
        Ok(())
    }
}
