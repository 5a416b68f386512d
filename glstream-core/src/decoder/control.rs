//! Control-plane decoder: EGL emulation, the handle registry and layer
//! posting.
//!
//! Each packet maps to one [`RcOpcode`]. Replies follow the common layout:
//! output buffers in argument order, then the 4-byte return value.
//!
//! ```text
//!   CreateContext(config, share, gl_version)      ─► u32 handle
//!   MakeCurrent(ctx, draw, read)                  ─► i32 EGL bool
//!   QueryEGLString(name, out buf[n], size)        ─► buf, i32 len | -len
//!   PostLayer(name, cb, alpha, crop, frame)       ─► (queued)
//!   PostAllLayersDone()                           ─► composer.submit_layers
//! ```

use std::fmt;
use std::ops::Range;

use bytes::{BufMut, BytesMut};
use tracing::{debug, warn};

use super::{CONTROL_OPCODES, DecodeContext, Decoder, Packet};
use crate::checksum::CHECKSUM_EXTENSION;
use crate::codec::{ArgReader, put_out_buffer};
use crate::compositor::Renderable;
use crate::error::GlsError;
use crate::geometry::Rect;
use crate::host::consts::{egl, gl};
use crate::host::{GlesApi, PixelLayout, Region};

/// Version reported by `GetRendererVersion`.
const RENDERER_VERSION: i32 = 1;

/// EGL extensions passed through to the guest.
const EGL_EXTENSION_WHITELIST: &[&str] = &["EGL_KHR_image_base", "EGL_KHR_gl_texture_2D_image"];

/// GL extensions passed through to the guest.
const GL_EXTENSION_WHITELIST: &[&str] = &[
    "GL_OES_EGL_image",
    "GL_OES_EGL_image_external",
    "GL_OES_depth24",
    "GL_OES_depth32",
    "GL_OES_element_index_uint",
    "GL_OES_texture_float",
    "GL_OES_texture_float_linear",
    "GL_OES_compressed_paletted_texture",
    "GL_OES_compressed_ETC1_RGB8_texture",
    "GL_OES_depth_texture",
    "GL_OES_texture_half_float",
    "GL_OES_texture_half_float_linear",
    "GL_OES_packed_depth_stencil",
    "GL_OES_vertex_half_float",
    "GL_OES_standard_derivatives",
    "GL_OES_texture_npot",
    "GL_OES_rgb8_rgba8",
];

/// The only GL version the guest ever sees.
const REPORTED_GL_VERSION: &str = "OpenGL ES 2.0";

// ── FB params ────────────────────────────────────────────────────

const FB_WIDTH: u32 = 1;
const FB_HEIGHT: u32 = 2;
const FB_XDPI: u32 = 3;
const FB_YDPI: u32 = 4;
const FB_FPS: u32 = 5;
const FB_MIN_SWAP_INTERVAL: u32 = 7;
const FB_MAX_SWAP_INTERVAL: u32 = 8;

const FB_DPI: i32 = 72;

// ── RcOpcode ─────────────────────────────────────────────────────

macro_rules! rc_opcodes {
    ($($name:ident = $value:literal,)*) => {
        /// Control-plane calls, numbered from 10000.
        #[repr(u32)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum RcOpcode {
            $($name = $value,)*
        }

        impl TryFrom<u32> for RcOpcode {
            type Error = GlsError;

            fn try_from(value: u32) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok(RcOpcode::$name),)*
                    _ => Err(GlsError::UnknownVariant {
                        type_name: "RcOpcode",
                        value: value as u64,
                    }),
                }
            }
        }

        impl fmt::Display for RcOpcode {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(RcOpcode::$name => write!(f, stringify!($name)),)*
                }
            }
        }
    };
}

rc_opcodes! {
    GetRendererVersion = 10000,
    GetEglVersion = 10001,
    QueryEglString = 10002,
    GetGlString = 10003,
    GetNumConfigs = 10004,
    GetConfigs = 10005,
    ChooseConfig = 10006,
    GetFbParam = 10007,
    CreateContext = 10008,
    DestroyContext = 10009,
    CreateWindowSurface = 10010,
    DestroyWindowSurface = 10011,
    CreateColorBuffer = 10012,
    OpenColorBuffer = 10013,
    CloseColorBuffer = 10014,
    SetWindowColorBuffer = 10015,
    FlushWindowColorBuffer = 10016,
    MakeCurrent = 10017,
    FbPost = 10018,
    FbSetSwapInterval = 10019,
    BindTexture = 10020,
    BindRenderbuffer = 10021,
    ColorBufferCacheFlush = 10022,
    ReadColorBuffer = 10023,
    UpdateColorBuffer = 10024,
    OpenColorBuffer2 = 10025,
    CreateClientImage = 10026,
    DestroyClientImage = 10027,
    SelectChecksumCalculator = 10028,
    GetNumDisplays = 10029,
    GetDisplayWidth = 10030,
    GetDisplayHeight = 10031,
    GetDisplayDpiX = 10032,
    GetDisplayDpiY = 10033,
    GetDisplayVsyncPeriod = 10034,
    PostLayer = 10035,
    PostAllLayersDone = 10036,
}

// ── Helpers ──────────────────────────────────────────────────────

/// Keep the space-separated entries of `list` that appear in `whitelist`.
fn filter_extensions(list: &str, whitelist: &[&str]) -> String {
    list.split(' ')
        .filter(|ext| whitelist.contains(ext))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Copy `value` NUL-terminated into an output buffer of `out_len` bytes.
///
/// Returns the bytes needed including the terminator, negated when the
/// buffer is too small (the buffer is left zeroed then).
fn put_string(body: &mut BytesMut, value: &str, out_len: usize) -> i32 {
    let needed = value.len() + 1;
    if needed > out_len {
        put_out_buffer(body, &[], out_len);
        return -(needed as i32);
    }
    put_out_buffer(body, value.as_bytes(), out_len);
    needed as i32
}

fn reply_i32(ctx: &mut DecodeContext<'_>, value: i32) {
    ctx.reply(&value.to_le_bytes());
}

fn reply_u32(ctx: &mut DecodeContext<'_>, value: u32) {
    ctx.reply(&value.to_le_bytes());
}

fn egl_bool(ok: bool) -> i32 {
    if ok { egl::TRUE } else { egl::FALSE }
}

fn status(ok: bool) -> i32 {
    if ok { 0 } else { -1 }
}

fn read_rect(args: &mut ArgReader<'_>) -> Result<Rect, GlsError> {
    Ok(Rect::new(args.i32()?, args.i32()?, args.i32()?, args.i32()?))
}

// ── ControlDecoder ───────────────────────────────────────────────

/// Decoder for the control-plane range. Holds the layers posted since the
/// last `PostAllLayersDone` on this connection.
#[derive(Debug, Default)]
pub struct ControlDecoder {
    pending: Vec<Renderable>,
}

impl ControlDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layers posted but not yet submitted.
    pub fn pending_layers(&self) -> &[Renderable] {
        &self.pending
    }

    fn query_egl_string(ctx: &mut DecodeContext<'_>, args: &mut ArgReader<'_>) -> Result<(), GlsError> {
        let name = args.u32()?;
        let out_len = args.out_len()?;
        let _size = args.i32()?;

        let mut value = ctx.renderer().egl_string(name).unwrap_or_default();
        let mut body = BytesMut::with_capacity(out_len + 4);
        if value.is_empty() {
            put_out_buffer(&mut body, &[], out_len);
            body.put_i32_le(0);
        } else {
            if name == egl::EXTENSIONS {
                value = filter_extensions(&value, EGL_EXTENSION_WHITELIST);
            }
            let ret = put_string(&mut body, &value, out_len);
            body.put_i32_le(ret);
        }
        ctx.reply(&body);
        Ok(())
    }

    fn get_gl_string(ctx: &mut DecodeContext<'_>, args: &mut ArgReader<'_>) -> Result<(), GlsError> {
        let name = args.u32()?;
        let out_len = args.out_len()?;
        let _size = args.i32()?;

        let source = match ctx.thread.current_context() {
            Some(_) => ctx.renderer().gl_string(name).unwrap_or_default(),
            None => String::new(),
        };
        let value = match name {
            gl::VERSION => REPORTED_GL_VERSION.to_string(),
            gl::EXTENSIONS => {
                let filtered = filter_extensions(&source, GL_EXTENSION_WHITELIST);
                if filtered.is_empty() {
                    CHECKSUM_EXTENSION.to_string()
                } else {
                    format!("{filtered} {CHECKSUM_EXTENSION}")
                }
            }
            _ => source,
        };

        let mut body = BytesMut::with_capacity(out_len + 4);
        let ret = put_string(&mut body, &value, out_len);
        body.put_i32_le(ret);
        ctx.reply(&body);
        Ok(())
    }

    fn choose_config(ctx: &mut DecodeContext<'_>, args: &mut ArgReader<'_>) -> Result<(), GlsError> {
        let raw = args.bytes()?;
        let attribs_size = args.u32()?;
        let out_len = args.out_len()?;
        let configs_size = args.u32()? as usize;

        let mut body = BytesMut::with_capacity(out_len + 4);
        if attribs_size == 0 {
            put_out_buffer(&mut body, &[], out_len);
            body.put_i32_le(0);
            ctx.reply(&body);
            return Ok(());
        }

        let attribs: Vec<i32> = raw
            .chunks_exact(4)
            .map(|w| i32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect();
        let renderer = ctx.renderer();
        let matched = renderer
            .configs()
            .choose_config(renderer.host().as_ref(), &attribs, configs_size);

        let mut written = Vec::with_capacity(out_len);
        if configs_size > 0 {
            for index in matched.iter().take(out_len / 4) {
                written.extend_from_slice(&index.to_le_bytes());
            }
        }
        put_out_buffer(&mut body, &written, out_len);
        body.put_i32_le(matched.len() as i32);
        ctx.reply(&body);
        Ok(())
    }

    fn get_fb_param(ctx: &DecodeContext<'_>, param: u32) -> i32 {
        let display = &ctx.env.display;
        match param {
            FB_WIDTH => display.width() as i32,
            FB_HEIGHT => display.height() as i32,
            FB_XDPI | FB_YDPI => FB_DPI,
            FB_FPS => display.refresh_rate() as i32,
            FB_MIN_SWAP_INTERVAL | FB_MAX_SWAP_INTERVAL => 1,
            _ => 0,
        }
    }

    fn read_color_buffer(ctx: &mut DecodeContext<'_>, args: &mut ArgReader<'_>) -> Result<(), GlsError> {
        let cb = args.u32()?;
        let region = Region::new(args.i32()?, args.i32()?, args.i32()?, args.i32()?);
        let layout = PixelLayout::new(args.u32()?, args.u32()?);
        let out_len = args.out_len()?;

        let mut pixels = vec![0u8; out_len];
        if !ctx.renderer().read_color_buffer(cb, region, layout, &mut pixels) {
            debug!("ReadColorBuffer {cb} failed");
        }
        ctx.reply(&pixels);
        Ok(())
    }

    fn update_color_buffer(ctx: &mut DecodeContext<'_>, args: &mut ArgReader<'_>) -> Result<(), GlsError> {
        let cb = args.u32()?;
        let region = Region::new(args.i32()?, args.i32()?, args.i32()?, args.i32()?);
        let layout = PixelLayout::new(args.u32()?, args.u32()?);
        let pixels = args.bytes()?;

        let ok = ctx.renderer().update_color_buffer(cb, region, layout, pixels);
        reply_i32(ctx, status(ok));
        Ok(())
    }

    fn post_layer(&mut self, args: &mut ArgReader<'_>) -> Result<(), GlsError> {
        let name = args.string()?;
        let buffer = args.u32()?;
        let alpha = args.f32()?;
        let crop = read_rect(args)?;
        let screen = read_rect(args)?;
        self.pending
            .push(Renderable::new(name, buffer, screen, crop).with_alpha(alpha));
        Ok(())
    }

    fn post_all_layers_done(&mut self, ctx: &DecodeContext<'_>) {
        let layers = std::mem::take(&mut self.pending);
        match &ctx.env.composer {
            Some(composer) => composer.submit_layers(&layers),
            None => debug!("dropping {} layers, no composer", layers.len()),
        }
    }
}

impl Decoder for ControlDecoder {
    fn name(&self) -> &'static str {
        "renderControl"
    }

    fn opcodes(&self) -> Range<u32> {
        CONTROL_OPCODES
    }

    fn decode_packet(&mut self, packet: Packet<'_>, ctx: &mut DecodeContext<'_>) -> Result<(), GlsError> {
        let opcode = RcOpcode::try_from(packet.opcode)?;
        let mut args = ArgReader::new(packet.opcode, packet.args);
        let renderer = ctx.env.renderer.clone();

        match opcode {
            RcOpcode::GetRendererVersion => reply_i32(ctx, RENDERER_VERSION),
            RcOpcode::GetEglVersion => {
                let major_len = args.out_len()?;
                let minor_len = args.out_len()?;
                let caps = renderer.caps();
                let mut body = BytesMut::with_capacity(major_len + minor_len + 4);
                put_out_buffer(&mut body, &caps.egl_major.to_le_bytes(), major_len);
                put_out_buffer(&mut body, &caps.egl_minor.to_le_bytes(), minor_len);
                body.put_i32_le(egl::TRUE);
                ctx.reply(&body);
            }
            RcOpcode::QueryEglString => Self::query_egl_string(ctx, &mut args)?,
            RcOpcode::GetGlString => Self::get_gl_string(ctx, &mut args)?,
            RcOpcode::GetNumConfigs => {
                let out_len = args.out_len()?;
                let (count, attribs) = renderer.configs().pack_info();
                let mut body = BytesMut::with_capacity(out_len + 4);
                put_out_buffer(&mut body, &attribs.to_le_bytes(), out_len);
                body.put_i32_le(count);
                ctx.reply(&body);
            }
            RcOpcode::GetConfigs => {
                // Anything past the packed table would stay zero.
                let size = (args.u32()? as usize).min(renderer.configs().packed_size());
                let out_len = args.out_len()?;
                let mut table = vec![0u8; size];
                let ret = renderer.configs().pack_configs(&mut table);
                let mut body = BytesMut::with_capacity(out_len + 4);
                put_out_buffer(&mut body, &table, out_len);
                body.put_i32_le(ret);
                ctx.reply(&body);
            }
            RcOpcode::ChooseConfig => Self::choose_config(ctx, &mut args)?,
            RcOpcode::GetFbParam => {
                let param = args.u32()?;
                let value = Self::get_fb_param(ctx, param);
                reply_i32(ctx, value);
            }
            RcOpcode::CreateContext => {
                let config = args.u32()?;
                let share = args.u32()?;
                let gl_version = args.u32()?;
                let api = if matches!(gl_version, 2 | 3) { GlesApi::V2 } else { GlesApi::V1 };
                let handle = renderer.create_context(ctx.thread, config, share, api);
                reply_u32(ctx, handle.map_or(0, |h| h.raw()));
            }
            RcOpcode::DestroyContext => renderer.destroy_context(ctx.thread, args.u32()?),
            RcOpcode::CreateWindowSurface => {
                let config = args.u32()?;
                let width = args.u32()?;
                let height = args.u32()?;
                let handle = renderer.create_surface(ctx.thread, config, width, height);
                reply_u32(ctx, handle.map_or(0, |h| h.raw()));
            }
            RcOpcode::DestroyWindowSurface => renderer.destroy_surface(ctx.thread, args.u32()?),
            RcOpcode::CreateColorBuffer => {
                let width = args.u32()?;
                let height = args.u32()?;
                let format = args.u32()?;
                let handle = renderer.create_color_buffer(width, height, format);
                reply_u32(ctx, handle.map_or(0, |h| h.raw()));
            }
            RcOpcode::OpenColorBuffer => {
                renderer.open_color_buffer(args.u32()?);
            }
            RcOpcode::CloseColorBuffer => renderer.close_color_buffer(args.u32()?),
            RcOpcode::SetWindowColorBuffer => {
                let surface = args.u32()?;
                let cb = args.u32()?;
                renderer.set_surface_color_buffer(surface, cb);
            }
            RcOpcode::FlushWindowColorBuffer => {
                let surface = args.u32()?;
                let ok = renderer.flush_surface_color_buffer(ctx.thread, surface);
                reply_i32(ctx, status(ok));
            }
            RcOpcode::MakeCurrent => {
                let context = args.u32()?;
                let draw = args.u32()?;
                let read = args.u32()?;
                let ok = renderer.bind_context(ctx.thread, context, draw, read);
                reply_i32(ctx, egl_bool(ok));
            }
            RcOpcode::FbPost => warn!("FBPost({}) is not supported", args.u32()?),
            RcOpcode::FbSetSwapInterval => debug!("swap interval {} ignored", args.i32()?),
            RcOpcode::BindTexture => {
                renderer.bind_color_buffer_to_texture(ctx.thread, args.u32()?);
            }
            RcOpcode::BindRenderbuffer => {
                renderer.bind_color_buffer_to_renderbuffer(ctx.thread, args.u32()?);
            }
            RcOpcode::ColorBufferCacheFlush => {
                let _cb = args.u32()?;
                let _post_count = args.i32()?;
                let _for_read = args.i32()?;
                reply_i32(ctx, 0);
            }
            RcOpcode::ReadColorBuffer => Self::read_color_buffer(ctx, &mut args)?,
            RcOpcode::UpdateColorBuffer => Self::update_color_buffer(ctx, &mut args)?,
            RcOpcode::OpenColorBuffer2 => {
                let ok = renderer.open_color_buffer(args.u32()?);
                reply_i32(ctx, status(ok));
            }
            RcOpcode::CreateClientImage => {
                let context = args.u32()?;
                let target = args.u32()?;
                let buffer = args.u32()?;
                let handle = renderer.create_client_image(context, target, u64::from(buffer));
                reply_u32(ctx, handle.map_or(0, |h| h.raw()));
            }
            RcOpcode::DestroyClientImage => {
                let ok = renderer.destroy_client_image(args.u32()?);
                reply_i32(ctx, egl_bool(ok));
            }
            RcOpcode::SelectChecksumCalculator => {
                let version = args.u32()?;
                let _reserved = args.u32()?;
                match ctx.thread.checksum.set_version(version) {
                    Ok(()) => debug!("checksum version {version} selected"),
                    Err(e) => warn!("SelectChecksumCalculator: {e}"),
                }
            }
            RcOpcode::GetNumDisplays => reply_i32(ctx, 1),
            RcOpcode::GetDisplayWidth => {
                let _display = args.u32()?;
                let width = ctx.env.display.width() as i32;
                reply_i32(ctx, width);
            }
            RcOpcode::GetDisplayHeight => {
                let _display = args.u32()?;
                let height = ctx.env.display.height() as i32;
                reply_i32(ctx, height);
            }
            RcOpcode::GetDisplayDpiX | RcOpcode::GetDisplayDpiY => {
                let _display = args.u32()?;
                let dpi = ctx.env.display.dpi() as i32;
                reply_i32(ctx, dpi);
            }
            RcOpcode::GetDisplayVsyncPeriod => {
                let _display = args.u32()?;
                reply_i32(ctx, 1);
            }
            RcOpcode::PostLayer => self.post_layer(&mut args)?,
            RcOpcode::PostAllLayersDone => self.post_all_layers_done(ctx),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::codec::PacketBuilder;
    use crate::compositor::testing::RecordingRenderer;
    use crate::compositor::{LayerComposer, SingleWindowManager, SingleWindowStrategy};
    use crate::decoder::testing::{Fixture, packet};

    fn call(f: &mut Fixture, dec: &mut ControlDecoder, builder: PacketBuilder) -> Vec<u8> {
        let bytes = packet(builder);
        assert_eq!(f.run(dec, &bytes), bytes.len());
        f.take_replies()
    }

    fn word(bytes: &[u8], at: usize) -> i32 {
        i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
    }

    fn op(o: RcOpcode) -> PacketBuilder {
        PacketBuilder::new(o as u32)
    }

    #[test]
    fn opcodes_follow_the_table() {
        assert_eq!(RcOpcode::try_from(10000).unwrap(), RcOpcode::GetRendererVersion);
        assert_eq!(RcOpcode::try_from(10017).unwrap(), RcOpcode::MakeCurrent);
        assert_eq!(RcOpcode::try_from(10036).unwrap(), RcOpcode::PostAllLayersDone);
        assert!(matches!(
            RcOpcode::try_from(10037),
            Err(GlsError::UnknownVariant { type_name: "RcOpcode", value: 10037 })
        ));
        assert_eq!(RcOpcode::SelectChecksumCalculator.to_string(), "SelectChecksumCalculator");
        assert_eq!(CONTROL_OPCODES.end, RcOpcode::PostAllLayersDone as u32 + 1);
    }

    #[test]
    fn versions() {
        let mut f = Fixture::new();
        let mut dec = ControlDecoder::new();
        let reply = call(&mut f, &mut dec, op(RcOpcode::GetRendererVersion));
        assert_eq!(reply, 1i32.to_le_bytes());

        let reply = call(&mut f, &mut dec, op(RcOpcode::GetEglVersion).out_len(4).out_len(4));
        assert_eq!(reply.len(), 12);
        assert_eq!(word(&reply, 0), 1);
        assert_eq!(word(&reply, 4), 4);
        assert_eq!(word(&reply, 8), egl::TRUE);
    }

    #[test]
    fn egl_extensions_are_filtered() {
        let mut f = Fixture::new();
        let mut dec = ControlDecoder::new();
        let reply = call(
            &mut f,
            &mut dec,
            op(RcOpcode::QueryEglString).u32(egl::EXTENSIONS).out_len(128).i32(128),
        );
        let expected = "EGL_KHR_image_base EGL_KHR_gl_texture_2D_image";
        assert_eq!(reply.len(), 132);
        assert_eq!(&reply[..expected.len()], expected.as_bytes());
        assert_eq!(reply[expected.len()], 0);
        assert_eq!(word(&reply, 128), expected.len() as i32 + 1);
    }

    #[test]
    fn short_string_buffer_reports_needed_size() {
        let mut f = Fixture::new();
        let mut dec = ControlDecoder::new();
        let reply = call(&mut f, &mut dec, op(RcOpcode::QueryEglString).u32(egl::VENDOR).out_len(4).i32(4));
        assert_eq!(&reply[..4], &[0; 4]);
        assert_eq!(word(&reply, 4), -("glstream".len() as i32 + 1));

        let reply = call(&mut f, &mut dec, op(RcOpcode::QueryEglString).u32(0x1234).out_len(4).i32(4));
        assert_eq!(word(&reply, 4), 0);
    }

    #[test]
    fn gl_strings_depend_on_the_current_context() {
        let mut f = Fixture::new();
        let mut dec = ControlDecoder::new();

        let reply = call(&mut f, &mut dec, op(RcOpcode::GetGlString).u32(gl::VENDOR).out_len(16).i32(16));
        assert_eq!(word(&reply, 16), 1);

        f.bind();
        let reply = call(&mut f, &mut dec, op(RcOpcode::GetGlString).u32(gl::VERSION).out_len(32).i32(32));
        assert_eq!(&reply[..REPORTED_GL_VERSION.len()], REPORTED_GL_VERSION.as_bytes());

        let reply = call(&mut f, &mut dec, op(RcOpcode::GetGlString).u32(gl::EXTENSIONS).out_len(512).i32(512));
        let len = word(&reply, 512) as usize;
        let text = std::str::from_utf8(&reply[..len - 1]).unwrap();
        assert!(text.contains("GL_OES_EGL_image"));
        assert!(text.contains("GL_OES_depth24"));
        assert!(!text.contains("GL_EXT_debug_marker"));
        assert!(text.ends_with(CHECKSUM_EXTENSION));
        f.unbind();
    }

    #[test]
    fn fb_params_and_display_queries() {
        let mut f = Fixture::new();
        let mut dec = ControlDecoder::new();
        let mut param = |f: &mut Fixture, p: u32| word(&call(f, &mut dec, op(RcOpcode::GetFbParam).u32(p)), 0);
        assert_eq!(param(&mut f, FB_WIDTH), 1280);
        assert_eq!(param(&mut f, FB_HEIGHT), 720);
        assert_eq!(param(&mut f, FB_XDPI), 72);
        assert_eq!(param(&mut f, FB_FPS), 60);
        assert_eq!(param(&mut f, FB_MAX_SWAP_INTERVAL), 1);
        assert_eq!(param(&mut f, 6), 0);

        let mut dec = ControlDecoder::new();
        f.env.display.set_resolution(800, 600);
        assert_eq!(word(&call(&mut f, &mut dec, op(RcOpcode::GetDisplayWidth).u32(0)), 0), 800);
        assert_eq!(word(&call(&mut f, &mut dec, op(RcOpcode::GetDisplayHeight).u32(0)), 0), 600);
        assert_eq!(word(&call(&mut f, &mut dec, op(RcOpcode::GetDisplayDpiY).u32(0)), 0), 120);
        assert_eq!(word(&call(&mut f, &mut dec, op(RcOpcode::GetNumDisplays)), 0), 1);
        assert_eq!(word(&call(&mut f, &mut dec, op(RcOpcode::GetDisplayVsyncPeriod).u32(0)), 0), 1);
    }

    #[test]
    fn context_and_surface_lifecycle() {
        let mut f = Fixture::new();
        let mut dec = ControlDecoder::new();

        let ctx = word(&call(&mut f, &mut dec, op(RcOpcode::CreateContext).u32(0).u32(0).u32(2)), 0) as u32;
        let surface = word(&call(&mut f, &mut dec, op(RcOpcode::CreateWindowSurface).u32(0).u32(8).u32(8)), 0) as u32;
        assert_ne!(ctx, 0);
        assert_ne!(surface, 0);
        assert_ne!(ctx, surface);

        let bogus = word(&call(&mut f, &mut dec, op(RcOpcode::CreateContext).u32(999).u32(0).u32(2)), 0);
        assert_eq!(bogus, 0);

        let ok = call(&mut f, &mut dec, op(RcOpcode::MakeCurrent).u32(ctx).u32(surface).u32(surface));
        assert_eq!(word(&ok, 0), egl::TRUE);
        assert!(f.thread.current_context().is_some());

        let bad = call(&mut f, &mut dec, op(RcOpcode::MakeCurrent).u32(ctx).u32(12345).u32(surface));
        assert_eq!(word(&bad, 0), egl::FALSE);
        assert!(f.thread.current_context().is_some());

        let released = call(&mut f, &mut dec, op(RcOpcode::MakeCurrent).u32(0).u32(0).u32(0));
        assert_eq!(word(&released, 0), egl::TRUE);
        assert!(f.thread.current_context().is_none());

        assert!(call(&mut f, &mut dec, op(RcOpcode::DestroyContext).u32(ctx)).is_empty());
        assert!(call(&mut f, &mut dec, op(RcOpcode::DestroyWindowSurface).u32(surface)).is_empty());
        assert_eq!(f.env.renderer.context_count(), 0);
        assert_eq!(f.env.renderer.surface_count(), 0);
        assert!(f.thread.is_idle());
    }

    #[test]
    fn color_buffer_update_then_read() {
        let mut f = Fixture::new();
        let mut dec = ControlDecoder::new();

        let cb = word(
            &call(&mut f, &mut dec, op(RcOpcode::CreateColorBuffer).u32(2).u32(2).u32(gl::RGBA)),
            0,
        ) as u32;
        assert_ne!(cb, 0);

        let pixels: Vec<u8> = (0..16).collect();
        let updated = call(
            &mut f,
            &mut dec,
            op(RcOpcode::UpdateColorBuffer)
                .u32(cb)
                .i32(0)
                .i32(0)
                .i32(2)
                .i32(2)
                .u32(gl::RGBA)
                .u32(gl::UNSIGNED_BYTE)
                .bytes(&pixels),
        );
        assert_eq!(word(&updated, 0), 0);

        let read = call(
            &mut f,
            &mut dec,
            op(RcOpcode::ReadColorBuffer)
                .u32(cb)
                .i32(0)
                .i32(0)
                .i32(2)
                .i32(2)
                .u32(gl::RGBA)
                .u32(gl::UNSIGNED_BYTE)
                .out_len(16),
        );
        assert_eq!(read, pixels);

        let missing = call(&mut f, &mut dec, op(RcOpcode::OpenColorBuffer2).u32(cb + 100));
        assert_eq!(word(&missing, 0), -1);

        let failed = call(
            &mut f,
            &mut dec,
            op(RcOpcode::UpdateColorBuffer)
                .u32(cb + 100)
                .i32(0)
                .i32(0)
                .i32(1)
                .i32(1)
                .u32(gl::RGBA)
                .u32(gl::UNSIGNED_BYTE)
                .bytes(&[0; 4]),
        );
        assert_eq!(word(&failed, 0), -1);

        assert!(call(&mut f, &mut dec, op(RcOpcode::CloseColorBuffer).u32(cb)).is_empty());
        assert_eq!(f.env.renderer.color_buffer_count(), 0);
    }

    #[test]
    fn config_queries() {
        let mut f = Fixture::new();
        let mut dec = ControlDecoder::new();
        let (count, attribs) = f.env.renderer.configs().pack_info();

        let reply = call(&mut f, &mut dec, op(RcOpcode::GetNumConfigs).out_len(4));
        assert_eq!(word(&reply, 0), attribs);
        assert_eq!(word(&reply, 4), count);

        let reply = call(&mut f, &mut dec, op(RcOpcode::GetConfigs).u32(4).out_len(4));
        assert!(word(&reply, 4) < 0);

        let size = f.env.renderer.configs().packed_size();
        let reply = call(&mut f, &mut dec, op(RcOpcode::GetConfigs).u32(size as u32).out_len(size));
        assert_eq!(word(&reply, size), count);
        assert_eq!(word(&reply, 0), egl::DEPTH_SIZE);

        let attribs: Vec<u8> = [egl::RED_SIZE, 8, egl::NONE]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let reply = call(
            &mut f,
            &mut dec,
            op(RcOpcode::ChooseConfig).bytes(&attribs).u32(3).out_len(0).u32(0),
        );
        let matched = word(&reply, 0);
        assert!(matched > 0);

        let reply = call(
            &mut f,
            &mut dec,
            op(RcOpcode::ChooseConfig).bytes(&attribs).u32(0).out_len(4).u32(1),
        );
        assert_eq!(word(&reply, 4), 0);
    }

    #[test]
    fn checksum_selection_applies_to_later_packets() {
        let mut f = Fixture::new();
        let mut dec = ControlDecoder::new();
        assert!(call(&mut f, &mut dec, op(RcOpcode::SelectChecksumCalculator).u32(1).u32(0)).is_empty());
        assert_eq!(f.thread.checksum.version(), 1);

        let mut guest = crate::checksum::ChecksumEncoder::new(1);
        let bytes = op(RcOpcode::GetRendererVersion).build(&mut guest);
        assert_eq!(f.run(&mut dec, &bytes), bytes.len());
        let reply = f.take_replies();
        assert_eq!(reply.len(), 12);
        assert!(guest.check_reply(&reply[..4], &reply[4..]));

        // Unsupported versions keep the current one.
        let bytes = op(RcOpcode::SelectChecksumCalculator).u32(7).u32(0).build(&mut guest);
        f.run(&mut dec, &bytes);
        assert_eq!(f.thread.checksum.version(), 1);
    }

    #[test]
    fn posted_layers_reach_the_composer() {
        let mut f = Fixture::new();
        let recorder = Arc::new(RecordingRenderer::default());
        let wm = Arc::new(SingleWindowManager::new(Rect::from_size(64, 64), f.host.clone(), recorder.clone()).unwrap());
        f.env.composer = Some(Arc::new(LayerComposer::new(
            recorder.clone(),
            Box::new(SingleWindowStrategy::new(wm)),
        )));
        let mut dec = ControlDecoder::new();

        let layer = |name: &str, cb: u32| {
            op(RcOpcode::PostLayer)
                .string(name)
                .u32(cb)
                .f32(0.5)
                .i32(0)
                .i32(0)
                .i32(32)
                .i32(32)
                .i32(4)
                .i32(4)
                .i32(36)
                .i32(36)
        };
        assert!(call(&mut f, &mut dec, layer("org.anbox.surface.1", 7)).is_empty());
        assert!(call(&mut f, &mut dec, layer("Sprite", 8)).is_empty());
        assert_eq!(dec.pending_layers().len(), 2);
        assert!(recorder.draws.lock().is_empty());

        call(&mut f, &mut dec, op(RcOpcode::PostAllLayersDone));
        assert!(dec.pending_layers().is_empty());

        let draws = recorder.draws.lock();
        assert_eq!(draws.len(), 1);
        let drawn = &draws[0].2;
        assert_eq!(drawn.len(), 1);
        assert_eq!(drawn[0].name, "org.anbox.surface.1");
        assert_eq!(drawn[0].buffer, 7);
        assert_eq!(drawn[0].alpha, 0.5);
        assert_eq!(drawn[0].crop, Rect::new(0, 0, 32, 32));
        assert_eq!(drawn[0].screen, Rect::new(4, 4, 36, 36));
    }

    #[test]
    fn truncated_arguments_are_a_fault() {
        let mut f = Fixture::new();
        let bytes = packet(op(RcOpcode::MakeCurrent).u32(1));
        assert!(matches!(
            f.try_run(&mut ControlDecoder::new(), &bytes),
            Err(GlsError::TruncatedArguments { opcode: 10017, .. })
        ));
    }

    #[test]
    fn replies_are_bounded_by_the_table_and_the_out_cap() {
        let mut f = Fixture::new();
        let mut dec = ControlDecoder::new();
        let size = f.env.renderer.configs().packed_size();
        let (count, _) = f.env.renderer.configs().pack_info();

        let reply = call(&mut f, &mut dec, op(RcOpcode::GetConfigs).u32(u32::MAX).out_len(size));
        assert_eq!(reply.len(), size + 4);
        assert_eq!(word(&reply, size), count);

        let bytes = packet(op(RcOpcode::GetConfigs).u32(16).out_len(u32::MAX as usize));
        assert!(matches!(
            f.try_run(&mut dec, &bytes),
            Err(GlsError::OutBufferTooLarge { opcode: 10005, .. })
        ));
        assert!(f.take_replies().is_empty());
    }
}
