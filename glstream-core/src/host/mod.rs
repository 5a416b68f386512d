//! The seam between the render server and the host GPU driver.
//!
//! [`HostDriver`] covers the EGL calls and the handful of GL operations the
//! server issues on its own behalf (color buffer storage, blits, layer
//! composition). [`GlesDispatch`] receives the guest's GLES calls that the
//! decoders forward verbatim.
//!
//! GL calls act on the context current on the calling thread, exactly like
//! the C API. Callers make sure a suitable context is bound first.

pub mod consts;
pub mod emulated;

use crate::error::HostError;
use crate::geometry::Mat4;

// ── Host object names ────────────────────────────────────────────

macro_rules! host_object {
    ($(#[$doc:meta])* $name:ident($inner:ty)) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub $inner);
    };
}

host_object!(
    /// An `EGLConfig`.
    HostConfig(usize)
);
host_object!(
    /// An `EGLContext`.
    HostContext(usize)
);
host_object!(
    /// An `EGLSurface`.
    HostSurface(usize)
);
host_object!(
    /// An `EGLImageKHR`.
    HostImage(usize)
);
host_object!(
    /// A GL texture name.
    GlTexture(u32)
);
host_object!(
    /// A GL framebuffer object name.
    GlFramebuffer(u32)
);
host_object!(
    /// A linked GL program.
    GlProgram(u32)
);
host_object!(
    /// Platform window handle handed out by the window backend.
    NativeWindow(u64)
);

/// The context and surfaces current on one thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HostBinding {
    pub context: Option<HostContext>,
    pub draw: Option<HostSurface>,
    pub read: Option<HostSurface>,
}

impl HostBinding {
    pub const UNBOUND: HostBinding = HostBinding {
        context: None,
        draw: None,
        read: None,
    };

    pub fn new(context: HostContext, draw: Option<HostSurface>, read: Option<HostSurface>) -> Self {
        Self {
            context: Some(context),
            draw,
            read,
        }
    }

    pub fn is_unbound(&self) -> bool {
        self.context.is_none()
    }
}

// ── Value types ──────────────────────────────────────────────────

/// Which GLES API a context speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlesApi {
    V1,
    V2,
}

impl GlesApi {
    pub fn client_version(self) -> i32 {
        match self {
            GlesApi::V1 => 1,
            GlesApi::V2 => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EglVersion {
    pub major: i32,
    pub minor: i32,
}

/// Internal format of a color buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgb,
    Rgba,
}

impl PixelFormat {
    /// Map a guest internal format; packed 16-bit formats widen to 8 bits
    /// per channel.
    pub fn from_internal_format(format: u32) -> Option<Self> {
        use consts::gl;
        match format {
            gl::RGB | gl::RGB565_OES => Some(PixelFormat::Rgb),
            gl::RGBA | gl::RGB5_A1_OES | gl::RGBA4_OES => Some(PixelFormat::Rgba),
            _ => None,
        }
    }

    pub fn gl_format(self) -> u32 {
        match self {
            PixelFormat::Rgb => consts::gl::RGB,
            PixelFormat::Rgba => consts::gl::RGBA,
        }
    }
}

/// Client-side pixel layout for reads and uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelLayout {
    pub format: u32,
    pub ty: u32,
}

impl PixelLayout {
    pub const RGBA8: PixelLayout = PixelLayout {
        format: consts::gl::RGBA,
        ty: consts::gl::UNSIGNED_BYTE,
    };

    pub fn new(format: u32, ty: u32) -> Self {
        Self { format, ty }
    }

    /// Bytes per pixel, `None` for combinations GLES does not define.
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        use consts::gl;
        match (self.format, self.ty) {
            (gl::RGBA, gl::UNSIGNED_BYTE) => Some(4),
            (gl::RGB, gl::UNSIGNED_BYTE) => Some(3),
            (gl::LUMINANCE_ALPHA, gl::UNSIGNED_BYTE) => Some(2),
            (gl::ALPHA | gl::LUMINANCE, gl::UNSIGNED_BYTE) => Some(1),
            (gl::RGB, gl::UNSIGNED_SHORT_5_6_5) => Some(2),
            (gl::RGBA, gl::UNSIGNED_SHORT_4_4_4_4 | gl::UNSIGNED_SHORT_5_5_5_1) => Some(2),
            _ => None,
        }
    }

    /// Byte size of a tightly packed `width` x `height` block.
    pub fn image_size(&self, width: u32, height: u32) -> Option<usize> {
        self.bytes_per_pixel()?
            .checked_mul(width as usize)?
            .checked_mul(height as usize)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFilter {
    Nearest,
    Linear,
}

/// Pixel region with a bottom-left origin, as GL addresses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn sized(width: i32, height: i32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Exclusive far corner. `None` for a negative size or a corner past
    /// `i32::MAX`.
    pub fn end(&self) -> Option<(i32, i32)> {
        if self.width < 0 || self.height < 0 {
            return None;
        }
        Some((self.x.checked_add(self.width)?, self.y.checked_add(self.height)?))
    }

    pub fn texel_count(&self) -> Option<usize> {
        if self.width < 0 || self.height < 0 {
            return None;
        }
        (self.width as usize).checked_mul(self.height as usize)
    }
}

// ── Quad drawing ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vertex {
    pub position: [f32; 3],
    pub texcoord: [f32; 2],
}

impl Vertex {
    pub const fn new(x: f32, y: f32, s: f32, t: f32) -> Self {
        Self {
            position: [x, y, 0.0],
            texcoord: [s, t],
        }
    }
}

/// Uniform values for the compositor vertex shader.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadUniforms {
    pub screen_to_gl: Mat4,
    pub transform: Mat4,
    pub center: [f32; 2],
    pub alpha: f32,
}

impl Default for QuadUniforms {
    fn default() -> Self {
        Self {
            screen_to_gl: Mat4::IDENTITY,
            transform: Mat4::IDENTITY,
            center: [0.0, 0.0],
            alpha: 1.0,
        }
    }
}

/// One textured triangle-strip quad.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadDraw {
    pub program: GlProgram,
    pub texture: GlTexture,
    pub vertices: [Vertex; 4],
    pub uniforms: QuadUniforms,
    pub blend: bool,
}

// ── Pointer data ─────────────────────────────────────────────────

/// Vertex-array slot a pointer-data call feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerKind {
    Vertex,
    Normal,
    Color,
    PointSize,
    TexCoord(u8),
    MatrixIndex,
    Weight,
    /// GLES2 generic attribute.
    Attrib(u32),
}

impl PointerKind {
    /// Storage slot in a context's pointer-data store.
    pub fn location(self) -> usize {
        match self {
            PointerKind::Vertex => 0,
            PointerKind::Normal => 1,
            PointerKind::Color => 2,
            PointerKind::PointSize => 3,
            PointerKind::TexCoord(unit) => 4 + unit as usize,
            PointerKind::MatrixIndex => 12,
            PointerKind::Weight => 13,
            PointerKind::Attrib(index) => index as usize,
        }
    }
}

/// A client-array pointer call with its data inlined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttribPointer<'a> {
    pub kind: PointerKind,
    pub size: i32,
    pub ty: u32,
    pub normalized: bool,
    pub stride: i32,
    pub data: &'a [u8],
}

// ── Traits ───────────────────────────────────────────────────────

/// EGL display plus the GL operations the server performs itself.
pub trait HostDriver: Send + Sync {
    // ── EGL ──
    fn initialize(&self) -> Result<EglVersion, HostError>;
    fn query_string(&self, name: u32) -> Option<String>;
    fn configs(&self) -> Result<Vec<HostConfig>, HostError>;
    fn config_attrib(&self, config: HostConfig, attrib: i32) -> Option<i32>;
    /// `attribs` is an `EGL_NONE`-terminated key/value list.
    fn choose_config(&self, attribs: &[i32], max: usize) -> Result<Vec<HostConfig>, HostError>;
    fn create_context(
        &self,
        config: HostConfig,
        share: Option<HostContext>,
        api: GlesApi,
    ) -> Result<HostContext, HostError>;
    fn destroy_context(&self, context: HostContext);
    fn create_pbuffer(&self, config: HostConfig, width: u32, height: u32) -> Result<HostSurface, HostError>;
    fn create_window_surface(&self, config: HostConfig, window: NativeWindow) -> Result<HostSurface, HostError>;
    fn destroy_surface(&self, surface: HostSurface);
    /// Bind on the calling thread; [`HostBinding::UNBOUND`] releases.
    fn make_current(&self, binding: HostBinding) -> Result<(), HostError>;
    /// Binding of the calling thread.
    fn current(&self) -> HostBinding;
    fn swap_buffers(&self, surface: HostSurface) -> Result<(), HostError>;
    /// `context` is required for GL-object targets and ignored otherwise.
    fn create_image(&self, context: Option<HostContext>, target: u32, buffer: u64) -> Result<HostImage, HostError>;
    fn destroy_image(&self, image: HostImage);

    // ── GL on the current context ──
    fn gl_string(&self, name: u32) -> Option<String>;
    /// A texture name with no storage.
    fn gen_texture(&self) -> Result<GlTexture, HostError>;
    /// A zero-filled, clamped texture. The previous texture binding is kept.
    fn create_texture(
        &self,
        format: PixelFormat,
        width: u32,
        height: u32,
        filter: TextureFilter,
    ) -> Result<GlTexture, HostError>;
    fn delete_texture(&self, texture: GlTexture);
    fn bound_texture(&self) -> Option<GlTexture>;
    fn bind_texture(&self, texture: Option<GlTexture>);
    /// Upload with unpack alignment 1. The previous texture binding is kept.
    fn update_texture(
        &self,
        texture: GlTexture,
        region: Region,
        layout: PixelLayout,
        pixels: &[u8],
    ) -> Result<(), HostError>;
    /// `glEGLImageTargetTexture2DOES` on the bound texture.
    fn image_target_texture(&self, image: HostImage) -> Result<(), HostError>;
    /// `glEGLImageTargetRenderbufferStorageOES` on the bound renderbuffer.
    fn image_target_renderbuffer(&self, image: HostImage) -> Result<(), HostError>;
    /// `glCopyTexSubImage2D` from the read surface into the bound texture.
    fn copy_read_to_texture(&self, width: u32, height: u32) -> Result<(), HostError>;
    /// A complete framebuffer with `texture` as color attachment. The
    /// previous framebuffer binding is kept.
    fn create_framebuffer(&self, texture: GlTexture) -> Result<GlFramebuffer, HostError>;
    fn bind_framebuffer(&self, framebuffer: Option<GlFramebuffer>);
    fn delete_framebuffer(&self, framebuffer: GlFramebuffer);
    /// Read with pack alignment 1 from the bound framebuffer.
    fn read_pixels(&self, region: Region, layout: PixelLayout, out: &mut [u8]) -> Result<(), HostError>;
    fn viewport(&self) -> Region;
    fn set_viewport(&self, region: Region);
    fn clear(&self, rgba: [f32; 4]);
    fn create_program(&self, vertex: &str, fragment: &str) -> Result<GlProgram, HostError>;
    fn delete_program(&self, program: GlProgram);
    fn draw_quad(&self, draw: &QuadDraw) -> Result<(), HostError>;
    fn finish(&self);
}

/// Receiver for guest GLES calls the decoders forward.
pub trait GlesDispatch: Send + Sync {
    /// Execute an opaque call; returns the reply bytes, empty for none.
    fn execute(&self, api: GlesApi, opcode: u32, args: &[u8]) -> Result<Vec<u8>, HostError>;
    fn attrib_pointer(&self, api: GlesApi, pointer: &AttribPointer<'_>) -> Result<(), HostError>;
    fn draw_elements(&self, api: GlesApi, mode: u32, count: i32, ty: u32, indices: &[u8]) -> Result<(), HostError>;
    fn finish(&self, api: GlesApi);
}

/// Whether `name` appears as a whole word in a space-separated extension list.
pub fn has_extension(extensions: &str, name: &str) -> bool {
    extensions.split_ascii_whitespace().any(|e| e == name)
}
