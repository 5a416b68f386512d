//! In-memory host driver.
//!
//! `EmulatedHost` implements [`HostDriver`], [`GlesDispatch`] and
//! [`NativeWindowFactory`] without a GPU. Every surface and texture is an
//! RGBA8 pixel array with GL's bottom-left origin, and `draw_quad` runs a
//! tiny nearest-sample rasterizer over axis-aligned quads. It backs the
//! `emulated` driver and the test suites.
//!
//! Objects are tracked with the same rules a real EGL stack enforces where
//! the render server depends on them: a context is current on at most one
//! thread, EGLImages share storage with their source texture, and GL calls
//! fail without a current context.

use std::collections::HashMap;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use super::consts::{egl, gl};
use super::{
    AttribPointer, EglVersion, GlFramebuffer, GlProgram, GlTexture, GlesApi, GlesDispatch,
    HostBinding, HostConfig, HostContext, HostDriver, HostImage, HostSurface, NativeWindow,
    PixelFormat, PixelLayout, PointerKind, QuadDraw, Region, TextureFilter,
};
use crate::compositor::NativeWindowFactory;
use crate::error::HostError;
use crate::geometry::Rect;

pub const DEFAULT_EGL_EXTENSIONS: &str = "EGL_KHR_image_base EGL_KHR_gl_texture_2D_image \
     EGL_KHR_gl_renderbuffer_image EGL_KHR_fence_sync EGL_ANDROID_image_native_buffer";

pub const DEFAULT_GL_EXTENSIONS: &str = "GL_OES_EGL_image GL_OES_EGL_image_external \
     GL_OES_depth24 GL_OES_rgb8_rgba8 GL_OES_texture_npot GL_OES_element_index_uint \
     GL_EXT_texture_format_BGRA8888 GL_EXT_debug_marker";

const EMULATED_VENDOR: &str = "glstream";

/// `GL_MAX_TEXTURE_SIZE` and the pbuffer limit this driver reports.
pub const MAX_SURFACE_SIZE: u32 = 8192;

// ── Records ──────────────────────────────────────────────────────

/// Where a quad or clear landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawTarget {
    Surface(HostSurface),
    Framebuffer(GlFramebuffer),
}

/// One `draw_quad` call.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub target: DrawTarget,
    pub texture: GlTexture,
    pub program: GlProgram,
    pub alpha: f32,
    pub blend: bool,
}

/// A call received through [`GlesDispatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum GlesCall {
    Execute {
        api: GlesApi,
        opcode: u32,
        args: Vec<u8>,
    },
    AttribPointer {
        api: GlesApi,
        kind: PointerKind,
        size: i32,
        ty: u32,
        stride: i32,
        data: Vec<u8>,
    },
    DrawElements {
        api: GlesApi,
        mode: u32,
        count: i32,
        ty: u32,
        indices: Vec<u8>,
    },
    Finish(GlesApi),
}

// ── Internal state ───────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Storage {
    width: u32,
    height: u32,
    opaque: bool,
    pixels: Vec<u8>,
}

impl Storage {
    fn new(width: u32, height: u32, opaque: bool) -> Self {
        let mut pixels = vec![0u8; width as usize * height as usize * 4];
        if opaque {
            pixels.chunks_exact_mut(4).for_each(|p| p[3] = 0xff);
        }
        Self {
            width,
            height,
            opaque,
            pixels,
        }
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    fn texel(&self, x: u32, y: u32) -> [u8; 4] {
        let o = self.offset(x, y);
        [
            self.pixels[o],
            self.pixels[o + 1],
            self.pixels[o + 2],
            self.pixels[o + 3],
        ]
    }

    fn put(&mut self, x: u32, y: u32, mut rgba: [u8; 4]) {
        if self.opaque {
            rgba[3] = 0xff;
        }
        let o = self.offset(x, y);
        self.pixels[o..o + 4].copy_from_slice(&rgba);
    }

    /// Intersection of `region` with the storage bounds.
    fn clip(&self, region: Region) -> Option<(u32, u32, u32, u32)> {
        let (x_end, y_end) = region.end()?;
        let x0 = region.x.max(0);
        let y0 = region.y.max(0);
        let x1 = x_end.min(self.width as i32);
        let y1 = y_end.min(self.height as i32);
        (x1 > x0 && y1 > y0).then(|| (x0 as u32, y0 as u32, x1 as u32, y1 as u32))
    }
}

#[derive(Debug)]
struct ContextState {
    api: GlesApi,
    texture: Option<GlTexture>,
    framebuffer: Option<GlFramebuffer>,
    viewport: Option<Region>,
}

#[derive(Debug)]
struct SurfaceState {
    window: Option<NativeWindow>,
    storage: u32,
}

#[derive(Debug)]
struct State {
    initialized: bool,
    egl_extensions: String,
    gl_extensions: String,
    configs: Vec<HashMap<i32, i32>>,
    next_object: usize,
    next_name: u32,
    next_window: u64,
    contexts: HashMap<usize, ContextState>,
    surfaces: HashMap<usize, SurfaceState>,
    images: HashMap<usize, u32>,
    storages: HashMap<u32, Storage>,
    textures: HashMap<u32, Option<u32>>,
    framebuffers: HashMap<u32, GlTexture>,
    programs: HashMap<u32, bool>,
    windows: HashMap<u64, Rect>,
    current: HashMap<ThreadId, HostBinding>,
    draws: Vec<DrawRecord>,
    swaps: Vec<HostSurface>,
    gles_calls: Vec<GlesCall>,
}

fn egl_error(call: &'static str, code: i32) -> HostError {
    HostError::Egl { call, code }
}

fn gl_error(call: &'static str, reason: &str) -> HostError {
    HostError::Gl {
        call,
        reason: reason.to_string(),
    }
}

impl State {
    fn new(egl_extensions: &str, gl_extensions: &str) -> Self {
        Self {
            initialized: false,
            egl_extensions: egl_extensions.to_string(),
            gl_extensions: gl_extensions.to_string(),
            configs: default_configs(),
            next_object: 0,
            next_name: 0,
            next_window: 0,
            contexts: HashMap::new(),
            surfaces: HashMap::new(),
            images: HashMap::new(),
            storages: HashMap::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            windows: HashMap::new(),
            current: HashMap::new(),
            draws: Vec::new(),
            swaps: Vec::new(),
            gles_calls: Vec::new(),
        }
    }

    fn object_id(&mut self) -> usize {
        self.next_object += 1;
        self.next_object
    }

    fn name(&mut self) -> u32 {
        self.next_name += 1;
        self.next_name
    }

    fn binding(&self) -> HostBinding {
        self.current
            .get(&thread::current().id())
            .copied()
            .unwrap_or(HostBinding::UNBOUND)
    }

    fn context_id(&self, call: &'static str) -> Result<usize, HostError> {
        self.binding()
            .context
            .map(|c| c.0)
            .filter(|id| self.contexts.contains_key(id))
            .ok_or_else(|| gl_error(call, "no current context"))
    }

    fn context(&mut self, call: &'static str) -> Result<&mut ContextState, HostError> {
        let id = self.context_id(call)?;
        self.contexts
            .get_mut(&id)
            .ok_or_else(|| gl_error(call, "no current context"))
    }

    fn alloc_storage(&mut self, width: u32, height: u32, opaque: bool) -> u32 {
        let id = self.name();
        self.storages.insert(id, Storage::new(width, height, opaque));
        id
    }

    fn alloc_sized_storage(
        &mut self,
        call: &'static str,
        width: u32,
        height: u32,
        opaque: bool,
    ) -> Result<u32, HostError> {
        if width > MAX_SURFACE_SIZE || height > MAX_SURFACE_SIZE {
            return Err(gl_error(call, "size exceeds the maximum texture size"));
        }
        Ok(self.alloc_storage(width, height, opaque))
    }

    /// Drop a storage nothing references any more.
    fn release_storage(&mut self, id: u32) {
        let used = self.textures.values().any(|s| *s == Some(id))
            || self.images.values().any(|s| *s == id)
            || self.surfaces.values().any(|s| s.storage == id);
        if !used {
            self.storages.remove(&id);
        }
    }

    fn texture_storage(&self, texture: GlTexture) -> Option<u32> {
        self.textures.get(&texture.0).copied().flatten()
    }

    /// Storage a draw or clear writes to: the bound FBO or the draw surface.
    fn draw_target(&self, call: &'static str) -> Result<(DrawTarget, u32), HostError> {
        let ctx_id = self.context_id(call)?;
        if let Some(fb) = self.contexts.get(&ctx_id).and_then(|c| c.framebuffer) {
            let storage = self
                .framebuffers
                .get(&fb.0)
                .and_then(|t| self.texture_storage(*t))
                .ok_or_else(|| gl_error(call, "incomplete framebuffer"))?;
            return Ok((DrawTarget::Framebuffer(fb), storage));
        }
        let surface = self
            .binding()
            .draw
            .ok_or_else(|| gl_error(call, "no draw surface"))?;
        let storage = self
            .surfaces
            .get(&surface.0)
            .map(|s| s.storage)
            .ok_or_else(|| gl_error(call, "draw surface destroyed"))?;
        Ok((DrawTarget::Surface(surface), storage))
    }

    /// Storage reads come from: the bound FBO or the read surface.
    fn read_source(&self, call: &'static str) -> Result<u32, HostError> {
        let ctx_id = self.context_id(call)?;
        if let Some(fb) = self.contexts.get(&ctx_id).and_then(|c| c.framebuffer) {
            return self
                .framebuffers
                .get(&fb.0)
                .and_then(|t| self.texture_storage(*t))
                .ok_or_else(|| gl_error(call, "incomplete framebuffer"));
        }
        let surface = self
            .binding()
            .read
            .ok_or_else(|| gl_error(call, "no read surface"))?;
        self.surfaces
            .get(&surface.0)
            .map(|s| s.storage)
            .ok_or_else(|| gl_error(call, "read surface destroyed"))
    }
}

fn config(pairs: &[(i32, i32)]) -> HashMap<i32, i32> {
    pairs.iter().copied().collect()
}

fn default_configs() -> Vec<HashMap<i32, i32>> {
    let es = 0x1 | 0x4;
    let pbuffer_window = 0x1 | 0x4;
    vec![
        config(&[
            (egl::CONFIG_ID, 1),
            (egl::BUFFER_SIZE, 32),
            (egl::RED_SIZE, 8),
            (egl::GREEN_SIZE, 8),
            (egl::BLUE_SIZE, 8),
            (egl::ALPHA_SIZE, 8),
            (egl::DEPTH_SIZE, 24),
            (egl::STENCIL_SIZE, 8),
            (egl::SURFACE_TYPE, pbuffer_window),
            (egl::RENDERABLE_TYPE, es),
            (egl::CONFIG_CAVEAT, egl::NONE),
            (egl::MAX_PBUFFER_WIDTH, 4096),
            (egl::MAX_PBUFFER_HEIGHT, 4096),
            (egl::MAX_PBUFFER_PIXELS, 4096 * 4096),
            (egl::MIN_SWAP_INTERVAL, 0),
            (egl::MAX_SWAP_INTERVAL, 1),
            (egl::COLOR_BUFFER_TYPE, 0x308E),
            (egl::CONFORMANT, es),
        ]),
        config(&[
            (egl::CONFIG_ID, 2),
            (egl::BUFFER_SIZE, 24),
            (egl::RED_SIZE, 8),
            (egl::GREEN_SIZE, 8),
            (egl::BLUE_SIZE, 8),
            (egl::SURFACE_TYPE, pbuffer_window),
            (egl::RENDERABLE_TYPE, es),
            (egl::CONFIG_CAVEAT, egl::NONE),
            (egl::COLOR_BUFFER_TYPE, 0x308E),
        ]),
        config(&[
            (egl::CONFIG_ID, 3),
            (egl::BUFFER_SIZE, 16),
            (egl::RED_SIZE, 5),
            (egl::GREEN_SIZE, 6),
            (egl::BLUE_SIZE, 5),
            (egl::DEPTH_SIZE, 16),
            (egl::SURFACE_TYPE, 0x1),
            (egl::RENDERABLE_TYPE, 0x1),
            (egl::CONFIG_CAVEAT, egl::NONE),
        ]),
        // Window-only: dropped by the renderer's pbuffer filter.
        config(&[
            (egl::CONFIG_ID, 4),
            (egl::RED_SIZE, 8),
            (egl::GREEN_SIZE, 8),
            (egl::BLUE_SIZE, 8),
            (egl::ALPHA_SIZE, 8),
            (egl::SURFACE_TYPE, 0x4),
            (egl::RENDERABLE_TYPE, es),
        ]),
        // Luminance: no RGB channels.
        config(&[
            (egl::CONFIG_ID, 5),
            (egl::LUMINANCE_SIZE, 8),
            (egl::SURFACE_TYPE, 0x1),
            (egl::RENDERABLE_TYPE, es),
        ]),
    ]
}

fn config_matches(cfg: &HashMap<i32, i32>, attribs: &[i32]) -> bool {
    for pair in attribs.chunks_exact(2) {
        let (attr, want) = (pair[0], pair[1]);
        if attr == egl::NONE {
            break;
        }
        if want == -1 {
            continue;
        }
        let have = cfg.get(&attr).copied().unwrap_or(0);
        let ok = match attr {
            egl::SURFACE_TYPE | egl::RENDERABLE_TYPE | egl::CONFORMANT => have & want == want,
            egl::CONFIG_ID => have == want,
            egl::BUFFER_SIZE
            | egl::RED_SIZE
            | egl::GREEN_SIZE
            | egl::BLUE_SIZE
            | egl::ALPHA_SIZE
            | egl::DEPTH_SIZE
            | egl::STENCIL_SIZE
            | egl::SAMPLES
            | egl::SAMPLE_BUFFERS
            | egl::LUMINANCE_SIZE
            | egl::ALPHA_MASK_SIZE => have >= want,
            _ => true,
        };
        if !ok {
            return false;
        }
    }
    true
}

/// Convert client pixels to RGBA8 texels.
fn unpack(layout: PixelLayout, pixels: &[u8]) -> Result<Vec<[u8; 4]>, HostError> {
    match (layout.format, layout.ty) {
        (gl::RGBA, gl::UNSIGNED_BYTE) => Ok(pixels
            .chunks_exact(4)
            .map(|p| [p[0], p[1], p[2], p[3]])
            .collect()),
        (gl::RGB, gl::UNSIGNED_BYTE) => Ok(pixels
            .chunks_exact(3)
            .map(|p| [p[0], p[1], p[2], 0xff])
            .collect()),
        _ => Err(HostError::Unsupported("pixel layout")),
    }
}

fn pack(layout: PixelLayout, texel: [u8; 4], out: &mut Vec<u8>) -> Result<(), HostError> {
    match (layout.format, layout.ty) {
        (gl::RGBA, gl::UNSIGNED_BYTE) => out.extend_from_slice(&texel),
        (gl::RGB, gl::UNSIGNED_BYTE) => out.extend_from_slice(&texel[..3]),
        _ => return Err(HostError::Unsupported("pixel layout")),
    }
    Ok(())
}

/// Affine map from window position to texture coordinate, solved from
/// three corners of the quad.
fn tex_mapping(win: &[[f32; 2]; 4], tex: &[[f32; 2]; 4]) -> Option<[[f32; 3]; 2]> {
    let (dx1, dy1) = (win[1][0] - win[0][0], win[1][1] - win[0][1]);
    let (dx2, dy2) = (win[2][0] - win[0][0], win[2][1] - win[0][1]);
    let det = dx1 * dy2 - dx2 * dy1;
    if det.abs() < f32::EPSILON {
        return None;
    }
    let mut out = [[0.0f32; 3]; 2];
    for (axis, row) in out.iter_mut().enumerate() {
        let ds1 = tex[1][axis] - tex[0][axis];
        let ds2 = tex[2][axis] - tex[0][axis];
        let a = (ds1 * dy2 - ds2 * dy1) / det;
        let b = (dx1 * ds2 - dx2 * ds1) / det;
        *row = [a, b, tex[0][axis] - a * win[0][0] - b * win[0][1]];
    }
    Some(out)
}

// ── EmulatedHost ─────────────────────────────────────────────────

/// CPU-only stand-in for an EGL/GLES driver.
#[derive(Debug)]
pub struct EmulatedHost {
    state: Mutex<State>,
}

impl Default for EmulatedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatedHost {
    pub fn new() -> Self {
        Self::with_extensions(DEFAULT_EGL_EXTENSIONS, DEFAULT_GL_EXTENSIONS)
    }

    /// A host advertising the given extension strings.
    pub fn with_extensions(egl_extensions: &str, gl_extensions: &str) -> Self {
        Self {
            state: Mutex::new(State::new(egl_extensions, gl_extensions)),
        }
    }

    pub fn live_contexts(&self) -> usize {
        self.state.lock().contexts.len()
    }

    pub fn live_surfaces(&self) -> usize {
        self.state.lock().surfaces.len()
    }

    pub fn live_textures(&self) -> usize {
        self.state.lock().textures.len()
    }

    pub fn live_images(&self) -> usize {
        self.state.lock().images.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.state.lock().framebuffers.len()
    }

    pub fn draws(&self) -> Vec<DrawRecord> {
        self.state.lock().draws.clone()
    }

    pub fn swaps(&self) -> Vec<HostSurface> {
        self.state.lock().swaps.clone()
    }

    pub fn gles_calls(&self) -> Vec<GlesCall> {
        self.state.lock().gles_calls.clone()
    }

    /// Size and RGBA8 contents of a surface, bottom row first.
    pub fn surface_pixels(&self, surface: HostSurface) -> Option<(u32, u32, Vec<u8>)> {
        let state = self.state.lock();
        let storage = state.surfaces.get(&surface.0)?.storage;
        state
            .storages
            .get(&storage)
            .map(|s| (s.width, s.height, s.pixels.clone()))
    }

    /// The window surface created for `window`, if any.
    pub fn window_surface(&self, window: NativeWindow) -> Option<HostSurface> {
        self.state
            .lock()
            .surfaces
            .iter()
            .find(|(_, s)| s.window == Some(window))
            .map(|(id, _)| HostSurface(*id))
    }

    /// Frame of a native window created through the factory.
    pub fn window_frame(&self, window: NativeWindow) -> Option<Rect> {
        self.state.lock().windows.get(&window.0).copied()
    }

    pub fn window_count(&self) -> usize {
        self.state.lock().windows.len()
    }
}

impl HostDriver for EmulatedHost {
    fn initialize(&self) -> Result<EglVersion, HostError> {
        self.state.lock().initialized = true;
        Ok(EglVersion { major: 1, minor: 4 })
    }

    fn query_string(&self, name: u32) -> Option<String> {
        let state = self.state.lock();
        match name {
            egl::VENDOR => Some(EMULATED_VENDOR.to_string()),
            egl::VERSION => Some("1.4 emulated".to_string()),
            egl::EXTENSIONS => Some(state.egl_extensions.clone()),
            egl::CLIENT_APIS => Some("OpenGL_ES".to_string()),
            _ => None,
        }
    }

    fn configs(&self) -> Result<Vec<HostConfig>, HostError> {
        let state = self.state.lock();
        if !state.initialized {
            return Err(egl_error("eglGetConfigs", egl::NOT_INITIALIZED));
        }
        Ok((0..state.configs.len()).map(HostConfig).collect())
    }

    fn config_attrib(&self, config: HostConfig, attrib: i32) -> Option<i32> {
        self.state
            .lock()
            .configs
            .get(config.0)
            .map(|c| c.get(&attrib).copied().unwrap_or(0))
    }

    fn choose_config(&self, attribs: &[i32], max: usize) -> Result<Vec<HostConfig>, HostError> {
        let state = self.state.lock();
        if !state.initialized {
            return Err(egl_error("eglChooseConfig", egl::NOT_INITIALIZED));
        }
        Ok(state
            .configs
            .iter()
            .enumerate()
            .filter(|(_, c)| config_matches(c, attribs))
            .map(|(i, _)| HostConfig(i))
            .take(max)
            .collect())
    }

    fn create_context(
        &self,
        config: HostConfig,
        share: Option<HostContext>,
        api: GlesApi,
    ) -> Result<HostContext, HostError> {
        let mut state = self.state.lock();
        if config.0 >= state.configs.len() {
            return Err(egl_error("eglCreateContext", egl::BAD_CONFIG));
        }
        if let Some(share) = share {
            if !state.contexts.contains_key(&share.0) {
                return Err(egl_error("eglCreateContext", egl::BAD_CONTEXT));
            }
        }
        let id = state.object_id();
        state.contexts.insert(
            id,
            ContextState {
                api,
                texture: None,
                framebuffer: None,
                viewport: None,
            },
        );
        Ok(HostContext(id))
    }

    fn destroy_context(&self, context: HostContext) {
        self.state.lock().contexts.remove(&context.0);
    }

    fn create_pbuffer(&self, config: HostConfig, width: u32, height: u32) -> Result<HostSurface, HostError> {
        let mut state = self.state.lock();
        let Some(cfg) = state.configs.get(config.0) else {
            return Err(egl_error("eglCreatePbufferSurface", egl::BAD_CONFIG));
        };
        if cfg.get(&egl::SURFACE_TYPE).copied().unwrap_or(0) & 0x1 == 0 {
            return Err(egl_error("eglCreatePbufferSurface", egl::BAD_MATCH));
        }
        let storage = state.alloc_sized_storage("eglCreatePbufferSurface", width, height, false)?;
        let id = state.object_id();
        state.surfaces.insert(
            id,
            SurfaceState {
                window: None,
                storage,
            },
        );
        Ok(HostSurface(id))
    }

    fn create_window_surface(&self, config: HostConfig, window: NativeWindow) -> Result<HostSurface, HostError> {
        let mut state = self.state.lock();
        if config.0 >= state.configs.len() {
            return Err(egl_error("eglCreateWindowSurface", egl::BAD_CONFIG));
        }
        let Some(frame) = state.windows.get(&window.0).copied() else {
            return Err(egl_error("eglCreateWindowSurface", egl::BAD_NATIVE_WINDOW));
        };
        let storage = state.alloc_sized_storage(
            "eglCreateWindowSurface",
            frame.width().max(1) as u32,
            frame.height().max(1) as u32,
            false,
        )?;
        let id = state.object_id();
        state.surfaces.insert(
            id,
            SurfaceState {
                window: Some(window),
                storage,
            },
        );
        Ok(HostSurface(id))
    }

    fn destroy_surface(&self, surface: HostSurface) {
        let mut state = self.state.lock();
        if let Some(s) = state.surfaces.remove(&surface.0) {
            state.release_storage(s.storage);
        }
    }

    fn make_current(&self, binding: HostBinding) -> Result<(), HostError> {
        let mut state = self.state.lock();
        let me = thread::current().id();
        let Some(ctx) = binding.context else {
            state.current.remove(&me);
            return Ok(());
        };
        if !state.contexts.contains_key(&ctx.0) {
            return Err(egl_error("eglMakeCurrent", egl::BAD_CONTEXT));
        }
        if binding.draw.is_some() != binding.read.is_some() {
            return Err(egl_error("eglMakeCurrent", egl::BAD_MATCH));
        }
        for surface in [binding.draw, binding.read].into_iter().flatten() {
            if !state.surfaces.contains_key(&surface.0) {
                return Err(egl_error("eglMakeCurrent", egl::BAD_SURFACE));
            }
        }
        let busy = state
            .current
            .iter()
            .any(|(tid, b)| *tid != me && b.context == Some(ctx));
        if busy {
            return Err(egl_error("eglMakeCurrent", egl::BAD_ACCESS));
        }

        // First bind with a draw surface sets the viewport to its size.
        let draw_size = binding
            .draw
            .and_then(|d| state.surfaces.get(&d.0))
            .and_then(|s| state.storages.get(&s.storage))
            .map(|s| Region::sized(s.width as i32, s.height as i32));
        if let (Some(c), Some(size)) = (state.contexts.get_mut(&ctx.0), draw_size) {
            c.viewport.get_or_insert(size);
        }
        state.current.insert(me, binding);
        Ok(())
    }

    fn current(&self) -> HostBinding {
        self.state.lock().binding()
    }

    fn swap_buffers(&self, surface: HostSurface) -> Result<(), HostError> {
        let mut state = self.state.lock();
        if !state.surfaces.contains_key(&surface.0) {
            return Err(egl_error("eglSwapBuffers", egl::BAD_SURFACE));
        }
        state.swaps.push(surface);
        Ok(())
    }

    fn create_image(&self, context: Option<HostContext>, target: u32, buffer: u64) -> Result<HostImage, HostError> {
        let mut state = self.state.lock();
        let storage = match target {
            egl::GL_TEXTURE_2D_KHR => {
                if !context.is_some_and(|c| state.contexts.contains_key(&c.0)) {
                    return Err(egl_error("eglCreateImageKHR", egl::BAD_CONTEXT));
                }
                u32::try_from(buffer)
                    .ok()
                    .and_then(|name| state.texture_storage(GlTexture(name)))
                    .ok_or_else(|| egl_error("eglCreateImageKHR", egl::BAD_PARAMETER))?
            }
            egl::NATIVE_BUFFER_ANDROID => state.alloc_storage(1, 1, false),
            _ => return Err(egl_error("eglCreateImageKHR", egl::BAD_PARAMETER)),
        };
        let id = state.object_id();
        state.images.insert(id, storage);
        Ok(HostImage(id))
    }

    fn destroy_image(&self, image: HostImage) {
        let mut state = self.state.lock();
        if let Some(storage) = state.images.remove(&image.0) {
            state.release_storage(storage);
        }
    }

    fn gl_string(&self, name: u32) -> Option<String> {
        let state = self.state.lock();
        let ctx = state.context_id("glGetString").ok()?;
        let api = state.contexts.get(&ctx)?.api;
        match name {
            gl::VENDOR => Some(EMULATED_VENDOR.to_string()),
            gl::RENDERER => Some("glstream emulated rasterizer".to_string()),
            gl::VERSION => Some(match api {
                GlesApi::V1 => "OpenGL ES-CM 1.1 emulated".to_string(),
                GlesApi::V2 => "OpenGL ES 3.0 emulated".to_string(),
            }),
            gl::EXTENSIONS => Some(state.gl_extensions.clone()),
            _ => None,
        }
    }

    fn gen_texture(&self) -> Result<GlTexture, HostError> {
        let mut state = self.state.lock();
        state.context_id("glGenTextures")?;
        let name = state.name();
        state.textures.insert(name, None);
        Ok(GlTexture(name))
    }

    fn create_texture(
        &self,
        format: PixelFormat,
        width: u32,
        height: u32,
        _filter: TextureFilter,
    ) -> Result<GlTexture, HostError> {
        let mut state = self.state.lock();
        state.context_id("glTexImage2D")?;
        let storage = state.alloc_sized_storage("glTexImage2D", width, height, format == PixelFormat::Rgb)?;
        let name = state.name();
        state.textures.insert(name, Some(storage));
        Ok(GlTexture(name))
    }

    fn delete_texture(&self, texture: GlTexture) {
        let mut state = self.state.lock();
        if let Some(Some(storage)) = state.textures.remove(&texture.0) {
            state.release_storage(storage);
        }
        for ctx in state.contexts.values_mut() {
            if ctx.texture == Some(texture) {
                ctx.texture = None;
            }
        }
    }

    fn bound_texture(&self) -> Option<GlTexture> {
        let mut state = self.state.lock();
        state.context("glGetIntegerv").ok()?.texture
    }

    fn bind_texture(&self, texture: Option<GlTexture>) {
        let mut state = self.state.lock();
        if let Ok(ctx) = state.context("glBindTexture") {
            ctx.texture = texture;
        }
    }

    fn update_texture(
        &self,
        texture: GlTexture,
        region: Region,
        layout: PixelLayout,
        pixels: &[u8],
    ) -> Result<(), HostError> {
        let mut state = self.state.lock();
        state.context_id("glTexSubImage2D")?;
        let id = state
            .texture_storage(texture)
            .ok_or_else(|| gl_error("glTexSubImage2D", "texture has no storage"))?;
        let texels = unpack(layout, pixels)?;
        let storage = state
            .storages
            .get_mut(&id)
            .ok_or_else(|| gl_error("glTexSubImage2D", "texture has no storage"))?;
        let in_bounds = region.end().is_some_and(|(x1, y1)| {
            region.x >= 0 && region.y >= 0 && x1 <= storage.width as i32 && y1 <= storage.height as i32
        });
        if !in_bounds {
            return Err(gl_error("glTexSubImage2D", "region out of bounds"));
        }
        if region.texel_count().is_none_or(|n| texels.len() < n) {
            return Err(gl_error("glTexSubImage2D", "not enough pixel data"));
        }
        for row in 0..region.height {
            for col in 0..region.width {
                let texel = texels[row as usize * region.width as usize + col as usize];
                storage.put((region.x + col) as u32, (region.y + row) as u32, texel);
            }
        }
        Ok(())
    }

    fn image_target_texture(&self, image: HostImage) -> Result<(), HostError> {
        let mut state = self.state.lock();
        let storage = *state
            .images
            .get(&image.0)
            .ok_or_else(|| gl_error("glEGLImageTargetTexture2DOES", "unknown image"))?;
        let texture = state
            .context("glEGLImageTargetTexture2DOES")?
            .texture
            .ok_or_else(|| gl_error("glEGLImageTargetTexture2DOES", "no texture bound"))?;
        let previous = state.textures.insert(texture.0, Some(storage)).flatten();
        if let Some(previous) = previous.filter(|p| *p != storage) {
            state.release_storage(previous);
        }
        Ok(())
    }

    fn image_target_renderbuffer(&self, image: HostImage) -> Result<(), HostError> {
        let state = self.state.lock();
        state.context_id("glEGLImageTargetRenderbufferStorageOES")?;
        if !state.images.contains_key(&image.0) {
            return Err(gl_error("glEGLImageTargetRenderbufferStorageOES", "unknown image"));
        }
        Ok(())
    }

    fn copy_read_to_texture(&self, width: u32, height: u32) -> Result<(), HostError> {
        let mut state = self.state.lock();
        let source = state.read_source("glCopyTexSubImage2D")?;
        let texture = state
            .context("glCopyTexSubImage2D")?
            .texture
            .ok_or_else(|| gl_error("glCopyTexSubImage2D", "no texture bound"))?;
        let dest = state
            .texture_storage(texture)
            .ok_or_else(|| gl_error("glCopyTexSubImage2D", "texture has no storage"))?;
        let Some(src) = state.storages.get(&source).cloned() else {
            return Err(gl_error("glCopyTexSubImage2D", "read buffer destroyed"));
        };
        let Some(dst) = state.storages.get_mut(&dest) else {
            return Err(gl_error("glCopyTexSubImage2D", "texture has no storage"));
        };
        let w = width.min(src.width).min(dst.width);
        let h = height.min(src.height).min(dst.height);
        for y in 0..h {
            for x in 0..w {
                dst.put(x, y, src.texel(x, y));
            }
        }
        Ok(())
    }

    fn create_framebuffer(&self, texture: GlTexture) -> Result<GlFramebuffer, HostError> {
        let mut state = self.state.lock();
        state.context_id("glGenFramebuffers")?;
        if state.texture_storage(texture).is_none() {
            return Err(gl_error("glCheckFramebufferStatus", "incomplete attachment"));
        }
        let name = state.name();
        state.framebuffers.insert(name, texture);
        Ok(GlFramebuffer(name))
    }

    fn bind_framebuffer(&self, framebuffer: Option<GlFramebuffer>) {
        let mut state = self.state.lock();
        if let Ok(ctx) = state.context("glBindFramebuffer") {
            ctx.framebuffer = framebuffer;
        }
    }

    fn delete_framebuffer(&self, framebuffer: GlFramebuffer) {
        let mut state = self.state.lock();
        state.framebuffers.remove(&framebuffer.0);
        for ctx in state.contexts.values_mut() {
            if ctx.framebuffer == Some(framebuffer) {
                ctx.framebuffer = None;
            }
        }
    }

    fn read_pixels(&self, region: Region, layout: PixelLayout, out: &mut [u8]) -> Result<(), HostError> {
        let state = self.state.lock();
        let source = state.read_source("glReadPixels")?;
        let storage = state
            .storages
            .get(&source)
            .ok_or_else(|| gl_error("glReadPixels", "read buffer destroyed"))?;
        let Some((x1, y1)) = region.end() else {
            return Err(gl_error("glReadPixels", "region out of bounds"));
        };
        if storage.clip(region) != Some((region.x as u32, region.y as u32, x1 as u32, y1 as u32)) {
            return Err(gl_error("glReadPixels", "region out of bounds"));
        }
        let mut packed = Vec::with_capacity(out.len());
        for y in region.y..y1 {
            for x in region.x..x1 {
                pack(layout, storage.texel(x as u32, y as u32), &mut packed)?;
            }
        }
        let n = packed.len().min(out.len());
        out[..n].copy_from_slice(&packed[..n]);
        Ok(())
    }

    fn viewport(&self) -> Region {
        let mut state = self.state.lock();
        state
            .context("glGetIntegerv")
            .ok()
            .and_then(|c| c.viewport)
            .unwrap_or_default()
    }

    fn set_viewport(&self, region: Region) {
        let mut state = self.state.lock();
        if let Ok(ctx) = state.context("glViewport") {
            ctx.viewport = Some(region);
        }
    }

    fn clear(&self, rgba: [f32; 4]) {
        let mut state = self.state.lock();
        let Ok((_, target)) = state.draw_target("glClear") else {
            return;
        };
        let texel = rgba.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
        if let Some(storage) = state.storages.get_mut(&target) {
            for y in 0..storage.height {
                for x in 0..storage.width {
                    storage.put(x, y, texel);
                }
            }
        }
    }

    fn create_program(&self, vertex: &str, fragment: &str) -> Result<GlProgram, HostError> {
        let mut state = self.state.lock();
        state.context_id("glCreateProgram")?;
        if !vertex.contains("gl_Position") || !fragment.contains("gl_FragColor") {
            return Err(gl_error("glLinkProgram", "shader does not write its outputs"));
        }
        let name = state.name();
        state
            .programs
            .insert(name, fragment.contains("uniform float alpha"));
        Ok(GlProgram(name))
    }

    fn delete_program(&self, program: GlProgram) {
        self.state.lock().programs.remove(&program.0);
    }

    fn draw_quad(&self, draw: &QuadDraw) -> Result<(), HostError> {
        let mut state = self.state.lock();
        let (target, dest) = state.draw_target("glDrawArrays")?;
        let uses_alpha = *state
            .programs
            .get(&draw.program.0)
            .ok_or_else(|| gl_error("glUseProgram", "unknown program"))?;
        let viewport = state
            .context("glDrawArrays")?
            .viewport
            .unwrap_or_default();
        let source = state
            .texture_storage(draw.texture)
            .and_then(|id| state.storages.get(&id))
            .cloned()
            .ok_or_else(|| gl_error("glDrawArrays", "texture has no storage"))?;
        if source.width == 0 || source.height == 0 {
            return Err(gl_error("glDrawArrays", "texture is empty"));
        }

        let u = &draw.uniforms;
        let mut win = [[0.0f32; 2]; 4];
        let mut tex = [[0.0f32; 2]; 4];
        for (i, v) in draw.vertices.iter().enumerate() {
            let p = [v.position[0], v.position[1], v.position[2], 1.0];
            let rel = [p[0] - u.center[0], p[1] - u.center[1], p[2], p[3]];
            let t = u.transform.transform(rel);
            let world = [t[0] + u.center[0], t[1] + u.center[1], t[2], t[3]];
            let clip = u.screen_to_gl.transform(world);
            let w = if clip[3].abs() < f32::EPSILON { 1.0 } else { clip[3] };
            win[i] = [
                viewport.x as f32 + (clip[0] / w + 1.0) * 0.5 * viewport.width as f32,
                viewport.y as f32 + (clip[1] / w + 1.0) * 0.5 * viewport.height as f32,
            ];
            tex[i] = v.texcoord;
        }
        let Some(mapping) = tex_mapping(&win, &tex) else {
            return Ok(());
        };

        let min_x = win.iter().map(|p| p[0]).fold(f32::INFINITY, f32::min);
        let max_x = win.iter().map(|p| p[0]).fold(f32::NEG_INFINITY, f32::max);
        let min_y = win.iter().map(|p| p[1]).fold(f32::INFINITY, f32::min);
        let max_y = win.iter().map(|p| p[1]).fold(f32::NEG_INFINITY, f32::max);

        let Some(dst) = state.storages.get_mut(&dest) else {
            return Err(gl_error("glDrawArrays", "target destroyed"));
        };
        let bounds = Region::new(
            viewport.x,
            viewport.y,
            viewport.width,
            viewport.height,
        );
        if let Some((x0, y0, x1, y1)) = dst.clip(bounds) {
            for y in y0..y1 {
                let cy = y as f32 + 0.5;
                if cy < min_y || cy >= max_y {
                    continue;
                }
                for x in x0..x1 {
                    let cx = x as f32 + 0.5;
                    if cx < min_x || cx >= max_x {
                        continue;
                    }
                    let s = mapping[0][0] * cx + mapping[0][1] * cy + mapping[0][2];
                    let t = mapping[1][0] * cx + mapping[1][1] * cy + mapping[1][2];
                    let sx = ((s * source.width as f32).floor() as i64).clamp(0, source.width as i64 - 1);
                    let sy = ((t * source.height as f32).floor() as i64).clamp(0, source.height as i64 - 1);
                    let mut src = source.texel(sx as u32, sy as u32).map(|c| c as f32 / 255.0);
                    if uses_alpha {
                        src = src.map(|c| c * u.alpha);
                    }
                    let out = if draw.blend {
                        let d = dst.texel(x, y).map(|c| c as f32 / 255.0);
                        [0, 1, 2, 3].map(|i| src[i] + d[i] * (1.0 - src[3]))
                    } else {
                        src
                    };
                    dst.put(x, y, out.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8));
                }
            }
        }

        state.draws.push(DrawRecord {
            target,
            texture: draw.texture,
            program: draw.program,
            alpha: u.alpha,
            blend: draw.blend,
        });
        Ok(())
    }

    fn finish(&self) {}
}

impl GlesDispatch for EmulatedHost {
    fn execute(&self, api: GlesApi, opcode: u32, args: &[u8]) -> Result<Vec<u8>, HostError> {
        self.state.lock().gles_calls.push(GlesCall::Execute {
            api,
            opcode,
            args: args.to_vec(),
        });
        Ok(Vec::new())
    }

    fn attrib_pointer(&self, api: GlesApi, pointer: &AttribPointer<'_>) -> Result<(), HostError> {
        self.state.lock().gles_calls.push(GlesCall::AttribPointer {
            api,
            kind: pointer.kind,
            size: pointer.size,
            ty: pointer.ty,
            stride: pointer.stride,
            data: pointer.data.to_vec(),
        });
        Ok(())
    }

    fn draw_elements(&self, api: GlesApi, mode: u32, count: i32, ty: u32, indices: &[u8]) -> Result<(), HostError> {
        self.state.lock().gles_calls.push(GlesCall::DrawElements {
            api,
            mode,
            count,
            ty,
            indices: indices.to_vec(),
        });
        Ok(())
    }

    fn finish(&self, api: GlesApi) {
        self.state.lock().gles_calls.push(GlesCall::Finish(api));
    }
}

impl NativeWindowFactory for EmulatedHost {
    fn create_window(&self, frame: Rect) -> Result<NativeWindow, HostError> {
        let mut state = self.state.lock();
        state.next_window += 1;
        let id = state.next_window;
        state.windows.insert(id, frame);
        Ok(NativeWindow(id))
    }

    fn update_window(&self, window: NativeWindow, frame: Rect) {
        let mut state = self.state.lock();
        let Some(old) = state.windows.insert(window.0, frame) else {
            return;
        };
        if old.width() == frame.width() && old.height() == frame.height() {
            return;
        }
        let storages: Vec<u32> = state
            .surfaces
            .values()
            .filter(|s| s.window == Some(window))
            .map(|s| s.storage)
            .collect();
        let limit = MAX_SURFACE_SIZE as i32;
        let (width, height) = (frame.width().clamp(1, limit), frame.height().clamp(1, limit));
        for id in storages {
            state.storages.insert(id, Storage::new(width as u32, height as u32, false));
        }
    }

    fn destroy_window(&self, window: NativeWindow) {
        self.state.lock().windows.remove(&window.0);
    }
}
