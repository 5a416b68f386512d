//! Handle-indexed registry of guest GPU objects.
//!
//! The [`Renderer`] owns the host display connection, two persistent host
//! contexts (the display context used for composition and a private
//! context sharing with it for internal GL work) and the maps from guest
//! handles to contexts, surfaces, color buffers and client images.
//!
//! Every operation takes the registry mutex for its whole duration. Bad
//! handles and host failures come back as `false`/`None` after logging;
//! only [`Renderer::new`] returns an error.

pub mod binding;
pub mod color_buffer;
pub mod config;
pub mod context;
pub mod draw;
pub mod surface;

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

pub use binding::{PrivateContext, ScopedBinding};
pub use color_buffer::ColorBuffer;
pub use config::{ConfigList, RendererConfig};
pub use context::{DecoderContextData, RenderContext};
pub use draw::{Programs, RendererWindow};
pub use surface::{SurfaceRole, WindowSurface};

use crate::compositor::Renderable;
use crate::error::{GlsError, HostError};
use crate::flags::{RenderableType, SurfaceType};
use crate::geometry::{Mat4, Rect};
use crate::handle::{ColorBufferHandle, ContextHandle, HandleAllocator, ImageHandle, SurfaceHandle};
use crate::host::consts::{egl, gl};
use crate::host::{
    has_extension, GlesApi, GlesDispatch, HostBinding, HostConfig, HostDriver, HostImage, NativeWindow,
    PixelFormat, PixelLayout, QuadDraw, QuadUniforms, Region,
};
use crate::state::RenderThreadInfo;

/// Attributes of the config backing the display and private contexts.
const DISPLAY_CONFIG_ATTRIBS: [i32; 11] = [
    egl::RED_SIZE,
    8,
    egl::GREEN_SIZE,
    8,
    egl::BLUE_SIZE,
    8,
    egl::SURFACE_TYPE,
    SurfaceType::WINDOW.bits() | SurfaceType::PBUFFER.bits(),
    egl::RENDERABLE_TYPE,
    RenderableType::OPENGL_ES2.bits(),
    egl::NONE,
];

/// Startup switches.
#[derive(Debug, Clone, Copy)]
pub struct RendererOptions {
    /// Refuse to start without EGLImage texture sharing.
    pub require_egl_image: bool,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            require_egl_image: true,
        }
    }
}

/// What the host driver turned out to support.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caps {
    pub egl_major: i32,
    pub egl_minor: i32,
    pub has_eglimage_texture_2d: bool,
    pub has_eglimage_renderbuffer: bool,
    pub surfaceless: bool,
}

/// GL strings read on the private context at startup.
#[derive(Debug, Clone, Default)]
pub struct GlInfo {
    pub vendor: String,
    pub renderer: String,
    pub version: String,
    pub extensions: String,
}

// ── Registry ─────────────────────────────────────────────────────

struct ColorBufferEntry {
    buffer: Arc<ColorBuffer>,
    refs: u32,
}

struct SurfaceEntry {
    surface: Arc<WindowSurface>,
    color_buffer: Option<ColorBufferHandle>,
}

#[derive(Default)]
struct Registry {
    handles: HandleAllocator,
    contexts: HashMap<ContextHandle, Arc<RenderContext>>,
    surfaces: HashMap<SurfaceHandle, SurfaceEntry>,
    color_buffers: HashMap<ColorBufferHandle, ColorBufferEntry>,
    images: HashMap<ImageHandle, HostImage>,
    windows: HashMap<NativeWindow, RendererWindow>,
}

impl Registry {
    /// A raw value no live object of any kind is using.
    fn next_handle(&mut self) -> NonZeroU32 {
        let Self {
            handles,
            contexts,
            surfaces,
            color_buffers,
            images,
            ..
        } = self;
        handles.allocate(|raw| {
            ContextHandle::from_raw(raw).is_some_and(|h| contexts.contains_key(&h))
                || SurfaceHandle::from_raw(raw).is_some_and(|h| surfaces.contains_key(&h))
                || ColorBufferHandle::from_raw(raw).is_some_and(|h| color_buffers.contains_key(&h))
                || ImageHandle::from_raw(raw).is_some_and(|h| images.contains_key(&h))
        })
    }

    fn context(&self, raw: u32) -> Option<(ContextHandle, Arc<RenderContext>)> {
        let handle = ContextHandle::from_raw(raw)?;
        self.contexts.get(&handle).map(|c| (handle, c.clone()))
    }

    fn surface(&self, raw: u32) -> Option<(SurfaceHandle, Arc<WindowSurface>)> {
        let handle = SurfaceHandle::from_raw(raw)?;
        self.surfaces.get(&handle).map(|s| (handle, s.surface.clone()))
    }

    fn color_buffer(&self, raw: u32) -> Option<&Arc<ColorBuffer>> {
        let handle = ColorBufferHandle::from_raw(raw)?;
        self.color_buffers.get(&handle).map(|e| &e.buffer)
    }

    /// Drop one guest reference; the handle goes with the last one.
    fn release_color_buffer(&mut self, handle: ColorBufferHandle) -> bool {
        let Some(entry) = self.color_buffers.get_mut(&handle) else {
            return false;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            self.color_buffers.remove(&handle);
            debug!("{handle} released");
        }
        true
    }
}

// ── Renderer ─────────────────────────────────────────────────────

pub struct Renderer {
    registry: Mutex<Registry>,
    host: Arc<dyn HostDriver>,
    gles: Arc<dyn GlesDispatch>,
    caps: Caps,
    gl_info: GlInfo,
    configs: ConfigList,
    display_config: HostConfig,
    programs: Programs,
    // Dropped after the registry: color buffers bind the private context.
    private: Arc<PrivateContext>,
    display: Arc<PrivateContext>,
}

fn startup(stage: &str) -> impl FnOnce(HostError) -> GlsError + '_ {
    move |e| GlsError::Startup(format!("{stage}: {e}"))
}

impl Renderer {
    /// Bring up the host display, the persistent contexts and the programs.
    pub fn new(
        host: Arc<dyn HostDriver>,
        gles: Arc<dyn GlesDispatch>,
        options: RendererOptions,
    ) -> Result<Self, GlsError> {
        let version = host.initialize().map_err(startup("eglInitialize"))?;
        let egl_extensions = host.query_string(egl::EXTENSIONS).unwrap_or_default();
        let surfaceless = has_extension(&egl_extensions, "EGL_KHR_surfaceless_context");

        let display_config = host
            .choose_config(&DISPLAY_CONFIG_ATTRIBS, 1)
            .map_err(startup("eglChooseConfig"))?
            .into_iter()
            .next()
            .ok_or_else(|| GlsError::Startup("no RGB888 ES2 window config".into()))?;

        let display_context = host
            .create_context(display_config, None, GlesApi::V2)
            .map_err(startup("display context"))?;
        let display = Arc::new(PrivateContext::new(host.clone(), display_context, None));

        let private_context = host
            .create_context(display_config, Some(display_context), GlesApi::V2)
            .map_err(startup("private context"))?;
        let private_surface = if surfaceless {
            None
        } else {
            match host.create_pbuffer(display_config, 1, 1) {
                Ok(surface) => Some(surface),
                Err(e) => {
                    host.destroy_context(private_context);
                    return Err(startup("private pbuffer")(e));
                }
            }
        };
        let private = Arc::new(PrivateContext::new(host.clone(), private_context, private_surface));

        let (gl_info, programs) = {
            let _scope = private.bind().map_err(startup("private binding"))?;
            let read = |name| host.gl_string(name).unwrap_or_default();
            let info = GlInfo {
                vendor: read(gl::VENDOR),
                renderer: read(gl::RENDERER),
                version: read(gl::VERSION),
                extensions: read(gl::EXTENSIONS),
            };
            let programs = Programs::compile(&*host).map_err(startup("compositor programs"))?;
            (info, programs)
        };

        let egl_image = has_extension(&gl_info.extensions, "GL_OES_EGL_image");
        let caps = Caps {
            egl_major: version.major,
            egl_minor: version.minor,
            has_eglimage_texture_2d: egl_image
                && has_extension(&egl_extensions, "EGL_KHR_gl_texture_2D_image"),
            has_eglimage_renderbuffer: egl_image
                && has_extension(&egl_extensions, "EGL_KHR_gl_renderbuffer_image"),
            surfaceless,
        };
        if !caps.has_eglimage_texture_2d {
            if options.require_egl_image {
                return Err(GlsError::Startup(
                    "host lacks GL_OES_EGL_image / EGL_KHR_gl_texture_2D_image".into(),
                ));
            }
            warn!("EGLImage texture sharing unavailable; color buffers cannot be bound");
        }

        let configs = ConfigList::from_host(&*host).map_err(startup("config list"))?;
        if configs.is_empty() {
            return Err(GlsError::Startup("no usable EGL configs".into()));
        }
        if !configs
            .iter()
            .any(|c| c.renderable_type().contains(RenderableType::OPENGL_ES2))
        {
            return Err(GlsError::Startup("no ES2-renderable EGL config".into()));
        }

        info!(
            "renderer up: EGL {}.{}, {} configs, GL {} ({})",
            caps.egl_major,
            caps.egl_minor,
            configs.len(),
            gl_info.version,
            gl_info.renderer
        );

        Ok(Self {
            registry: Mutex::new(Registry::default()),
            host,
            gles,
            caps,
            gl_info,
            configs,
            display_config,
            programs,
            private,
            display,
        })
    }

    pub fn host(&self) -> &Arc<dyn HostDriver> {
        &self.host
    }

    pub fn gles(&self) -> &Arc<dyn GlesDispatch> {
        &self.gles
    }

    pub fn caps(&self) -> &Caps {
        &self.caps
    }

    pub fn configs(&self) -> &ConfigList {
        &self.configs
    }

    pub fn gl_info(&self) -> &GlInfo {
        &self.gl_info
    }

    pub fn egl_string(&self, name: u32) -> Option<String> {
        self.host.query_string(name)
    }

    /// `glGetString` on whatever the calling thread has current.
    pub fn gl_string(&self, name: u32) -> Option<String> {
        self.host.gl_string(name)
    }

    // ── Creation and destruction ─────────────────────────────────

    pub fn create_context(
        &self,
        thread: &mut RenderThreadInfo,
        config: u32,
        share: u32,
        api: GlesApi,
    ) -> Option<ContextHandle> {
        let mut reg = self.registry.lock();
        let Some(config) = self.configs.get(config) else {
            debug!("create_context: bad config {config}");
            return None;
        };
        let share = match share {
            0 => None,
            raw => match reg.context(raw) {
                Some((_, ctx)) => Some(ctx),
                None => {
                    debug!("create_context: bad share context {raw}");
                    return None;
                }
            },
        };
        let context = match RenderContext::create(self.host.clone(), config.host_config(), share.as_deref(), api) {
            Ok(ctx) => Arc::new(ctx),
            Err(e) => {
                warn!("create_context: {e}");
                return None;
            }
        };
        let handle = ContextHandle::from(reg.next_handle());
        reg.contexts.insert(handle, context);
        thread.owned_contexts.insert(handle);
        Some(handle)
    }

    pub fn create_surface(
        &self,
        thread: &mut RenderThreadInfo,
        config: u32,
        width: u32,
        height: u32,
    ) -> Option<SurfaceHandle> {
        let mut reg = self.registry.lock();
        let Some(config) = self.configs.get(config) else {
            debug!("create_surface: bad config {config}");
            return None;
        };
        let surface = match WindowSurface::create(self.host.clone(), config.host_config(), width, height) {
            Ok(s) => Arc::new(s),
            Err(e) => {
                warn!("create_surface: {e}");
                return None;
            }
        };
        let handle = SurfaceHandle::from(reg.next_handle());
        reg.surfaces.insert(
            handle,
            SurfaceEntry {
                surface,
                color_buffer: None,
            },
        );
        thread.owned_surfaces.insert(handle);
        Some(handle)
    }

    pub fn create_color_buffer(&self, width: u32, height: u32, internal_format: u32) -> Option<ColorBufferHandle> {
        let mut reg = self.registry.lock();
        let Some(format) = PixelFormat::from_internal_format(internal_format) else {
            debug!("create_color_buffer: unsupported format {internal_format:#x}");
            return None;
        };
        let buffer = match ColorBuffer::create(
            self.private.clone(),
            self.programs.blit,
            width,
            height,
            format,
            self.caps.has_eglimage_texture_2d,
        ) {
            Ok(cb) => Arc::new(cb),
            Err(e) => {
                warn!("create_color_buffer {width}x{height}: {e}");
                return None;
            }
        };
        let handle = ColorBufferHandle::from(reg.next_handle());
        reg.color_buffers.insert(handle, ColorBufferEntry { buffer, refs: 1 });
        Some(handle)
    }

    /// Forget a context. A thread that still has it bound keeps it alive.
    pub fn destroy_context(&self, thread: &mut RenderThreadInfo, context: u32) {
        let mut reg = self.registry.lock();
        if let Some(handle) = ContextHandle::from_raw(context) {
            reg.contexts.remove(&handle);
            thread.owned_contexts.remove(&handle);
        }
    }

    pub fn destroy_surface(&self, thread: &mut RenderThreadInfo, surface: u32) {
        let mut reg = self.registry.lock();
        if let Some(handle) = SurfaceHandle::from_raw(surface) {
            if reg.surfaces.remove(&handle).is_some() {
                thread.owned_surfaces.remove(&handle);
            }
        }
    }

    // ── Color buffer references ──────────────────────────────────

    /// Add a guest reference. Fails for unknown handles.
    pub fn open_color_buffer(&self, cb: u32) -> bool {
        let mut reg = self.registry.lock();
        match ColorBufferHandle::from_raw(cb).and_then(|h| reg.color_buffers.get_mut(&h)) {
            Some(entry) => {
                entry.refs += 1;
                true
            }
            None => {
                debug!("open_color_buffer: unknown handle {cb}");
                false
            }
        }
    }

    /// Drop a guest reference. Unknown handles are normal here: the guest
    /// may close a buffer the host already reclaimed.
    pub fn close_color_buffer(&self, cb: u32) {
        let mut reg = self.registry.lock();
        let released = ColorBufferHandle::from_raw(cb).is_some_and(|h| reg.release_color_buffer(h));
        if !released {
            debug!("close_color_buffer: unknown handle {cb}");
        }
    }

    /// Guest references held on `cb`, if it exists.
    pub fn color_buffer_refs(&self, cb: u32) -> Option<u32> {
        let reg = self.registry.lock();
        ColorBufferHandle::from_raw(cb)
            .and_then(|h| reg.color_buffers.get(&h))
            .map(|e| e.refs)
    }

    // ── Binding ──────────────────────────────────────────────────

    /// `eglMakeCurrent` for the calling decode thread. All-zero handles
    /// release the binding and always succeed.
    pub fn bind_context(&self, thread: &mut RenderThreadInfo, context: u32, draw: u32, read: u32) -> bool {
        let reg = self.registry.lock();

        if context == 0 && draw == 0 && read == 0 {
            if let Err(e) = self.host.make_current(HostBinding::UNBOUND) {
                warn!("release binding: {e}");
            }
            let previous = thread.binding.release();
            if let Some((d, r)) = previous.surfaces() {
                record_binding(d, r, None);
            }
            return true;
        }

        let Some((ctx_handle, ctx)) = reg.context(context) else {
            debug!("bind_context: bad context {context}");
            return false;
        };
        let Some((draw_handle, draw_surface)) = reg.surface(draw) else {
            debug!("bind_context: bad draw surface {draw}");
            return false;
        };
        let (read_handle, read_surface) = if read == draw {
            (draw_handle, draw_surface.clone())
        } else {
            match reg.surface(read) {
                Some(found) => found,
                None => {
                    debug!("bind_context: bad read surface {read}");
                    return false;
                }
            }
        };

        let target = HostBinding::new(
            ctx.host_context(),
            Some(draw_surface.host_surface()),
            Some(read_surface.host_surface()),
        );
        if let Err(e) = self.host.make_current(target) {
            warn!("bind_context {ctx_handle}: {e}");
            return false;
        }

        record_binding(&draw_surface, &read_surface, Some(&ctx));
        thread
            .binding
            .bind((ctx_handle, ctx), (draw_handle, draw_surface), (read_handle, read_surface));
        true
    }

    // ── Surfaces and color buffers ───────────────────────────────

    pub fn set_surface_color_buffer(&self, surface: u32, cb: u32) -> bool {
        let mut reg = self.registry.lock();
        let Some(cb_handle) = ColorBufferHandle::from_raw(cb).filter(|h| reg.color_buffers.contains_key(h)) else {
            debug!("set_surface_color_buffer: bad color buffer {cb}");
            return false;
        };
        let buffer = reg.color_buffers[&cb_handle].buffer.clone();
        let Some(entry) = SurfaceHandle::from_raw(surface).and_then(|h| reg.surfaces.get_mut(&h)) else {
            debug!("set_surface_color_buffer: bad surface {surface}");
            return false;
        };
        if let Err(e) = entry.surface.set_color_buffer(buffer) {
            warn!("set_surface_color_buffer: {e}");
            return false;
        }
        entry.color_buffer = Some(cb_handle);
        true
    }

    /// Copy a surface into its color buffer (`eglSwapBuffers`).
    pub fn flush_surface_color_buffer(&self, thread: &RenderThreadInfo, surface: u32) -> bool {
        let reg = self.registry.lock();
        let Some((handle, surface)) = reg.surface(surface) else {
            debug!("flush_surface_color_buffer: bad surface {surface}");
            return false;
        };
        match surface.flush(thread) {
            Ok(()) => true,
            Err(e) => {
                warn!("flush {handle}: {e}");
                false
            }
        }
    }

    pub fn read_color_buffer(&self, cb: u32, region: Region, layout: PixelLayout, out: &mut [u8]) -> bool {
        let reg = self.registry.lock();
        let Some(buffer) = reg.color_buffer(cb) else {
            debug!("read_color_buffer: bad handle {cb}");
            return false;
        };
        match buffer.read_pixels(region, layout, out) {
            Ok(()) => true,
            Err(e) => {
                warn!("read_color_buffer {cb}: {e}");
                false
            }
        }
    }

    pub fn update_color_buffer(&self, cb: u32, region: Region, layout: PixelLayout, pixels: &[u8]) -> bool {
        let reg = self.registry.lock();
        let Some(buffer) = reg.color_buffer(cb) else {
            debug!("update_color_buffer: bad handle {cb}");
            return false;
        };
        match buffer.sub_update(region, layout, pixels) {
            Ok(()) => true,
            Err(e) => {
                warn!("update_color_buffer {cb}: {e}");
                false
            }
        }
    }

    pub fn bind_color_buffer_to_texture(&self, thread: &RenderThreadInfo, cb: u32) -> bool {
        let reg = self.registry.lock();
        let Some(buffer) = reg.color_buffer(cb) else {
            debug!("bind_color_buffer_to_texture: bad handle {cb}");
            return false;
        };
        buffer
            .bind_to_texture(thread)
            .map_err(|e| warn!("bind {cb} to texture: {e}"))
            .is_ok()
    }

    pub fn bind_color_buffer_to_renderbuffer(&self, thread: &RenderThreadInfo, cb: u32) -> bool {
        let reg = self.registry.lock();
        let Some(buffer) = reg.color_buffer(cb) else {
            debug!("bind_color_buffer_to_renderbuffer: bad handle {cb}");
            return false;
        };
        if !self.caps.has_eglimage_renderbuffer {
            return false;
        }
        buffer
            .bind_to_renderbuffer(thread)
            .map_err(|e| warn!("bind {cb} to renderbuffer: {e}"))
            .is_ok()
    }

    // ── Client images ────────────────────────────────────────────

    /// Wrap a guest buffer in a host EGLImage. Context 0 means none.
    pub fn create_client_image(&self, context: u32, target: u32, buffer: u64) -> Option<ImageHandle> {
        let mut reg = self.registry.lock();
        let host_context = match context {
            0 => None,
            raw => match reg.context(raw) {
                Some((_, ctx)) => Some(ctx.host_context()),
                None => {
                    debug!("create_client_image: bad context {raw}");
                    return None;
                }
            },
        };
        let image = match self.host.create_image(host_context, target, buffer) {
            Ok(image) => image,
            Err(e) => {
                warn!("create_client_image: {e}");
                return None;
            }
        };
        let handle = ImageHandle::from(reg.next_handle());
        reg.images.insert(handle, image);
        Some(handle)
    }

    pub fn destroy_client_image(&self, image: u32) -> bool {
        let mut reg = self.registry.lock();
        match ImageHandle::from_raw(image).and_then(|h| reg.images.remove(&h)) {
            Some(host_image) => {
                self.host.destroy_image(host_image);
                true
            }
            None => {
                debug!("destroy_client_image: bad handle {image}");
                false
            }
        }
    }

    // ── Native windows ───────────────────────────────────────────

    /// Create a window surface for `native` and clear it once.
    pub fn create_native_window(&self, native: NativeWindow) -> bool {
        let mut reg = self.registry.lock();
        if reg.windows.contains_key(&native) {
            return true;
        }
        let surface = match self.host.create_window_surface(self.display_config, native) {
            Ok(s) => s,
            Err(e) => {
                warn!("create_native_window: {e}");
                return false;
            }
        };
        let presented = self.display.bind_surface(surface).and_then(|_scope| {
            self.host.clear([0.0, 0.0, 0.0, 0.0]);
            self.host.swap_buffers(surface)
        });
        if let Err(e) = presented {
            warn!("create_native_window: {e}");
            self.host.destroy_surface(surface);
            return false;
        }
        reg.windows.insert(native, RendererWindow { native, surface });
        true
    }

    pub fn destroy_native_window(&self, native: NativeWindow) {
        let mut reg = self.registry.lock();
        let Some(window) = reg.windows.remove(&native) else {
            return;
        };
        let current = self.host.current();
        if current.draw == Some(window.surface) || current.read == Some(window.surface) {
            if let Err(e) = self.host.make_current(HostBinding::UNBOUND) {
                warn!("destroy_native_window: {e}");
            }
        }
        self.host.destroy_surface(window.surface);
    }

    // ── Composition ──────────────────────────────────────────────

    /// Draw `renderables` into the window of `native` and present it.
    ///
    /// `frame` is the window's area in screen coordinates; renderables
    /// naming unknown color buffers are skipped.
    pub fn draw(&self, native: NativeWindow, frame: Rect, renderables: &[Renderable]) -> bool {
        let reg = self.registry.lock();
        let Some(window) = reg.windows.get(&native).copied() else {
            debug!("draw: unknown window {native:?}");
            return false;
        };
        let _scope = match self.display.bind_surface(window.surface) {
            Ok(scope) => scope,
            Err(e) => {
                warn!("draw: {e}");
                return false;
            }
        };

        let screen_to_gl = Mat4::screen_to_gl(&frame);
        self.host
            .set_viewport(Region::sized(frame.width(), frame.height()));
        self.host.clear([0.0, 0.0, 0.0, 1.0]);

        for renderable in renderables {
            let Some(buffer) = reg.color_buffer(renderable.buffer) else {
                continue;
            };
            let rect = renderable.screen;
            let quad = QuadDraw {
                program: self.programs.for_alpha(renderable.alpha),
                texture: buffer.bind_for_sampling(),
                vertices: draw::tessellate(renderable, buffer.width(), buffer.height()),
                uniforms: QuadUniforms {
                    screen_to_gl,
                    transform: renderable.transform,
                    center: [
                        rect.left as f32 + rect.width() as f32 / 2.0,
                        rect.top as f32 + rect.height() as f32 / 2.0,
                    ],
                    alpha: renderable.alpha,
                },
                blend: true,
            };
            if let Err(e) = self.host.draw_quad(&quad) {
                warn!("draw {}: {e}", renderable.name);
            }
        }

        if let Err(e) = self.host.swap_buffers(window.surface) {
            warn!("draw: {e}");
        }
        true
    }

    // ── Thread teardown ──────────────────────────────────────────

    /// Destroy every context the thread created and still owns.
    pub fn drain_contexts_for_thread(&self, thread: &mut RenderThreadInfo) {
        let mut reg = self.registry.lock();
        for handle in thread.owned_contexts.drain() {
            reg.contexts.remove(&handle);
        }
    }

    /// Destroy every surface the thread created and still owns, dropping
    /// the reference each held on its color buffer.
    pub fn drain_surfaces_for_thread(&self, thread: &mut RenderThreadInfo) {
        let mut reg = self.registry.lock();
        for handle in thread.owned_surfaces.drain().collect::<Vec<_>>() {
            if let Some(entry) = reg.surfaces.remove(&handle) {
                if let Some(cb) = entry.color_buffer {
                    reg.release_color_buffer(cb);
                }
            }
        }
    }

    pub fn context_count(&self) -> usize {
        self.registry.lock().contexts.len()
    }

    pub fn surface_count(&self) -> usize {
        self.registry.lock().surfaces.len()
    }

    pub fn color_buffer_count(&self) -> usize {
        self.registry.lock().color_buffers.len()
    }
}

/// Record `context` on the surfaces of a binding, combined when both
/// sides are the same surface.
fn record_binding(draw: &Arc<WindowSurface>, read: &Arc<WindowSurface>, context: Option<&Arc<RenderContext>>) {
    if Arc::ptr_eq(draw, read) {
        draw.bind_context(context, SurfaceRole::ReadDraw);
    } else {
        draw.bind_context(context, SurfaceRole::Draw);
        read.bind_context(context, SurfaceRole::Read);
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let reg = self.registry.get_mut();
        for (_, window) in reg.windows.drain() {
            self.host.destroy_surface(window.surface);
        }
        for (_, image) in reg.images.drain() {
            self.host.destroy_image(image);
        }
        reg.color_buffers.clear();
        reg.surfaces.clear();
        reg.contexts.clear();
        match self.private.bind() {
            Ok(_scope) => self.programs.delete(&*self.host),
            Err(e) => warn!("leaking compositor programs: {e}"),
        }
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("caps", &self.caps)
            .field("configs", &self.configs.len())
            .finish()
    }
}
