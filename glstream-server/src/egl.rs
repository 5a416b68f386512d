//! Host backend over a dynamically loaded EGL and GLESv2.
//!
//! ```text
//!   libEGL    ── eglGetDisplay, eglInitialize, ... (dlsym)
//!   libGLESv2 ── glGenTextures, glDrawArrays, ...  (dlsym)
//!   eglGetProcAddress ── EGLImage entry points (optional)
//! ```
//!
//! Native windows come from [`HeadlessWindows`]; a window surface is an
//! offscreen buffer sized to the window frame.
//!
//! Forwarded guest GLES calls need per-opcode tables this backend does not
//! carry, so opaque calls report [`HostError::Unsupported`]. Client-array
//! attributes and indexed draws are executed.

use std::collections::HashMap;
use std::ffi::{CStr, CString, c_char, c_void};
use std::path::Path;
use std::ptr;
use std::sync::Arc;

use libloading::Library;
use parking_lot::Mutex;
use tracing::{debug, info};

use glstream_core::error::HostError;
use glstream_core::geometry::Mat4;
use glstream_core::host::consts::{egl, gl};
use glstream_core::host::{
    AttribPointer, EglVersion, GlFramebuffer, GlProgram, GlTexture, GlesApi, GlesDispatch, HostBinding,
    HostConfig, HostContext, HostDriver, HostImage, HostSurface, NativeWindow, PixelFormat, PixelLayout,
    PointerKind, QuadDraw, Region, TextureFilter, Vertex,
};

use crate::window::HeadlessWindows;

type Ptr = *mut c_void;

const EGL_DRAW: i32 = 0x3059;
const EGL_READ: i32 = 0x305A;
const EGL_OPENGL_ES_API: u32 = 0x30A0;
const EGL_IMAGE_PRESERVED_KHR: i32 = 0x30D2;

const INFO_LOG_LEN: usize = 1024;

// ── Entry points ─────────────────────────────────────────────────

macro_rules! entry_points {
    ($name:ident { $($field:ident: fn($($arg:ty),*) $(-> $ret:ty)? = $sym:literal;)* }) => {
        struct $name {
            $($field: unsafe extern "C" fn($($arg),*) $(-> $ret)?,)*
        }

        impl $name {
            fn load(lib: &Library) -> Result<Self, HostError> {
                Ok(Self {
                    $($field: *unsafe {
                        lib.get::<unsafe extern "C" fn($($arg),*) $(-> $ret)?>(concat!($sym, "\0").as_bytes())
                    }
                    .map_err(|_| HostError::MissingSymbol($sym.into()))?,)*
                })
            }
        }
    };
}

entry_points!(EglApi {
    get_display: fn(Ptr) -> Ptr = "eglGetDisplay";
    initialize: fn(Ptr, *mut i32, *mut i32) -> u32 = "eglInitialize";
    terminate: fn(Ptr) -> u32 = "eglTerminate";
    bind_api: fn(u32) -> u32 = "eglBindAPI";
    query_string: fn(Ptr, i32) -> *const c_char = "eglQueryString";
    get_configs: fn(Ptr, *mut Ptr, i32, *mut i32) -> u32 = "eglGetConfigs";
    choose_config: fn(Ptr, *const i32, *mut Ptr, i32, *mut i32) -> u32 = "eglChooseConfig";
    get_config_attrib: fn(Ptr, Ptr, i32, *mut i32) -> u32 = "eglGetConfigAttrib";
    create_context: fn(Ptr, Ptr, Ptr, *const i32) -> Ptr = "eglCreateContext";
    destroy_context: fn(Ptr, Ptr) -> u32 = "eglDestroyContext";
    create_pbuffer_surface: fn(Ptr, Ptr, *const i32) -> Ptr = "eglCreatePbufferSurface";
    destroy_surface: fn(Ptr, Ptr) -> u32 = "eglDestroySurface";
    make_current: fn(Ptr, Ptr, Ptr, Ptr) -> u32 = "eglMakeCurrent";
    get_current_context: fn() -> Ptr = "eglGetCurrentContext";
    get_current_surface: fn(i32) -> Ptr = "eglGetCurrentSurface";
    swap_buffers: fn(Ptr, Ptr) -> u32 = "eglSwapBuffers";
    get_error: fn() -> i32 = "eglGetError";
    get_proc_address: fn(*const c_char) -> Ptr = "eglGetProcAddress";
});

entry_points!(GlApi {
    get_string: fn(u32) -> *const u8 = "glGetString";
    get_error: fn() -> u32 = "glGetError";
    get_integerv: fn(u32, *mut i32) = "glGetIntegerv";
    gen_textures: fn(i32, *mut u32) = "glGenTextures";
    delete_textures: fn(i32, *const u32) = "glDeleteTextures";
    bind_texture: fn(u32, u32) = "glBindTexture";
    active_texture: fn(u32) = "glActiveTexture";
    tex_parameteri: fn(u32, u32, i32) = "glTexParameteri";
    tex_image_2d: fn(u32, i32, i32, i32, i32, i32, u32, u32, *const c_void) = "glTexImage2D";
    tex_sub_image_2d: fn(u32, i32, i32, i32, i32, i32, u32, u32, *const c_void) = "glTexSubImage2D";
    copy_tex_sub_image_2d: fn(u32, i32, i32, i32, i32, i32, i32, i32) = "glCopyTexSubImage2D";
    pixel_storei: fn(u32, i32) = "glPixelStorei";
    gen_framebuffers: fn(i32, *mut u32) = "glGenFramebuffers";
    delete_framebuffers: fn(i32, *const u32) = "glDeleteFramebuffers";
    bind_framebuffer: fn(u32, u32) = "glBindFramebuffer";
    framebuffer_texture_2d: fn(u32, u32, u32, u32, i32) = "glFramebufferTexture2D";
    check_framebuffer_status: fn(u32) -> u32 = "glCheckFramebufferStatus";
    read_pixels: fn(i32, i32, i32, i32, u32, u32, *mut c_void) = "glReadPixels";
    viewport: fn(i32, i32, i32, i32) = "glViewport";
    clear_color: fn(f32, f32, f32, f32) = "glClearColor";
    clear: fn(u32) = "glClear";
    create_shader: fn(u32) -> u32 = "glCreateShader";
    shader_source: fn(u32, i32, *const *const c_char, *const i32) = "glShaderSource";
    compile_shader: fn(u32) = "glCompileShader";
    get_shaderiv: fn(u32, u32, *mut i32) = "glGetShaderiv";
    get_shader_info_log: fn(u32, i32, *mut i32, *mut c_char) = "glGetShaderInfoLog";
    delete_shader: fn(u32) = "glDeleteShader";
    create_program: fn() -> u32 = "glCreateProgram";
    attach_shader: fn(u32, u32) = "glAttachShader";
    link_program: fn(u32) = "glLinkProgram";
    get_programiv: fn(u32, u32, *mut i32) = "glGetProgramiv";
    get_program_info_log: fn(u32, i32, *mut i32, *mut c_char) = "glGetProgramInfoLog";
    delete_program: fn(u32) = "glDeleteProgram";
    use_program: fn(u32) = "glUseProgram";
    get_attrib_location: fn(u32, *const c_char) -> i32 = "glGetAttribLocation";
    get_uniform_location: fn(u32, *const c_char) -> i32 = "glGetUniformLocation";
    uniform_matrix_4fv: fn(i32, i32, u8, *const f32) = "glUniformMatrix4fv";
    uniform_2f: fn(i32, f32, f32) = "glUniform2f";
    uniform_1f: fn(i32, f32) = "glUniform1f";
    uniform_1i: fn(i32, i32) = "glUniform1i";
    enable_vertex_attrib_array: fn(u32) = "glEnableVertexAttribArray";
    disable_vertex_attrib_array: fn(u32) = "glDisableVertexAttribArray";
    vertex_attrib_pointer: fn(u32, i32, u32, u8, i32, *const c_void) = "glVertexAttribPointer";
    draw_arrays: fn(u32, i32, i32) = "glDrawArrays";
    draw_elements: fn(u32, i32, u32, *const c_void) = "glDrawElements";
    enable: fn(u32) = "glEnable";
    disable: fn(u32) = "glDisable";
    blend_func: fn(u32, u32) = "glBlendFunc";
    finish: fn() = "glFinish";
});

type CreateImageFn = unsafe extern "C" fn(Ptr, Ptr, u32, Ptr, *const i32) -> Ptr;
type DestroyImageFn = unsafe extern "C" fn(Ptr, Ptr) -> u32;
type ImageTargetFn = unsafe extern "C" fn(u32, Ptr);

/// EGLImage entry points, resolved through `eglGetProcAddress`.
struct ImageApi {
    create: Option<CreateImageFn>,
    destroy: Option<DestroyImageFn>,
    target_texture: Option<ImageTargetFn>,
    target_renderbuffer: Option<ImageTargetFn>,
}

impl ImageApi {
    fn load(egl: &EglApi) -> Self {
        Self {
            create: proc_address(egl, c"eglCreateImageKHR"),
            destroy: proc_address(egl, c"eglDestroyImageKHR"),
            target_texture: proc_address(egl, c"glEGLImageTargetTexture2DOES"),
            target_renderbuffer: proc_address(egl, c"glEGLImageTargetRenderbufferStorageOES"),
        }
    }
}

fn proc_address<F: Copy>(egl: &EglApi, name: &CStr) -> Option<F> {
    let p = unsafe { (egl.get_proc_address)(name.as_ptr()) };
    if p.is_null() {
        debug!("{} not available", name.to_string_lossy());
        return None;
    }
    debug_assert_eq!(size_of::<F>(), size_of::<Ptr>());
    // SAFETY: F is the function pointer type of `name`.
    Some(unsafe { std::mem::transmute_copy::<Ptr, F>(&p) })
}

fn open(path: &Path) -> Result<Library, HostError> {
    unsafe { Library::new(path) }.map_err(|e| HostError::LibraryLoad {
        library: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn owned_string(p: *const c_char) -> Option<String> {
    if p.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned())
}

fn opt_ptr(handle: Option<usize>) -> Ptr {
    handle.map_or(ptr::null_mut(), |h| h as Ptr)
}

fn nonnull(p: Ptr) -> Option<usize> {
    (!p.is_null()).then_some(p as usize)
}

/// Interleave quad vertices as `x y z s t` for one client array.
fn interleave(vertices: &[Vertex; 4]) -> [f32; 20] {
    let mut out = [0.0; 20];
    for (chunk, v) in out.chunks_exact_mut(5).zip(vertices) {
        chunk[..3].copy_from_slice(&v.position);
        chunk[3..].copy_from_slice(&v.texcoord);
    }
    out
}

fn gl_failure(call: &'static str, reason: impl Into<String>) -> HostError {
    HostError::Gl {
        call,
        reason: reason.into(),
    }
}

// ── EglHost ──────────────────────────────────────────────────────

pub struct EglHost {
    egl: EglApi,
    gl: GlApi,
    image: ImageApi,
    display: usize,
    windows: Arc<HeadlessWindows>,
    /// Guest client arrays, kept alive until the attribute is re-pointed.
    client_arrays: Mutex<HashMap<u32, Vec<u8>>>,
    _gles_lib: Library,
    _egl_lib: Library,
}

impl EglHost {
    /// Open both libraries and the default display.
    pub fn load(egl_path: &Path, gles_path: &Path, windows: Arc<HeadlessWindows>) -> Result<Self, HostError> {
        let egl_lib = open(egl_path)?;
        let gles_lib = open(gles_path)?;
        let egl = EglApi::load(&egl_lib)?;
        let gl = GlApi::load(&gles_lib)?;
        let image = ImageApi::load(&egl);

        let display = unsafe { (egl.get_display)(ptr::null_mut()) };
        let Some(display) = nonnull(display) else {
            return Err(HostError::Egl {
                call: "eglGetDisplay",
                code: egl::BAD_DISPLAY,
            });
        };
        info!("loaded {} and {}", egl_path.display(), gles_path.display());
        Ok(Self {
            egl,
            gl,
            image,
            display,
            windows,
            client_arrays: Mutex::new(HashMap::new()),
            _gles_lib: gles_lib,
            _egl_lib: egl_lib,
        })
    }

    fn dpy(&self) -> Ptr {
        self.display as Ptr
    }

    fn egl_error(&self, call: &'static str) -> HostError {
        HostError::Egl {
            call,
            code: unsafe { (self.egl.get_error)() },
        }
    }

    fn egl_check(&self, ok: u32, call: &'static str) -> Result<(), HostError> {
        if ok == 0 { Err(self.egl_error(call)) } else { Ok(()) }
    }

    fn gl_check(&self, call: &'static str) -> Result<(), HostError> {
        match unsafe { (self.gl.get_error)() } {
            0 => Ok(()),
            code => Err(gl_failure(call, format!("error {code:#06x}"))),
        }
    }

    fn integer(&self, name: u32) -> i32 {
        let mut value = 0;
        unsafe { (self.gl.get_integerv)(name, &mut value) };
        value
    }

    fn compile_shader(&self, kind: u32, source: &str) -> Result<u32, HostError> {
        let source = CString::new(source).map_err(|_| gl_failure("glShaderSource", "nul in source"))?;
        let gl = &self.gl;
        let shader = unsafe { (gl.create_shader)(kind) };
        if shader == 0 {
            return Err(gl_failure("glCreateShader", "no shader name"));
        }
        let mut status = 0;
        unsafe {
            let src = source.as_ptr();
            (gl.shader_source)(shader, 1, &src, ptr::null());
            (gl.compile_shader)(shader);
            (gl.get_shaderiv)(shader, gl::COMPILE_STATUS, &mut status);
        }
        if status == 0 {
            let log = self.info_log(shader, gl.get_shader_info_log);
            unsafe { (gl.delete_shader)(shader) };
            return Err(gl_failure("glCompileShader", log));
        }
        Ok(shader)
    }

    fn info_log(&self, object: u32, getter: unsafe extern "C" fn(u32, i32, *mut i32, *mut c_char)) -> String {
        let mut buf = vec![0u8; INFO_LOG_LEN];
        let mut len = 0;
        unsafe { getter(object, INFO_LOG_LEN as i32, &mut len, buf.as_mut_ptr().cast()) };
        buf.truncate(len.clamp(0, INFO_LOG_LEN as i32) as usize);
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// First of `names` the program declares as an attribute.
    fn attrib_location(&self, program: u32, names: &[&CStr]) -> Option<u32> {
        names.iter().find_map(|name| {
            let loc = unsafe { (self.gl.get_attrib_location)(program, name.as_ptr()) };
            u32::try_from(loc).ok()
        })
    }

    fn uniform_location(&self, program: u32, name: &CStr) -> i32 {
        unsafe { (self.gl.get_uniform_location)(program, name.as_ptr()) }
    }

    fn set_matrix(&self, program: u32, name: &CStr, m: &Mat4) {
        let loc = self.uniform_location(program, name);
        if loc >= 0 {
            unsafe { (self.gl.uniform_matrix_4fv)(loc, 1, 0, m.0.as_ptr()) };
        }
    }
}

impl Drop for EglHost {
    fn drop(&mut self) {
        unsafe { (self.egl.terminate)(self.dpy()) };
    }
}

impl std::fmt::Debug for EglHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EglHost")
            .field("display", &format_args!("{:#x}", self.display))
            .field("egl_image", &self.image.create.is_some())
            .finish_non_exhaustive()
    }
}

impl HostDriver for EglHost {
    fn initialize(&self) -> Result<EglVersion, HostError> {
        let (mut major, mut minor) = (0, 0);
        let ok = unsafe { (self.egl.initialize)(self.dpy(), &mut major, &mut minor) };
        self.egl_check(ok, "eglInitialize")?;
        let ok = unsafe { (self.egl.bind_api)(EGL_OPENGL_ES_API) };
        self.egl_check(ok, "eglBindAPI")?;
        Ok(EglVersion { major, minor })
    }

    fn query_string(&self, name: u32) -> Option<String> {
        owned_string(unsafe { (self.egl.query_string)(self.dpy(), name as i32) })
    }

    fn configs(&self) -> Result<Vec<HostConfig>, HostError> {
        let mut count = 0;
        let ok = unsafe { (self.egl.get_configs)(self.dpy(), ptr::null_mut(), 0, &mut count) };
        self.egl_check(ok, "eglGetConfigs")?;
        let mut raw = vec![ptr::null_mut(); count.max(0) as usize];
        let ok = unsafe { (self.egl.get_configs)(self.dpy(), raw.as_mut_ptr(), count, &mut count) };
        self.egl_check(ok, "eglGetConfigs")?;
        raw.truncate(count.max(0) as usize);
        Ok(raw.into_iter().map(|c| HostConfig(c as usize)).collect())
    }

    fn config_attrib(&self, config: HostConfig, attrib: i32) -> Option<i32> {
        let mut value = 0;
        let ok = unsafe { (self.egl.get_config_attrib)(self.dpy(), config.0 as Ptr, attrib, &mut value) };
        (ok != 0).then_some(value)
    }

    fn choose_config(&self, attribs: &[i32], max: usize) -> Result<Vec<HostConfig>, HostError> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let mut raw = vec![ptr::null_mut(); max];
        let mut count = 0;
        let ok = unsafe {
            (self.egl.choose_config)(self.dpy(), attribs.as_ptr(), raw.as_mut_ptr(), max as i32, &mut count)
        };
        self.egl_check(ok, "eglChooseConfig")?;
        raw.truncate(count.max(0) as usize);
        Ok(raw.into_iter().map(|c| HostConfig(c as usize)).collect())
    }

    fn create_context(
        &self,
        config: HostConfig,
        share: Option<HostContext>,
        api: GlesApi,
    ) -> Result<HostContext, HostError> {
        let attribs = [egl::CONTEXT_CLIENT_VERSION, api.client_version(), egl::NONE];
        let share = opt_ptr(share.map(|c| c.0));
        let ctx = unsafe { (self.egl.create_context)(self.dpy(), config.0 as Ptr, share, attribs.as_ptr()) };
        nonnull(ctx)
            .map(HostContext)
            .ok_or_else(|| self.egl_error("eglCreateContext"))
    }

    fn destroy_context(&self, context: HostContext) {
        unsafe { (self.egl.destroy_context)(self.dpy(), context.0 as Ptr) };
    }

    fn create_pbuffer(&self, config: HostConfig, width: u32, height: u32) -> Result<HostSurface, HostError> {
        let attribs = [egl::WIDTH, width as i32, egl::HEIGHT, height as i32, egl::NONE];
        let surface =
            unsafe { (self.egl.create_pbuffer_surface)(self.dpy(), config.0 as Ptr, attribs.as_ptr()) };
        nonnull(surface)
            .map(HostSurface)
            .ok_or_else(|| self.egl_error("eglCreatePbufferSurface"))
    }

    fn create_window_surface(&self, config: HostConfig, window: NativeWindow) -> Result<HostSurface, HostError> {
        let frame = self.windows.frame(window).ok_or(HostError::Egl {
            call: "eglCreateWindowSurface",
            code: egl::BAD_NATIVE_WINDOW,
        })?;
        self.create_pbuffer(config, frame.width().max(1) as u32, frame.height().max(1) as u32)
    }

    fn destroy_surface(&self, surface: HostSurface) {
        unsafe { (self.egl.destroy_surface)(self.dpy(), surface.0 as Ptr) };
    }

    fn make_current(&self, binding: HostBinding) -> Result<(), HostError> {
        let ok = unsafe {
            (self.egl.make_current)(
                self.dpy(),
                opt_ptr(binding.draw.map(|s| s.0)),
                opt_ptr(binding.read.map(|s| s.0)),
                opt_ptr(binding.context.map(|c| c.0)),
            )
        };
        self.egl_check(ok, "eglMakeCurrent")
    }

    fn current(&self) -> HostBinding {
        let Some(context) = nonnull(unsafe { (self.egl.get_current_context)() }) else {
            return HostBinding::UNBOUND;
        };
        let draw = nonnull(unsafe { (self.egl.get_current_surface)(EGL_DRAW) });
        let read = nonnull(unsafe { (self.egl.get_current_surface)(EGL_READ) });
        HostBinding::new(HostContext(context), draw.map(HostSurface), read.map(HostSurface))
    }

    fn swap_buffers(&self, surface: HostSurface) -> Result<(), HostError> {
        let ok = unsafe { (self.egl.swap_buffers)(self.dpy(), surface.0 as Ptr) };
        self.egl_check(ok, "eglSwapBuffers")
    }

    fn create_image(&self, context: Option<HostContext>, target: u32, buffer: u64) -> Result<HostImage, HostError> {
        let create = self.image.create.ok_or(HostError::Unsupported("eglCreateImageKHR"))?;
        let attribs = [EGL_IMAGE_PRESERVED_KHR, egl::TRUE, egl::NONE];
        let context = match target {
            egl::GL_TEXTURE_2D_KHR | egl::GL_RENDERBUFFER_KHR => opt_ptr(context.map(|c| c.0)),
            _ => ptr::null_mut(),
        };
        let image =
            unsafe { create(self.dpy(), context, target, buffer as usize as Ptr, attribs.as_ptr()) };
        nonnull(image)
            .map(HostImage)
            .ok_or_else(|| self.egl_error("eglCreateImageKHR"))
    }

    fn destroy_image(&self, image: HostImage) {
        if let Some(destroy) = self.image.destroy {
            unsafe { destroy(self.dpy(), image.0 as Ptr) };
        }
    }

    // ── GL on the current context ──

    fn gl_string(&self, name: u32) -> Option<String> {
        owned_string(unsafe { (self.gl.get_string)(name) }.cast())
    }

    fn gen_texture(&self) -> Result<GlTexture, HostError> {
        let mut name = 0;
        unsafe { (self.gl.gen_textures)(1, &mut name) };
        if name == 0 {
            return Err(gl_failure("glGenTextures", "no texture name"));
        }
        Ok(GlTexture(name))
    }

    fn create_texture(
        &self,
        format: PixelFormat,
        width: u32,
        height: u32,
        filter: TextureFilter,
    ) -> Result<GlTexture, HostError> {
        let texture = self.gen_texture()?;
        let previous = self.bound_texture();
        let filter = match filter {
            TextureFilter::Nearest => gl::NEAREST,
            TextureFilter::Linear => gl::LINEAR,
        } as i32;
        let bpp = match format {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
        };
        let zeros = vec![0u8; width as usize * height as usize * bpp];
        let gl = &self.gl;
        unsafe {
            (gl.bind_texture)(gl::TEXTURE_2D, texture.0);
            (gl.tex_parameteri)(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, filter);
            (gl.tex_parameteri)(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, filter);
            (gl.tex_parameteri)(gl::TEXTURE_2D, gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE as i32);
            (gl.tex_parameteri)(gl::TEXTURE_2D, gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE as i32);
            (gl.pixel_storei)(gl::UNPACK_ALIGNMENT, 1);
            (gl.tex_image_2d)(
                gl::TEXTURE_2D,
                0,
                format.gl_format() as i32,
                width as i32,
                height as i32,
                0,
                format.gl_format(),
                gl::UNSIGNED_BYTE,
                zeros.as_ptr().cast(),
            );
        }
        let result = self.gl_check("glTexImage2D");
        self.bind_texture(previous);
        if let Err(e) = result {
            self.delete_texture(texture);
            return Err(e);
        }
        Ok(texture)
    }

    fn delete_texture(&self, texture: GlTexture) {
        unsafe { (self.gl.delete_textures)(1, &texture.0) };
    }

    fn bound_texture(&self) -> Option<GlTexture> {
        match self.integer(gl::TEXTURE_BINDING_2D) {
            0 => None,
            name => Some(GlTexture(name as u32)),
        }
    }

    fn bind_texture(&self, texture: Option<GlTexture>) {
        unsafe { (self.gl.bind_texture)(gl::TEXTURE_2D, texture.map_or(0, |t| t.0)) };
    }

    fn update_texture(
        &self,
        texture: GlTexture,
        region: Region,
        layout: PixelLayout,
        pixels: &[u8],
    ) -> Result<(), HostError> {
        let needed = layout
            .image_size(region.width.max(0) as u32, region.height.max(0) as u32)
            .ok_or_else(|| gl_failure("glTexSubImage2D", "unsupported pixel layout"))?;
        if pixels.len() < needed {
            return Err(gl_failure("glTexSubImage2D", format!("{} of {needed} bytes", pixels.len())));
        }
        let previous = self.bound_texture();
        unsafe {
            (self.gl.bind_texture)(gl::TEXTURE_2D, texture.0);
            (self.gl.pixel_storei)(gl::UNPACK_ALIGNMENT, 1);
            (self.gl.tex_sub_image_2d)(
                gl::TEXTURE_2D,
                0,
                region.x,
                region.y,
                region.width,
                region.height,
                layout.format,
                layout.ty,
                pixels.as_ptr().cast(),
            );
        }
        let result = self.gl_check("glTexSubImage2D");
        self.bind_texture(previous);
        result
    }

    fn image_target_texture(&self, image: HostImage) -> Result<(), HostError> {
        let target = self
            .image
            .target_texture
            .ok_or(HostError::Unsupported("glEGLImageTargetTexture2DOES"))?;
        unsafe { target(gl::TEXTURE_2D, image.0 as Ptr) };
        self.gl_check("glEGLImageTargetTexture2DOES")
    }

    fn image_target_renderbuffer(&self, image: HostImage) -> Result<(), HostError> {
        let target = self
            .image
            .target_renderbuffer
            .ok_or(HostError::Unsupported("glEGLImageTargetRenderbufferStorageOES"))?;
        unsafe { target(gl::RENDERBUFFER, image.0 as Ptr) };
        self.gl_check("glEGLImageTargetRenderbufferStorageOES")
    }

    fn copy_read_to_texture(&self, width: u32, height: u32) -> Result<(), HostError> {
        unsafe { (self.gl.copy_tex_sub_image_2d)(gl::TEXTURE_2D, 0, 0, 0, 0, 0, width as i32, height as i32) };
        self.gl_check("glCopyTexSubImage2D")
    }

    fn create_framebuffer(&self, texture: GlTexture) -> Result<GlFramebuffer, HostError> {
        let previous = self.integer(gl::FRAMEBUFFER_BINDING) as u32;
        let gl = &self.gl;
        let mut fbo = 0;
        let status = unsafe {
            (gl.gen_framebuffers)(1, &mut fbo);
            (gl.bind_framebuffer)(gl::FRAMEBUFFER, fbo);
            (gl.framebuffer_texture_2d)(gl::FRAMEBUFFER, gl::COLOR_ATTACHMENT0, gl::TEXTURE_2D, texture.0, 0);
            let status = (gl.check_framebuffer_status)(gl::FRAMEBUFFER);
            (gl.bind_framebuffer)(gl::FRAMEBUFFER, previous);
            status
        };
        if fbo == 0 || status != gl::FRAMEBUFFER_COMPLETE {
            self.delete_framebuffer(GlFramebuffer(fbo));
            return Err(gl_failure("glCheckFramebufferStatus", format!("status {status:#06x}")));
        }
        Ok(GlFramebuffer(fbo))
    }

    fn bind_framebuffer(&self, framebuffer: Option<GlFramebuffer>) {
        unsafe { (self.gl.bind_framebuffer)(gl::FRAMEBUFFER, framebuffer.map_or(0, |f| f.0)) };
    }

    fn delete_framebuffer(&self, framebuffer: GlFramebuffer) {
        if framebuffer.0 != 0 {
            unsafe { (self.gl.delete_framebuffers)(1, &framebuffer.0) };
        }
    }

    fn read_pixels(&self, region: Region, layout: PixelLayout, out: &mut [u8]) -> Result<(), HostError> {
        let needed = layout
            .image_size(region.width.max(0) as u32, region.height.max(0) as u32)
            .ok_or_else(|| gl_failure("glReadPixels", "unsupported pixel layout"))?;
        if out.len() < needed {
            return Err(gl_failure("glReadPixels", format!("{} of {needed} bytes", out.len())));
        }
        unsafe {
            (self.gl.pixel_storei)(gl::PACK_ALIGNMENT, 1);
            (self.gl.read_pixels)(
                region.x,
                region.y,
                region.width,
                region.height,
                layout.format,
                layout.ty,
                out.as_mut_ptr().cast(),
            );
        }
        self.gl_check("glReadPixels")
    }

    fn viewport(&self) -> Region {
        let mut v = [0i32; 4];
        unsafe { (self.gl.get_integerv)(gl::VIEWPORT, v.as_mut_ptr()) };
        Region::new(v[0], v[1], v[2], v[3])
    }

    fn set_viewport(&self, region: Region) {
        unsafe { (self.gl.viewport)(region.x, region.y, region.width, region.height) };
    }

    fn clear(&self, rgba: [f32; 4]) {
        unsafe {
            (self.gl.clear_color)(rgba[0], rgba[1], rgba[2], rgba[3]);
            (self.gl.clear)(gl::COLOR_BUFFER_BIT);
        }
    }

    fn create_program(&self, vertex: &str, fragment: &str) -> Result<GlProgram, HostError> {
        let gl = &self.gl;
        let vs = self.compile_shader(gl::VERTEX_SHADER, vertex)?;
        let fs = match self.compile_shader(gl::FRAGMENT_SHADER, fragment) {
            Ok(fs) => fs,
            Err(e) => {
                unsafe { (gl.delete_shader)(vs) };
                return Err(e);
            }
        };
        let mut status = 0;
        let program = unsafe {
            let program = (gl.create_program)();
            (gl.attach_shader)(program, vs);
            (gl.attach_shader)(program, fs);
            (gl.link_program)(program);
            (gl.get_programiv)(program, gl::LINK_STATUS, &mut status);
            (gl.delete_shader)(vs);
            (gl.delete_shader)(fs);
            program
        };
        if program == 0 || status == 0 {
            let log = self.info_log(program, gl.get_program_info_log);
            self.delete_program(GlProgram(program));
            return Err(gl_failure("glLinkProgram", log));
        }
        Ok(GlProgram(program))
    }

    fn delete_program(&self, program: GlProgram) {
        if program.0 != 0 {
            unsafe { (self.gl.delete_program)(program.0) };
        }
    }

    fn draw_quad(&self, draw: &QuadDraw) -> Result<(), HostError> {
        let gl = &self.gl;
        let program = draw.program.0;
        let u = &draw.uniforms;
        let data = interleave(&draw.vertices);
        let stride = (5 * size_of::<f32>()) as i32;

        let position = self
            .attrib_location(program, &[c"position"])
            .ok_or_else(|| gl_failure("glGetAttribLocation", "no position attribute"))?;
        let texcoord = self.attrib_location(program, &[c"texcoord", c"inCoord"]);

        unsafe {
            (gl.use_program)(program);
            self.set_matrix(program, c"screen_to_gl_coords", &u.screen_to_gl);
            self.set_matrix(program, c"display_transform", &Mat4::IDENTITY);
            self.set_matrix(program, c"transform", &u.transform);
            let center = self.uniform_location(program, c"center");
            if center >= 0 {
                (gl.uniform_2f)(center, u.center[0], u.center[1]);
            }
            let alpha = self.uniform_location(program, c"alpha");
            if alpha >= 0 {
                (gl.uniform_1f)(alpha, u.alpha);
            }
            for sampler in [c"tex", c"texture"] {
                let loc = self.uniform_location(program, sampler);
                if loc >= 0 {
                    (gl.uniform_1i)(loc, 0);
                }
            }

            (gl.active_texture)(gl::TEXTURE0);
            (gl.bind_texture)(gl::TEXTURE_2D, draw.texture.0);
            if draw.blend {
                (gl.enable)(gl::BLEND);
                (gl.blend_func)(gl::ONE, gl::ONE_MINUS_SRC_ALPHA);
            } else {
                (gl.disable)(gl::BLEND);
            }

            (gl.vertex_attrib_pointer)(position, 3, gl::FLOAT, 0, stride, data.as_ptr().cast());
            (gl.enable_vertex_attrib_array)(position);
            if let Some(texcoord) = texcoord {
                (gl.vertex_attrib_pointer)(texcoord, 2, gl::FLOAT, 0, stride, data[3..].as_ptr().cast());
                (gl.enable_vertex_attrib_array)(texcoord);
            }
            (gl.draw_arrays)(gl::TRIANGLE_STRIP, 0, 4);
            (gl.disable_vertex_attrib_array)(position);
            if let Some(texcoord) = texcoord {
                (gl.disable_vertex_attrib_array)(texcoord);
            }
        }
        self.gl_check("glDrawArrays")
    }

    fn finish(&self) {
        unsafe { (self.gl.finish)() };
    }
}

impl GlesDispatch for EglHost {
    fn execute(&self, _api: GlesApi, _opcode: u32, _args: &[u8]) -> Result<Vec<u8>, HostError> {
        Err(HostError::Unsupported("GLES pass-through"))
    }

    fn attrib_pointer(&self, api: GlesApi, pointer: &AttribPointer<'_>) -> Result<(), HostError> {
        let (GlesApi::V2, PointerKind::Attrib(index)) = (api, pointer.kind) else {
            return Err(HostError::Unsupported("fixed-function client arrays"));
        };
        let mut arrays = self.client_arrays.lock();
        let data = pointer.data.to_vec();
        unsafe {
            (self.gl.vertex_attrib_pointer)(
                index,
                pointer.size,
                pointer.ty,
                pointer.normalized as u8,
                pointer.stride,
                data.as_ptr().cast(),
            );
        }
        arrays.insert(index, data);
        self.gl_check("glVertexAttribPointer")
    }

    fn draw_elements(&self, api: GlesApi, mode: u32, count: i32, ty: u32, indices: &[u8]) -> Result<(), HostError> {
        if api != GlesApi::V2 {
            return Err(HostError::Unsupported("GLES1 draw"));
        }
        unsafe { (self.gl.draw_elements)(mode, count, ty, indices.as_ptr().cast()) };
        self.gl_check("glDrawElements")
    }

    fn finish(&self, _api: GlesApi) {
        unsafe { (self.gl.finish)() };
    }
}
