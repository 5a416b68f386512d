//! Color buffers: guest graphics memory backed by host textures.
//!
//! Each buffer owns two textures of the same size. The primary texture
//! holds the pixels and is shared with guest contexts through an EGLImage;
//! the blit texture is a staging area for copies out of a guest surface.
//! Both are created, read and written under the renderer's private binding.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::binding::PrivateContext;
use crate::error::HostError;
use crate::host::consts::egl;
use crate::host::{
    GlFramebuffer, GlProgram, GlTexture, HostDriver, HostImage, PixelFormat, PixelLayout,
    QuadDraw, QuadUniforms, Region, TextureFilter, Vertex,
};
use crate::state::RenderThreadInfo;

/// Full-target quad for the blit program, flipping rows so the GL
/// bottom-up read surface lands top-down in the buffer.
const BLIT_QUAD: [Vertex; 4] = [
    Vertex::new(-1.0, -1.0, 0.0, 1.0),
    Vertex::new(1.0, -1.0, 1.0, 1.0),
    Vertex::new(-1.0, 1.0, 0.0, 0.0),
    Vertex::new(1.0, 1.0, 1.0, 0.0),
];

pub struct ColorBuffer {
    host: Arc<dyn HostDriver>,
    private: Arc<PrivateContext>,
    blit_program: GlProgram,
    width: u32,
    height: u32,
    format: PixelFormat,
    texture: GlTexture,
    blit_texture: GlTexture,
    image: Option<HostImage>,
    blit_image: Option<HostImage>,
    framebuffer: Mutex<Option<GlFramebuffer>>,
}

impl ColorBuffer {
    /// Allocate zero-filled storage; EGLImages are created only when
    /// `with_images` is set.
    pub fn create(
        private: Arc<PrivateContext>,
        blit_program: GlProgram,
        width: u32,
        height: u32,
        format: PixelFormat,
        with_images: bool,
    ) -> Result<Self, HostError> {
        let host = private.host_arc();
        let _scope = private.bind()?;

        let texture = host.create_texture(format, width, height, TextureFilter::Linear)?;
        let blit_texture = match host.create_texture(format, width, height, TextureFilter::Nearest) {
            Ok(t) => t,
            Err(e) => {
                host.delete_texture(texture);
                return Err(e);
            }
        };

        let (image, blit_image) = if with_images {
            let make = |t: GlTexture| {
                host.create_image(Some(private.context()), egl::GL_TEXTURE_2D_KHR, t.0 as u64)
                    .map_err(|e| warn!("color buffer image: {e}"))
                    .ok()
            };
            (make(texture), make(blit_texture))
        } else {
            (None, None)
        };

        Ok(Self {
            host: host.clone(),
            private: private.clone(),
            blit_program,
            width,
            height,
            format,
            texture,
            blit_texture,
            image,
            blit_image,
            framebuffer: Mutex::new(None),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn texture(&self) -> GlTexture {
        self.texture
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    /// The read-back framebuffer, created on first use. Call with the
    /// private context bound.
    fn framebuffer(&self) -> Result<GlFramebuffer, HostError> {
        let mut slot = self.framebuffer.lock();
        if let Some(fb) = *slot {
            return Ok(fb);
        }
        let fb = self.host.create_framebuffer(self.texture)?;
        *slot = Some(fb);
        Ok(fb)
    }

    /// Read a region into `out`, pack alignment 1.
    pub fn read_pixels(&self, region: Region, layout: PixelLayout, out: &mut [u8]) -> Result<(), HostError> {
        let _scope = self.private.bind()?;
        let fb = self.framebuffer()?;
        self.host.bind_framebuffer(Some(fb));
        let result = self.host.read_pixels(region, layout, out);
        self.host.bind_framebuffer(None);
        result
    }

    /// Upload a region, unpack alignment 1.
    pub fn sub_update(&self, region: Region, layout: PixelLayout, pixels: &[u8]) -> Result<(), HostError> {
        let _scope = self.private.bind()?;
        self.host.update_texture(self.texture, region, layout, pixels)
    }

    /// Copy the calling thread's current read surface into this buffer.
    ///
    /// The copy lands in the blit texture through a temporary texture
    /// bound to the blit EGLImage, then gets drawn into the primary
    /// texture on the private context.
    pub fn blit_from_current_read_buffer(&self, thread: &RenderThreadInfo) -> Result<(), HostError> {
        if thread.current_context().is_none() {
            return Err(HostError::InvalidState("no current context"));
        }
        let blit_image = self
            .blit_image
            .ok_or(HostError::InvalidState("no blit image"))?;

        let previous = self.host.bound_texture();
        let temp = self.host.gen_texture()?;
        self.host.bind_texture(Some(temp));
        let copied = self
            .host
            .image_target_texture(blit_image)
            .and_then(|_| self.host.copy_read_to_texture(self.width, self.height));
        self.host.bind_texture(previous);
        self.host.delete_texture(temp);
        copied?;

        let _scope = self.private.bind()?;
        let fb = self.framebuffer()?;
        self.host.bind_framebuffer(Some(fb));
        let viewport = self.host.viewport();
        self.host
            .set_viewport(Region::sized(self.width as i32, self.height as i32));
        let drawn = self.host.draw_quad(&QuadDraw {
            program: self.blit_program,
            texture: self.blit_texture,
            vertices: BLIT_QUAD,
            uniforms: QuadUniforms::default(),
            blend: false,
        });
        self.host.set_viewport(viewport);
        self.host.bind_framebuffer(None);
        drawn
    }

    /// Attach the buffer to the texture bound on the caller's context.
    pub fn bind_to_texture(&self, thread: &RenderThreadInfo) -> Result<(), HostError> {
        let image = self.image.ok_or(HostError::InvalidState("no EGL image"))?;
        if thread.current_context().is_none() {
            return Err(HostError::InvalidState("no current context"));
        }
        self.host.image_target_texture(image)
    }

    /// Attach the buffer to the renderbuffer bound on the caller's context.
    pub fn bind_to_renderbuffer(&self, thread: &RenderThreadInfo) -> Result<(), HostError> {
        let image = self.image.ok_or(HostError::InvalidState("no EGL image"))?;
        if thread.current_context().is_none() {
            return Err(HostError::InvalidState("no current context"));
        }
        self.host.image_target_renderbuffer(image)
    }

    /// Bind the primary texture for sampling on the current context and
    /// return it.
    pub fn bind_for_sampling(&self) -> GlTexture {
        self.host.bind_texture(Some(self.texture));
        self.texture
    }
}

impl Drop for ColorBuffer {
    fn drop(&mut self) {
        let _scope = match self.private.bind() {
            Ok(scope) => scope,
            Err(e) => {
                warn!("leaking color buffer {}x{}: {e}", self.width, self.height);
                return;
            }
        };
        for image in [self.image, self.blit_image].into_iter().flatten() {
            self.host.destroy_image(image);
        }
        if let Some(fb) = self.framebuffer.get_mut().take() {
            self.host.delete_framebuffer(fb);
        }
        self.host.delete_texture(self.texture);
        self.host.delete_texture(self.blit_texture);
        debug!("released color buffer {}x{}", self.width, self.height);
    }
}

impl std::fmt::Debug for ColorBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColorBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("texture", &self.texture)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::emulated::EmulatedHost;
    use crate::host::{GlesApi, HostBinding, HostConfig};
    use crate::renderer::draw::{BLIT_FRAGMENT_SHADER, BLIT_VERTEX_SHADER};

    struct Fixture {
        host: Arc<EmulatedHost>,
        private: Arc<PrivateContext>,
        program: GlProgram,
    }

    fn fixture() -> Fixture {
        let host = Arc::new(EmulatedHost::new());
        host.initialize().unwrap();
        let ctx = host.create_context(HostConfig(0), None, GlesApi::V2).unwrap();
        let pbuf = host.create_pbuffer(HostConfig(0), 1, 1).unwrap();
        let driver: Arc<dyn HostDriver> = host.clone();
        let private = Arc::new(PrivateContext::new(driver, ctx, Some(pbuf)));
        let program = {
            let _scope = private.bind().unwrap();
            host.create_program(BLIT_VERTEX_SHADER, BLIT_FRAGMENT_SHADER).unwrap()
        };
        Fixture {
            host,
            private,
            program,
        }
    }

    fn buffer(f: &Fixture, w: u32, h: u32) -> ColorBuffer {
        ColorBuffer::create(f.private.clone(), f.program, w, h, PixelFormat::Rgba, true).unwrap()
    }

    #[test]
    fn update_then_read_is_exact() {
        let f = fixture();
        let cb = buffer(&f, 4, 2);
        let pixels: Vec<u8> = (0..32).collect();
        cb.sub_update(Region::sized(4, 2), PixelLayout::RGBA8, &pixels)
            .unwrap();
        let mut out = vec![0u8; 32];
        cb.read_pixels(Region::sized(4, 2), PixelLayout::RGBA8, &mut out)
            .unwrap();
        assert_eq!(out, pixels);
        assert!(f.host.current().is_unbound());
    }

    #[test]
    fn starts_zero_filled() {
        let f = fixture();
        let cb = buffer(&f, 2, 2);
        let mut out = vec![0xAAu8; 16];
        cb.read_pixels(Region::sized(2, 2), PixelLayout::RGBA8, &mut out)
            .unwrap();
        assert!(out.iter().all(|b| *b == 0));
    }

    #[test]
    fn drop_releases_textures_and_images() {
        let f = fixture();
        let cb = buffer(&f, 2, 2);
        let mut out = vec![0u8; 16];
        cb.read_pixels(Region::sized(2, 2), PixelLayout::RGBA8, &mut out)
            .unwrap();
        assert_eq!(f.host.live_textures(), 2);
        assert_eq!(f.host.live_images(), 2);
        assert_eq!(f.host.live_framebuffers(), 1);
        drop(cb);
        assert_eq!(f.host.live_textures(), 0);
        assert_eq!(f.host.live_images(), 0);
        assert_eq!(f.host.live_framebuffers(), 0);
    }

    #[test]
    fn binding_needs_a_current_context() {
        let f = fixture();
        let cb = buffer(&f, 2, 2);
        let thread = RenderThreadInfo::new();
        assert!(cb.bind_to_texture(&thread).is_err());
        assert!(cb.bind_to_renderbuffer(&thread).is_err());
        assert!(cb.blit_from_current_read_buffer(&thread).is_err());
    }

    #[test]
    fn no_images_when_unsupported() {
        let f = fixture();
        let cb = ColorBuffer::create(f.private.clone(), f.program, 2, 2, PixelFormat::Rgb, false).unwrap();
        assert!(!cb.has_image());
        assert_eq!(f.host.live_images(), 0);
        let thread = RenderThreadInfo::new();
        assert_eq!(
            cb.bind_to_texture(&thread),
            Err(HostError::InvalidState("no EGL image"))
        );
    }

    #[test]
    fn sampling_binds_the_primary_texture() {
        let f = fixture();
        let cb = buffer(&f, 2, 2);
        let _scope = f.private.bind().unwrap();
        assert_eq!(cb.bind_for_sampling(), cb.texture());
        assert_eq!(f.host.bound_texture(), Some(cb.texture()));
    }

    #[test]
    fn restores_guest_binding() {
        let f = fixture();
        let guest = f.host.create_context(HostConfig(0), None, GlesApi::V2).unwrap();
        let surface = f.host.create_pbuffer(HostConfig(0), 2, 2).unwrap();
        let binding = HostBinding::new(guest, Some(surface), Some(surface));
        f.host.make_current(binding).unwrap();
        let cb = buffer(&f, 2, 2);
        cb.sub_update(Region::sized(1, 1), PixelLayout::RGBA8, &[1, 2, 3, 4])
            .unwrap();
        assert_eq!(f.host.current(), binding);
    }
}
