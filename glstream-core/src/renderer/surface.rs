//! Guest window surfaces.
//!
//! A guest on-screen surface is a host pbuffer the size of the color
//! buffer attached to it. Swapping copies the pbuffer into that buffer.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::binding::ScopedBinding;
use super::color_buffer::ColorBuffer;
use super::context::RenderContext;
use crate::error::HostError;
use crate::host::{HostBinding, HostConfig, HostDriver, HostSurface};
use crate::state::RenderThreadInfo;

/// Which side of a binding a context was attached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceRole {
    Draw,
    Read,
    ReadDraw,
}

struct SurfaceState {
    surface: HostSurface,
    width: u32,
    height: u32,
    color_buffer: Option<Arc<ColorBuffer>>,
    draw_context: Weak<RenderContext>,
    read_context: Weak<RenderContext>,
}

pub struct WindowSurface {
    host: Arc<dyn HostDriver>,
    config: HostConfig,
    state: Mutex<SurfaceState>,
}

impl WindowSurface {
    pub fn create(host: Arc<dyn HostDriver>, config: HostConfig, width: u32, height: u32) -> Result<Self, HostError> {
        let surface = host.create_pbuffer(config, width, height)?;
        Ok(Self {
            host,
            config,
            state: Mutex::new(SurfaceState {
                surface,
                width,
                height,
                color_buffer: None,
                draw_context: Weak::new(),
                read_context: Weak::new(),
            }),
        })
    }

    pub fn host_surface(&self) -> HostSurface {
        self.state.lock().surface
    }

    pub fn config(&self) -> HostConfig {
        self.config
    }

    pub fn size(&self) -> (u32, u32) {
        let state = self.state.lock();
        (state.width, state.height)
    }

    pub fn color_buffer(&self) -> Option<Arc<ColorBuffer>> {
        self.state.lock().color_buffer.clone()
    }

    pub fn draw_context(&self) -> Option<Arc<RenderContext>> {
        self.state.lock().draw_context.upgrade()
    }

    pub fn read_context(&self) -> Option<Arc<RenderContext>> {
        self.state.lock().read_context.upgrade()
    }

    /// Attach `cb`, resizing the pbuffer to match it.
    pub fn set_color_buffer(&self, cb: Arc<ColorBuffer>) -> Result<(), HostError> {
        let mut state = self.state.lock();
        let (width, height) = (cb.width(), cb.height());
        state.color_buffer = Some(cb);
        self.resize(&mut state, width, height)
    }

    /// Record `context` as bound through `role`; `None` clears the role.
    pub fn bind_context(&self, context: Option<&Arc<RenderContext>>, role: SurfaceRole) {
        let weak = context.map(Arc::downgrade).unwrap_or_default();
        let mut state = self.state.lock();
        match role {
            SurfaceRole::Draw => state.draw_context = weak,
            SurfaceRole::Read => state.read_context = weak,
            SurfaceRole::ReadDraw => {
                state.draw_context = weak.clone();
                state.read_context = weak;
            }
        }
    }

    /// Replace the pbuffer with one of the new size.
    ///
    /// When the calling thread has the old pbuffer current it is unbound
    /// first and rebound to the replacement afterwards.
    fn resize(&self, state: &mut SurfaceState, width: u32, height: u32) -> Result<(), HostError> {
        if state.width == width && state.height == height {
            return Ok(());
        }
        let old = state.surface;
        let current = self.host.current();
        let in_use = current.draw == Some(old) || current.read == Some(old);
        if in_use {
            self.host.make_current(HostBinding::UNBOUND)?;
        }

        let new = match self.host.create_pbuffer(self.config, width, height) {
            Ok(surface) => surface,
            Err(e) => {
                if in_use {
                    self.host.make_current(current)?;
                }
                return Err(e);
            }
        };
        self.host.destroy_surface(old);
        state.surface = new;
        state.width = width;
        state.height = height;
        debug!("resized window surface to {width}x{height}");

        if in_use {
            let swap = |s: Option<HostSurface>| s.map(|s| if s == old { new } else { s });
            self.host.make_current(HostBinding {
                context: current.context,
                draw: swap(current.draw),
                read: swap(current.read),
            })?;
        }
        Ok(())
    }

    /// Copy the pbuffer into the attached color buffer.
    ///
    /// Fails without an attached buffer of the same size or a live draw
    /// context.
    pub fn flush(&self, thread: &RenderThreadInfo) -> Result<(), HostError> {
        let (cb, context, surface) = {
            let state = self.state.lock();
            let cb = state
                .color_buffer
                .clone()
                .ok_or(HostError::InvalidState("no color buffer attached"))?;
            if state.width == 0 || state.height == 0 {
                return Err(HostError::InvalidState("empty surface"));
            }
            if cb.width() != state.width || cb.height() != state.height {
                return Err(HostError::InvalidState("color buffer size mismatch"));
            }
            let context = state
                .draw_context
                .upgrade()
                .ok_or(HostError::InvalidState("no draw context bound"))?;
            (cb, context, state.surface)
        };

        let target = HostBinding::new(context.host_context(), Some(surface), Some(surface));
        let _scope = ScopedBinding::bind(&*self.host, target)?;
        cb.blit_from_current_read_buffer(thread)
    }
}

impl Drop for WindowSurface {
    fn drop(&mut self) {
        self.host.destroy_surface(self.state.get_mut().surface);
    }
}

impl std::fmt::Debug for WindowSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WindowSurface")
            .field("surface", &state.surface)
            .field("width", &state.width)
            .field("height", &state.height)
            .finish()
    }
}
