//! Layer compositing.
//!
//! The guest posts one [`Renderable`] per visible layer and then submits
//! the frame. A [`ComposerStrategy`] decides which host window each layer
//! belongs to, and the [`LayerComposer`] asks the [`LayerRenderer`] to draw
//! every window's list.
//!
//! ```text
//!  PostLayer ──► pending list ──► PostAllLayersDone
//!                                        │
//!                              ComposerStrategy::process_layers
//!                                        │
//!                      ┌─────────────────┼─────────────────┐
//!                   window A          window B           window C
//!                 draw(native, {0,0,w,h}, layers)  ... per window
//! ```

pub mod strategy;
pub mod window;

use std::sync::Arc;

use tracing::{debug, warn};

pub use strategy::{ComposerStrategy, MultiWindowStrategy, SingleWindowStrategy};
pub use window::{
    DisplayInfo, MultiWindowManager, SingleWindowManager, StackId, TaskId, Window, WindowManager,
    WindowState,
};

use crate::error::HostError;
use crate::geometry::{Mat4, Rect};
use crate::host::NativeWindow;
use crate::renderer::Renderer;

/// One layer of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Renderable {
    pub name: String,
    /// Raw color buffer handle holding the layer's pixels.
    pub buffer: u32,
    /// Destination in screen coordinates.
    pub screen: Rect,
    /// Source region inside the color buffer.
    pub crop: Rect,
    pub alpha: f32,
    pub transform: Mat4,
}

impl Renderable {
    pub fn new(name: impl Into<String>, buffer: u32, screen: Rect, crop: Rect) -> Self {
        Self {
            name: name.into(),
            buffer,
            screen,
            crop,
            alpha: 1.0,
            transform: Mat4::IDENTITY,
        }
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }
}

// ── Collaborator seams ───────────────────────────────────────────

/// Platform window backend.
pub trait NativeWindowFactory: Send + Sync {
    fn create_window(&self, frame: Rect) -> Result<NativeWindow, HostError>;
    fn update_window(&self, window: NativeWindow, frame: Rect);
    fn destroy_window(&self, window: NativeWindow);
}

/// Whatever turns a window's layer list into pixels.
pub trait LayerRenderer: Send + Sync {
    /// Register a window so it can be drawn into.
    fn attach_window(&self, native: NativeWindow) -> bool;
    fn detach_window(&self, native: NativeWindow);
    fn draw(&self, native: NativeWindow, frame: Rect, renderables: &[Renderable]) -> bool;
}

impl LayerRenderer for Renderer {
    fn attach_window(&self, native: NativeWindow) -> bool {
        self.create_native_window(native)
    }

    fn detach_window(&self, native: NativeWindow) {
        self.destroy_native_window(native)
    }

    fn draw(&self, native: NativeWindow, frame: Rect, renderables: &[Renderable]) -> bool {
        Renderer::draw(self, native, frame, renderables)
    }
}

// ── LayerComposer ────────────────────────────────────────────────

pub struct LayerComposer {
    renderer: Arc<dyn LayerRenderer>,
    strategy: Box<dyn ComposerStrategy>,
}

impl LayerComposer {
    pub fn new(renderer: Arc<dyn LayerRenderer>, strategy: Box<dyn ComposerStrategy>) -> Self {
        Self { renderer, strategy }
    }

    /// Draw one frame. Windows are visited in the order their first layer
    /// appears in `renderables`.
    pub fn submit_layers(&self, renderables: &[Renderable]) {
        let windows = self.strategy.process_layers(renderables);
        debug!(
            "composing {} layers into {} windows",
            renderables.len(),
            windows.len()
        );
        for (window, layers) in windows {
            let frame = window.frame();
            let target = Rect::from_size(frame.width(), frame.height());
            if !self.renderer.draw(window.native_handle(), target, &layers) {
                warn!("failed to draw task {} window", window.task());
            }
        }
    }
}

impl std::fmt::Debug for LayerComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerComposer").finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashSet;

    use parking_lot::Mutex;

    use super::*;

    /// Records every call instead of drawing.
    #[derive(Default)]
    pub struct RecordingRenderer {
        pub attached: Mutex<HashSet<NativeWindow>>,
        pub draws: Mutex<Vec<(NativeWindow, Rect, Vec<Renderable>)>>,
    }

    impl LayerRenderer for RecordingRenderer {
        fn attach_window(&self, native: NativeWindow) -> bool {
            self.attached.lock().insert(native);
            true
        }

        fn detach_window(&self, native: NativeWindow) {
            self.attached.lock().remove(&native);
        }

        fn draw(&self, native: NativeWindow, frame: Rect, renderables: &[Renderable]) -> bool {
            self.draws.lock().push((native, frame, renderables.to_vec()));
            true
        }
    }
}
