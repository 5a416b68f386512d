//! Per-thread guest binding.
//!
//! Models what a decode thread has made current through `MakeCurrent`,
//! holding strong references so a bound context or surface outlives a
//! concurrent destroy until the thread lets go of it.

use std::sync::Arc;

use crate::handle::{ContextHandle, SurfaceHandle};
use crate::renderer::{RenderContext, WindowSurface};

// ── ThreadBinding ────────────────────────────────────────────────

/// The guest binding of one decode thread.
///
/// ```text
///  Unbound ──bind──► Bound(ctx, draw, read) ──bind──► Bound(...)
///     ▲                        │
///     └────────release─────────┘
/// ```
#[derive(Debug, Clone, Default)]
pub enum ThreadBinding {
    /// Nothing current. Initial and terminal state.
    #[default]
    Unbound,

    /// A context with its draw and read surfaces.
    Bound {
        context: Arc<RenderContext>,
        context_handle: ContextHandle,
        draw: Arc<WindowSurface>,
        draw_handle: SurfaceHandle,
        read: Arc<WindowSurface>,
        read_handle: SurfaceHandle,
    },
}

impl std::fmt::Display for ThreadBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unbound => write!(f, "Unbound"),
            Self::Bound {
                context_handle,
                draw_handle,
                read_handle,
                ..
            } => write!(f, "Bound({context_handle}, {draw_handle}, {read_handle})"),
        }
    }
}

impl ThreadBinding {
    pub fn is_bound(&self) -> bool {
        matches!(self, Self::Bound { .. })
    }

    pub fn context(&self) -> Option<&Arc<RenderContext>> {
        match self {
            Self::Bound { context, .. } => Some(context),
            Self::Unbound => None,
        }
    }

    pub fn context_handle(&self) -> Option<ContextHandle> {
        match self {
            Self::Bound { context_handle, .. } => Some(*context_handle),
            Self::Unbound => None,
        }
    }

    /// `(draw, read)` surfaces, if bound.
    pub fn surfaces(&self) -> Option<(&Arc<WindowSurface>, &Arc<WindowSurface>)> {
        match self {
            Self::Bound { draw, read, .. } => Some((draw, read)),
            Self::Unbound => None,
        }
    }

    pub fn surface_handles(&self) -> Option<(SurfaceHandle, SurfaceHandle)> {
        match self {
            Self::Bound {
                draw_handle,
                read_handle,
                ..
            } => Some((*draw_handle, *read_handle)),
            Self::Unbound => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Replace the binding. Valid from any state.
    pub fn bind(
        &mut self,
        context: (ContextHandle, Arc<RenderContext>),
        draw: (SurfaceHandle, Arc<WindowSurface>),
        read: (SurfaceHandle, Arc<WindowSurface>),
    ) {
        *self = Self::Bound {
            context_handle: context.0,
            context: context.1,
            draw_handle: draw.0,
            draw: draw.1,
            read_handle: read.0,
            read: read.1,
        };
    }

    /// Return to `Unbound`, handing back the previous binding.
    pub fn release(&mut self) -> ThreadBinding {
        std::mem::take(self)
    }
}
