//! # glstream-core
//!
//! Host side of a guest GLES render pipe: decodes the command streams an
//! Android guest sends over a socket and executes them against a host EGL
//! and GLES driver.
//!
//! This crate contains:
//! - **Wire**: `PacketHeader`, checksum negotiation, argument codec
//! - **Decoders**: GLESv1, GLESv2 and the control plane over one buffer
//! - **Renderer**: handle registry for contexts, surfaces, color buffers
//!   and client images, plus the per-thread binding state machine
//! - **Compositor**: maps posted layers to host windows and draws them
//! - **Host**: the `HostDriver`/`GlesDispatch` seam and an in-memory
//!   `EmulatedHost`
//! - **Server**: Tokio accept loop feeding one decode thread per guest
//! - **Error**: `GlsError` and `HostError`, `thiserror`-based

pub mod checksum;
pub mod codec;
pub mod compositor;
pub mod decoder;
pub mod error;
pub mod flags;
pub mod geometry;
pub mod handle;
pub mod header;
pub mod host;
pub mod network;
pub mod renderer;
pub mod server;
pub mod state;
pub mod task;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use checksum::{CHECKSUM_EXTENSION, ChecksumCalculator, ChecksumEncoder};
pub use codec::{ArgReader, PacketBuilder};
pub use compositor::{
    DisplayInfo, LayerComposer, LayerRenderer, MultiWindowManager, MultiWindowStrategy,
    NativeWindowFactory, Renderable, SingleWindowManager, SingleWindowStrategy, WindowManager,
    WindowState,
};
pub use decoder::{ControlDecoder, Decoder, Gles1Decoder, Gles2Decoder, RcOpcode, RenderEnv};
pub use error::{GlsError, HostError};
pub use flags::ClientFlags;
pub use geometry::{Mat4, Rect};
pub use handle::{ColorBufferHandle, ContextHandle, ImageHandle, SurfaceHandle};
pub use header::{HEADER_SIZE, PacketHeader};
pub use host::emulated::EmulatedHost;
pub use host::{GlesApi, GlesDispatch, HostDriver, NativeWindow};
pub use network::{ReadBuffer, RenderListener, RenderStream, StopHandle, default_socket_path};
pub use renderer::{Renderer, RendererOptions};
pub use server::{RenderServer, ServerOptions};
pub use state::{RenderThreadInfo, ThreadBinding};
pub use task::{RenderThreadPool, TaskEvent};
