//! # glstream-server
//!
//! Process wrapper around `glstream-core`: loads the TOML configuration,
//! opens the host driver (system EGL, SwiftShader or the in-memory
//! emulated host), builds the renderer and compositor and serves guests
//! on a Unix or TCP socket.
//!
//! ## Modules
//!
//! - **config**: `ServerConfig` and its TOML sections
//! - **service**: `RenderService`, the stop-handle driven run loop
//! - **egl**: `EglHost`, EGL/GLESv2 resolved with `libloading`
//! - **window**: `HeadlessWindows`, the offscreen window backend

pub mod config;
pub mod egl;
pub mod service;
pub mod window;
