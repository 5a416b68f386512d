//! Bit-flag words used on the wire and in EGL config attributes.

use bitflags::bitflags;

bitflags! {
    /// The 4-byte word every client sends before its first command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClientFlags: u32 {
        /// Ask the server to shut down instead of serving this connection.
        const EXIT_SERVER = 0x1;
    }
}

bitflags! {
    /// `EGL_SURFACE_TYPE` bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SurfaceType: i32 {
        const PBUFFER = 0x0001;
        const PIXMAP = 0x0002;
        const WINDOW = 0x0004;
    }
}

bitflags! {
    /// `EGL_RENDERABLE_TYPE` bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RenderableType: i32 {
        const OPENGL_ES = 0x0001;
        const OPENVG = 0x0002;
        const OPENGL_ES2 = 0x0004;
        const OPENGL = 0x0008;
    }
}

impl ClientFlags {
    /// Parse the little-endian flags word, keeping unknown bits.
    pub fn from_le_bytes(bytes: [u8; 4]) -> Self {
        Self::from_bits_retain(u32::from_le_bytes(bytes))
    }
}
