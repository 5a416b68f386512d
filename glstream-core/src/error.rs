//! Domain-specific error types for the render server.
//!
//! Connection-level failures return `Result<T, GlsError>` and end the
//! offending connection. Host driver failures are `HostError`; registry
//! operations log them and report a `false`/0 result to the guest instead.

use thiserror::Error;

/// The canonical error type for the render server.
#[derive(Debug, Error)]
pub enum GlsError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// A packet header could not be parsed.
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    /// The checksum suffix did not match the packet contents.
    #[error("checksum mismatch on opcode {opcode}")]
    ChecksumMismatch { opcode: u32 },

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// The checksum protocol version requested by the guest is not supported.
    #[error("unsupported checksum version: {0}")]
    UnsupportedVersion(u32),

    /// No decoder owns the opcode at the head of the stream.
    #[error("unknown opcode {0} at head of stream")]
    UnknownOpcode(u32),

    /// A packet violated framing rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    // ── Packet Errors ────────────────────────────────────────────
    /// A packet's declared size is smaller than its mandatory parts.
    #[error("invalid packet length for opcode {opcode}: {size} bytes")]
    InvalidPacketLength { opcode: u32, size: usize },

    /// The packet arguments ended before every field was read.
    #[error("truncated arguments for opcode {opcode}: needed {needed} more bytes")]
    TruncatedArguments { opcode: u32, needed: usize },

    /// A frame would not fit in the receive buffer even at its cap.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// An output buffer asked for more reply bytes than the server sends.
    #[error("output buffer too large for opcode {opcode}: {size} bytes (max {max})")]
    OutBufferTooLarge { opcode: u32, size: usize, max: usize },

    // ── Connection Errors ────────────────────────────────────────
    /// The socket layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    // ── Host Errors ──────────────────────────────────────────────
    /// The host driver failed in a way the connection cannot recover from.
    #[error("host error: {0}")]
    Host(#[from] HostError),

    /// Renderer initialization failed; fatal to the process.
    #[error("startup failure: {0}")]
    Startup(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── HostError ────────────────────────────────────────────────────

/// Typed error for calls into the host EGL/GLES driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// An EGL call failed; carries the `eglGetError` code.
    #[error("{call} failed: {code:#06x}")]
    Egl { call: &'static str, code: i32 },

    /// A GL object could not be created or completed.
    #[error("{call} failed: {reason}")]
    Gl { call: &'static str, reason: String },

    /// The driver library could not be opened.
    #[error("cannot load {library}: {reason}")]
    LibraryLoad { library: String, reason: String },

    /// A required entry point is missing from the driver library.
    #[error("missing symbol {0}")]
    MissingSymbol(String),

    /// The backend does not implement this call.
    #[error("unsupported host call: {0}")]
    Unsupported(&'static str),

    /// The object is not in a state that allows the operation.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for GlsError {
    fn from(s: String) -> Self {
        GlsError::Other(s)
    }
}

impl From<&str> for GlsError {
    fn from(s: &str) -> Self {
        GlsError::Other(s.to_string())
    }
}

impl GlsError {
    /// Whether this error must terminate the connection that raised it.
    ///
    /// Every variant except a host error is a stream- or socket-level
    /// failure; host errors surfacing here come from pass-through calls
    /// and are survivable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, GlsError::Host(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = GlsError::ChecksumMismatch { opcode: 10017 };
        assert!(e.to_string().contains("checksum"));
        assert!(e.to_string().contains("10017"));

        let e = GlsError::FrameTooLarge {
            size: 1000,
            max: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));
    }

    #[test]
    fn host_error_formats_code() {
        let e = HostError::Egl {
            call: "eglMakeCurrent",
            code: 0x3002,
        };
        assert_eq!(e.to_string(), "eglMakeCurrent failed: 0x3002");
    }

    #[test]
    fn from_string() {
        let e: GlsError = "something broke".into();
        assert!(matches!(e, GlsError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: GlsError = io_err.into();
        assert!(matches!(e, GlsError::Connection(_)));
        assert!(e.is_fatal());
    }

    #[test]
    fn host_errors_are_not_fatal() {
        let e: GlsError = HostError::Unsupported("glFoo").into();
        assert!(!e.is_fatal());
    }
}
