//! Configuration for the render server.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use glstream_core::network::{DEFAULT_READ_BUFFER, MAX_READ_BUFFER};
use glstream_core::{DisplayInfo, RendererOptions, ServerOptions};

/// Environment variable naming the SwiftShader library directory.
pub const SWIFTSHADER_PATH_ENV: &str = "SWIFTSHADER_PATH";

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listening socket settings.
    pub server: ListenConfig,
    /// Host driver selection.
    pub renderer: RendererConfig,
    /// The virtual display reported to the guest.
    pub display: DisplayConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Unix,
    Tcp,
}

/// Where guests connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub transport: Transport,
    /// Unix socket path. Empty picks a per-process path under the runtime
    /// directory.
    pub socket_path: String,
    /// TCP port on 127.0.0.1.
    pub tcp_port: u16,
    /// Initial receive buffer per connection, in bytes.
    pub read_buffer: usize,
    /// Largest a receive buffer may grow, in bytes.
    pub max_read_buffer: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// The system EGL/GLES libraries.
    Host,
    /// SwiftShader from `SWIFTSHADER_PATH`.
    Swiftshader,
    /// In-memory driver, no GPU needed.
    Emulated,
}

/// Host driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub driver: Driver,
    /// EGL library override. Empty uses the driver's default.
    pub egl_library: String,
    /// GLESv2 library override. Empty uses the driver's default.
    pub gles_library: String,
    /// Refuse to start when the driver cannot share textures through
    /// EGLImage.
    pub require_egl_image: bool,
    /// Composite every task into one window instead of one per task.
    pub single_window: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
    pub refresh_rate: u32,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Unix,
            socket_path: String::new(),
            tcp_port: 22468,
            read_buffer: DEFAULT_READ_BUFFER,
            max_read_buffer: MAX_READ_BUFFER,
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            driver: Driver::Host,
            egl_library: String::new(),
            gles_library: String::new(),
            require_egl_image: true,
            single_window: false,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            dpi: 120,
            refresh_rate: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ServerConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn server_options(&self) -> ServerOptions {
        let read_buffer = self.server.read_buffer.max(64);
        ServerOptions {
            read_buffer,
            max_read_buffer: self.server.max_read_buffer.max(read_buffer),
        }
    }

    pub fn renderer_options(&self) -> RendererOptions {
        RendererOptions {
            require_egl_image: self.renderer.require_egl_image,
        }
    }

    pub fn display_info(&self) -> DisplayInfo {
        let d = &self.display;
        DisplayInfo::new(d.width.max(1), d.height.max(1), d.dpi, d.refresh_rate.max(1))
    }

    /// The Unix socket to listen on.
    pub fn socket_path(&self) -> PathBuf {
        if self.server.socket_path.is_empty() {
            glstream_core::default_socket_path()
        } else {
            PathBuf::from(&self.server.socket_path)
        }
    }
}

impl RendererConfig {
    /// EGL and GLESv2 library locations for the configured driver, or
    /// `None` for the emulated driver.
    pub fn libraries(&self) -> Option<(PathBuf, PathBuf)> {
        let (egl, gles) = match self.driver {
            Driver::Emulated => return None,
            Driver::Host => (PathBuf::from("libEGL.so.1"), PathBuf::from("libGLESv2.so.2")),
            Driver::Swiftshader => {
                let dir = std::env::var_os(SWIFTSHADER_PATH_ENV)
                    .map(PathBuf::from)
                    .unwrap_or_default();
                (dir.join("libEGL.so"), dir.join("libGLESv2.so"))
            }
        };
        let pick = |custom: &str, default: PathBuf| {
            if custom.is_empty() { default } else { PathBuf::from(custom) }
        };
        Some((pick(&self.egl_library, egl), pick(&self.gles_library, gles)))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&ServerConfig::default()).unwrap();
        assert!(text.contains("transport = \"unix\""));
        assert!(text.contains("driver = \"host\""));
        assert!(text.contains("refresh_rate"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let cfg: ServerConfig = toml::from_str(
            "[server]\ntransport = \"tcp\"\n\n[renderer]\ndriver = \"emulated\"\n",
        )
        .unwrap();
        assert_eq!(cfg.server.transport, Transport::Tcp);
        assert_eq!(cfg.server.tcp_port, 22468);
        assert_eq!(cfg.renderer.driver, Driver::Emulated);
        assert!(cfg.renderer.require_egl_image);
        assert_eq!(cfg.display.width, 1280);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = ServerConfig::load(Path::new("/nonexistent/glstream.toml"));
        assert_eq!(cfg.server.transport, Transport::Unix);
    }

    #[test]
    fn buffer_sizes_are_clamped() {
        let mut cfg = ServerConfig::default();
        cfg.server.read_buffer = 1 << 20;
        cfg.server.max_read_buffer = 1024;
        let opts = cfg.server_options();
        assert_eq!(opts.read_buffer, 1 << 20);
        assert_eq!(opts.max_read_buffer, 1 << 20);
    }

    #[test]
    fn library_selection() {
        let mut r = RendererConfig {
            driver: Driver::Emulated,
            ..RendererConfig::default()
        };
        assert!(r.libraries().is_none());

        r.driver = Driver::Host;
        let (egl, gles) = r.libraries().unwrap();
        assert_eq!(egl, PathBuf::from("libEGL.so.1"));
        assert_eq!(gles, PathBuf::from("libGLESv2.so.2"));

        r.egl_library = "/opt/gl/libEGL.so".into();
        assert_eq!(r.libraries().unwrap().0, PathBuf::from("/opt/gl/libEGL.so"));
    }

    #[test]
    fn explicit_socket_path_wins() {
        let mut cfg = ServerConfig::default();
        cfg.server.socket_path = "/tmp/gls.sock".into();
        assert_eq!(cfg.socket_path(), PathBuf::from("/tmp/gls.sock"));
    }
}
