//! Render service core logic.
//!
//! Builds the host backend, renderer and compositor from the
//! configuration, binds the listener and runs the render server until
//! stopped.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use glstream_core::compositor::{ComposerStrategy, LayerRenderer, WindowManager};
use glstream_core::{
    EmulatedHost, GlesDispatch, GlsError, HostDriver, LayerComposer, MultiWindowManager, MultiWindowStrategy,
    NativeWindowFactory, Rect, RenderEnv, RenderListener, RenderServer, Renderer, SingleWindowManager,
    SingleWindowStrategy,
};

use crate::config::{Driver, SWIFTSHADER_PATH_ENV, ServerConfig, Transport};
use crate::egl::EglHost;
use crate::window::HeadlessWindows;

// ── Render stack ─────────────────────────────────────────────────

/// The driver objects behind one renderer.
pub struct Backend {
    pub host: Arc<dyn HostDriver>,
    pub gles: Arc<dyn GlesDispatch>,
    pub windows: Arc<dyn NativeWindowFactory>,
}

impl Backend {
    /// Open the configured driver.
    pub fn open(config: &ServerConfig) -> Result<Self, GlsError> {
        let Some((egl, gles)) = config.renderer.libraries() else {
            info!("using the emulated host driver");
            let host = Arc::new(EmulatedHost::new());
            return Ok(Self {
                host: host.clone(),
                gles: host.clone(),
                windows: host,
            });
        };
        if config.renderer.driver == Driver::Swiftshader && std::env::var_os(SWIFTSHADER_PATH_ENV).is_none() {
            warn!("{SWIFTSHADER_PATH_ENV} is not set; looking for SwiftShader on the library path");
        }
        let windows = Arc::new(HeadlessWindows::new());
        let host = Arc::new(EglHost::load(&egl, &gles, windows.clone())?);
        Ok(Self {
            host: host.clone(),
            gles: host,
            windows,
        })
    }
}

/// Everything the decode threads share, plus the window manager a
/// platform layer feeds window state into.
pub struct RenderStack {
    pub env: RenderEnv,
    pub window_manager: Arc<dyn WindowManager>,
}

impl RenderStack {
    pub fn build(config: &ServerConfig, backend: Backend) -> Result<Self, GlsError> {
        let renderer = Arc::new(Renderer::new(backend.host, backend.gles, config.renderer_options())?);
        let display = Arc::new(config.display_info());
        let layer_renderer: Arc<dyn LayerRenderer> = renderer.clone();

        let (window_manager, strategy): (Arc<dyn WindowManager>, Box<dyn ComposerStrategy>) =
            if config.renderer.single_window {
                let frame = Rect::from_size(display.width() as i32, display.height() as i32);
                let wm = Arc::new(SingleWindowManager::new(frame, backend.windows, layer_renderer.clone())?);
                (wm.clone(), Box::new(SingleWindowStrategy::new(wm)))
            } else {
                warn!(
                    "multi-window mode draws nothing until a platform layer feeds window state; \
                     use --single-window to composite into one window"
                );
                let wm = Arc::new(MultiWindowManager::new(backend.windows, layer_renderer.clone()));
                (wm.clone(), Box::new(MultiWindowStrategy::new(wm)))
            };

        let composer = Arc::new(LayerComposer::new(layer_renderer, strategy));
        Ok(Self {
            env: RenderEnv {
                renderer,
                display,
                composer: Some(composer),
            },
            window_manager,
        })
    }
}

// ── RenderService ────────────────────────────────────────────────

/// The top-level render service.
pub struct RenderService {
    config: ServerConfig,
    running: Arc<AtomicBool>,
}

impl RenderService {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Obtain a handle that can be used to stop the service from another
    /// task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run the service until stopped.
    ///
    /// 1. Opens the host driver and builds the renderer and compositor.
    /// 2. Binds the guest listener.
    /// 3. Serves guests until `running` becomes `false` or a guest asks
    ///    the server to exit.
    pub async fn run(&self) -> Result<(), GlsError> {
        let backend = Backend::open(&self.config)?;
        let stack = RenderStack::build(&self.config, backend)?;
        let caps = stack.env.renderer.caps();
        info!("host EGL {}.{}", caps.egl_major, caps.egl_minor);

        let listener = self.bind().await?;
        let server = RenderServer::new(listener, stack.env, self.config.server_options())
            .with_stop_handle(self.stop_handle());
        server.run().await?;
        info!("render service stopped");
        Ok(())
    }

    async fn bind(&self) -> Result<RenderListener, GlsError> {
        let listener = match self.config.server.transport {
            Transport::Tcp => {
                let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.config.server.tcp_port));
                RenderListener::bind_tcp(addr).await?
            }
            #[cfg(unix)]
            Transport::Unix => RenderListener::bind_unix(&self.config.socket_path())?,
            #[cfg(not(unix))]
            Transport::Unix => return Err(GlsError::Startup("unix sockets are not available here".into())),
        };
        Ok(listener)
    }

    /// Signal the service to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

// ── Tests ────────────────────────────────────────────────────────
