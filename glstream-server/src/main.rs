//! glstream render server entry point.
//!
//! ```text
//! glstream-server                       Serve with ./glstream.toml or defaults
//! glstream-server --config <path>       Load a custom config TOML
//! glstream-server --gen-config          Write default config to stdout
//! glstream-server --driver emulated     Override the host driver
//! glstream-server --single-window       Composite into one window
//! glstream-server --socket <path>       Listen on this Unix socket
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use glstream_server::config::{Driver, ServerConfig, Transport};
use glstream_server::service::RenderService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "glstream-server", about = "Host render server for guest GLES command streams")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "glstream.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Composite every task into a single window.
    #[arg(long)]
    single_window: bool,

    /// Host driver to render with.
    #[arg(long, value_enum)]
    driver: Option<Driver>,

    /// Unix socket to listen on.
    #[arg(long)]
    socket: Option<PathBuf>,
}

impl Cli {
    /// Command-line flags win over the file.
    fn apply(&self, config: &mut ServerConfig) {
        if self.single_window {
            config.renderer.single_window = true;
        }
        if let Some(driver) = self.driver {
            config.renderer.driver = driver;
        }
        if let Some(socket) = &self.socket {
            config.server.transport = Transport::Unix;
            config.server.socket_path = socket.display().to_string();
        }
    }
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ServerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ServerConfig::load(&cli.config);
    cli.apply(&mut config);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("glstream-server v{}", env!("CARGO_PKG_VERSION"));
    info!("driver: {:?}", config.renderer.driver);
    match config.server.transport {
        Transport::Unix => info!("socket: {}", config.socket_path().display()),
        Transport::Tcp => info!("tcp port: {}", config.server.tcp_port),
    }
    info!(
        "display: {}x{} @ {} dpi, {} Hz",
        config.display.width, config.display.height, config.display.dpi, config.display.refresh_rate
    );
    info!("mode: {}", if config.renderer.single_window { "single window" } else { "multi window" });

    let service = RenderService::new(config);
    let stop = service.stop_handle();

    let stop_clone = stop.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop_clone.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    if let Err(e) = service.run().await {
        error!("render service failed: {e}");
        return Err(e.into());
    }

    Ok(())
}
