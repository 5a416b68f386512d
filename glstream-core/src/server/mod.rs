//! Accept loop and decode-thread lifecycle.
//!
//! The server accepts on a Tokio listener, reads each client's flags word
//! on a task of its own, and hands the connection to a dedicated
//! [`RenderThread`]. Finished threads are reaped on every accept; shutdown
//! force-stops and joins the rest off the async workers.

pub mod thread;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use thread::{RenderThread, ResourceLock};

use crate::decoder::RenderEnv;
use crate::error::GlsError;
use crate::flags::ClientFlags;
use crate::network::{DEFAULT_READ_BUFFER, MAX_READ_BUFFER, PendingClient, ReadBuffer, RenderListener};
use crate::task::RenderThreadPool;

/// How long a fresh connection may take to send its flags word.
const FLAGS_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    /// Initial receive buffer per connection.
    pub read_buffer: usize,
    /// Receive buffer cap; larger frames are a protocol fault.
    pub max_read_buffer: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            read_buffer: DEFAULT_READ_BUFFER,
            max_read_buffer: MAX_READ_BUFFER,
        }
    }
}

// ── RenderServer ─────────────────────────────────────────────────

pub struct RenderServer {
    listener: RenderListener,
    env: RenderEnv,
    options: ServerOptions,
    lock: ResourceLock,
    running: Arc<AtomicBool>,
}

impl RenderServer {
    pub fn new(listener: RenderListener, env: RenderEnv, options: ServerOptions) -> Self {
        Self {
            listener,
            env,
            options,
            lock: ResourceLock::default(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an outside running flag, so whoever owns it can stop the
    /// accept loop.
    pub fn with_stop_handle(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    /// Clearing the flag stops the accept loop.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept guests until stopped or a client asks the server to exit.
    pub async fn run(&self) -> Result<(), GlsError> {
        self.running.store(true, Ordering::SeqCst);
        info!("render server listening on {}", self.listener.label());

        let mut pool = RenderThreadPool::new();
        let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();
        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                accept = self.listener.accept() => {
                    let reaped = pool.reap();
                    if reaped > 0 {
                        debug!("reaped {reaped} render threads, {} live", pool.len());
                    }
                    match accept {
                        Ok(pending) => {
                            tokio::spawn(Self::handshake(pending, ready_tx.clone()));
                        }
                        Err(e) => warn!("accept error: {e}"),
                    }
                }
                Some((pending, flags)) = ready_rx.recv() => {
                    if flags.contains(ClientFlags::EXIT_SERVER) {
                        info!("client requested server exit");
                        break;
                    }
                    if let Err(e) = self.start_thread(&mut pool, pending) {
                        warn!("cannot start render thread: {e}");
                    }
                }
                _ = Self::wait_for_stop(&self.running) => break,
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("stopping {} render threads", pool.len());
        let joined = tokio::task::spawn_blocking(move || pool.shutdown()).await;
        if let Err(e) = joined {
            warn!("render thread shutdown failed: {e}");
        }
        info!("render server stopped");
        Ok(())
    }

    /// Read the flags word of a fresh connection and queue it for the
    /// accept loop.
    async fn handshake(mut pending: PendingClient, ready: mpsc::UnboundedSender<(PendingClient, ClientFlags)>) {
        match tokio::time::timeout(FLAGS_TIMEOUT, pending.read_flags()).await {
            Ok(Ok(flags)) => {
                let _ = ready.send((pending, flags));
            }
            Ok(Err(e)) => warn!("client went away before its flags: {e}"),
            Err(_) => warn!("client sent no flags within {FLAGS_TIMEOUT:?}"),
        }
    }

    fn start_thread(&self, pool: &mut RenderThreadPool, pending: PendingClient) -> std::io::Result<u64> {
        let stream = pending.into_std()?;
        let stop = stream.stop_handle()?;
        let label = stream.peer_label();
        let buffer = ReadBuffer::new(self.options.read_buffer, self.options.max_read_buffer);
        let worker = RenderThread::new(self.env.clone(), self.lock.clone(), stream, stop.clone(), buffer);
        let id = pool.spawn(label.clone(), stop, move || worker.run())?;
        debug!("render thread {id} serves {label}");
        Ok(id)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Resolves once `running` is cleared.
    async fn wait_for_stop(running: &Arc<AtomicBool>) {
        loop {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

impl std::fmt::Debug for RenderServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderServer")
            .field("listener", &self.listener.label())
            .field("options", &self.options)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::testing::Fixture;

    async fn server() -> RenderServer {
        let listener = RenderListener::bind_tcp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        RenderServer::new(listener, Fixture::new().env, ServerOptions::default())
    }

    #[tokio::test]
    async fn server_creates_stopped() {
        let srv = server().await;
        assert!(!srv.is_running());
        assert!(srv.local_addr().is_some());
    }

    #[tokio::test]
    async fn stop_handle_works() {
        let srv = Arc::new(server().await);
        let handle = srv.stop_handle();
        let task = {
            let srv = srv.clone();
            tokio::spawn(async move { srv.run().await })
        };
        while !handle.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(srv.is_running());
        srv.stop();
        task.await.unwrap().unwrap();
        assert!(!srv.is_running());
    }
}
