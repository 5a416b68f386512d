//! Blocking client streams served by decode threads.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// ── RenderStream ─────────────────────────────────────────────────

/// A connected guest, over TCP loopback or a Unix socket.
#[derive(Debug)]
pub enum RenderStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl RenderStream {
    /// Clone the underlying socket handle.
    pub fn try_clone(&self) -> std::io::Result<Self> {
        match self {
            Self::Tcp(s) => s.try_clone().map(Self::Tcp),
            #[cfg(unix)]
            Self::Unix(s) => s.try_clone().map(Self::Unix),
        }
    }

    /// Shut both directions down, waking any blocked reader.
    pub fn shutdown(&self) -> std::io::Result<()> {
        match self {
            Self::Tcp(s) => s.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Self::Unix(s) => s.shutdown(Shutdown::Both),
        }
    }

    /// Human-readable peer description for logs.
    pub fn peer_label(&self) -> String {
        match self {
            Self::Tcp(s) => s
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "tcp:?".into()),
            #[cfg(unix)]
            Self::Unix(_) => "unix".into(),
        }
    }

    /// Handle that can stop a thread blocked reading this stream.
    pub fn stop_handle(&self) -> std::io::Result<StopHandle> {
        Ok(StopHandle {
            stream: Arc::new(self.try_clone()?),
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl Read for RenderStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Self::Unix(s) => s.read(buf),
        }
    }
}

impl Write for RenderStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Self::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Self::Unix(s) => s.flush(),
        }
    }
}

// ── StopHandle ───────────────────────────────────────────────────

/// Cooperative cancellation for one decode thread.
///
/// `force_stop` raises the flag and shuts the socket down so the
/// blocking read returns 0.
#[derive(Debug, Clone)]
pub struct StopHandle {
    stream: Arc<RenderStream>,
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn force_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Err(e) = self.stream.shutdown() {
            tracing::debug!("shutdown after force stop: {e}");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn force_stop_unblocks_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();

        let mut stream = RenderStream::Tcp(server);
        let stop = stream.stop_handle().unwrap();

        let reader = std::thread::spawn(move || {
            let mut buf = [0u8; 16];
            stream.read(&mut buf).unwrap_or(0)
        });

        std::thread::sleep(std::time::Duration::from_millis(50));
        stop.force_stop();
        assert!(stop.is_stopped());
        assert_eq!(reader.join().unwrap(), 0);
    }
}
