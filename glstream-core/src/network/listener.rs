//! Accepting side: Tokio listeners handing blocking streams to decode threads.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tokio::io::AsyncReadExt;

use crate::flags::ClientFlags;
use crate::network::stream::RenderStream;

/// Default Unix socket location for this process:
/// `$XDG_RUNTIME_DIR/glstream/qemu-gles-<pid>`, falling back to `/tmp`.
pub fn default_socket_path() -> PathBuf {
    let base = std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from("/tmp"));
    base.join("glstream")
        .join(format!("qemu-gles-{}", std::process::id()))
}

// ── RenderListener ───────────────────────────────────────────────

/// Listening socket for guest connections.
#[derive(Debug)]
pub enum RenderListener {
    Tcp(tokio::net::TcpListener),
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        path: PathBuf,
    },
}

impl RenderListener {
    pub async fn bind_tcp(addr: SocketAddr) -> std::io::Result<Self> {
        Ok(Self::Tcp(tokio::net::TcpListener::bind(addr).await?))
    }

    /// Bind a Unix socket, removing a stale socket file first.
    #[cfg(unix)]
    pub fn bind_unix(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if path.exists() {
            tracing::debug!("removing stale socket {}", path.display());
            std::fs::remove_file(path)?;
        }
        Ok(Self::Unix {
            listener: tokio::net::UnixListener::bind(path)?,
            path: path.to_path_buf(),
        })
    }

    /// TCP address, when listening on TCP.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(l) => l.local_addr().ok(),
            #[cfg(unix)]
            Self::Unix { .. } => None,
        }
    }

    /// Where the listener is reachable, for logs.
    pub fn label(&self) -> String {
        match self {
            Self::Tcp(l) => l
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "tcp:?".into()),
            #[cfg(unix)]
            Self::Unix { path, .. } => path.display().to_string(),
        }
    }

    pub async fn accept(&self) -> std::io::Result<PendingClient> {
        match self {
            Self::Tcp(l) => {
                let (stream, _) = l.accept().await?;
                stream.set_nodelay(true)?;
                Ok(PendingClient::Tcp(stream))
            }
            #[cfg(unix)]
            Self::Unix { listener, .. } => {
                let (stream, _) = listener.accept().await?;
                Ok(PendingClient::Unix(stream))
            }
        }
    }
}

impl Drop for RenderListener {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Self::Unix { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

// ── PendingClient ────────────────────────────────────────────────

/// An accepted connection whose client-flags word has not been read yet.
#[derive(Debug)]
pub enum PendingClient {
    Tcp(tokio::net::TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

impl PendingClient {
    /// Read the 4-byte client-flags word every connection starts with.
    pub async fn read_flags(&mut self) -> std::io::Result<ClientFlags> {
        let mut word = [0u8; 4];
        match self {
            Self::Tcp(s) => s.read_exact(&mut word).await?,
            #[cfg(unix)]
            Self::Unix(s) => s.read_exact(&mut word).await?,
        };
        Ok(ClientFlags::from_le_bytes(word))
    }

    /// Convert into a blocking stream for a decode thread.
    pub fn into_std(self) -> std::io::Result<RenderStream> {
        match self {
            Self::Tcp(s) => {
                let s = s.into_std()?;
                s.set_nonblocking(false)?;
                Ok(RenderStream::Tcp(s))
            }
            #[cfg(unix)]
            Self::Unix(s) => {
                let s = s.into_std()?;
                s.set_nonblocking(false)?;
                Ok(RenderStream::Unix(s))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn reads_client_flags() {
        let listener = RenderListener::bind_tcp("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut s = tokio::net::TcpStream::connect(addr).await.unwrap();
            s.write_all(&1u32.to_le_bytes()).await.unwrap();
            s
        });

        let mut pending = listener.accept().await.unwrap();
        let flags = pending.read_flags().await.unwrap();
        assert!(flags.contains(ClientFlags::EXIT_SERVER));
        let _client = client.await.unwrap();
        assert!(pending.into_std().is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_socket_file_is_removed_on_drop() {
        let path = std::env::temp_dir()
            .join(format!("glstream-test-{}", std::process::id()))
            .join("sock");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"stale").unwrap();

        let listener = RenderListener::bind_unix(&path).unwrap();
        assert!(path.exists());
        drop(listener);
        assert!(!path.exists());
    }

    #[test]
    fn default_path_ends_with_pid() {
        let path = default_socket_path();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name, format!("qemu-gles-{}", std::process::id()));
    }
}
