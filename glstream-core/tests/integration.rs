//! Integration tests: a guest driving the render server over a real TCP
//! connection on localhost, against the in-memory host driver.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use glstream_core::compositor::{LayerComposer, SingleWindowManager, SingleWindowStrategy};
use glstream_core::host::consts::gl;
use glstream_core::{
    ChecksumEncoder, DisplayInfo, EmulatedHost, GlsError, PacketBuilder, RcOpcode, Rect,
    RenderEnv, RenderListener, RenderServer, Renderer, RendererOptions, ServerOptions,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_test::assert_ok;

// ── Helpers ──────────────────────────────────────────────────────

const TIMEOUT: Duration = Duration::from_secs(5);

fn env(host: &Arc<EmulatedHost>) -> RenderEnv {
    let renderer = Renderer::new(host.clone(), host.clone(), RendererOptions::default()).unwrap();
    RenderEnv {
        renderer: Arc::new(renderer),
        display: Arc::new(DisplayInfo::default()),
        composer: None,
    }
}

/// Start a server on an OS-assigned port.
async fn start(env: RenderEnv) -> (Arc<RenderServer>, SocketAddr, JoinHandle<Result<(), GlsError>>) {
    let listener = RenderListener::bind_tcp("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let server = Arc::new(RenderServer::new(listener, env, ServerOptions::default()));
    let addr = server.local_addr().unwrap();
    let task = tokio::spawn({
        let server = server.clone();
        async move { server.run().await }
    });
    (server, addr, task)
}

/// Poll `cond` until it holds or the timeout passes.
async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// The guest end of one connection.
struct Guest {
    stream: TcpStream,
    enc: ChecksumEncoder,
}

impl Guest {
    async fn connect(addr: SocketAddr, flags: u32) -> Self {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&flags.to_le_bytes()).await.unwrap();
        Self {
            stream,
            enc: ChecksumEncoder::new(0),
        }
    }

    async fn send(&mut self, builder: PacketBuilder) {
        let bytes = builder.build(&mut self.enc);
        self.stream.write_all(&bytes).await.unwrap();
    }

    /// Send a call and read its `reply_len`-byte reply plus checksum.
    async fn call(&mut self, builder: PacketBuilder, reply_len: usize) -> Vec<u8> {
        self.send(builder).await;
        let mut body = vec![0u8; reply_len];
        let mut suffix = vec![0u8; self.enc.suffix_size()];
        tokio::time::timeout(TIMEOUT, async {
            self.stream.read_exact(&mut body).await.unwrap();
            self.stream.read_exact(&mut suffix).await.unwrap();
        })
        .await
        .expect("timeout");
        assert!(self.enc.check_reply(&body, &suffix), "bad reply checksum");
        body
    }

    async fn call_i32(&mut self, builder: PacketBuilder) -> i32 {
        let reply = self.call(builder, 4).await;
        i32::from_le_bytes([reply[0], reply[1], reply[2], reply[3]])
    }

    /// Whether the server closed the connection.
    async fn closed(&mut self) -> bool {
        let mut byte = [0u8; 1];
        match tokio::time::timeout(TIMEOUT, self.stream.read(&mut byte)).await {
            Ok(Ok(0)) | Ok(Err(_)) => true,
            _ => false,
        }
    }
}

fn rc(op: RcOpcode) -> PacketBuilder {
    PacketBuilder::new(op as u32)
}

// ── Guest session ────────────────────────────────────────────────

#[tokio::test]
async fn test_guest_session_and_drain() {
    let host = Arc::new(EmulatedHost::new());
    let env = env(&host);
    let renderer = env.renderer.clone();
    let (server, addr, task) = start(env).await;
    let mut guest = Guest::connect(addr, 0).await;

    assert_eq!(guest.call_i32(rc(RcOpcode::GetRendererVersion)).await, 1);

    let ctx = guest.call_i32(rc(RcOpcode::CreateContext).u32(0).u32(0).u32(2)).await as u32;
    let surface = guest.call_i32(rc(RcOpcode::CreateWindowSurface).u32(0).u32(4).u32(4)).await as u32;
    let cb = guest
        .call_i32(rc(RcOpcode::CreateColorBuffer).u32(4).u32(4).u32(gl::RGBA))
        .await as u32;
    assert!(ctx != 0 && surface != 0 && cb != 0);

    let made = guest.call_i32(rc(RcOpcode::MakeCurrent).u32(ctx).u32(surface).u32(surface)).await;
    assert_eq!(made, 1);

    let pixels: Vec<u8> = (0..64).map(|i| (i * 3) as u8).collect();
    let updated = guest
        .call_i32(
            rc(RcOpcode::UpdateColorBuffer)
                .u32(cb)
                .i32(0)
                .i32(0)
                .i32(4)
                .i32(4)
                .u32(gl::RGBA)
                .u32(gl::UNSIGNED_BYTE)
                .bytes(&pixels),
        )
        .await;
    assert_eq!(updated, 0);

    let read = guest
        .call(
            rc(RcOpcode::ReadColorBuffer)
                .u32(cb)
                .i32(0)
                .i32(0)
                .i32(4)
                .i32(4)
                .u32(gl::RGBA)
                .u32(gl::UNSIGNED_BYTE)
                .out_len(64),
            64,
        )
        .await;
    assert_eq!(read, pixels);

    guest.send(rc(RcOpcode::SetWindowColorBuffer).u32(surface).u32(cb)).await;
    assert_eq!(guest.call_i32(rc(RcOpcode::FlushWindowColorBuffer).u32(surface)).await, 0);
    assert_eq!(renderer.context_count(), 1);
    assert_eq!(renderer.surface_count(), 1);

    drop(guest);
    assert!(eventually(|| renderer.context_count() == 0 && renderer.surface_count() == 0).await);

    server.stop();
    assert_ok!(task.await.unwrap());
}

#[tokio::test]
async fn test_flush_without_color_buffer_fails() {
    let host = Arc::new(EmulatedHost::new());
    let (server, addr, task) = start(env(&host)).await;
    let mut guest = Guest::connect(addr, 0).await;

    let surface = guest.call_i32(rc(RcOpcode::CreateWindowSurface).u32(0).u32(4).u32(4)).await as u32;
    assert_eq!(guest.call_i32(rc(RcOpcode::FlushWindowColorBuffer).u32(surface)).await, -1);

    server.stop();
    assert_ok!(task.await.unwrap());
}

// ── Checksum ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_checksum_negotiation() {
    let host = Arc::new(EmulatedHost::new());
    let (server, addr, task) = start(env(&host)).await;
    let mut guest = Guest::connect(addr, 0).await;

    guest.send(rc(RcOpcode::SelectChecksumCalculator).u32(1).u32(0)).await;
    guest.enc = ChecksumEncoder::new(1);

    for _ in 0..3 {
        assert_eq!(guest.call_i32(rc(RcOpcode::GetNumDisplays)).await, 1);
    }

    // A packet with a corrupted suffix terminates the connection.
    let mut bad = rc(RcOpcode::GetRendererVersion).build(&mut guest.enc);
    let last = bad.len() - 1;
    bad[last] ^= 0x55;
    guest.stream.write_all(&bad).await.unwrap();
    assert!(guest.closed().await);

    server.stop();
    assert_ok!(task.await.unwrap());
}

// ── Protocol faults ──────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_opcode_drops_only_that_connection() {
    let host = Arc::new(EmulatedHost::new());
    let (server, addr, task) = start(env(&host)).await;

    let mut bad = Guest::connect(addr, 0).await;
    bad.send(PacketBuilder::new(7000).u32(1)).await;
    assert!(bad.closed().await);

    let mut good = Guest::connect(addr, 0).await;
    assert_eq!(good.call_i32(rc(RcOpcode::GetRendererVersion)).await, 1);

    server.stop();
    assert_ok!(task.await.unwrap());
}

#[tokio::test]
async fn test_silent_client_does_not_hold_up_others() {
    let host = Arc::new(EmulatedHost::new());
    let (server, addr, task) = start(env(&host)).await;

    // Connected, but never sends its flags word.
    let _silent = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let served = tokio::time::timeout(Duration::from_secs(2), async {
        let mut guest = Guest::connect(addr, 0).await;
        guest.call_i32(rc(RcOpcode::GetRendererVersion)).await
    })
    .await;
    assert_eq!(served.expect("second client waited on the first"), 1);

    server.stop();
    assert_ok!(task.await.unwrap());
}

#[tokio::test]
async fn test_exit_server_flag_stops_the_server() {
    let host = Arc::new(EmulatedHost::new());
    let (server, addr, task) = start(env(&host)).await;

    let mut live = Guest::connect(addr, 0).await;
    assert_eq!(live.call_i32(rc(RcOpcode::GetRendererVersion)).await, 1);

    let _exit = Guest::connect(addr, 1).await;
    tokio::time::timeout(TIMEOUT, task)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
    assert!(!server.is_running());

    // Live connections were force-stopped on shutdown.
    assert!(live.closed().await);
}

// ── Compositing ──────────────────────────────────────────────────

#[tokio::test]
async fn test_posted_layers_are_drawn() {
    let host = Arc::new(EmulatedHost::new());
    let mut env = env(&host);
    let wm = Arc::new(
        SingleWindowManager::new(Rect::from_size(4, 4), host.clone(), env.renderer.clone()).unwrap(),
    );
    env.composer = Some(Arc::new(LayerComposer::new(
        env.renderer.clone(),
        Box::new(SingleWindowStrategy::new(wm.clone())),
    )));
    let (server, addr, task) = start(env).await;
    let mut guest = Guest::connect(addr, 0).await;

    let cb = guest
        .call_i32(rc(RcOpcode::CreateColorBuffer).u32(4).u32(4).u32(gl::RGBA))
        .await as u32;
    guest
        .send(
            rc(RcOpcode::PostLayer)
                .string("com.android.launcher")
                .u32(cb)
                .f32(1.0)
                .i32(0)
                .i32(0)
                .i32(4)
                .i32(4)
                .i32(0)
                .i32(0)
                .i32(4)
                .i32(4),
        )
        .await;
    guest.send(rc(RcOpcode::PostAllLayersDone)).await;
    // Round trip so the frame has been composed before we look.
    assert_eq!(guest.call_i32(rc(RcOpcode::GetRendererVersion)).await, 1);

    // One present when the window was created, one for the frame.
    assert_eq!(host.draws().len(), 1);
    assert_eq!(host.swaps().len(), 2);

    server.stop();
    assert_ok!(task.await.unwrap());
}
