//! The per-connection decode loop.
//!
//! ```text
//!   ┌──────────────────────────── loop ────────────────────────────┐
//!   │ get_data()  (blocking, outside the resource lock)            │
//!   │ lock ─► offer buffer to v1, v2, control until no progress    │
//!   │        ─► stalled head with foreign opcode? protocol fault   │
//!   │ unlock ─► write queued replies                               │
//!   └──────────────────────────────────────────────────────────────┘
//!   exit: unbind ─► drain surfaces ─► drain contexts
//! ```

use std::io::Write;
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::decoder::{DecodeContext, Decoder, RenderEnv, connection_decoders, is_known_opcode};
use crate::error::GlsError;
use crate::header::PacketHeader;
use crate::network::{ReadBuffer, RenderStream, StopHandle};
use crate::state::RenderThreadInfo;

/// Process-wide lock serialising decode passes across connections.
pub type ResourceLock = Arc<Mutex<()>>;

/// Everything one connection needs, moved onto its decode thread.
pub struct RenderThread {
    label: String,
    env: RenderEnv,
    lock: ResourceLock,
    stream: RenderStream,
    stop: StopHandle,
    buffer: ReadBuffer,
    decoders: Vec<Box<dyn Decoder>>,
    thread: RenderThreadInfo,
    replies: BytesMut,
    released: bool,
}

impl RenderThread {
    pub fn new(env: RenderEnv, lock: ResourceLock, stream: RenderStream, stop: StopHandle, buffer: ReadBuffer) -> Self {
        Self {
            label: stream.peer_label(),
            env,
            lock,
            stream,
            stop,
            buffer,
            decoders: connection_decoders(),
            thread: RenderThreadInfo::new(),
            replies: BytesMut::new(),
            released: false,
        }
    }

    /// Serve the connection until the guest hangs up, the thread is
    /// force-stopped, or a protocol fault occurs. The thread's objects are
    /// released in every case.
    pub fn run(mut self) -> Result<(), GlsError> {
        info!("render thread for {} started", self.label);
        let result = self.serve();
        self.release();
        match &result {
            Ok(()) => info!("render thread for {} exited", self.label),
            Err(e) => warn!("render thread for {} dropped: {e}", self.label),
        }
        result
    }

    fn serve(&mut self) -> Result<(), GlsError> {
        loop {
            let n = self.buffer.get_data(&mut self.stream)?;
            if n == 0 || self.stop.is_stopped() {
                debug!("{} closed", self.label);
                return Ok(());
            }
            self.decode_available()?;
            self.flush_replies()?;
        }
    }

    /// Run decode passes until none makes progress.
    fn decode_available(&mut self) -> Result<(), GlsError> {
        let _guard = self.lock.lock();
        loop {
            let mut progress = 0;
            for decoder in self.decoders.iter_mut() {
                let mut ctx = DecodeContext {
                    env: &self.env,
                    thread: &mut self.thread,
                    replies: &mut self.replies,
                };
                let consumed = decoder.try_decode(self.buffer.data(), &mut ctx)?;
                self.buffer.consume(consumed);
                progress += consumed;
            }
            if progress == 0 {
                break;
            }
        }
        self.check_stalled_head()
    }

    /// A complete header nobody took is either foreign or can never fit.
    fn check_stalled_head(&self) -> Result<(), GlsError> {
        let Some(header) = PacketHeader::peek(self.buffer.data()) else {
            return Ok(());
        };
        if !is_known_opcode(header.opcode) {
            return Err(GlsError::UnknownOpcode(header.opcode));
        }
        if header.len() > self.buffer.max_capacity() {
            return Err(GlsError::FrameTooLarge {
                size: header.len(),
                max: self.buffer.max_capacity(),
            });
        }
        Ok(())
    }

    fn flush_replies(&mut self) -> Result<(), GlsError> {
        if self.replies.is_empty() {
            return Ok(());
        }
        self.stream.write_all(&self.replies)?;
        self.stream.flush()?;
        self.replies.clear();
        Ok(())
    }

    /// Unbind, then drain what the guest left behind. Runs once.
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let _guard = self.lock.lock();
        let renderer = &self.env.renderer;
        renderer.bind_context(&mut self.thread, 0, 0, 0);
        renderer.drain_surfaces_for_thread(&mut self.thread);
        renderer.drain_contexts_for_thread(&mut self.thread);
    }
}

impl Drop for RenderThread {
    /// Covers a decode pass that unwinds out of `run`.
    fn drop(&mut self) {
        if !self.released {
            warn!("render thread for {} unwound, releasing its objects", self.label);
            self.release();
        }
    }
}

impl std::fmt::Debug for RenderThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderThread")
            .field("label", &self.label)
            .field("buffered", &self.buffer.valid())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{TcpListener, TcpStream};

    use super::*;
    use crate::checksum::ChecksumEncoder;
    use crate::codec::PacketBuilder;
    use crate::decoder::RcOpcode;
    use crate::decoder::testing::Fixture;
    use crate::host::GlesApi;

    fn connect(env: RenderEnv, lock: ResourceLock) -> (RenderThread, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        let stream = RenderStream::Tcp(server);
        let stop = stream.stop_handle().unwrap();
        let thread = RenderThread::new(env, lock, stream, stop, ReadBuffer::new(64, 1024));
        (thread, client)
    }

    fn rc(op: RcOpcode) -> PacketBuilder {
        PacketBuilder::new(op as u32)
    }

    #[test]
    fn foreign_opcode_is_a_protocol_fault() {
        let f = Fixture::new();
        let (mut thread, mut client) = connect(f.env.clone(), Arc::default());
        let bytes = PacketBuilder::new(5000).u32(1).build(&mut ChecksumEncoder::new(0));
        client.write_all(&bytes).unwrap();
        drop(client);
        assert!(matches!(thread.serve(), Err(GlsError::UnknownOpcode(5000))));
    }

    #[test]
    fn oversized_frame_is_a_protocol_fault() {
        let f = Fixture::new();
        let (mut thread, mut client) = connect(f.env.clone(), Arc::default());
        let header = PacketHeader {
            opcode: RcOpcode::GetRendererVersion as u32,
            size: 4096,
        };
        client.write_all(&header.encode()).unwrap();
        drop(client);
        assert!(matches!(thread.serve(), Err(GlsError::FrameTooLarge { size: 4096, max: 1024 })));
    }

    #[test]
    fn objects_are_released_when_the_thread_unwinds() {
        let f = Fixture::new();
        let renderer = f.env.renderer.clone();
        let (mut thread, _client) = connect(f.env.clone(), Arc::default());
        let ctx = renderer.create_context(&mut thread.thread, 0, 0, GlesApi::V2).unwrap().raw();
        let surface = renderer.create_surface(&mut thread.thread, 0, 4, 4).unwrap().raw();
        assert!(renderer.bind_context(&mut thread.thread, ctx, surface, surface));

        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _thread = thread;
            panic!("decoder bug");
        }));
        assert!(unwound.is_err());
        assert_eq!(renderer.context_count(), 0);
        assert_eq!(renderer.surface_count(), 0);
    }

    #[test]
    fn interleaved_packets_are_all_decoded() {
        let f = Fixture::new();
        let (thread, mut client) = connect(f.env.clone(), Arc::default());
        let mut enc = ChecksumEncoder::new(0);
        let mut bytes = rc(RcOpcode::CreateContext).u32(0).u32(0).u32(2).build(&mut enc);
        bytes.extend(rc(RcOpcode::CreateWindowSurface).u32(0).u32(4).u32(4).build(&mut enc));
        bytes.extend(rc(RcOpcode::MakeCurrent).u32(1).u32(2).u32(2).build(&mut enc));
        bytes.extend(PacketBuilder::new(2498).build(&mut enc));
        bytes.extend(PacketBuilder::new(1480).build(&mut enc));
        bytes.extend(rc(RcOpcode::GetRendererVersion).build(&mut enc));
        client.write_all(&bytes).unwrap();
        client.shutdown(std::net::Shutdown::Write).unwrap();

        let renderer = f.env.renderer.clone();
        let worker = std::thread::spawn(move || thread.run());

        let mut reply = Vec::new();
        std::io::Read::read_to_end(&mut client, &mut reply).unwrap();
        worker.join().unwrap().unwrap();

        let words: Vec<i32> = reply
            .chunks_exact(4)
            .map(|w| i32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect();
        assert_eq!(words, [1, 2, 1, 0, 0, 1]);
        assert_eq!(renderer.context_count(), 0);
        assert_eq!(renderer.surface_count(), 0);
    }
}
