//! Decode-thread bookkeeping.
//!
//! Every guest connection runs on its own OS thread. The pool keeps the
//! join handle and [`StopHandle`] of each one, collects finish events sent
//! by the threads themselves, and joins finished threads on [`reap`]. A
//! thread that panicked sends no event; `reap` joins it once it is done.
//!
//! [`reap`]: RenderThreadPool::reap

use std::collections::HashMap;
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::GlsError;
use crate::network::StopHandle;

pub type TaskEventSender = mpsc::UnboundedSender<TaskEvent>;

#[derive(Debug)]
pub enum TaskEvent {
    Finished(u64),
    Error(u64, String),
}

impl TaskEvent {
    pub fn id(&self) -> u64 {
        match self {
            TaskEvent::Finished(id) | TaskEvent::Error(id, _) => *id,
        }
    }
}

// ── RenderTask ───────────────────────────────────────────────────

/// One live decode thread.
pub struct RenderTask {
    id: u64,
    label: String,
    stop: StopHandle,
    handle: JoinHandle<()>,
}

impl RenderTask {
    /// Start `f` on a new named thread. The thread reports its outcome on
    /// `event_tx` when `f` returns.
    pub fn spawn<F>(
        id: u64,
        label: String,
        stop: StopHandle,
        f: F,
        event_tx: TaskEventSender,
    ) -> std::io::Result<Self>
    where
        F: FnOnce() -> Result<(), GlsError> + Send + 'static,
    {
        let handle = std::thread::Builder::new()
            .name(format!("render-{id}"))
            .spawn(move || {
                let event = match f() {
                    Ok(()) => TaskEvent::Finished(id),
                    Err(e) => TaskEvent::Error(id, e.to_string()),
                };
                let _ = event_tx.send(event);
            })?;
        Ok(Self {
            id,
            label,
            stop,
            handle,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    fn join(self) {
        if self.handle.join().is_err() {
            warn!("render thread {} ({}) panicked", self.id, self.label);
        }
    }
}

impl std::fmt::Debug for RenderTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTask")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("stopped", &self.stop.is_stopped())
            .finish()
    }
}

// ── RenderThreadPool ─────────────────────────────────────────────

pub struct RenderThreadPool {
    tasks: HashMap<u64, RenderTask>,
    next_id: u64,
    pool_rx: mpsc::UnboundedReceiver<TaskEvent>,
    pool_tx: TaskEventSender,
}

impl Default for RenderThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderThreadPool {
    pub fn new() -> Self {
        let (pool_tx, pool_rx) = mpsc::unbounded_channel();
        Self {
            tasks: HashMap::new(),
            next_id: 1,
            pool_rx,
            pool_tx,
        }
    }

    /// Start a decode thread. Returns its id.
    pub fn spawn<F>(&mut self, label: String, stop: StopHandle, f: F) -> std::io::Result<u64>
    where
        F: FnOnce() -> Result<(), GlsError> + Send + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        let task = RenderTask::spawn(id, label, stop, f, self.pool_tx.clone())?;
        self.tasks.insert(id, task);
        Ok(id)
    }

    /// Join every thread that has reported back or already exited.
    /// Returns how many were joined.
    pub fn reap(&mut self) -> usize {
        let mut reaped = 0;
        while let Ok(event) = self.pool_rx.try_recv() {
            if self.process_event(event) {
                reaped += 1;
            }
        }
        let silent: Vec<u64> = self
            .tasks
            .iter()
            .filter(|(_, task)| task.is_finished())
            .map(|(id, _)| *id)
            .collect();
        for id in silent {
            if let Some(task) = self.tasks.remove(&id) {
                task.join();
                reaped += 1;
            }
        }
        reaped
    }

    fn process_event(&mut self, event: TaskEvent) -> bool {
        let id = event.id();
        match &event {
            TaskEvent::Finished(_) => debug!("render thread {id} finished"),
            TaskEvent::Error(_, err) => warn!("render thread {id} failed: {err}"),
        }
        let Some(task) = self.tasks.remove(&id) else {
            return false;
        };
        task.join();
        true
    }

    /// Force-stop and join every live thread.
    pub fn shutdown(&mut self) {
        for task in self.tasks.values() {
            task.stop.force_stop();
        }
        for (_, task) in self.tasks.drain() {
            debug!("joining render thread {} ({})", task.id, task.label);
            task.join();
        }
        while self.pool_rx.try_recv().is_ok() {}
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Drop for RenderThreadPool {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            self.shutdown();
        }
    }
}

impl std::fmt::Debug for RenderThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderThreadPool")
            .field("tasks", &self.tasks.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::net::{TcpListener, TcpStream};
    use std::time::{Duration, Instant};

    use super::*;
    use crate::network::RenderStream;

    /// A connected stream pair; the server side backs the stop handle.
    fn stream_pair() -> (RenderStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (RenderStream::Tcp(server), client)
    }

    /// Reap until the pool is empty or five seconds pass.
    fn reap_all(pool: &mut RenderThreadPool) -> usize {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut reaped = 0;
        while !pool.is_empty() && Instant::now() < deadline {
            reaped += pool.reap();
            std::thread::sleep(Duration::from_millis(5));
        }
        reaped
    }

    #[test]
    fn finished_threads_are_reaped() {
        let mut pool = RenderThreadPool::new();
        let (stream, _client) = stream_pair();
        pool.spawn("ok".into(), stream.stop_handle().unwrap(), || Ok(())).unwrap();
        assert_eq!(pool.len(), 1);

        assert_eq!(reap_all(&mut pool), 1);
        assert!(pool.is_empty());
        assert_eq!(pool.reap(), 0);
    }

    #[test]
    fn failures_are_reaped_too() {
        let mut pool = RenderThreadPool::new();
        let (stream, _client) = stream_pair();
        pool.spawn("bad".into(), stream.stop_handle().unwrap(), || {
            Err(GlsError::UnknownOpcode(42))
        })
        .unwrap();
        assert_eq!(reap_all(&mut pool), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn panicked_threads_are_reaped() {
        let mut pool = RenderThreadPool::new();
        let (stream, _client) = stream_pair();
        pool.spawn("panics".into(), stream.stop_handle().unwrap(), || panic!("decoder bug"))
            .unwrap();
        assert_eq!(reap_all(&mut pool), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn shutdown_unblocks_and_joins() {
        let mut pool = RenderThreadPool::new();
        let (mut stream, _client) = stream_pair();
        let stop = stream.stop_handle().unwrap();
        pool.spawn("blocked".into(), stop.clone(), move || {
            let mut buf = [0u8; 8];
            let n = stream.read(&mut buf)?;
            assert_eq!(n, 0);
            Ok(())
        })
        .unwrap();

        pool.shutdown();
        assert!(pool.is_empty());
        assert!(stop.is_stopped());
    }

    #[test]
    fn ids_are_unique() {
        let mut pool = RenderThreadPool::new();
        let (stream, _client) = stream_pair();
        let a = pool.spawn("a".into(), stream.stop_handle().unwrap(), || Ok(())).unwrap();
        let b = pool.spawn("b".into(), stream.stop_handle().unwrap(), || Ok(())).unwrap();
        assert_ne!(a, b);
        pool.shutdown();
    }
}
