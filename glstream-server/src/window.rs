//! Headless window backend.
//!
//! Windows exist only as an id and a frame. The EGL backend looks the frame
//! up when asked for a window surface and renders into an offscreen buffer
//! of that size.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use glstream_core::compositor::NativeWindowFactory;
use glstream_core::error::HostError;
use glstream_core::{NativeWindow, Rect};

#[derive(Debug)]
pub struct HeadlessWindows {
    next_id: AtomicU64,
    frames: Mutex<HashMap<u64, Rect>>,
}

impl Default for HeadlessWindows {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessWindows {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            frames: Mutex::new(HashMap::new()),
        }
    }

    /// Current frame of a live window.
    pub fn frame(&self, window: NativeWindow) -> Option<Rect> {
        self.frames.lock().get(&window.0).copied()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

impl NativeWindowFactory for HeadlessWindows {
    fn create_window(&self, frame: Rect) -> Result<NativeWindow, HostError> {
        if frame.width() <= 0 || frame.height() <= 0 {
            return Err(HostError::InvalidState("empty window frame"));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.frames.lock().insert(id, frame);
        debug!("headless window {id} at {frame}");
        Ok(NativeWindow(id))
    }

    fn update_window(&self, window: NativeWindow, frame: Rect) {
        if let Some(slot) = self.frames.lock().get_mut(&window.0) {
            *slot = frame;
        }
    }

    fn destroy_window(&self, window: NativeWindow) {
        if self.frames.lock().remove(&window.0).is_some() {
            debug!("headless window {} destroyed", window.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_track_their_frames() {
        let wins = HeadlessWindows::new();
        let a = wins.create_window(Rect::new(0, 0, 100, 50)).unwrap();
        let b = wins.create_window(Rect::new(10, 10, 20, 20)).unwrap();
        assert_ne!(a, b);
        assert_eq!(wins.len(), 2);

        wins.update_window(a, Rect::new(5, 5, 205, 105));
        assert_eq!(wins.frame(a), Some(Rect::new(5, 5, 205, 105)));

        wins.destroy_window(a);
        assert_eq!(wins.frame(a), None);
        assert_eq!(wins.len(), 1);
    }

    #[test]
    fn empty_frame_is_refused() {
        let wins = HeadlessWindows::new();
        assert!(wins.create_window(Rect::EMPTY).is_err());
        assert!(wins.is_empty());
    }
}
