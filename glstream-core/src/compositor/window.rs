//! Host windows and the managers that map guest tasks onto them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{LayerRenderer, NativeWindowFactory};
use crate::error::HostError;
use crate::geometry::Rect;
use crate::host::NativeWindow;

/// Guest task id. Task 0 is the single-window pseudo task.
pub type TaskId = u32;

/// Activity stack a guest window lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StackId {
    #[default]
    Invalid,
    Home,
    Fullscreen,
    Freeform,
    Docked,
    Pinned,
}

/// One guest window as reported by the guest window manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowState {
    pub task: TaskId,
    pub frame: Rect,
    pub package_name: String,
    pub stack: StackId,
    pub has_surface: bool,
}

impl WindowState {
    /// A mapped freeform window.
    pub fn freeform(task: TaskId, frame: Rect) -> Self {
        Self {
            task,
            frame,
            package_name: String::new(),
            stack: StackId::Freeform,
            has_surface: true,
        }
    }
}

// ── Window ───────────────────────────────────────────────────────

/// A native window attached to the renderer. Detached and destroyed on
/// drop.
pub struct Window {
    task: TaskId,
    native: NativeWindow,
    frame: Mutex<Rect>,
    factory: Arc<dyn NativeWindowFactory>,
    renderer: Arc<dyn LayerRenderer>,
}

impl Window {
    pub fn create(
        task: TaskId,
        frame: Rect,
        factory: Arc<dyn NativeWindowFactory>,
        renderer: Arc<dyn LayerRenderer>,
    ) -> Result<Self, HostError> {
        let native = factory.create_window(frame)?;
        if !renderer.attach_window(native) {
            warn!("failed to attach window for task {task} to the renderer");
        }
        Ok(Self {
            task,
            native,
            frame: Mutex::new(frame),
            factory,
            renderer,
        })
    }

    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn native_handle(&self) -> NativeWindow {
        self.native
    }

    pub fn frame(&self) -> Rect {
        *self.frame.lock()
    }

    pub fn update_frame(&self, frame: Rect) {
        let mut current = self.frame.lock();
        if *current == frame {
            return;
        }
        *current = frame;
        self.factory.update_window(self.native, frame);
    }

    /// Fold the states of all guest windows of this task into one frame.
    pub fn update_state(&self, states: &[WindowState]) {
        let frame = states
            .iter()
            .fold(Rect::INVALID, |acc, s| acc.union(&s.frame));
        if frame.is_valid() {
            self.update_frame(frame);
        }
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        self.renderer.detach_window(self.native);
        self.factory.destroy_window(self.native);
        debug!("released window for task {}", self.task);
    }
}

impl std::fmt::Debug for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window")
            .field("task", &self.task)
            .field("native", &self.native)
            .field("frame", &self.frame())
            .finish()
    }
}

// ── Managers ─────────────────────────────────────────────────────

pub trait WindowManager: Send + Sync {
    fn find_window_for_task(&self, task: TaskId) -> Option<Arc<Window>>;

    /// Apply one batch of guest window changes.
    fn apply_window_state_update(&self, updated: &[WindowState], removed: &[WindowState]);
}

/// Everything goes to one window created at startup.
#[derive(Debug)]
pub struct SingleWindowManager {
    window: Arc<Window>,
}

impl SingleWindowManager {
    pub fn new(
        frame: Rect,
        factory: Arc<dyn NativeWindowFactory>,
        renderer: Arc<dyn LayerRenderer>,
    ) -> Result<Self, HostError> {
        let window = Window::create(0, frame, factory, renderer)?;
        info!("single window at {frame}");
        Ok(Self {
            window: Arc::new(window),
        })
    }
}

impl WindowManager for SingleWindowManager {
    fn find_window_for_task(&self, _task: TaskId) -> Option<Arc<Window>> {
        Some(self.window.clone())
    }

    fn apply_window_state_update(&self, _updated: &[WindowState], _removed: &[WindowState]) {}
}

/// One window per freeform guest task.
pub struct MultiWindowManager {
    factory: Arc<dyn NativeWindowFactory>,
    renderer: Arc<dyn LayerRenderer>,
    windows: Mutex<HashMap<TaskId, Arc<Window>>>,
}

impl MultiWindowManager {
    pub fn new(factory: Arc<dyn NativeWindowFactory>, renderer: Arc<dyn LayerRenderer>) -> Self {
        Self {
            factory,
            renderer,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn window_count(&self) -> usize {
        self.windows.lock().len()
    }
}

impl WindowManager for MultiWindowManager {
    fn find_window_for_task(&self, task: TaskId) -> Option<Arc<Window>> {
        self.windows.lock().get(&task).cloned()
    }

    fn apply_window_state_update(&self, updated: &[WindowState], removed: &[WindowState]) {
        let mut windows = self.windows.lock();
        let mut task_updates: Vec<(TaskId, Vec<WindowState>)> = Vec::new();

        for state in updated {
            if state.stack != StackId::Freeform || !state.has_surface {
                continue;
            }
            if windows.contains_key(&state.task) {
                match task_updates.iter_mut().find(|(t, _)| *t == state.task) {
                    Some((_, list)) => list.push(state.clone()),
                    None => task_updates.push((state.task, vec![state.clone()])),
                }
                continue;
            }
            match Window::create(state.task, state.frame, self.factory.clone(), self.renderer.clone()) {
                Ok(window) => {
                    debug!("new window for task {} ({})", state.task, state.package_name);
                    windows.insert(state.task, Arc::new(window));
                }
                Err(e) => warn!("cannot create window for task {}: {e}", state.task),
            }
        }

        for (task, states) in &task_updates {
            if let Some(window) = windows.get(task) {
                window.update_state(states);
            }
        }

        // A removal may name a window of a task that still has others.
        let touched: HashSet<TaskId> = task_updates.iter().map(|(t, _)| *t).collect();
        for state in removed {
            if !touched.contains(&state.task) && windows.remove(&state.task).is_some() {
                debug!("task {} went away", state.task);
            }
        }
    }
}

impl std::fmt::Debug for MultiWindowManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiWindowManager")
            .field("windows", &self.window_count())
            .finish()
    }
}

// ── DisplayInfo ──────────────────────────────────────────────────

/// The virtual display the guest renders for.
#[derive(Debug)]
pub struct DisplayInfo {
    resolution: RwLock<(u32, u32)>,
    dpi: u32,
    refresh_rate: u32,
}

impl Default for DisplayInfo {
    fn default() -> Self {
        Self::new(1280, 720, 120, 60)
    }
}

impl DisplayInfo {
    pub fn new(width: u32, height: u32, dpi: u32, refresh_rate: u32) -> Self {
        Self {
            resolution: RwLock::new((width, height)),
            dpi,
            refresh_rate,
        }
    }

    pub fn set_resolution(&self, width: u32, height: u32) {
        *self.resolution.write() = (width, height);
    }

    pub fn width(&self) -> u32 {
        self.resolution.read().0
    }

    pub fn height(&self) -> u32 {
        self.resolution.read().1
    }

    pub fn dpi(&self) -> u32 {
        self.dpi
    }

    pub fn refresh_rate(&self) -> u32 {
        self.refresh_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::testing::RecordingRenderer;
    use crate::host::emulated::EmulatedHost;

    fn manager() -> (Arc<EmulatedHost>, Arc<RecordingRenderer>, MultiWindowManager) {
        let host = Arc::new(EmulatedHost::new());
        let renderer = Arc::new(RecordingRenderer::default());
        let wm = MultiWindowManager::new(host.clone(), renderer.clone());
        (host, renderer, wm)
    }

    #[test]
    fn new_freeform_tasks_get_windows() {
        let (host, renderer, wm) = manager();
        let mut fullscreen = WindowState::freeform(3, Rect::from_size(10, 10));
        fullscreen.stack = StackId::Fullscreen;
        let mut unmapped = WindowState::freeform(4, Rect::from_size(10, 10));
        unmapped.has_surface = false;

        wm.apply_window_state_update(
            &[WindowState::freeform(1, Rect::new(5, 5, 105, 55)), fullscreen, unmapped],
            &[],
        );

        assert_eq!(wm.window_count(), 1);
        let window = wm.find_window_for_task(1).unwrap();
        assert_eq!(host.window_frame(window.native_handle()), Some(Rect::new(5, 5, 105, 55)));
        assert!(renderer.attached.lock().contains(&window.native_handle()));
        assert!(wm.find_window_for_task(3).is_none());
    }

    #[test]
    fn known_tasks_are_updated_with_merged_frames() {
        let (host, _, wm) = manager();
        wm.apply_window_state_update(&[WindowState::freeform(1, Rect::from_size(10, 10))], &[]);
        wm.apply_window_state_update(
            &[
                WindowState::freeform(1, Rect::new(0, 0, 50, 40)),
                WindowState::freeform(1, Rect::new(40, 30, 80, 60)),
            ],
            &[],
        );
        let window = wm.find_window_for_task(1).unwrap();
        assert_eq!(window.frame(), Rect::new(0, 0, 80, 60));
        assert_eq!(host.window_frame(window.native_handle()), Some(Rect::new(0, 0, 80, 60)));
    }

    #[test]
    fn removal_respects_same_batch_updates() {
        let (host, renderer, wm) = manager();
        wm.apply_window_state_update(
            &[
                WindowState::freeform(1, Rect::from_size(10, 10)),
                WindowState::freeform(2, Rect::from_size(10, 10)),
            ],
            &[],
        );
        assert_eq!(host.window_count(), 2);

        let popup = WindowState::freeform(1, Rect::from_size(4, 4));
        wm.apply_window_state_update(
            &[WindowState::freeform(1, Rect::from_size(12, 12))],
            &[popup, WindowState::freeform(2, Rect::from_size(10, 10))],
        );

        assert!(wm.find_window_for_task(1).is_some());
        assert!(wm.find_window_for_task(2).is_none());
        assert_eq!(host.window_count(), 1);
        assert_eq!(renderer.attached.lock().len(), 1);
    }

    #[test]
    fn single_manager_answers_every_task() {
        let host = Arc::new(EmulatedHost::new());
        let renderer = Arc::new(RecordingRenderer::default());
        let wm = SingleWindowManager::new(Rect::from_size(800, 600), host.clone(), renderer).unwrap();
        let a = wm.find_window_for_task(0).unwrap();
        let b = wm.find_window_for_task(42).unwrap();
        assert_eq!(a.native_handle(), b.native_handle());
        wm.apply_window_state_update(&[WindowState::freeform(5, Rect::from_size(1, 1))], &[]);
        assert_eq!(host.window_count(), 1);
    }

    #[test]
    fn display_resolution_is_mutable() {
        let info = DisplayInfo::default();
        assert_eq!((info.width(), info.height()), (1280, 720));
        info.set_resolution(1920, 1080);
        assert_eq!((info.width(), info.height()), (1920, 1080));
        assert_eq!(info.dpi(), 120);
    }
}
