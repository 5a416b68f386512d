//! Layer-to-window mapping.

use std::sync::Arc;

use super::Renderable;
use super::window::{TaskId, Window, WindowManager};
use crate::geometry::Rect;

/// Prefix of layers that belong to a guest task.
pub const TASK_SURFACE_PREFIX: &str = "org.anbox.surface.";

/// Layers never shown in single-window mode. `Sprite` is the guest's
/// mouse cursor.
const HIDDEN_LAYERS: &[&str] = &["Sprite"];

pub trait ComposerStrategy: Send + Sync {
    /// Group a frame's layers by destination window, in the order each
    /// window's first layer appears.
    fn process_layers(&self, renderables: &[Renderable]) -> Vec<(Arc<Window>, Vec<Renderable>)>;
}

// ── Single window ────────────────────────────────────────────────

pub struct SingleWindowStrategy {
    wm: Arc<dyn WindowManager>,
}

impl SingleWindowStrategy {
    pub fn new(wm: Arc<dyn WindowManager>) -> Self {
        Self { wm }
    }
}

impl ComposerStrategy for SingleWindowStrategy {
    fn process_layers(&self, renderables: &[Renderable]) -> Vec<(Arc<Window>, Vec<Renderable>)> {
        let Some(window) = self.wm.find_window_for_task(0) else {
            return Vec::new();
        };
        let visible = renderables
            .iter()
            .filter(|r| !HIDDEN_LAYERS.contains(&r.name.as_str()))
            .cloned()
            .collect();
        vec![(window, visible)]
    }
}

// ── Multi window ─────────────────────────────────────────────────

pub struct MultiWindowStrategy {
    wm: Arc<dyn WindowManager>,
}

impl MultiWindowStrategy {
    pub fn new(wm: Arc<dyn WindowManager>) -> Self {
        Self { wm }
    }
}

/// Task id encoded in a layer name: the decimal digits right after
/// [`TASK_SURFACE_PREFIX`]. Anything after the digits is ignored.
pub fn task_id_from_name(name: &str) -> Option<TaskId> {
    let rest = name.strip_prefix(TASK_SURFACE_PREFIX)?;
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..end].parse::<TaskId>().ok().filter(|&t| t != 0)
}

/// Move `screen` from display coordinates into a window whose top-left
/// corner sits at `frame`'s, offset by the crop origin.
fn rebase(r: &Renderable, frame: &Rect) -> Renderable {
    let dx = r.crop.left.saturating_sub(frame.left);
    let dy = r.crop.top.saturating_sub(frame.top);
    Renderable {
        screen: r.screen.translate(dx, dy),
        ..r.clone()
    }
}

impl ComposerStrategy for MultiWindowStrategy {
    fn process_layers(&self, renderables: &[Renderable]) -> Vec<(Arc<Window>, Vec<Renderable>)> {
        let mut groups: Vec<(Arc<Window>, Vec<Renderable>)> = Vec::new();
        for renderable in renderables {
            let Some(task) = task_id_from_name(&renderable.name) else {
                continue;
            };
            let Some(window) = self.wm.find_window_for_task(task) else {
                continue;
            };
            match groups.iter_mut().find(|(w, _)| Arc::ptr_eq(w, &window)) {
                Some((_, list)) => list.push(renderable.clone()),
                None => groups.push((window, vec![renderable.clone()])),
            }
        }

        for (_, list) in &mut groups {
            let frame = list
                .iter()
                .fold(Rect::INVALID, |acc, r| acc.union(&r.screen));
            for r in list.iter_mut() {
                *r = rebase(r, &frame);
            }
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::testing::RecordingRenderer;
    use crate::compositor::window::{MultiWindowManager, SingleWindowManager, WindowState};
    use crate::host::emulated::EmulatedHost;

    fn multi(states: &[WindowState]) -> (Arc<MultiWindowManager>, MultiWindowStrategy) {
        let host = Arc::new(EmulatedHost::new());
        let wm = Arc::new(MultiWindowManager::new(host, Arc::new(RecordingRenderer::default())));
        wm.apply_window_state_update(states, &[]);
        let strategy = MultiWindowStrategy::new(wm.clone());
        (wm, strategy)
    }

    #[test]
    fn task_ids_parse_from_names() {
        assert_eq!(task_id_from_name("org.anbox.surface.12"), Some(12));
        assert_eq!(task_id_from_name("org.anbox.surface.7 (popup)"), Some(7));
        assert_eq!(task_id_from_name("org.anbox.surface.0"), None);
        assert_eq!(task_id_from_name("org.anbox.surface."), None);
        assert_eq!(task_id_from_name("org.anbox.surface.x1"), None);
        assert_eq!(task_id_from_name("StatusBar"), None);
    }

    #[test]
    fn offscreen_frame_is_rebased() {
        let frame = Rect::new(-100, -100, 924, 668);
        let (_wm, strategy) = multi(&[WindowState::freeform(1, frame)]);
        let layers = [
            Renderable::new("org.anbox.surface.1", 1, frame, Rect::from_size(1024, 768)),
            Renderable::new("org.anbox.surface.1", 2, Rect::new(0, 0, 100, 200), Rect::new(0, 0, 100, 200)),
        ];

        let groups = strategy.process_layers(&layers);
        assert_eq!(groups.len(), 1);
        let (window, list) = &groups[0];
        assert_eq!(window.frame().width(), 1024);
        assert_eq!(window.frame().height(), 768);
        assert_eq!(list[0].screen, Rect::new(0, 0, 1024, 768));
        assert_eq!(list[1].screen, Rect::new(100, 100, 200, 300));
        assert_eq!(list[1].buffer, 2);
    }

    #[test]
    fn popup_past_the_main_layer_widens_the_frame() {
        let (_wm, strategy) = multi(&[WindowState::freeform(1, Rect::new(0, 24, 100, 124))]);
        let layers = [
            Renderable::new("org.anbox.surface.1", 1, Rect::new(0, 24, 100, 124), Rect::from_size(100, 100)),
            Renderable::new("org.anbox.surface.1", 2, Rect::from_size(50, 50), Rect::from_size(50, 50)),
        ];
        let groups = strategy.process_layers(&layers);
        let list = &groups[0].1;
        assert_eq!(list[0].screen, Rect::new(0, 24, 100, 124));
        assert_eq!(list[1].screen, Rect::from_size(50, 50));
    }

    #[test]
    fn extreme_guest_rects_do_not_overflow() {
        let (_wm, strategy) = multi(&[WindowState::freeform(1, Rect::from_size(10, 10))]);
        let layers = [Renderable::new(
            "org.anbox.surface.1",
            1,
            Rect::new(i32::MAX - 5, i32::MIN, i32::MAX, i32::MIN + 5),
            Rect::new(i32::MIN, i32::MAX - 5, i32::MIN + 5, i32::MAX),
        )];
        let groups = strategy.process_layers(&layers);
        assert_eq!(groups[0].1.len(), 1);
    }

    #[test]
    fn crop_origin_shifts_the_layer() {
        let (_wm, strategy) = multi(&[WindowState::freeform(1, Rect::new(10, 10, 110, 110))]);
        let layers = [Renderable::new(
            "org.anbox.surface.1",
            1,
            Rect::new(10, 10, 110, 110),
            Rect::new(5, 8, 105, 108),
        )];
        let groups = strategy.process_layers(&layers);
        assert_eq!(groups[0].1[0].screen, Rect::new(5, 8, 105, 108));
    }

    #[test]
    fn layers_group_per_task_in_first_seen_order() {
        let (wm, strategy) = multi(&[
            WindowState::freeform(1, Rect::from_size(10, 10)),
            WindowState::freeform(2, Rect::from_size(10, 10)),
        ]);
        let layer = |name: &str, buffer| Renderable::new(name, buffer, Rect::from_size(10, 10), Rect::EMPTY);
        let groups = strategy.process_layers(&[
            layer("org.anbox.surface.2", 1),
            layer("org.anbox.surface.1", 2),
            layer("org.anbox.surface.2", 3),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0.task(), 2);
        assert_eq!(groups[0].1.iter().map(|r| r.buffer).collect::<Vec<_>>(), [1, 3]);
        assert_eq!(groups[1].0.task(), 1);
        assert!(Arc::ptr_eq(&groups[1].0, &wm.find_window_for_task(1).unwrap()));
    }

    #[test]
    fn unknown_and_foreign_layers_are_skipped() {
        let (_wm, strategy) = multi(&[WindowState::freeform(1, Rect::from_size(10, 10))]);
        let groups = strategy.process_layers(&[
            Renderable::new("org.anbox.surface.9", 1, Rect::from_size(10, 10), Rect::EMPTY),
            Renderable::new("Sprite", 2, Rect::from_size(10, 10), Rect::EMPTY),
            Renderable::new("org.anbox.surface.0", 3, Rect::from_size(10, 10), Rect::EMPTY),
        ]);
        assert!(groups.is_empty());
    }

    #[test]
    fn single_window_never_emits_sprite() {
        let host = Arc::new(EmulatedHost::new());
        let wm = Arc::new(
            SingleWindowManager::new(Rect::from_size(100, 100), host, Arc::new(RecordingRenderer::default()))
                .unwrap(),
        );
        let strategy = SingleWindowStrategy::new(wm);
        let groups = strategy.process_layers(&[
            Renderable::new("Sprite", 1, Rect::from_size(8, 8), Rect::from_size(8, 8)),
            Renderable::new("org.anbox.surface.3", 2, Rect::new(-5, -5, 50, 50), Rect::EMPTY),
        ]);
        assert_eq!(groups.len(), 1);
        assert!(groups[0].1.iter().all(|r| r.name != "Sprite"));
        // Screen positions pass through untouched.
        assert_eq!(groups[0].1[0].screen, Rect::new(-5, -5, 50, 50));
    }
}
