//! Screen rectangles and 4x4 transforms used by the compositor.

// ── Rect ─────────────────────────────────────────────────────────

/// Edge-based rectangle in display pixels.
///
/// Edges come from guest packets, so derived values saturate at the
/// `i32` range instead of overflowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const EMPTY: Rect = Rect::new(0, 0, 0, 0);
    pub const INVALID: Rect = Rect::new(-1, -1, -1, -1);

    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// A rectangle at the origin.
    pub const fn from_size(width: i32, height: i32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub const fn width(&self) -> i32 {
        self.right.saturating_sub(self.left)
    }

    pub const fn height(&self) -> i32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID && self.width() >= 0 && self.height() >= 0
    }

    /// Smallest rectangle containing both. An invalid side is ignored.
    pub fn union(&self, other: &Rect) -> Rect {
        if !self.is_valid() {
            return *other;
        }
        if !other.is_valid() {
            return *self;
        }
        Rect::new(
            self.left.min(other.left),
            self.top.min(other.top),
            self.right.max(other.right),
            self.bottom.max(other.bottom),
        )
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(
            self.left.saturating_add(dx),
            self.top.saturating_add(dy),
            self.right.saturating_add(dx),
            self.bottom.saturating_add(dy),
        )
    }

    /// Keep the top-left corner, change the size.
    pub fn resize(&self, width: i32, height: i32) -> Rect {
        Rect::new(
            self.left,
            self.top,
            self.left.saturating_add(width),
            self.top.saturating_add(height),
        )
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{{},{},{},{}}} {}x{}",
            self.left,
            self.top,
            self.right,
            self.bottom,
            self.width(),
            self.height()
        )
    }
}

// ── Mat4 ─────────────────────────────────────────────────────────

/// Column-major 4x4 matrix, laid out as GL expects for `glUniformMatrix4fv`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat4(pub [f32; 16]);

impl Default for Mat4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mat4 {
    pub const IDENTITY: Mat4 = Mat4([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    /// Element at `col`, `row`.
    pub fn get(&self, col: usize, row: usize) -> f32 {
        self.0[col * 4 + row]
    }

    pub fn set(&mut self, col: usize, row: usize, v: f32) {
        self.0[col * 4 + row] = v;
    }

    pub fn translation(x: f32, y: f32, z: f32) -> Mat4 {
        let mut m = Self::IDENTITY;
        m.set(3, 0, x);
        m.set(3, 1, y);
        m.set(3, 2, z);
        m
    }

    pub fn scaling(x: f32, y: f32, z: f32) -> Mat4 {
        let mut m = Self::IDENTITY;
        m.set(0, 0, x);
        m.set(1, 1, y);
        m.set(2, 2, z);
        m
    }

    pub fn mul(&self, rhs: &Mat4) -> Mat4 {
        let mut out = [0.0f32; 16];
        for col in 0..4 {
            for row in 0..4 {
                out[col * 4 + row] = (0..4).map(|k| self.get(k, row) * rhs.get(col, k)).sum();
            }
        }
        Mat4(out)
    }

    pub fn transform(&self, v: [f32; 4]) -> [f32; 4] {
        let mut out = [0.0f32; 4];
        for (row, o) in out.iter_mut().enumerate() {
            *o = (0..4).map(|k| self.get(k, row) * v[k]).sum();
        }
        out
    }

    /// Perspective projection mapping window pixels in `rect` at depth 0
    /// one-to-one onto the viewport, with a 30° vertical field of view.
    pub fn screen_to_gl(rect: &Rect) -> Mat4 {
        let mut m = Self::translation(-1.0, 1.0, 0.0);
        // w' = -z: perspective divide by the incoming depth.
        m.set(2, 3, -1.0);

        let w = rect.width().max(1) as f32;
        let h = rect.height().max(1) as f32;
        let fov = 30.0f32.to_radians();
        let near = (h / 2.0) / (fov / 2.0).tan();
        let far = -near;

        m = m.mul(&Self::scaling(2.0 / w, -2.0 / h, 2.0 / (near - far)));
        m.mul(&Self::translation(-(rect.left as f32), -(rect.top as f32), 0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_dimensions() {
        let r = Rect::new(-100, -100, 924, 668);
        assert_eq!(r.width(), 1024);
        assert_eq!(r.height(), 768);
        assert!(r.is_valid());
        assert!(!Rect::INVALID.is_valid());
    }

    #[test]
    fn union_ignores_invalid() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, -5, 20, 8);
        assert_eq!(a.union(&b), Rect::new(0, -5, 20, 10));
        assert_eq!(Rect::INVALID.union(&a), a);
    }

    #[test]
    fn translate_and_resize() {
        let r = Rect::new(1, 2, 3, 4);
        assert_eq!(r.translate(10, 20), Rect::new(11, 22, 13, 24));
        assert_eq!(r.resize(5, 6), Rect::new(1, 2, 6, 8));
    }

    #[test]
    fn extreme_edges_saturate() {
        let wide = Rect::new(i32::MIN, 0, i32::MAX, 1);
        assert_eq!(wide.width(), i32::MAX);
        assert_eq!(Rect::new(i32::MAX, 0, i32::MIN, 0).width(), i32::MIN);
        assert!(!Rect::new(i32::MAX, 0, i32::MIN, 0).is_valid());

        let r = Rect::new(i32::MAX - 1, 0, i32::MAX, 4);
        assert_eq!(r.translate(10, -10), Rect::new(i32::MAX, -10, i32::MAX, -6));
        assert_eq!(r.resize(100, 2), Rect::new(i32::MAX - 1, 0, i32::MAX, 2));
    }

    #[test]
    fn screen_to_gl_maps_corners() {
        let m = Mat4::screen_to_gl(&Rect::from_size(200, 100));
        let project = |x: f32, y: f32| {
            let c = m.transform([x, y, 0.0, 1.0]);
            [c[0] / c[3], c[1] / c[3]]
        };
        let tl = project(0.0, 0.0);
        let br = project(200.0, 100.0);
        assert!((tl[0] + 1.0).abs() < 1e-5 && (tl[1] - 1.0).abs() < 1e-5);
        assert!((br[0] - 1.0).abs() < 1e-5 && (br[1] + 1.0).abs() < 1e-5);
    }

    #[test]
    fn identity_is_neutral() {
        let t = Mat4::translation(1.0, 2.0, 3.0);
        assert_eq!(Mat4::IDENTITY.mul(&t), t);
        assert_eq!(t.transform([0.0, 0.0, 0.0, 1.0]), [1.0, 2.0, 3.0, 1.0]);
    }
}
