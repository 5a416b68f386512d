//! Typed guest-visible handles.
//!
//! On the wire every handle is a bare non-zero `u32` and 0 means "none".
//! Inside the server each object kind gets its own newtype so a context
//! handle cannot be passed where a surface is expected. All kinds draw
//! from one counter, so the raw values stay unique across kinds too.

use std::fmt;
use std::num::NonZeroU32;

/// Which registry map a handle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Context,
    Surface,
    ColorBuffer,
    Image,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

macro_rules! handle_type {
    ($(#[$doc:meta])* $name:ident => $kind:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(NonZeroU32);

        impl $name {
            pub const KIND: HandleKind = HandleKind::$kind;

            /// Wrap a raw wire value; 0 yields `None`.
            pub fn from_raw(raw: u32) -> Option<Self> {
                NonZeroU32::new(raw).map(Self)
            }

            pub fn raw(self) -> u32 {
                self.0.get()
            }
        }

        impl From<NonZeroU32> for $name {
            fn from(v: NonZeroU32) -> Self {
                Self(v)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", Self::KIND, self.0)
            }
        }
    };
}

handle_type!(
    /// A guest EGL context.
    ContextHandle => Context
);
handle_type!(
    /// A guest window surface (host pbuffer).
    SurfaceHandle => Surface
);
handle_type!(
    /// A guest color buffer.
    ColorBufferHandle => ColorBuffer
);
handle_type!(
    /// A guest client EGLImage.
    ImageHandle => Image
);

/// Raw value of an optional handle, 0 for `None`.
pub fn raw_or_zero<H: Into<u32>>(h: Option<H>) -> u32 {
    h.map(Into::into).unwrap_or(0)
}

macro_rules! into_raw {
    ($($name:ident),*) => {
        $(impl From<$name> for u32 {
            fn from(h: $name) -> u32 {
                h.raw()
            }
        })*
    };
}

into_raw!(ContextHandle, SurfaceHandle, ColorBufferHandle, ImageHandle);

// ── HandleAllocator ──────────────────────────────────────────────

/// Monotonic counter that never yields 0 or a value still in use.
#[derive(Debug, Default)]
pub struct HandleAllocator {
    next: u32,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting after `value`; the next handle is `value + 1`.
    pub fn starting_after(value: u32) -> Self {
        Self { next: value }
    }

    /// Next value for which `is_live` is false.
    pub fn allocate(&mut self, is_live: impl Fn(u32) -> bool) -> NonZeroU32 {
        loop {
            self.next = self.next.wrapping_add(1);
            if let Some(id) = NonZeroU32::new(self.next) {
                if !is_live(id.get()) {
                    return id;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn zero_is_not_a_handle() {
        assert!(ContextHandle::from_raw(0).is_none());
        assert_eq!(SurfaceHandle::from_raw(5).unwrap().raw(), 5);
        assert_eq!(raw_or_zero::<ColorBufferHandle>(None), 0);
    }

    #[test]
    fn display_names_kind() {
        let h = ColorBufferHandle::from_raw(3).unwrap();
        assert_eq!(h.to_string(), "ColorBuffer#3");
    }

    #[test]
    fn allocator_skips_live_values() {
        let mut alloc = HandleAllocator::new();
        let live: HashSet<u32> = [2, 3].into_iter().collect();
        assert_eq!(alloc.allocate(|v| live.contains(&v)).get(), 1);
        assert_eq!(alloc.allocate(|v| live.contains(&v)).get(), 4);
    }

    #[test]
    fn allocator_wraps_past_zero() {
        let mut alloc = HandleAllocator::starting_after(u32::MAX - 1);
        assert_eq!(alloc.allocate(|_| false).get(), u32::MAX);
        assert_eq!(alloc.allocate(|v| v == 1).get(), 2);
    }
}
