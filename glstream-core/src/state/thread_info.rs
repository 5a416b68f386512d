use std::collections::HashSet;
use std::sync::Arc;

use super::ThreadBinding;
use crate::checksum::ChecksumCalculator;
use crate::handle::{ContextHandle, SurfaceHandle};
use crate::renderer::RenderContext;

/// Everything a decode thread carries between packets.
///
/// The owned sets list what the thread created and has not destroyed; they
/// are drained when the connection goes away.
#[derive(Debug, Default)]
pub struct RenderThreadInfo {
    pub binding: ThreadBinding,
    pub owned_contexts: HashSet<ContextHandle>,
    pub owned_surfaces: HashSet<SurfaceHandle>,
    pub checksum: ChecksumCalculator,
}

impl RenderThreadInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_context(&self) -> Option<&Arc<RenderContext>> {
        self.binding.context()
    }

    /// True when the thread holds no binding and owns nothing.
    pub fn is_idle(&self) -> bool {
        !self.binding.is_bound() && self.owned_contexts.is_empty() && self.owned_surfaces.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle() {
        let info = RenderThreadInfo::new();
        assert!(info.is_idle());
        assert!(info.current_context().is_none());
        assert_eq!(info.checksum.version(), 0);
    }

    #[test]
    fn owned_handles_make_it_busy() {
        let mut info = RenderThreadInfo::new();
        info.owned_surfaces.insert(SurfaceHandle::from_raw(9).unwrap());
        assert!(!info.is_idle());
    }
}
