//! Scoped host bindings.
//!
//! Internal GL work runs on the renderer's own contexts. A
//! [`ScopedBinding`] remembers what the calling thread had current, binds
//! the target and restores the saved binding when dropped, so every early
//! return puts the guest's binding back.

use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::warn;

use crate::error::HostError;
use crate::host::{HostBinding, HostContext, HostDriver, HostSurface};

// ── ScopedBinding ────────────────────────────────────────────────

/// Restores the calling thread's previous host binding on drop.
pub struct ScopedBinding<'a> {
    host: &'a dyn HostDriver,
    saved: HostBinding,
    // Released after the restore in `drop`.
    _guard: Option<ReentrantMutexGuard<'a, ()>>,
}

impl<'a> ScopedBinding<'a> {
    /// Bind `target` on the calling thread.
    pub fn bind(host: &'a dyn HostDriver, target: HostBinding) -> Result<Self, HostError> {
        Self::enter(host, target, None)
    }

    fn enter(
        host: &'a dyn HostDriver,
        target: HostBinding,
        guard: Option<ReentrantMutexGuard<'a, ()>>,
    ) -> Result<Self, HostError> {
        let saved = host.current();
        if saved != target {
            host.make_current(target)?;
        }
        Ok(Self {
            host,
            saved,
            _guard: guard,
        })
    }

    /// The binding that will be restored.
    pub fn saved(&self) -> HostBinding {
        self.saved
    }
}

impl Drop for ScopedBinding<'_> {
    fn drop(&mut self) {
        if self.host.current() == self.saved {
            return;
        }
        if let Err(e) = self.host.make_current(self.saved) {
            warn!("failed to restore host binding: {e}");
        }
    }
}

// ── PrivateContext ───────────────────────────────────────────────

/// A host context owned by the renderer rather than a guest.
///
/// The re-entrant lock keeps the context current on at most one thread
/// while still letting nested scopes on the same thread bind it again.
pub struct PrivateContext {
    host: Arc<dyn HostDriver>,
    context: HostContext,
    surface: Option<HostSurface>,
    lock: ReentrantMutex<()>,
}

impl PrivateContext {
    /// Take ownership of `context` and its optional default surface.
    pub fn new(host: Arc<dyn HostDriver>, context: HostContext, surface: Option<HostSurface>) -> Self {
        Self {
            host,
            context,
            surface,
            lock: ReentrantMutex::new(()),
        }
    }

    pub fn context(&self) -> HostContext {
        self.context
    }

    pub fn host(&self) -> &dyn HostDriver {
        &*self.host
    }

    pub fn host_arc(&self) -> Arc<dyn HostDriver> {
        self.host.clone()
    }

    /// Bind with the default surface (or surfaceless).
    pub fn bind(&self) -> Result<ScopedBinding<'_>, HostError> {
        let guard = self.lock.lock();
        let target = HostBinding::new(self.context, self.surface, self.surface);
        ScopedBinding::enter(&*self.host, target, Some(guard))
    }

    /// Bind with `surface` as both draw and read surface.
    pub fn bind_surface(&self, surface: HostSurface) -> Result<ScopedBinding<'_>, HostError> {
        let guard = self.lock.lock();
        let target = HostBinding::new(self.context, Some(surface), Some(surface));
        ScopedBinding::enter(&*self.host, target, Some(guard))
    }
}

impl Drop for PrivateContext {
    fn drop(&mut self) {
        let current = self.host.current();
        if current.context == Some(self.context) {
            if let Err(e) = self.host.make_current(HostBinding::UNBOUND) {
                warn!("failed to release private context: {e}");
            }
        }
        if let Some(surface) = self.surface {
            self.host.destroy_surface(surface);
        }
        self.host.destroy_context(self.context);
    }
}

impl std::fmt::Debug for PrivateContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateContext")
            .field("context", &self.context)
            .field("surface", &self.surface)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::emulated::EmulatedHost;
    use crate::host::{GlesApi, HostConfig};

    fn setup() -> (Arc<EmulatedHost>, PrivateContext) {
        let host = Arc::new(EmulatedHost::new());
        host.initialize().unwrap();
        let ctx = host.create_context(HostConfig(0), None, GlesApi::V2).unwrap();
        let pbuf = host.create_pbuffer(HostConfig(0), 1, 1).unwrap();
        let driver: Arc<dyn HostDriver> = host.clone();
        (host, PrivateContext::new(driver, ctx, Some(pbuf)))
    }

    #[test]
    fn restores_unbound_thread() {
        let (host, private) = setup();
        {
            let scope = private.bind().unwrap();
            assert!(scope.saved().is_unbound());
            assert_eq!(host.current().context, Some(private.context()));
        }
        assert!(host.current().is_unbound());
    }

    #[test]
    fn restores_guest_binding_on_early_return() {
        let (host, private) = setup();
        let guest = host.create_context(HostConfig(0), None, GlesApi::V1).unwrap();
        let surface = host.create_pbuffer(HostConfig(0), 8, 8).unwrap();
        let before = HostBinding::new(guest, Some(surface), Some(surface));
        host.make_current(before).unwrap();

        let work = || -> Result<(), HostError> {
            let _scope = private.bind()?;
            Err(HostError::InvalidState("bail out"))
        };
        assert!(work().is_err());
        assert_eq!(host.current(), before);
    }

    #[test]
    fn nested_scopes_on_one_thread() {
        let (host, private) = setup();
        let outer = private.bind().unwrap();
        {
            let inner = private.bind().unwrap();
            assert_eq!(inner.saved().context, Some(private.context()));
        }
        assert_eq!(host.current().context, Some(private.context()));
        drop(outer);
        assert!(host.current().is_unbound());
    }

    #[test]
    fn drop_releases_host_objects() {
        let (host, private) = setup();
        assert_eq!(host.live_contexts(), 1);
        drop(private);
        assert_eq!(host.live_contexts(), 0);
        assert_eq!(host.live_surfaces(), 0);
    }
}
