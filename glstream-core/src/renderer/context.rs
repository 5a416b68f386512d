//! Guest contexts and their client-array store.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::error::HostError;
use crate::host::{GlesApi, HostConfig, HostContext, HostDriver};

/// Number of pointer-data slots a context keeps.
pub const MAX_POINTER_LOCATIONS: usize = 64;

/// Client-array bytes the guest streamed for each vertex-array slot.
///
/// The host only sees pointers into this store, so the bytes must stay put
/// until the next pointer call for the same slot.
#[derive(Debug, Clone)]
pub struct DecoderContextData {
    pointers: Vec<Vec<u8>>,
}

impl Default for DecoderContextData {
    fn default() -> Self {
        Self {
            pointers: vec![Vec::new(); MAX_POINTER_LOCATIONS],
        }
    }
}

impl DecoderContextData {
    /// Replace the bytes stored at `location`. Out-of-range slots are ignored.
    pub fn store_pointer_data(&mut self, location: usize, data: &[u8]) {
        if let Some(slot) = self.pointers.get_mut(location) {
            slot.clear();
            slot.extend_from_slice(data);
        }
    }

    pub fn pointer_data(&self, location: usize) -> Option<&[u8]> {
        self.pointers.get(location).map(Vec::as_slice)
    }
}

/// A guest EGL context backed by one host context.
pub struct RenderContext {
    host: Arc<dyn HostDriver>,
    context: HostContext,
    config: HostConfig,
    api: GlesApi,
    data: Mutex<DecoderContextData>,
}

impl RenderContext {
    pub fn create(
        host: Arc<dyn HostDriver>,
        config: HostConfig,
        share: Option<&RenderContext>,
        api: GlesApi,
    ) -> Result<Self, HostError> {
        let context = host.create_context(config, share.map(|s| s.context), api)?;
        Ok(Self {
            host,
            context,
            config,
            api,
            data: Mutex::new(DecoderContextData::default()),
        })
    }

    pub fn host_context(&self) -> HostContext {
        self.context
    }

    pub fn config(&self) -> HostConfig {
        self.config
    }

    pub fn api(&self) -> GlesApi {
        self.api
    }

    pub fn is_gles2(&self) -> bool {
        self.api == GlesApi::V2
    }

    pub fn decoder_data(&self) -> MutexGuard<'_, DecoderContextData> {
        self.data.lock()
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        self.host.destroy_context(self.context);
    }
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("context", &self.context)
            .field("api", &self.api)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::emulated::EmulatedHost;

    #[test]
    fn pointer_store_ignores_out_of_range() {
        let mut data = DecoderContextData::default();
        data.store_pointer_data(3, &[1, 2, 3]);
        data.store_pointer_data(MAX_POINTER_LOCATIONS, &[9]);
        assert_eq!(data.pointer_data(3), Some(&[1u8, 2, 3][..]));
        assert_eq!(data.pointer_data(MAX_POINTER_LOCATIONS), None);

        data.store_pointer_data(3, &[7]);
        assert_eq!(data.pointer_data(3), Some(&[7u8][..]));
    }

    #[test]
    fn context_lifetime_follows_owner() {
        let host = Arc::new(EmulatedHost::new());
        host.initialize().unwrap();
        let driver: Arc<dyn HostDriver> = host.clone();
        let base = RenderContext::create(driver.clone(), HostConfig(0), None, GlesApi::V2).unwrap();
        let shared = RenderContext::create(driver, HostConfig(0), Some(&base), GlesApi::V1).unwrap();
        assert!(base.is_gles2());
        assert!(!shared.is_gles2());
        assert_eq!(host.live_contexts(), 2);
        drop(shared);
        drop(base);
        assert_eq!(host.live_contexts(), 0);
    }
}
