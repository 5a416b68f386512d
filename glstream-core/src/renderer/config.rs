//! Guest-visible EGL configs.
//!
//! ## Packed layout
//!
//! ```text
//! row 0:      CONFIG_ATTRIBUTES ids
//! row 1..=n:  attribute values of config 0..n-1
//! ```
//!
//! Every cell is a 4-byte little-endian word.

use crate::error::HostError;
use crate::flags::{RenderableType, SurfaceType};
use crate::host::consts::egl;
use crate::host::{HostConfig, HostDriver};

/// Attributes reported for every config, in packing order.
pub const CONFIG_ATTRIBUTES: [i32; 32] = [
    egl::DEPTH_SIZE,
    egl::STENCIL_SIZE,
    egl::RENDERABLE_TYPE,
    egl::SURFACE_TYPE,
    egl::CONFIG_ID,
    egl::BUFFER_SIZE,
    egl::ALPHA_SIZE,
    egl::BLUE_SIZE,
    egl::GREEN_SIZE,
    egl::RED_SIZE,
    egl::CONFIG_CAVEAT,
    egl::LEVEL,
    egl::MAX_PBUFFER_HEIGHT,
    egl::MAX_PBUFFER_PIXELS,
    egl::MAX_PBUFFER_WIDTH,
    egl::NATIVE_RENDERABLE,
    egl::NATIVE_VISUAL_ID,
    egl::NATIVE_VISUAL_TYPE,
    egl::SAMPLES,
    egl::SAMPLE_BUFFERS,
    egl::TRANSPARENT_TYPE,
    egl::TRANSPARENT_BLUE_VALUE,
    egl::TRANSPARENT_GREEN_VALUE,
    egl::TRANSPARENT_RED_VALUE,
    egl::BIND_TO_TEXTURE_RGB,
    egl::BIND_TO_TEXTURE_RGBA,
    egl::MIN_SWAP_INTERVAL,
    egl::MAX_SWAP_INTERVAL,
    egl::LUMINANCE_SIZE,
    egl::ALPHA_MASK_SIZE,
    egl::COLOR_BUFFER_TYPE,
    egl::CONFORMANT,
];

const CONFIG_ID_INDEX: usize = 4;

/// Whether a host config can back guest surfaces: pbuffer support and
/// non-zero RGB channels.
fn is_compatible(host: &dyn HostDriver, config: HostConfig) -> bool {
    let attr = |a| host.config_attrib(config, a).unwrap_or(0);
    let surface = SurfaceType::from_bits_retain(attr(egl::SURFACE_TYPE));
    surface.contains(SurfaceType::PBUFFER)
        && attr(egl::RED_SIZE) != 0
        && attr(egl::GREEN_SIZE) != 0
        && attr(egl::BLUE_SIZE) != 0
}

// ── RendererConfig ───────────────────────────────────────────────

/// Snapshot of one host config as the guest sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererConfig {
    host: HostConfig,
    values: [i32; CONFIG_ATTRIBUTES.len()],
}

impl RendererConfig {
    fn snapshot(host: &dyn HostDriver, config: HostConfig) -> Self {
        let mut values = [0i32; CONFIG_ATTRIBUTES.len()];
        for (value, attrib) in values.iter_mut().zip(CONFIG_ATTRIBUTES) {
            *value = host.config_attrib(config, attrib).unwrap_or(0);
            // Guest window surfaces are host pbuffers.
            if attrib == egl::SURFACE_TYPE {
                *value |= SurfaceType::WINDOW.bits();
            }
        }
        Self {
            host: config,
            values,
        }
    }

    pub fn host_config(&self) -> HostConfig {
        self.host
    }

    pub fn attrib(&self, attrib: i32) -> Option<i32> {
        CONFIG_ATTRIBUTES
            .iter()
            .position(|a| *a == attrib)
            .map(|i| self.values[i])
    }

    pub fn config_id(&self) -> i32 {
        self.values[CONFIG_ID_INDEX]
    }

    pub fn depth_size(&self) -> i32 {
        self.values[0]
    }

    pub fn stencil_size(&self) -> i32 {
        self.values[1]
    }

    pub fn renderable_type(&self) -> RenderableType {
        RenderableType::from_bits_retain(self.values[2])
    }

    pub fn surface_type(&self) -> SurfaceType {
        SurfaceType::from_bits_retain(self.values[3])
    }
}

// ── ConfigList ───────────────────────────────────────────────────

/// Dense, index-addressed list of compatible host configs.
#[derive(Debug, Clone, Default)]
pub struct ConfigList {
    configs: Vec<RendererConfig>,
}

impl ConfigList {
    pub fn from_host(host: &dyn HostDriver) -> Result<Self, HostError> {
        let configs = host
            .configs()?
            .into_iter()
            .filter(|c| is_compatible(host, *c))
            .map(|c| RendererConfig::snapshot(host, c))
            .collect();
        Ok(Self { configs })
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&RendererConfig> {
        self.configs.get(index as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RendererConfig> {
        self.configs.iter()
    }

    /// `(config count, attributes per config)`.
    pub fn pack_info(&self) -> (i32, i32) {
        (self.configs.len() as i32, CONFIG_ATTRIBUTES.len() as i32)
    }

    /// Bytes `pack_configs` needs.
    pub fn packed_size(&self) -> usize {
        (self.configs.len() + 1) * CONFIG_ATTRIBUTES.len() * 4
    }

    /// Write the packed table into `buffer`.
    ///
    /// Returns the config count, or the negated required byte size when
    /// `buffer` is too small (nothing is written then).
    pub fn pack_configs(&self, buffer: &mut [u8]) -> i32 {
        let needed = self.packed_size();
        if buffer.len() < needed {
            return -(needed as i32);
        }
        let rows = std::iter::once(&CONFIG_ATTRIBUTES).chain(self.configs.iter().map(|c| &c.values));
        let words = rows.flat_map(|row| row.iter());
        for (cell, word) in buffer.chunks_exact_mut(4).zip(words) {
            cell.copy_from_slice(&word.to_le_bytes());
        }
        self.configs.len() as i32
    }

    /// Dense indices of the configs matching the guest's attribute list.
    ///
    /// The surface type is always requested as pbuffer, since that is what
    /// backs every guest surface. `max == 0` means no limit.
    pub fn choose_config(&self, host: &dyn HostDriver, attribs: &[i32], max: usize) -> Vec<u32> {
        let mut request: Vec<i32> = Vec::with_capacity(attribs.len() + 3);
        let mut has_surface_type = false;
        for pair in attribs.chunks_exact(2) {
            if pair[0] == egl::NONE {
                break;
            }
            if pair[0] == egl::SURFACE_TYPE {
                has_surface_type = true;
                request.extend_from_slice(&[egl::SURFACE_TYPE, SurfaceType::PBUFFER.bits()]);
            } else {
                request.extend_from_slice(pair);
            }
        }
        if !has_surface_type {
            request.extend_from_slice(&[egl::SURFACE_TYPE, SurfaceType::PBUFFER.bits()]);
        }
        request.push(egl::NONE);

        let matched = match host.choose_config(&request, usize::MAX) {
            Ok(matched) => matched,
            Err(e) => {
                tracing::warn!("choose_config: {e}");
                return Vec::new();
            }
        };

        let limit = if max == 0 { usize::MAX } else { max };
        matched
            .into_iter()
            .filter(|c| is_compatible(host, *c))
            .filter_map(|c| {
                let id = host.config_attrib(c, egl::CONFIG_ID)?;
                self.configs
                    .iter()
                    .position(|rc| rc.config_id() == id)
                    .map(|i| i as u32)
            })
            .take(limit)
            .collect()
    }
}
