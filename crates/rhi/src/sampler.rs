//! Texture samplers.
//!
//! A sampler is created separately from the texture it reads; its LOD clamp is
//! tied to the texture's mip count.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Texel filtering, applied to magnification, minification and mip selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SamplerFilter {
    /// Bilinear within a mip, linear between mips
    #[default]
    Linear,
    /// Nearest texel and nearest mip; keeps pixel art and glyphs sharp
    Nearest,
}

impl SamplerFilter {
    fn to_vk(self) -> (vk::Filter, vk::SamplerMipmapMode) {
        match self {
            SamplerFilter::Linear => (vk::Filter::LINEAR, vk::SamplerMipmapMode::LINEAR),
            SamplerFilter::Nearest => (vk::Filter::NEAREST, vk::SamplerMipmapMode::NEAREST),
        }
    }
}

/// Vulkan sampler with repeat addressing and anisotropy when supported.
pub struct TextureSampler {
    device: Arc<Device>,
    sampler: vk::Sampler,
    max_lod: f32,
}

/// LOD clamp for a texture with `mip_levels` levels.
#[inline]
pub fn max_lod_for(mip_levels: u32) -> f32 {
    mip_levels.max(1) as f32
}

impl TextureSampler {
    /// Create a sampler for a texture with `mip_levels` levels.
    ///
    /// Anisotropy is capped by the device limit and at 16x.
    pub fn new(device: Arc<Device>, mip_levels: u32, filter: SamplerFilter) -> RhiResult<Self> {
        let (filter_mode, mipmap_mode) = filter.to_vk();
        let max_anisotropy = device.max_sampler_anisotropy().min(16.0);
        let max_lod = max_lod_for(mip_levels);

        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(filter_mode)
            .min_filter(filter_mode)
            .mipmap_mode(mipmap_mode)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(max_anisotropy > 1.0)
            .max_anisotropy(max_anisotropy.max(1.0))
            .min_lod(0.0)
            .max_lod(max_lod)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK);

        let sampler = unsafe { device.handle().create_sampler(&create_info, None)? };
        debug!("Created {:?} sampler (max_lod {})", filter, max_lod);

        Ok(Self {
            device,
            sampler,
            max_lod,
        })
    }

    /// Get the raw Vulkan sampler handle.
    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }

    /// Highest level of detail the sampler reads.
    #[inline]
    pub fn max_lod(&self) -> f32 {
        self.max_lod
    }
}

impl Drop for TextureSampler {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_sampler(self.sampler, None);
        }
        debug!("Destroyed sampler");
    }
}
