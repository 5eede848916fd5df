//! Compute passes over the scene color image: deferred lighting and the
//! post-process filter chain.

mod bloom;
mod compute;

pub use bloom::{
    BLOOM_MIP_LEVELS, BloomFilter, BloomPush, BloomShaders, BloomStage, BloomStep, bloom_cascade,
    cascade_levels, mip_extent,
};
pub use compute::{
    ComputeFilter, GrayscaleFilter, LightParams, LightingPass, TonemapFilter, TonemapPush, copy_back,
    intermediate_usage,
};

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use ember_core::FilterKind;
use ember_core::config::{AssetConfig, PostConfig};
use ember_rhi::command::CommandBuffer;
use ember_rhi::device::Device;
use ember_rhi::image::Image;

use crate::error::RendererResult;
use crate::strategies::load_shader_code;

/// Local workgroup size of every filter shader, in both dimensions.
pub const WORKGROUP_SIZE: u32 = 16;

/// Workgroups needed to cover `extent`.
pub fn dispatch_group_count(extent: vk::Extent2D) -> (u32, u32) {
    (
        extent.width.div_ceil(WORKGROUP_SIZE),
        extent.height.div_ceil(WORKGROUP_SIZE),
    )
}

/// A filter in the post-process chain.
pub trait ScreenFilter {
    fn kind(&self) -> FilterKind;

    /// Recreate size-dependent intermediates. Only called with the device idle.
    fn rebuild(&mut self, extent: vk::Extent2D) -> RendererResult<()>;

    /// Record over `scene`, which is a color attachment before and after.
    fn record(&self, cmd: &CommandBuffer, slot: usize, scene: &Image);
}

fn compute_code(assets: &AssetConfig, stem: &str) -> RendererResult<Vec<u8>> {
    load_shader_code(assets, &format!("{}.comp.spv", stem))
}

fn build_filter(
    device: &Arc<Device>,
    kind: FilterKind,
    post: &PostConfig,
    assets: &AssetConfig,
    extent: vk::Extent2D,
) -> RendererResult<Box<dyn ScreenFilter>> {
    let filter: Box<dyn ScreenFilter> = match kind {
        FilterKind::Grayscale => Box::new(GrayscaleFilter::new(
            device.clone(),
            &compute_code(assets, "grayscale")?,
            extent,
        )?),
        FilterKind::Tonemap => Box::new(TonemapFilter::new(
            device.clone(),
            &compute_code(assets, "tonemap")?,
            extent,
            post.exposure,
        )?),
        FilterKind::Bloom => {
            let downsample = compute_code(assets, "bloom_down")?;
            let upsample = compute_code(assets, "bloom_up")?;
            let composite = compute_code(assets, "bloom_composite")?;
            Box::new(BloomFilter::new(
                device.clone(),
                BloomShaders {
                    downsample: &downsample,
                    upsample: &upsample,
                    composite: &composite,
                },
                extent,
                post.bloom_filter_radius,
                post.bloom_intensity,
            )?)
        }
    };
    Ok(filter)
}

struct ChainEntry {
    filter: Box<dyn ScreenFilter>,
    enabled: bool,
}

/// Lighting plus the configured filters, recorded in a fixed order.
pub struct FilterChain {
    lighting: Option<LightingPass>,
    lighting_enabled: bool,
    entries: Vec<ChainEntry>,
}

impl FilterChain {
    pub fn new(
        device: &Arc<Device>,
        post: &PostConfig,
        assets: &AssetConfig,
        extent: vk::Extent2D,
    ) -> RendererResult<Self> {
        let lighting = if post.lighting {
            Some(LightingPass::new(
                device.clone(),
                &compute_code(assets, "lighting")?,
                extent,
            )?)
        } else {
            None
        };

        let filters = post
            .validated_chain()?
            .into_iter()
            .map(|kind| build_filter(device, kind, post, assets, extent))
            .collect::<RendererResult<Vec<_>>>()?;

        let chain = Self::from_parts(lighting, filters);
        info!(
            "Filter chain: lighting {}, filters [{}]",
            if chain.lighting.is_some() { "on" } else { "off" },
            chain
                .order()
                .iter()
                .map(|kind| kind.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(chain)
    }

    /// Chain from already-built passes; every filter starts enabled.
    pub fn from_parts(lighting: Option<LightingPass>, filters: Vec<Box<dyn ScreenFilter>>) -> Self {
        Self {
            lighting_enabled: lighting.is_some(),
            lighting,
            entries: filters
                .into_iter()
                .map(|filter| ChainEntry {
                    filter,
                    enabled: true,
                })
                .collect(),
        }
    }

    pub fn empty() -> Self {
        Self::from_parts(None, Vec::new())
    }

    /// Configured filter order, enabled or not.
    pub fn order(&self) -> Vec<FilterKind> {
        self.entries.iter().map(|entry| entry.filter.kind()).collect()
    }

    /// Filters that will record this frame, in order.
    pub fn active(&self) -> Vec<FilterKind> {
        self.entries
            .iter()
            .filter(|entry| entry.enabled)
            .map(|entry| entry.filter.kind())
            .collect()
    }

    pub fn is_enabled(&self, kind: FilterKind) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.enabled && entry.filter.kind() == kind)
    }

    /// Returns false when `kind` is not part of the chain.
    pub fn set_enabled(&mut self, kind: FilterKind, enabled: bool) -> bool {
        match self.entries.iter_mut().find(|entry| entry.filter.kind() == kind) {
            Some(entry) => {
                entry.enabled = enabled;
                debug!("Filter {} {}", kind.name(), if enabled { "enabled" } else { "disabled" });
                true
            }
            None => false,
        }
    }

    /// Flip `kind`, returning its new state.
    pub fn toggle(&mut self, kind: FilterKind) -> Option<bool> {
        let enabled = !self.entries.iter().find(|entry| entry.filter.kind() == kind)?.enabled;
        self.set_enabled(kind, enabled);
        Some(enabled)
    }

    pub fn has_lighting(&self) -> bool {
        self.lighting.is_some() && self.lighting_enabled
    }

    pub fn set_lighting_enabled(&mut self, enabled: bool) {
        self.lighting_enabled = enabled && self.lighting.is_some();
    }

    pub fn lighting_mut(&mut self) -> Option<&mut LightingPass> {
        self.lighting.as_mut()
    }

    /// Recreate every intermediate at `extent`. The device must be idle.
    pub fn rebuild(&mut self, extent: vk::Extent2D) -> RendererResult<()> {
        if let Some(lighting) = &mut self.lighting {
            lighting.rebuild(extent)?;
        }
        for entry in &mut self.entries {
            entry.filter.rebuild(extent)?;
        }
        Ok(())
    }

    pub fn record_lighting(&self, cmd: &CommandBuffer, slot: usize, scene: &Image) {
        if let Some(lighting) = self.lighting.as_ref().filter(|_| self.lighting_enabled) {
            lighting.record(cmd, slot, scene);
        }
    }

    pub fn record_post(&self, cmd: &CommandBuffer, slot: usize, scene: &Image) {
        for entry in self.entries.iter().filter(|entry| entry.enabled) {
            entry.filter.record(cmd, slot, scene);
        }
    }
}
