//! Physical device (GPU) selection.
//!
//! Every enumerated device is checked for a graphics queue family, present
//! support on that family (when a surface is given), Vulkan 1.3 and sampler
//! anisotropy. Survivors are scored and the best one wins; an empty field is a
//! fatal startup failure.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};

/// Queue families the engine submits to.
///
/// The engine records every pass on one graphics queue. `present` is the same
/// family whenever the hardware allows it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family with graphics and compute support
    pub graphics: Option<u32>,
    /// Family that can present to the target surface
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Whether every required family was found.
    #[inline]
    pub fn is_complete(&self, needs_present: bool) -> bool {
        self.graphics.is_some() && (!needs_present || self.present.is_some())
    }

    /// Distinct family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);
        if let Some(graphics) = self.graphics {
            families.push(graphics);
        }
        if let Some(present) = self.present
            && !families.contains(&present)
        {
            families.push(present);
        }
        families
    }

    /// Whether presentation happens on the graphics family.
    #[inline]
    pub fn shares_present(&self) -> bool {
        self.present.is_none() || self.present == self.graphics
    }
}

/// Surface a device must be able to present to.
#[derive(Clone, Copy)]
pub struct PresentTarget<'a> {
    /// Surface to present to
    pub surface: vk::SurfaceKHR,
    /// Loader for surface queries
    pub loader: &'a ash::khr::surface::Instance,
}

/// Snapshot of a physical device's properties, taken during selection.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Raw physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported core features
    pub features: vk::PhysicalDeviceFeatures,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Queue families chosen for the device
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Device name reported by the driver.
    pub fn device_name(&self) -> &str {
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("Unknown Device")
        }
    }

    /// Human readable device type.
    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// Total size of device-local heaps, in bytes.
    pub fn device_local_memory(&self) -> u64 {
        self.memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }

    /// Sample counts usable for both color and depth attachments.
    pub fn supported_sample_counts(&self) -> vk::SampleCountFlags {
        let limits = &self.properties.limits;
        limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let version = self.properties.api_version;
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field(
                "api_version",
                &format!(
                    "{}.{}.{}",
                    vk::api_version_major(version),
                    vk::api_version_minor(version),
                    vk::api_version_patch(version)
                ),
            )
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Pick the best GPU. `present` is `None` for headless use.
pub fn select_physical_device(
    instance: &ash::Instance,
    present: Option<PresentTarget<'_>>,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} GPU(s)", devices.len());

    let mut best: Option<(PhysicalDeviceInfo, u32)> = None;
    for device in devices {
        let Some(candidate) = check_device_suitability(instance, device, present) else {
            continue;
        };
        let score = rate_device(&candidate);
        debug!(
            "GPU '{}' ({}) scored {}",
            candidate.device_name(),
            candidate.device_type_name(),
            score
        );
        if best.as_ref().is_none_or(|(_, best_score)| score > *best_score) {
            best = Some((candidate, score));
        }
    }

    let Some((selected, score)) = best else {
        warn!("No GPU satisfies the engine's requirements");
        return Err(RhiError::NoSuitableGpu);
    };

    info!(
        "Selected GPU '{}' ({}), score {}",
        selected.device_name(),
        selected.device_type_name(),
        score
    );
    Ok(selected)
}

fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    present: Option<PresentTarget<'_>>,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let features = unsafe { instance.get_physical_device_features(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy();

    let queue_families = pick_queue_families(&families, |index| match present {
        Some(target) => unsafe {
            target
                .loader
                .get_physical_device_surface_support(device, index, target.surface)
                .unwrap_or(false)
        },
        None => false,
    });

    if !queue_families.is_complete(present.is_some()) {
        debug!("GPU '{}' skipped: missing graphics/present queue", name);
        return None;
    }

    if let Err(reason) = meets_requirements(properties.api_version, &features) {
        debug!("GPU '{}' skipped: {}", name, reason);
        return None;
    }

    Some(PhysicalDeviceInfo {
        device,
        properties,
        features,
        memory_properties,
        queue_families,
    })
}

/// Choose the graphics family, preferring one that can also present.
pub fn pick_queue_families(
    families: &[vk::QueueFamilyProperties],
    supports_present: impl Fn(u32) -> bool,
) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }

        let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE);
        let present = supports_present(i);

        if graphics && present {
            return QueueFamilyIndices {
                graphics: Some(i),
                present: Some(i),
            };
        }
        if graphics && indices.graphics.is_none() {
            indices.graphics = Some(i);
        }
        if present && indices.present.is_none() {
            indices.present = Some(i);
        }
    }

    indices
}

/// Hard requirements: Vulkan 1.3 for dynamic rendering and sampler anisotropy.
pub fn meets_requirements(
    api_version: u32,
    features: &vk::PhysicalDeviceFeatures,
) -> Result<(), String> {
    let major = vk::api_version_major(api_version);
    let minor = vk::api_version_minor(api_version);
    if major < 1 || (major == 1 && minor < 3) {
        return Err(format!("Vulkan 1.3 not supported ({}.{})", major, minor));
    }
    if features.sampler_anisotropy == vk::FALSE {
        return Err("sampler anisotropy not supported".to_string());
    }
    Ok(())
}

/// Score a suitable device; discrete GPUs win, then VRAM and image limits.
pub fn rate_device(info: &PhysicalDeviceInfo) -> u32 {
    let mut score = match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 1,
    };

    score += info.properties.limits.max_image_dimension2_d;

    let vram_mb = (info.device_local_memory() / (1024 * 1024)) as u32;
    score += vram_mb.min(16_000);

    // One family for graphics and present avoids concurrent-sharing swapchains.
    if info.queue_families.shares_present() {
        score += 100;
    }

    score
}

/// Highest supported sample count not above `requested`.
pub fn clamp_sample_count(supported: vk::SampleCountFlags, requested: u32) -> vk::SampleCountFlags {
    const CANDIDATES: [(u32, vk::SampleCountFlags); 7] = [
        (64, vk::SampleCountFlags::TYPE_64),
        (32, vk::SampleCountFlags::TYPE_32),
        (16, vk::SampleCountFlags::TYPE_16),
        (8, vk::SampleCountFlags::TYPE_8),
        (4, vk::SampleCountFlags::TYPE_4),
        (2, vk::SampleCountFlags::TYPE_2),
        (1, vk::SampleCountFlags::TYPE_1),
    ];

    CANDIDATES
        .iter()
        .find(|(count, flag)| *count <= requested && supported.contains(*flag))
        .map(|&(_, flag)| flag)
        .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_queue_family_indices_complete() {
        let indices = QueueFamilyIndices {
            graphics: Some(0),
            present: None,
        };
        assert!(indices.is_complete(false));
        assert!(!indices.is_complete(true));
        assert!(!QueueFamilyIndices::default().is_complete(false));
    }

    #[test]
    fn test_unique_families() {
        let shared = QueueFamilyIndices {
            graphics: Some(0),
            present: Some(0),
        };
        assert_eq!(shared.unique_families(), vec![0]);
        assert!(shared.shares_present());

        let split = QueueFamilyIndices {
            graphics: Some(0),
            present: Some(2),
        };
        assert_eq!(split.unique_families(), vec![0, 2]);
        assert!(!split.shares_present());
    }

    #[test]
    fn test_pick_prefers_combined_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
        ];
        let indices = pick_queue_families(&families, |i| i != 0);
        assert_eq!(indices.graphics, Some(2));
        assert_eq!(indices.present, Some(2));
    }

    #[test]
    fn test_pick_split_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = pick_queue_families(&families, |i| i == 1);
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(1));
    }

    #[test]
    fn test_pick_headless() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let indices = pick_queue_families(&families, |_| false);
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, None);
        assert!(indices.is_complete(false));
    }

    #[test]
    fn test_pick_skips_empty_families() {
        let mut empty = family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let indices = pick_queue_families(&families, |_| true);
        assert_eq!(indices.graphics, Some(1));
    }

    #[test]
    fn test_meets_requirements() {
        let features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: vk::TRUE,
            ..Default::default()
        };
        assert!(meets_requirements(vk::API_VERSION_1_3, &features).is_ok());
        assert!(meets_requirements(vk::API_VERSION_1_2, &features).is_err());
        assert!(
            meets_requirements(vk::API_VERSION_1_3, &vk::PhysicalDeviceFeatures::default())
                .is_err()
        );
    }

    #[test]
    fn test_clamp_sample_count() {
        let supported = vk::SampleCountFlags::TYPE_1
            | vk::SampleCountFlags::TYPE_2
            | vk::SampleCountFlags::TYPE_4;
        assert_eq!(clamp_sample_count(supported, 8), vk::SampleCountFlags::TYPE_4);
        assert_eq!(clamp_sample_count(supported, 2), vk::SampleCountFlags::TYPE_2);
        assert_eq!(clamp_sample_count(supported, 1), vk::SampleCountFlags::TYPE_1);
        assert_eq!(
            clamp_sample_count(vk::SampleCountFlags::empty(), 4),
            vk::SampleCountFlags::TYPE_1
        );
    }
}
