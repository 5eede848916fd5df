//! Sampled RGBA8 textures.
//!
//! Textures are shared through `Arc` because many meshes and pipelines may
//! sample the same image.

use std::sync::Arc;

use ash::vk;
use tracing::info;

use crate::error::{RhiError, RhiResult};
use crate::image::{Image, ImageDesc, mip_level_count};
use crate::upload::UploadContext;

/// Sampled image uploaded once from RGBA8 pixels.
///
/// The image is left in `SHADER_READ_ONLY_OPTIMAL` after upload.
pub struct Texture {
    image: Image,
}

fn texture_usage(mip_levels: u32) -> vk::ImageUsageFlags {
    let usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
    if mip_levels > 1 {
        usage | vk::ImageUsageFlags::TRANSFER_SRC
    } else {
        usage
    }
}

impl Texture {
    /// Upload tightly packed RGBA8 pixels, optionally with a full mip chain.
    pub fn from_rgba8(
        upload: &UploadContext,
        width: u32,
        height: u32,
        pixels: &[u8],
        mipmaps: bool,
    ) -> RhiResult<Arc<Self>> {
        let mip_levels = if mipmaps {
            mip_level_count(width, height)
        } else {
            1
        };
        let desc = ImageDesc::new(
            vk::Extent2D { width, height },
            vk::Format::R8G8B8A8_SRGB,
            texture_usage(mip_levels),
        )
        .mip_levels(mip_levels);

        let image = Image::new(upload.device().clone(), desc)?;
        upload.upload_image(&image, pixels)?;
        info!("Texture {}x{} uploaded ({} mips)", width, height, mip_levels);
        Ok(Arc::new(Self { image }))
    }

    /// Six square faces in +X, -X, +Y, -Y, +Z, -Z order.
    pub fn from_cubemap_rgba8(
        upload: &UploadContext,
        size: u32,
        faces: &[&[u8]; 6],
    ) -> RhiResult<Arc<Self>> {
        let face_len = size as usize * size as usize * 4;
        if let Some(face) = faces.iter().position(|face| face.len() != face_len) {
            return Err(RhiError::InvalidArgument(format!(
                "cubemap face {} has {} bytes, expected {}",
                face,
                faces[face].len(),
                face_len
            )));
        }
        let pixels = faces.concat();

        let desc = ImageDesc::new(
            vk::Extent2D {
                width: size,
                height: size,
            },
            vk::Format::R8G8B8A8_SRGB,
            texture_usage(1),
        )
        .cubemap(true);

        let image = Image::new(upload.device().clone(), desc)?;
        upload.upload_image(&image, &pixels)?;
        info!("Cubemap {}x{} uploaded", size, size);
        Ok(Arc::new(Self { image }))
    }

    /// The underlying image.
    #[inline]
    pub fn image(&self) -> &Image {
        &self.image
    }

    /// Image view covering every mip and layer; cube views for cubemaps.
    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    /// Number of mip levels.
    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.image.mip_levels()
    }

    /// Whether the texture has six cube faces.
    #[inline]
    pub fn is_cubemap(&self) -> bool {
        self.image.is_cubemap()
    }
}
