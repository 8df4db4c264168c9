//! Vulkan Image - GPU image with its default view.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use lumen_core::log;
use lumen_rhi_derive::DeviceObject;
use crate::device::{set_debug_name_handle, DebuggableObject, Device, DeviceShared};
use crate::error::{RhiError, VkResultExt};

/// Image descriptor for creating GPU images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDesc {
    pub name: String,
    pub format: vk::Format,
    /// A depth above one makes a 3D image.
    pub extent: vk::Extent3D,
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
    pub array_layers: u32,
}

impl Default for ImageDesc {
    fn default() -> Self {
        Self {
            name: String::new(),
            format: vk::Format::R8G8B8A8_UNORM,
            extent: vk::Extent3D { width: 1, height: 1, depth: 1 },
            usage: vk::ImageUsageFlags::SAMPLED,
            mip_levels: 1,
            array_layers: 1,
        }
    }
}

impl ImageDesc {
    pub fn new_2d(name: &str, width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            name: name.to_owned(),
            format,
            extent: vk::Extent3D { width, height, depth: 1 },
            ..Default::default()
        }
    }

    /// Offscreen target written by compute and graphics, then copied out.
    pub fn draw_target(name: &str, width: u32, height: u32, format: vk::Format) -> Self {
        Self::new_2d(name, width, height, format).with_usage(
            vk::ImageUsageFlags::STORAGE
                | vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST,
        )
    }

    pub fn depth_attachment(name: &str, width: u32, height: u32) -> Self {
        Self::new_2d(name, width, height, vk::Format::D32_SFLOAT)
            .with_usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
    }

    pub fn with_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_additional_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage |= usage;
        self
    }

    pub fn with_mip_levels(mut self, levels: u32) -> Self {
        self.mip_levels = levels;
        self
    }

    pub fn with_array_layers(mut self, layers: u32) -> Self {
        self.array_layers = layers;
        self
    }

    pub fn image_type(&self) -> vk::ImageType {
        if self.extent.depth > 1 {
            vk::ImageType::TYPE_3D
        } else {
            vk::ImageType::TYPE_2D
        }
    }

    pub fn view_type(&self) -> vk::ImageViewType {
        view_type_for(self.extent, self.array_layers)
    }
}

/// View type covering a whole image of `extent` with `array_layers` layers.
pub fn view_type_for(extent: vk::Extent3D, array_layers: u32) -> vk::ImageViewType {
    if extent.depth > 1 {
        vk::ImageViewType::TYPE_3D
    } else if array_layers > 1 {
        vk::ImageViewType::TYPE_2D_ARRAY
    } else {
        vk::ImageViewType::TYPE_2D
    }
}

/// Get the appropriate aspect mask for an image format.
pub fn format_to_aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// GPU image in device-local memory, with a view over all of it.
#[DeviceObject]
pub struct Image {
    desc: ImageDesc,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
}

impl Image {
    pub fn new(device: &Device, desc: &ImageDesc) -> Result<Self, RhiError> {
        let shared = device.shared();
        let image_info = vk::ImageCreateInfo::default()
            .image_type(desc.image_type())
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { shared.raw.create_image(&image_info, None).vk("vkCreateImage")? };
        let requirements = unsafe { shared.raw.get_image_memory_requirements(image) };

        let allocation = match shared.allocate(&AllocationCreateDesc {
            name: &desc.name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { shared.raw.destroy_image(image, None) };
                return Err(e);
            }
        };

        let view = bind_and_create_view(shared, image, &allocation, desc);
        let view = match view {
            Ok(view) => view,
            Err(e) => {
                shared.free(allocation);
                unsafe { shared.raw.destroy_image(image, None) };
                return Err(e);
            }
        };

        log::trace!(
            "Image `{}` created ({}x{}x{} {:?})",
            desc.name, desc.extent.width, desc.extent.height, desc.extent.depth, desc.format
        );

        let image = Self {
            desc: desc.clone(),
            image,
            view,
            allocation: Some(allocation),
            device: shared.clone(),
        };
        image.set_debug_name();
        Ok(image)
    }

    /// Get the raw Vulkan image handle.
    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    #[inline]
    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent3D {
        self.desc.extent
    }

    #[inline]
    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.desc.extent.width,
            height: self.desc.extent.height,
        }
    }

    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        format_to_aspect_mask(self.desc.format)
    }
}

fn bind_and_create_view(
    device: &DeviceShared,
    image: vk::Image,
    allocation: &Allocation,
    desc: &ImageDesc,
) -> Result<vk::ImageView, RhiError> {
    unsafe {
        device
            .raw
            .bind_image_memory(image, allocation.memory(), allocation.offset())
            .vk("vkBindImageMemory")?;
    }

    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(desc.view_type())
        .format(desc.format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: format_to_aspect_mask(desc.format),
            base_mip_level: 0,
            level_count: desc.mip_levels,
            base_array_layer: 0,
            layer_count: desc.array_layers,
        });

    unsafe { device.raw.create_image_view(&view_info, None).vk("vkCreateImageView") }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.device.raw.destroy_image_view(self.view, None);
            self.device.raw.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            self.device.free(allocation);
        }
    }
}

impl DebuggableObject for Image {
    fn set_debug_name(&self) {
        set_debug_name_handle(&self.device, self.image, self.name());
        set_debug_name_handle(&self.device, self.view, &format!("{}.view", self.name()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_type_follows_depth_and_layers() {
        let flat = vk::Extent3D { width: 4, height: 4, depth: 1 };
        let volume = vk::Extent3D { width: 4, height: 4, depth: 4 };

        assert_eq!(view_type_for(flat, 1), vk::ImageViewType::TYPE_2D);
        assert_eq!(view_type_for(flat, 6), vk::ImageViewType::TYPE_2D_ARRAY);
        assert_eq!(view_type_for(volume, 1), vk::ImageViewType::TYPE_3D);
        assert_eq!(ImageDesc::new_2d("i", 4, 4, vk::Format::R8G8B8A8_UNORM).image_type(), vk::ImageType::TYPE_2D);
    }

    #[test]
    fn aspect_from_format() {
        assert_eq!(format_to_aspect_mask(vk::Format::R16G16B16A16_SFLOAT), vk::ImageAspectFlags::COLOR);
        assert_eq!(format_to_aspect_mask(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            format_to_aspect_mask(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }
}
