//! Vulkan Swapchain - presentable images, per-image semaphores and retired generations.
//!
//! Recreating the swapchain never destroys the previous chain on the spot.
//! The old generation (its image views, semaphores and handle) is parked in a
//! [`RetiredQueue`] tagged with `frame_counter + FRAMES_IN_FLIGHT`, and is
//! dropped by [`Swapchain::cleanup`] once that many presents have gone by, so
//! no frame slot that may still reference it is in flight anymore.

use ash::vk;
use lumen_core::log::{debug, info};
use lumen_rhi_derive::DeviceObject;
use crate::device::{set_debug_name_handle, DebuggableObject, Device, DeviceRef};
use crate::error::{RhiError, VkResultExt};
use crate::queue::Queue;
use crate::retire::RetiredQueue;
use crate::semaphore::BinarySemaphore;
use crate::FRAMES_IN_FLIGHT;

/// Swapchain configuration parameters.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainConfig {
    pub preferred_format: vk::Format,
    pub preferred_color_space: vk::ColorSpaceKHR,
    pub preferred_present_mode: vk::PresentModeKHR,
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            preferred_format: vk::Format::B8G8R8A8_SRGB,
            preferred_color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            preferred_present_mode: vk::PresentModeKHR::MAILBOX,
        }
    }
}

/// One chain with everything created for its images.
struct SwapchainGeneration {
    device: DeviceRef,
    loader: ash::khr::swapchain::Device,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    acquire_semaphores: Vec<BinarySemaphore>,
    present_semaphores: Vec<BinarySemaphore>,
}

impl Drop for SwapchainGeneration {
    fn drop(&mut self) {
        unsafe {
            for view in self.views.drain(..) {
                self.device.raw.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}

/// The presentable image chain of the context surface.
#[DeviceObject(named)]
pub struct Swapchain {
    loader: ash::khr::swapchain::Device,
    physical_device: vk::PhysicalDevice,
    config: SwapchainConfig,

    active: Option<SwapchainGeneration>,
    retired: RetiredQueue<SwapchainGeneration>,

    /// Presents issued so far.
    frame_counter: u64,
    sync_index: usize,
    image_index: u32,

    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create an uninitialized swapchain; call [`create`](Self::create) before use.
    pub fn new(device: &Device, name: &str, config: SwapchainConfig) -> Result<Self, RhiError> {
        if device.context().surface().is_none() {
            return Err(RhiError::NoSurface);
        }

        Ok(Self {
            loader: ash::khr::swapchain::Device::new(device.context().instance(), device.handle()),
            physical_device: device.adapter().handle(),
            config,
            active: None,
            retired: RetiredQueue::new(),
            frame_counter: 0,
            sync_index: 0,
            image_index: 0,
            format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
            device: device.shared().clone(),
            name: name.to_owned(),
        })
    }

    /// Build a chain for `extent`, retiring the current one if any.
    #[profiling::function]
    pub fn create(&mut self, extent: vk::Extent2D) -> Result<(), RhiError> {
        let context = self.device.context().clone();
        let surface = context.surface().ok_or(RhiError::NoSurface)?;

        // Surface properties can change between monitors or drivers, so they are queried every time.
        let (capabilities, formats, present_modes) = unsafe {
            let loader = surface.loader();
            (
                loader
                    .get_physical_device_surface_capabilities(self.physical_device, surface.handle())
                    .vk("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
                loader
                    .get_physical_device_surface_formats(self.physical_device, surface.handle())
                    .vk("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
                loader
                    .get_physical_device_surface_present_modes(self.physical_device, surface.handle())
                    .vk("vkGetPhysicalDeviceSurfacePresentModesKHR")?,
            )
        };

        let format = choose_surface_format(&formats, &self.config)
            .ok_or(vk::Result::ERROR_FORMAT_NOT_SUPPORTED)
            .vk("vkGetPhysicalDeviceSurfaceFormatsKHR")?;
        let present_mode = choose_present_mode(&present_modes, &self.config);
        let extent = swapchain_extent(&capabilities, extent);
        let image_count = image_count(&capabilities);

        info!(
            "Creating swapchain `{}`: {:?} {:?}, {}x{}, {} images, {:?}",
            self.name, format.format, format.color_space, extent.width, extent.height, image_count, present_mode
        );

        let old_handle = self.active.as_ref().map_or(vk::SwapchainKHR::null(), |active| active.handle);
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_handle);

        let handle = unsafe { self.loader.create_swapchain(&create_info, None).vk("vkCreateSwapchainKHR")? };
        let generation = self.build_generation(handle, format.format)?;

        if let Some(old) = self.active.replace(generation) {
            let fence = retirement_fence(self.frame_counter);
            debug!("Retiring swapchain generation {:?} until present #{fence}", old.handle);
            self.retired.retire(old, fence);
        }

        self.format = format;
        self.present_mode = present_mode;
        self.extent = extent;
        self.sync_index = 0;
        self.image_index = 0;
        self.set_debug_name();

        Ok(())
    }

    fn build_generation(&self, handle: vk::SwapchainKHR, format: vk::Format) -> Result<SwapchainGeneration, RhiError> {
        // The generation owns `handle` from here on, so failures below still destroy it.
        let mut generation = SwapchainGeneration {
            device: self.device.clone(),
            loader: self.loader.clone(),
            handle,
            images: Vec::new(),
            views: Vec::new(),
            acquire_semaphores: Vec::new(),
            present_semaphores: Vec::new(),
        };

        generation.images = unsafe { self.loader.get_swapchain_images(handle).vk("vkGetSwapchainImagesKHR")? };

        for (index, &image) in generation.images.iter().enumerate() {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .level_count(1)
                        .layer_count(1),
                );
            let view = unsafe { self.device.raw.create_image_view(&view_info, None).vk("vkCreateImageView")? };
            generation.views.push(view);

            set_debug_name_handle(&self.device, image, &format!("{}.image{index}", self.name));
            set_debug_name_handle(&self.device, view, &format!("{}.view{index}", self.name));

            generation
                .acquire_semaphores
                .push(BinarySemaphore::new_in(&self.device, &format!("{}.acquire{index}", self.name))?);
            generation
                .present_semaphores
                .push(BinarySemaphore::new_in(&self.device, &format!("{}.present{index}", self.name))?);
        }

        Ok(generation)
    }

    /// Acquire the next presentable image.
    ///
    /// Returns `false` when the chain is out of date or suboptimal; the caller
    /// should recreate it and skip the frame.
    #[profiling::function]
    pub fn acquire(&mut self) -> Result<bool, RhiError> {
        let Some(active) = &self.active else {
            return Ok(false);
        };

        let semaphore = active.acquire_semaphores[self.sync_index].handle();
        let result = unsafe {
            self.loader
                .acquire_next_image(active.handle, u64::MAX, semaphore, vk::Fence::null())
        };

        let result = result.map(|(image_index, suboptimal)| {
            self.image_index = image_index;
            suboptimal
        });
        classify("vkAcquireNextImageKHR", result)
    }

    /// Present the acquired image on `queue` once the present semaphore fires.
    ///
    /// Advances the frame counter whatever the outcome. Returns `false` when the
    /// chain must be recreated.
    #[profiling::function]
    pub fn present(&mut self, queue: &Queue) -> Result<bool, RhiError> {
        let Some(active) = &self.active else {
            return Ok(false);
        };

        let swapchains = [active.handle];
        let image_indices = [self.image_index];
        let wait_semaphores = [active.present_semaphores[self.image_index as usize].handle()];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.loader.queue_present(queue.handle(), &present_info) };

        self.frame_counter += 1;
        self.sync_index = (self.sync_index + 1) % active.acquire_semaphores.len();

        classify("vkQueuePresentKHR", result)
    }

    /// Destroy retired generations whose in-flight window has passed.
    pub fn cleanup(&mut self) {
        let reclaimed = self.retired.reclaim(self.frame_counter);
        if reclaimed > 0 {
            debug!(
                "Destroyed {reclaimed} retired swapchain generation(s) at present #{}, {} left",
                self.frame_counter,
                self.retired.len()
            );
        }
    }

    /// Wait on the acquire semaphore before writing the image with a transfer.
    pub fn acquire_wait_info(&self) -> Option<vk::SemaphoreSubmitInfo<'static>> {
        self.active.as_ref().map(|active| {
            active.acquire_semaphores[self.sync_index].submit_info(vk::PipelineStageFlags2::TRANSFER)
        })
    }

    /// Signal the semaphore `present` waits on.
    pub fn present_signal_info(&self) -> Option<vk::SemaphoreSubmitInfo<'static>> {
        self.active.as_ref().map(|active| {
            active.present_semaphores[self.image_index as usize].submit_info(vk::PipelineStageFlags2::ALL_COMMANDS)
        })
    }

    /// The image returned by the last successful acquire.
    pub fn current_image(&self) -> Option<vk::Image> {
        self.active.as_ref().map(|active| active.images[self.image_index as usize])
    }

    pub fn current_view(&self) -> Option<vk::ImageView> {
        self.active.as_ref().map(|active| active.views[self.image_index as usize])
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.active.as_ref().map_or(vk::SwapchainKHR::null(), |active| active.handle)
    }

    #[inline]
    pub fn image_index(&self) -> u32 { self.image_index }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.active.as_ref().map_or(0, |active| active.images.len())
    }

    #[inline]
    pub fn frame_counter(&self) -> u64 { self.frame_counter }

    #[inline]
    pub fn retired_count(&self) -> usize { self.retired.len() }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D { self.extent }

    #[inline]
    pub fn format(&self) -> vk::Format { self.format.format }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR { self.present_mode }
}

impl DebuggableObject for Swapchain {
    fn set_debug_name(&self) {
        if let Some(active) = &self.active {
            set_debug_name_handle(&self.device, active.handle, &self.name);
        }
    }
}

/// Present count from which a generation retired at `frame_counter` may be destroyed.
///
/// By then every frame slot has presented once more, so none can still use it.
fn retirement_fence(frame_counter: u64) -> u64 {
    frame_counter + FRAMES_IN_FLIGHT as u64
}

/// Split an acquire/present result into "keep going", "recreate" and fatal.
fn classify(call: &'static str, result: Result<bool, vk::Result>) -> Result<bool, RhiError> {
    match result {
        Ok(false) => Ok(true),
        Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(false),
        result => result.vk(call),
    }
}

fn choose_surface_format(formats: &[vk::SurfaceFormatKHR], config: &SwapchainConfig) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| f.format == config.preferred_format && f.color_space == config.preferred_color_space)
        .or_else(|| formats.first())
        .copied()
}

fn choose_present_mode(modes: &[vk::PresentModeKHR], config: &SwapchainConfig) -> vk::PresentModeKHR {
    if modes.contains(&config.preferred_present_mode) {
        config.preferred_present_mode
    } else {
        vk::PresentModeKHR::FIFO // Guaranteed to be available
    }
}

fn swapchain_extent(capabilities: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: requested.width.clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
            height: requested.height.clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
        }
    }
}

fn image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 2048 },
            ..Default::default()
        }
    }

    #[test]
    fn retired_generation_outlives_a_full_ring() {
        let mut retired = RetiredQueue::new();
        let counter = 7;
        retired.retire("generation", retirement_fence(counter));

        for presents in 0..FRAMES_IN_FLIGHT as u64 {
            assert_eq!(retired.reclaim(counter + presents), 0, "freed after {presents} presents");
        }
        assert_eq!(retired.reclaim(counter + FRAMES_IN_FLIGHT as u64), 1);
        assert!(retired.is_empty());
    }

    #[test]
    fn acquire_and_present_results() {
        assert!(classify("vkAcquireNextImageKHR", Ok(false)).unwrap());
        assert!(!classify("vkAcquireNextImageKHR", Ok(true)).unwrap());
        assert!(!classify("vkAcquireNextImageKHR", Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap());

        let fatal = classify("vkQueuePresentKHR", Err(vk::Result::ERROR_SURFACE_LOST_KHR)).unwrap_err();
        assert!(matches!(
            fatal,
            RhiError::Vulkan { call: "vkQueuePresentKHR", result: vk::Result::ERROR_SURFACE_LOST_KHR, .. }
        ));
        assert!(classify("vkQueuePresentKHR", Err(vk::Result::ERROR_DEVICE_LOST)).unwrap_err().is_device_lost());
    }

    #[test]
    fn preferred_format_or_first() {
        let config = SwapchainConfig::default();
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };

        assert_eq!(choose_surface_format(&[unorm, srgb], &config).unwrap().format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(choose_surface_format(&[unorm], &config).unwrap().format, vk::Format::B8G8R8A8_UNORM);
        assert!(choose_surface_format(&[], &config).is_none());
    }

    #[test]
    fn mailbox_falls_back_to_fifo() {
        let config = SwapchainConfig::default();
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX], &config),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO], &config),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_is_clamped() {
        let caps = capabilities(2, 3);
        let extent = swapchain_extent(&caps, vk::Extent2D { width: 8000, height: 0 });
        assert_eq!(extent, vk::Extent2D { width: 4096, height: 1 });

        let fixed = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: 800, height: 600 },
            ..caps
        };
        assert_eq!(swapchain_extent(&fixed, vk::Extent2D { width: 1, height: 1 }).width, 800);
    }

    #[test]
    fn one_more_image_than_minimum() {
        assert_eq!(image_count(&capabilities(2, 0)), 3);
        assert_eq!(image_count(&capabilities(2, 8)), 3);
        assert_eq!(image_count(&capabilities(3, 3)), 3);
    }
}
