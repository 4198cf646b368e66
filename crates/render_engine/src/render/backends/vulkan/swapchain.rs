//! [`PresentSurface`] implementation over a Vulkan swapchain

use std::rc::Rc;

use ash::vk::{self, Handle};

use super::device::VulkanDevice;
use super::resources::DeviceShared;
use super::{VulkanError, VulkanResult};
use crate::render::api::*;
use crate::render::RenderResult;

/// Swapchain with its images registered in the device's image table
///
/// Images are created with `TRANSFER_DST` usage so the renderer can blit its
/// offscreen target into them.
pub struct VulkanSwapchain {
    shared: Rc<DeviceShared>,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
}

impl VulkanSwapchain {
    /// Create a swapchain for the device's surface
    pub fn new(device: &VulkanDevice, window_extent: vk::Extent2D) -> VulkanResult<Self> {
        let mut swapchain = Self {
            shared: Rc::clone(device.shared()),
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            format: vk::SurfaceFormatKHR::default(),
            extent: window_extent,
        };
        swapchain.build(window_extent)?;
        Ok(swapchain)
    }

    /// Surface format in use
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    fn build(&mut self, window_extent: vk::Extent2D) -> VulkanResult<()> {
        let shared = Rc::clone(&self.shared);
        let context = &shared.context;
        let physical_device = context.physical_device();
        let surface = context.surface();
        let surface_loader = context.surface_loader();

        let surface_caps = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(physical_device.device, surface)
                .map_err(VulkanError::Api)?
        };
        let surface_formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(physical_device.device, surface)
                .map_err(VulkanError::Api)?
        };
        let format = surface_formats
            .iter()
            .find(|sf| sf.format == vk::Format::B8G8R8A8_SRGB && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .or_else(|| surface_formats.first())
            .copied()
            .ok_or_else(|| VulkanError::InitializationFailed("Surface reports no formats".to_string()))?;

        let present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(physical_device.device, surface)
                .map_err(VulkanError::Api)?
        };
        let present_mode = present_modes
            .iter()
            .copied()
            .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
            .unwrap_or(vk::PresentModeKHR::FIFO);

        let extent = if surface_caps.current_extent.width != u32::MAX {
            surface_caps.current_extent
        } else {
            vk::Extent2D {
                width: window_extent
                    .width
                    .clamp(surface_caps.min_image_extent.width, surface_caps.max_image_extent.width),
                height: window_extent
                    .height
                    .clamp(surface_caps.min_image_extent.height, surface_caps.max_image_extent.height),
            }
        };

        let image_count = if surface_caps.max_image_count > 0 {
            (surface_caps.min_image_count + 1).min(surface_caps.max_image_count)
        } else {
            surface_caps.min_image_count + 1
        };

        let families = [physical_device.graphics_family, physical_device.present_family];
        let sharing_mode = if families[0] == families[1] {
            vk::SharingMode::EXCLUSIVE
        } else {
            vk::SharingMode::CONCURRENT
        };

        let old_swapchain = self.swapchain;
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(sharing_mode)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);
        if sharing_mode == vk::SharingMode::CONCURRENT {
            create_info = create_info.queue_family_indices(&families);
        }

        let loader = context.swapchain_loader();
        let swapchain = unsafe { loader.create_swapchain(&create_info, None).map_err(VulkanError::Api)? };

        // The retired swapchain's images go away with it.
        self.release_images();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;
        self.format = format;
        self.extent = extent;

        let images = unsafe { loader.get_swapchain_images(swapchain).map_err(VulkanError::Api)? };
        for &image in &images {
            self.shared.register_external_image(image, format.format)?;
            self.images.push(image);
        }

        log::info!(
            "Swapchain ready: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            self.images.len(),
            format.format,
            present_mode
        );
        Ok(())
    }

    fn release_images(&mut self) {
        for image in self.images.drain(..) {
            self.shared.destroy_image(image);
        }
    }
}

impl PresentSurface for VulkanSwapchain {
    fn extent(&self) -> Extent2D {
        Extent2D::new(self.extent.width, self.extent.height)
    }

    fn image_count(&self) -> usize {
        self.images.len()
    }

    fn acquire_next_image(&mut self, ready: SemaphoreHandle, timeout_ns: u64) -> RenderResult<AcquireOutcome> {
        let result = unsafe {
            self.shared.context.swapchain_loader().acquire_next_image(
                self.swapchain,
                timeout_ns,
                vk::Semaphore::from_raw(ready.0),
                vk::Fence::null(),
            )
        };
        match result {
            // A suboptimal image is still usable; present reports the resize.
            Ok((index, _suboptimal)) => {
                let image = self
                    .images
                    .get(index as usize)
                    .copied()
                    .ok_or(VulkanError::ResourceNotFound { id: u64::from(index) })?;
                Ok(AcquireOutcome::Image(SwapchainImage { index, image: ImageHandle(image.as_raw()) }))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::NeedsResize),
            Err(e) => Err(VulkanError::Api(e).into()),
        }
    }

    fn present(&mut self, image_index: u32, wait: SemaphoreHandle) -> RenderResult<PresentOutcome> {
        let wait_semaphores = [vk::Semaphore::from_raw(wait.0)];
        let swapchains = [self.swapchain];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let result = unsafe {
            self.shared
                .context
                .swapchain_loader()
                .queue_present(self.shared.context.present_queue(), &present_info)
        };
        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::NeedsResize),
            Err(e) => Err(VulkanError::Api(e).into()),
        }
    }

    fn recreate(&mut self, extent: Extent2D) -> RenderResult<()> {
        log::debug!("Recreating swapchain for {}x{}", extent.width, extent.height);
        self.build(vk::Extent2D { width: extent.width, height: extent.height })?;
        Ok(())
    }
}

impl Drop for VulkanSwapchain {
    fn drop(&mut self) {
        self.release_images();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe { self.shared.context.swapchain_loader().destroy_swapchain(self.swapchain, None) };
        }
    }
}
