//! Memory-backed resources of the Vulkan device
//!
//! Buffers and images get one dedicated allocation each. Host-visible
//! buffers stay mapped for their whole life. Device-local contents are
//! filled through a staging buffer and a one-shot submission on the upload
//! context.

use std::cell::RefCell;
use std::collections::HashMap;

use ash::vk;
use slotmap::{new_key_type, SlotMap};

use super::context::VulkanContext;
use super::conversions;
use super::{VulkanError, VulkanResult};
use crate::render::api::{BufferDesc, MemoryLocation};

new_key_type! {
    /// Key of a render target in the device's table
    pub(super) struct TargetKey;
}

/// A buffer's memory and mapping
pub(super) struct BufferAllocation {
    pub memory: vk::DeviceMemory,
    pub size: u64,
    pub mapped: Option<*mut u8>,
    pub address: u64,
    pub label: String,
}

/// An image's view and, for images the device created, its memory
pub(super) struct ImageAllocation {
    pub view: vk::ImageView,
    pub memory: Option<vk::DeviceMemory>,
}

/// Attachments of a render target and the pass that writes them
pub(super) struct RenderTarget {
    pub label: String,
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub colors: Vec<vk::Image>,
    pub depth: Option<vk::Image>,
}

/// Command pool, buffer and fence for blocking uploads
struct UploadContext {
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
    fence: vk::Fence,
}

/// State shared by [`VulkanDevice`](super::VulkanDevice) and
/// [`VulkanSwapchain`](super::VulkanSwapchain)
pub(super) struct DeviceShared {
    pub context: VulkanContext,
    pub buffers: RefCell<HashMap<vk::Buffer, BufferAllocation>>,
    pub images: RefCell<HashMap<vk::Image, ImageAllocation>>,
    pub targets: RefCell<SlotMap<TargetKey, RenderTarget>>,
    upload: UploadContext,
}

impl DeviceShared {
    pub fn new(context: VulkanContext) -> VulkanResult<Self> {
        let device = context.device();
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(context.graphics_family());
        let pool = unsafe { device.create_command_pool(&pool_info, None).map_err(VulkanError::Api)? };

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let fence_info = vk::FenceCreateInfo::builder();
        let created = unsafe {
            device
                .allocate_command_buffers(&alloc_info)
                .and_then(|buffers| device.create_fence(&fence_info, None).map(|fence| (buffers[0], fence)))
        };
        let (buffer, fence) = match created {
            Ok(pair) => pair,
            Err(e) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(VulkanError::Api(e));
            }
        };

        Ok(Self {
            context,
            buffers: RefCell::new(HashMap::new()),
            images: RefCell::new(HashMap::new()),
            targets: RefCell::new(SlotMap::with_key()),
            upload: UploadContext { pool, buffer, fence },
        })
    }

    pub fn device(&self) -> &ash::Device {
        self.context.device()
    }

    /// Record commands with `record`, submit them and wait for completion
    pub fn immediate_submit(&self, record: impl FnOnce(vk::CommandBuffer)) -> VulkanResult<()> {
        let device = self.device();
        let upload = &self.upload;
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            device
                .reset_command_pool(upload.pool, vk::CommandPoolResetFlags::empty())
                .map_err(VulkanError::Api)?;
            device.begin_command_buffer(upload.buffer, &begin_info).map_err(VulkanError::Api)?;
        }
        record(upload.buffer);

        let command_buffers = [upload.buffer];
        let submit = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
        unsafe {
            device.end_command_buffer(upload.buffer).map_err(VulkanError::Api)?;
            device
                .queue_submit(self.context.graphics_queue(), &[submit], upload.fence)
                .map_err(VulkanError::Api)?;
            device.wait_for_fences(&[upload.fence], true, u64::MAX).map_err(VulkanError::Api)?;
            device.reset_fences(&[upload.fence]).map_err(VulkanError::Api)?;
        }
        Ok(())
    }

    /// Allocate and bind memory for `buffer`, mapping it when host visible
    pub fn create_buffer(&self, desc: &BufferDesc) -> VulkanResult<vk::Buffer> {
        if desc.size == 0 {
            return Err(VulkanError::InvalidOperation { reason: format!("buffer '{}' has zero size", desc.label) });
        }
        let device = self.device();
        let usage = conversions::buffer_usage(desc.usage, desc.location);
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(desc.size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&buffer_info, None).map_err(VulkanError::Api)? };

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let wants_address = usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS);
        let memory = match self.allocate(requirements, conversions::memory_properties(desc.location), wants_address) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let bound = unsafe {
            device.bind_buffer_memory(buffer, memory, 0).and_then(|()| match desc.location {
                MemoryLocation::CpuToGpu => device
                    .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                    .map(|ptr| Some(ptr.cast::<u8>())),
                MemoryLocation::GpuOnly => Ok(None),
            })
        };
        let mapped = match bound {
            Ok(mapped) => mapped,
            Err(e) => {
                unsafe {
                    device.destroy_buffer(buffer, None);
                    device.free_memory(memory, None);
                }
                return Err(VulkanError::Api(e));
            }
        };

        let address = if wants_address {
            let info = vk::BufferDeviceAddressInfo::builder().buffer(buffer);
            unsafe { device.get_buffer_device_address(&info) }
        } else {
            0
        };

        self.buffers.borrow_mut().insert(
            buffer,
            BufferAllocation { memory, size: desc.size, mapped, address, label: desc.label.clone() },
        );
        log::trace!("Created buffer '{}' ({} bytes)", desc.label, desc.size);
        Ok(buffer)
    }

    pub fn destroy_buffer(&self, buffer: vk::Buffer) {
        let Some(allocation) = self.buffers.borrow_mut().remove(&buffer) else {
            log::error!("destroy_buffer: unknown buffer {buffer:?}");
            return;
        };
        let device = self.device();
        unsafe {
            if allocation.mapped.is_some() {
                device.unmap_memory(allocation.memory);
            }
            device.destroy_buffer(buffer, None);
            device.free_memory(allocation.memory, None);
        }
    }

    /// Copy `data` into a device-local buffer through a staging buffer
    pub fn upload_to_buffer(&self, buffer: vk::Buffer, data: &[u8]) -> VulkanResult<()> {
        let size = self
            .buffers
            .borrow()
            .get(&buffer)
            .map(|allocation| allocation.size)
            .ok_or(VulkanError::ResourceNotFound { id: ash::vk::Handle::as_raw(buffer) })?;
        if data.len() as u64 > size {
            return Err(VulkanError::InvalidOperation {
                reason: format!("upload of {} bytes into a {size}-byte buffer", data.len()),
            });
        }

        self.with_staging(data, |staging, cmd| {
            let region = vk::BufferCopy { src_offset: 0, dst_offset: 0, size: data.len() as u64 };
            unsafe { self.device().cmd_copy_buffer(cmd, staging, buffer, &[region]) };
        })
    }

    /// Run `record` in a one-shot submission with `data` in a staging buffer
    pub fn with_staging(&self, data: &[u8], record: impl FnOnce(vk::Buffer, vk::CommandBuffer)) -> VulkanResult<()> {
        let staging = self.create_buffer(&BufferDesc {
            label: "staging".to_string(),
            size: data.len() as u64,
            usage: crate::render::api::BufferUsage::TRANSFER_SRC,
            location: MemoryLocation::CpuToGpu,
        })?;
        let result = self.write_mapped(staging, 0, data).and_then(|()| self.immediate_submit(|cmd| record(staging, cmd)));
        self.destroy_buffer(staging);
        result
    }

    /// Copy `data` into a mapped buffer at `offset`
    pub fn write_mapped(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) -> VulkanResult<()> {
        let buffers = self.buffers.borrow();
        let allocation = buffers
            .get(&buffer)
            .ok_or(VulkanError::ResourceNotFound { id: ash::vk::Handle::as_raw(buffer) })?;
        let Some(mapped) = allocation.mapped else {
            return Err(VulkanError::InvalidOperation {
                reason: format!("buffer '{}' is not host visible", allocation.label),
            });
        };
        if offset + data.len() as u64 > allocation.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "write of {} bytes at {offset} overflows buffer '{}' ({} bytes)",
                    data.len(),
                    allocation.label,
                    allocation.size
                ),
            });
        }
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.add(offset as usize), data.len()) };
        Ok(())
    }

    /// Create a 2D image with one mip level, its memory and a view
    pub fn create_image(
        &self,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> VulkanResult<vk::Image> {
        let device = self.device();
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D { width: extent.width, height: extent.height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { device.create_image(&image_info, None).map_err(VulkanError::Api)? };

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory = match self
            .allocate(requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL, false)
            .and_then(|memory| unsafe {
                device.bind_image_memory(image, memory, 0).map(|()| memory).map_err(|e| {
                    device.free_memory(memory, None);
                    VulkanError::Api(e)
                })
            }) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        match self.create_view(image, format, aspect) {
            Ok(view) => {
                self.images.borrow_mut().insert(image, ImageAllocation { view, memory: Some(memory) });
                Ok(image)
            }
            Err(e) => {
                unsafe {
                    device.destroy_image(image, None);
                    device.free_memory(memory, None);
                }
                Err(e)
            }
        }
    }

    /// Create a view for an image the device does not own (swapchain images)
    pub fn register_external_image(&self, image: vk::Image, format: vk::Format) -> VulkanResult<()> {
        let view = self.create_view(image, format, vk::ImageAspectFlags::COLOR)?;
        self.images.borrow_mut().insert(image, ImageAllocation { view, memory: None });
        Ok(())
    }

    pub fn destroy_image(&self, image: vk::Image) {
        let Some(allocation) = self.images.borrow_mut().remove(&image) else {
            log::error!("destroy_image: unknown image {image:?}");
            return;
        };
        let device = self.device();
        unsafe {
            device.destroy_image_view(allocation.view, None);
            if let Some(memory) = allocation.memory {
                device.destroy_image(image, None);
                device.free_memory(memory, None);
            }
        }
    }

    pub fn image_view(&self, image: vk::Image) -> Option<vk::ImageView> {
        self.images.borrow().get(&image).map(|allocation| allocation.view)
    }

    fn create_view(&self, image: vk::Image, format: vk::Format, aspect: vk::ImageAspectFlags) -> VulkanResult<vk::ImageView> {
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(conversions::subresource_range(aspect));
        unsafe { self.device().create_image_view(&view_info, None).map_err(VulkanError::Api) }
    }

    fn allocate(
        &self,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
        device_address: bool,
    ) -> VulkanResult<vk::DeviceMemory> {
        let memory_type = self.context.find_memory_type(requirements.memory_type_bits, properties)?;
        let mut flags_info = vk::MemoryAllocateFlagsInfo::builder().flags(vk::MemoryAllocateFlags::DEVICE_ADDRESS);
        let mut alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        if device_address {
            alloc_info = alloc_info.push_next(&mut flags_info);
        }
        unsafe { self.device().allocate_memory(&alloc_info, None).map_err(VulkanError::Api) }
    }
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        let device = self.context.device();
        unsafe {
            let _ = device.device_wait_idle();
            device.destroy_fence(self.upload.fence, None);
            device.destroy_command_pool(self.upload.pool, None);
        }

        let buffers = self.buffers.get_mut().len();
        let images = self.images.get_mut().values().filter(|image| image.memory.is_some()).count();
        let targets = self.targets.get_mut().len();
        if buffers + images + targets > 0 {
            log::warn!("Vulkan device dropped with {buffers} buffers, {images} images and {targets} targets still alive");
        }
    }
}
