//! Mapping between renderer API types and Vulkan enums

use ash::vk;

use crate::render::api::*;

pub(super) fn format(format: Format) -> vk::Format {
    match format {
        Format::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        Format::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        Format::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        Format::Depth32Float => vk::Format::D32_SFLOAT,
    }
}

pub(super) fn bytes_per_pixel(format: Format) -> u64 {
    match format {
        Format::Rgba8Unorm | Format::Rgba8Srgb | Format::Bgra8Srgb | Format::Depth32Float => 4,
        Format::Rgba16Float => 8,
    }
}

pub(super) fn extent(extent: Extent2D) -> vk::Extent2D {
    vk::Extent2D { width: extent.width, height: extent.height }
}

pub(super) fn buffer_usage(usage: BufferUsage, location: MemoryLocation) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::TRANSFER_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::DEVICE_ADDRESS) {
        flags |= vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
    }
    // Device-local buffers are only ever filled by a staging copy.
    if usage.contains(BufferUsage::TRANSFER_DST) || location == MemoryLocation::GpuOnly {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    flags
}

pub(super) fn memory_properties(location: MemoryLocation) -> vk::MemoryPropertyFlags {
    match location {
        MemoryLocation::GpuOnly => vk::MemoryPropertyFlags::DEVICE_LOCAL,
        MemoryLocation::CpuToGpu => vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    }
}

pub(super) fn shader_stages(stages: ShaderStages) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStages::VERTEX) {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    flags
}

pub(super) fn descriptor_type(ty: DescriptorType) -> vk::DescriptorType {
    match ty {
        DescriptorType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorType::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    }
}

pub(super) fn filter(filter: Filter) -> vk::Filter {
    match filter {
        Filter::Nearest => vk::Filter::NEAREST,
        Filter::Linear => vk::Filter::LINEAR,
    }
}

pub(super) fn cull_mode(cull: CullMode) -> vk::CullModeFlags {
    match cull {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Back => vk::CullModeFlags::BACK,
        CullMode::Front => vk::CullModeFlags::FRONT,
    }
}

pub(super) fn aspect(aspect: ImageAspect) -> vk::ImageAspectFlags {
    match aspect {
        ImageAspect::Color => vk::ImageAspectFlags::COLOR,
        ImageAspect::Depth => vk::ImageAspectFlags::DEPTH,
    }
}

/// Layout, pipeline stages and access mask that go with an [`ImageLayout`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct LayoutUsage {
    pub layout: vk::ImageLayout,
    pub stages: vk::PipelineStageFlags,
    pub access: vk::AccessFlags,
}

pub(super) fn layout_usage(layout: ImageLayout) -> LayoutUsage {
    let (layout, stages, access) = match layout {
        ImageLayout::Undefined => (
            vk::ImageLayout::UNDEFINED,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::AccessFlags::empty(),
        ),
        ImageLayout::ColorAttachment => (
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        ImageLayout::DepthAttachment => (
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        ImageLayout::ShaderRead => (
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::SHADER_READ,
        ),
        ImageLayout::TransferSrc => (
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_READ,
        ),
        ImageLayout::TransferDst => (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        ),
        ImageLayout::Present => (
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::AccessFlags::empty(),
        ),
    };
    LayoutUsage { layout, stages, access }
}

/// Build the Vulkan barrier for a layout transition
pub(super) fn image_barrier(
    image: vk::Image,
    barrier: &ImageBarrier,
) -> (vk::PipelineStageFlags, vk::PipelineStageFlags, vk::ImageMemoryBarrier) {
    let old = layout_usage(barrier.old_layout);
    let new = layout_usage(barrier.new_layout);
    let vk_barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old.layout)
        .new_layout(new.layout)
        .src_access_mask(old.access)
        .dst_access_mask(new.access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range(aspect(barrier.aspect)))
        .build();
    // From Undefined, wait on the destination stage so the transition chains
    // with a semaphore wait at that stage.
    let src_stages = if barrier.old_layout == ImageLayout::Undefined { new.stages } else { old.stages };
    (src_stages, new.stages, vk_barrier)
}

pub(super) fn subresource_range(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_only_buffers_accept_copies() {
        let flags = buffer_usage(BufferUsage::INDEX, MemoryLocation::GpuOnly);
        assert!(flags.contains(vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST));

        let flags = buffer_usage(BufferUsage::UNIFORM, MemoryLocation::CpuToGpu);
        assert_eq!(flags, vk::BufferUsageFlags::UNIFORM_BUFFER);
    }

    #[test]
    fn test_shadow_map_barrier_waits_for_depth_writes() {
        let barrier = ImageBarrier::depth(ImageHandle(1), ImageLayout::DepthAttachment, ImageLayout::ShaderRead);
        let (src, dst, vk_barrier) = image_barrier(vk::Image::null(), &barrier);

        assert!(src.contains(vk::PipelineStageFlags::LATE_FRAGMENT_TESTS));
        assert_eq!(dst, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(vk_barrier.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(vk_barrier.subresource_range.aspect_mask, vk::ImageAspectFlags::DEPTH);
        assert!(vk_barrier.src_access_mask.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }

    #[test]
    fn test_present_transition_after_blit() {
        let barrier = ImageBarrier::color(ImageHandle(1), ImageLayout::TransferDst, ImageLayout::Present);
        let (src, dst, vk_barrier) = image_barrier(vk::Image::null(), &barrier);

        assert_eq!(src, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(dst, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
        assert_eq!(vk_barrier.old_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(vk_barrier.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn test_half_float_targets_use_eight_bytes() {
        assert_eq!(bytes_per_pixel(Format::Rgba16Float), 8);
        assert_eq!(format(Format::Depth32Float), vk::Format::D32_SFLOAT);
    }
}
