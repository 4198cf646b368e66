//! [`GpuDevice`] implementation over Vulkan

use std::io::Cursor;
use std::rc::Rc;

use ash::vk::{self, Handle};
use slotmap::{Key, KeyData};

use super::context::VulkanContext;
use super::conversions;
use super::resources::{DeviceShared, RenderTarget, TargetKey};
use super::{VulkanError, VulkanResult};
use crate::render::api::*;
use crate::render::{RenderError, RenderResult};

const SHADER_ENTRY: &std::ffi::CStr = c"main";

/// Vulkan device
///
/// Cheap to clone; clones share the same resource tables.
#[derive(Clone)]
pub struct VulkanDevice {
    shared: Rc<DeviceShared>,
}

impl VulkanDevice {
    /// Wrap an initialized context
    pub fn new(context: VulkanContext) -> VulkanResult<Self> {
        log::info!(
            "Vulkan device ready on {} (API {}.{})",
            context.physical_device().name(),
            vk::api_version_major(context.physical_device().properties.api_version),
            vk::api_version_minor(context.physical_device().properties.api_version),
        );
        Ok(Self { shared: Rc::new(DeviceShared::new(context)?) })
    }

    pub(super) fn shared(&self) -> &Rc<DeviceShared> {
        &self.shared
    }

    fn device(&self) -> &ash::Device {
        self.shared.device()
    }

    fn with_target<T>(&self, target: RenderTargetHandle, f: impl FnOnce(&RenderTarget) -> T) -> Option<T> {
        let targets = self.shared.targets.borrow();
        let found = targets.get(target_key(target)).map(f);
        if found.is_none() {
            log::error!("Unknown render target {:#x}", target.0);
        }
        found
    }

    fn create_render_pass(&self, desc: &RenderTargetDesc) -> VulkanResult<vk::RenderPass> {
        let mut attachments: Vec<vk::AttachmentDescription> = desc
            .color_formats
            .iter()
            .map(|&format| attachment(conversions::format(format), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
            .collect();
        let color_refs: Vec<vk::AttachmentReference> = (0..desc.color_formats.len() as u32)
            .map(|i| vk::AttachmentReference { attachment: i, layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL })
            .collect();
        let depth_ref = desc.depth_format.map(|format| {
            attachments.push(attachment(
                conversions::format(format),
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ));
            vk::AttachmentReference {
                attachment: color_refs.len() as u32,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            }
        });

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth_ref) = depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }

        let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        // Previous frames may still sample or blit the attachments.
        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(attachment_stages | vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::TRANSFER)
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
            .dst_stage_mask(attachment_stages)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_READ
                    | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
            .build();

        let subpasses = [subpass.build()];
        let dependencies = [dependency];
        let info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        unsafe { self.device().create_render_pass(&info, None).map_err(VulkanError::Api) }
    }

    fn build_render_target(&self, desc: &RenderTargetDesc, target: &mut RenderTarget) -> VulkanResult<()> {
        let extent = conversions::extent(desc.extent);
        for &format in &desc.color_formats {
            target.colors.push(self.shared.create_image(
                extent,
                conversions::format(format),
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_SRC,
                vk::ImageAspectFlags::COLOR,
            )?);
        }
        if let Some(format) = desc.depth_format {
            target.depth = Some(self.shared.create_image(
                extent,
                conversions::format(format),
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
                vk::ImageAspectFlags::DEPTH,
            )?);
        }

        target.render_pass = self.create_render_pass(desc)?;

        let views = target
            .colors
            .iter()
            .chain(target.depth.iter())
            .map(|&image| {
                self.shared
                    .image_view(image)
                    .ok_or(VulkanError::ResourceNotFound { id: image.as_raw() })
            })
            .collect::<VulkanResult<Vec<_>>>()?;
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(target.render_pass)
            .attachments(&views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        target.framebuffer =
            unsafe { self.device().create_framebuffer(&framebuffer_info, None).map_err(VulkanError::Api)? };
        Ok(())
    }

    fn release_render_target(&self, target: RenderTarget) {
        let device = self.device();
        unsafe {
            if target.framebuffer != vk::Framebuffer::null() {
                device.destroy_framebuffer(target.framebuffer, None);
            }
            if target.render_pass != vk::RenderPass::null() {
                device.destroy_render_pass(target.render_pass, None);
            }
        }
        for image in target.colors.into_iter().chain(target.depth) {
            self.shared.destroy_image(image);
        }
    }
}

impl CommandRecorder for VulkanDevice {
    fn cmd_begin_pass(&self, cmd: CommandBufferHandle, info: &PassBeginInfo) {
        let Some((render_pass, framebuffer, color_count, has_depth)) = self.with_target(info.target, |target| {
            (target.render_pass, target.framebuffer, target.colors.len(), target.depth.is_some())
        }) else {
            return;
        };

        let mut clear_values = vec![vk::ClearValue { color: vk::ClearColorValue { float32: info.clear_color } }; color_count];
        if has_depth {
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: info.clear_depth, stencil: 0 },
            });
        }

        let extent = conversions::extent(info.extent);
        let render_area = vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent };
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        let cmd = vk::CommandBuffer::from_raw(cmd.0);
        unsafe {
            self.device().cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
            self.device().cmd_set_viewport(cmd, 0, &[viewport]);
            self.device().cmd_set_scissor(cmd, 0, &[render_area]);
        }
    }

    fn cmd_end_pass(&self, cmd: CommandBufferHandle) {
        unsafe { self.device().cmd_end_render_pass(vk::CommandBuffer::from_raw(cmd.0)) };
    }

    fn cmd_bind_pipeline(&self, cmd: CommandBufferHandle, pipeline: PipelineHandle) {
        unsafe {
            self.device().cmd_bind_pipeline(
                vk::CommandBuffer::from_raw(cmd.0),
                vk::PipelineBindPoint::GRAPHICS,
                vk::Pipeline::from_raw(pipeline.0),
            );
        }
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        set_index: u32,
        set: DescriptorSetHandle,
    ) {
        unsafe {
            self.device().cmd_bind_descriptor_sets(
                vk::CommandBuffer::from_raw(cmd.0),
                vk::PipelineBindPoint::GRAPHICS,
                vk::PipelineLayout::from_raw(layout.0),
                set_index,
                &[vk::DescriptorSet::from_raw(set.0)],
                &[],
            );
        }
    }

    fn cmd_bind_index_buffer(&self, cmd: CommandBufferHandle, buffer: BufferHandle) {
        unsafe {
            self.device().cmd_bind_index_buffer(
                vk::CommandBuffer::from_raw(cmd.0),
                vk::Buffer::from_raw(buffer.0),
                0,
                vk::IndexType::UINT32,
            );
        }
    }

    fn cmd_push_constants(&self, cmd: CommandBufferHandle, layout: PipelineLayoutHandle, data: &[u8]) {
        unsafe {
            self.device().cmd_push_constants(
                vk::CommandBuffer::from_raw(cmd.0),
                vk::PipelineLayout::from_raw(layout.0),
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                data,
            );
        }
    }

    fn cmd_draw_indexed(&self, cmd: CommandBufferHandle, index_count: u32, first_index: u32) {
        unsafe {
            self.device()
                .cmd_draw_indexed(vk::CommandBuffer::from_raw(cmd.0), index_count, 1, first_index, 0, 0);
        }
    }

    fn cmd_draw(&self, cmd: CommandBufferHandle, vertex_count: u32) {
        unsafe { self.device().cmd_draw(vk::CommandBuffer::from_raw(cmd.0), vertex_count, 1, 0, 0) };
    }

    fn cmd_set_depth_bias(&self, cmd: CommandBufferHandle, constant_factor: f32, slope_factor: f32) {
        unsafe {
            self.device()
                .cmd_set_depth_bias(vk::CommandBuffer::from_raw(cmd.0), constant_factor, 0.0, slope_factor);
        }
    }

    fn cmd_image_barrier(&self, cmd: CommandBufferHandle, barrier: &ImageBarrier) {
        let (src_stages, dst_stages, vk_barrier) = conversions::image_barrier(vk::Image::from_raw(barrier.image.0), barrier);
        unsafe {
            self.device().cmd_pipeline_barrier(
                vk::CommandBuffer::from_raw(cmd.0),
                src_stages,
                dst_stages,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[vk_barrier],
            );
        }
    }

    fn cmd_blit_image(
        &self,
        cmd: CommandBufferHandle,
        src: ImageHandle,
        src_extent: Extent2D,
        dst: ImageHandle,
        dst_extent: Extent2D,
    ) {
        let layers = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let corner = |extent: Extent2D| vk::Offset3D { x: extent.width as i32, y: extent.height as i32, z: 1 };
        let region = vk::ImageBlit {
            src_subresource: layers,
            src_offsets: [vk::Offset3D::default(), corner(src_extent)],
            dst_subresource: layers,
            dst_offsets: [vk::Offset3D::default(), corner(dst_extent)],
        };
        unsafe {
            self.device().cmd_blit_image(
                vk::CommandBuffer::from_raw(cmd.0),
                vk::Image::from_raw(src.0),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::Image::from_raw(dst.0),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
                vk::Filter::LINEAR,
            );
        }
    }
}

impl GpuDevice for VulkanDevice {
    fn create_buffer(&self, desc: &BufferDesc) -> RenderResult<BufferHandle> {
        Ok(BufferHandle(self.shared.create_buffer(desc)?.as_raw()))
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()> {
        Ok(self.shared.write_mapped(vk::Buffer::from_raw(buffer.0), offset, data)?)
    }

    fn upload_buffer(&self, buffer: BufferHandle, data: &[u8]) -> RenderResult<()> {
        Ok(self.shared.upload_to_buffer(vk::Buffer::from_raw(buffer.0), data)?)
    }

    fn buffer_device_address(&self, buffer: BufferHandle) -> u64 {
        self.shared
            .buffers
            .borrow()
            .get(&vk::Buffer::from_raw(buffer.0))
            .map_or(0, |allocation| allocation.address)
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        self.shared.destroy_buffer(vk::Buffer::from_raw(buffer.0));
    }

    fn create_texture(&self, desc: &TextureDesc, pixels: &[u8]) -> RenderResult<ImageHandle> {
        let expected = u64::from(desc.extent.width) * u64::from(desc.extent.height) * conversions::bytes_per_pixel(desc.format);
        if desc.extent.is_empty() || pixels.len() as u64 != expected {
            return Err(RenderError::ResourceCreationFailed(format!(
                "texture '{}': expected {expected} bytes of pixels, got {}",
                desc.label,
                pixels.len()
            )));
        }

        let extent = conversions::extent(desc.extent);
        let image = self.shared.create_image(
            extent,
            conversions::format(desc.format),
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            vk::ImageAspectFlags::COLOR,
        )?;

        let device = self.device();
        let uploaded = self.shared.with_staging(pixels, |staging, cmd| {
            let to_transfer = ImageBarrier::color(ImageHandle(image.as_raw()), ImageLayout::Undefined, ImageLayout::TransferDst);
            let to_shader = ImageBarrier::color(ImageHandle(image.as_raw()), ImageLayout::TransferDst, ImageLayout::ShaderRead);
            let copy = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D { width: extent.width, height: extent.height, depth: 1 },
            };
            let handle = CommandBufferHandle(cmd.as_raw());
            self.cmd_image_barrier(handle, &to_transfer);
            unsafe {
                device.cmd_copy_buffer_to_image(cmd, staging, image, vk::ImageLayout::TRANSFER_DST_OPTIMAL, &[copy]);
            }
            self.cmd_image_barrier(handle, &to_shader);
        });

        if let Err(e) = uploaded {
            self.shared.destroy_image(image);
            return Err(e.into());
        }
        log::debug!("Uploaded texture '{}' ({}x{})", desc.label, extent.width, extent.height);
        Ok(ImageHandle(image.as_raw()))
    }

    fn destroy_texture(&self, image: ImageHandle) {
        self.shared.destroy_image(vk::Image::from_raw(image.0));
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> RenderResult<SamplerHandle> {
        let filter = conversions::filter(desc.filter);
        let address_mode = if desc.clamp_to_edge {
            vk::SamplerAddressMode::CLAMP_TO_EDGE
        } else {
            vk::SamplerAddressMode::REPEAT
        };
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(filter)
            .min_filter(filter)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .max_lod(0.0)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE);
        let sampler = unsafe { self.device().create_sampler(&info, None).map_err(VulkanError::Api)? };
        Ok(SamplerHandle(sampler.as_raw()))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        unsafe { self.device().destroy_sampler(vk::Sampler::from_raw(sampler.0), None) };
    }

    fn create_render_target(&self, desc: &RenderTargetDesc) -> RenderResult<RenderTargetHandle> {
        if desc.extent.is_empty() || (desc.color_formats.is_empty() && desc.depth_format.is_none()) {
            return Err(RenderError::ResourceCreationFailed(format!(
                "render target '{}' has no size or no attachments",
                desc.label
            )));
        }

        let mut target = RenderTarget {
            label: desc.label.clone(),
            render_pass: vk::RenderPass::null(),
            framebuffer: vk::Framebuffer::null(),
            colors: Vec::with_capacity(desc.color_formats.len()),
            depth: None,
        };
        if let Err(e) = self.build_render_target(desc, &mut target) {
            self.release_render_target(target);
            return Err(e.into());
        }

        log::debug!(
            "Created render target '{}' ({}x{}, {} color attachments{})",
            desc.label,
            desc.extent.width,
            desc.extent.height,
            desc.color_formats.len(),
            if desc.depth_format.is_some() { " + depth" } else { "" }
        );
        let key = self.shared.targets.borrow_mut().insert(target);
        Ok(RenderTargetHandle(key.data().as_ffi()))
    }

    fn render_target_color(&self, target: RenderTargetHandle, index: usize) -> ImageHandle {
        self.with_target(target, |target| target.colors.get(index).map(|image| ImageHandle(image.as_raw())))
            .flatten()
            .unwrap_or(ImageHandle::NULL)
    }

    fn render_target_depth(&self, target: RenderTargetHandle) -> Option<ImageHandle> {
        self.with_target(target, |target| target.depth.map(|image| ImageHandle(image.as_raw())))
            .flatten()
    }

    fn destroy_render_target(&self, target: RenderTargetHandle) {
        let removed = self.shared.targets.borrow_mut().remove(target_key(target));
        match removed {
            Some(target) => {
                log::debug!("Destroying render target '{}'", target.label);
                self.release_render_target(target);
            }
            None => log::error!("destroy_render_target: unknown target {:#x}", target.0),
        }
    }

    fn create_shader_module(&self, spirv: &[u8]) -> RenderResult<ShaderModuleHandle> {
        let code = ash::util::read_spv(&mut Cursor::new(spirv))
            .map_err(|e| RenderError::ResourceCreationFailed(format!("invalid SPIR-V: {e}")))?;
        let info = vk::ShaderModuleCreateInfo::builder().code(&code);
        let module = unsafe { self.device().create_shader_module(&info, None).map_err(VulkanError::Api)? };
        Ok(ShaderModuleHandle(module.as_raw()))
    }

    fn destroy_shader_module(&self, module: ShaderModuleHandle) {
        unsafe { self.device().destroy_shader_module(vk::ShaderModule::from_raw(module.0), None) };
    }

    fn create_descriptor_layout(&self, bindings: &[DescriptorBinding]) -> RenderResult<DescriptorLayoutHandle> {
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding.binding)
                    .descriptor_type(conversions::descriptor_type(binding.ty))
                    .descriptor_count(1)
                    .stage_flags(conversions::shader_stages(binding.stages))
                    .build()
            })
            .collect();
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&vk_bindings);
        let layout = unsafe { self.device().create_descriptor_set_layout(&info, None).map_err(VulkanError::Api)? };
        Ok(DescriptorLayoutHandle(layout.as_raw()))
    }

    fn destroy_descriptor_layout(&self, layout: DescriptorLayoutHandle) {
        unsafe {
            self.device()
                .destroy_descriptor_set_layout(vk::DescriptorSetLayout::from_raw(layout.0), None);
        }
    }

    fn create_pipeline_layout(&self, desc: &PipelineLayoutDesc) -> RenderResult<PipelineLayoutHandle> {
        let set_layouts: Vec<vk::DescriptorSetLayout> = desc
            .set_layouts
            .iter()
            .map(|layout| vk::DescriptorSetLayout::from_raw(layout.0))
            .collect();
        let ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: desc.push_constant_size,
        }];
        let push_ranges: &[vk::PushConstantRange] = if desc.push_constant_size > 0 { &ranges } else { &[] };
        let info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(push_ranges);
        let layout = unsafe { self.device().create_pipeline_layout(&info, None).map_err(VulkanError::Api)? };
        Ok(PipelineLayoutHandle(layout.as_raw()))
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle) {
        unsafe { self.device().destroy_pipeline_layout(vk::PipelineLayout::from_raw(layout.0), None) };
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> RenderResult<PipelineHandle> {
        let (render_pass, color_count) = self
            .with_target(desc.target, |target| (target.render_pass, target.colors.len()))
            .ok_or_else(|| RenderError::ResourceCreationFailed(format!("pipeline '{}': unknown target", desc.label)))?;

        let mut stages = vec![vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vk::ShaderModule::from_raw(desc.vertex_shader.0))
            .name(SHADER_ENTRY)
            .build()];
        if let Some(fragment) = desc.fragment_shader {
            stages.push(
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(vk::ShaderStageFlags::FRAGMENT)
                    .module(vk::ShaderModule::from_raw(fragment.0))
                    .name(SHADER_ENTRY)
                    .build(),
            );
        }

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder();
        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::builder().topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(conversions::cull_mode(desc.cull))
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(desc.dynamic_depth_bias)
            .line_width(1.0);
        let multisample =
            vk::PipelineMultisampleStateCreateInfo::builder().rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(desc.depth.test)
            .depth_write_enable(desc.depth.write)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);

        let blend_attachment = match desc.blend {
            BlendMode::Opaque => vk::PipelineColorBlendAttachmentState::builder()
                .blend_enable(false)
                .color_write_mask(vk::ColorComponentFlags::RGBA),
            BlendMode::AlphaBlend => vk::PipelineColorBlendAttachmentState::builder()
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .alpha_blend_op(vk::BlendOp::ADD)
                .color_write_mask(vk::ColorComponentFlags::RGBA),
        }
        .build();
        let blend_attachments = vec![blend_attachment; color_count];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachments);

        let mut dynamic_states = vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        if desc.dynamic_depth_bias {
            dynamic_states.push(vk::DynamicState::DEPTH_BIAS);
        }
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(vk::PipelineLayout::from_raw(desc.layout.0))
            .render_pass(render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe {
            self.device()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
                .map_err(|(_, e)| VulkanError::Api(e))?
        };
        let pipeline = pipelines
            .first()
            .copied()
            .ok_or_else(|| RenderError::ResourceCreationFailed(format!("pipeline '{}' was not created", desc.label)))?;
        log::debug!("Created pipeline '{}'", desc.label);
        Ok(PipelineHandle(pipeline.as_raw()))
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        unsafe { self.device().destroy_pipeline(vk::Pipeline::from_raw(pipeline.0), None) };
    }

    fn create_descriptor_pool(&self, max_sets: u32, ratios: &[PoolSizeRatio]) -> RenderResult<DescriptorPoolHandle> {
        let sizes: Vec<vk::DescriptorPoolSize> = ratios
            .iter()
            .map(|ratio| vk::DescriptorPoolSize {
                ty: conversions::descriptor_type(ratio.ty),
                descriptor_count: ((ratio.ratio * max_sets as f32).ceil() as u32).max(1),
            })
            .collect();
        let info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(&sizes);
        let pool = unsafe { self.device().create_descriptor_pool(&info, None).map_err(VulkanError::Api)? };
        Ok(DescriptorPoolHandle(pool.as_raw()))
    }

    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorLayoutHandle,
    ) -> Result<DescriptorSetHandle, AllocationError> {
        let layouts = [vk::DescriptorSetLayout::from_raw(layout.0)];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(vk::DescriptorPool::from_raw(pool.0))
            .set_layouts(&layouts);
        match unsafe { self.device().allocate_descriptor_sets(&info) } {
            Ok(sets) => sets
                .first()
                .map(|set| DescriptorSetHandle(set.as_raw()))
                .ok_or_else(|| AllocationError::Device(RenderError::DescriptorAllocation("no set returned".to_string()))),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) => Err(AllocationError::OutOfPoolMemory),
            Err(vk::Result::ERROR_FRAGMENTED_POOL) => Err(AllocationError::FragmentedPool),
            Err(e) => Err(AllocationError::Device(VulkanError::Api(e).into())),
        }
    }

    fn reset_descriptor_pool(&self, pool: DescriptorPoolHandle) -> RenderResult<()> {
        unsafe {
            self.device()
                .reset_descriptor_pool(vk::DescriptorPool::from_raw(pool.0), vk::DescriptorPoolResetFlags::empty())
                .map_err(VulkanError::Api)?;
        }
        Ok(())
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        unsafe { self.device().destroy_descriptor_pool(vk::DescriptorPool::from_raw(pool.0), None) };
    }

    fn write_descriptor_set(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) {
        enum Info {
            Buffer(vk::DescriptorBufferInfo),
            Image(vk::DescriptorImageInfo),
        }

        let infos: Vec<(u32, vk::DescriptorType, Info)> = writes
            .iter()
            .filter_map(|write| match *write {
                DescriptorWrite::UniformBuffer { binding, buffer, range } => Some((
                    binding,
                    vk::DescriptorType::UNIFORM_BUFFER,
                    Info::Buffer(vk::DescriptorBufferInfo { buffer: vk::Buffer::from_raw(buffer.0), offset: 0, range }),
                )),
                DescriptorWrite::Image { binding, image, sampler } => {
                    let Some(view) = self.shared.image_view(vk::Image::from_raw(image.0)) else {
                        log::error!("write_descriptor_set: unknown image {:#x} at binding {binding}", image.0);
                        return None;
                    };
                    Some((
                        binding,
                        vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                        Info::Image(vk::DescriptorImageInfo {
                            sampler: vk::Sampler::from_raw(sampler.0),
                            image_view: view,
                            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        }),
                    ))
                }
            })
            .collect();

        let set = vk::DescriptorSet::from_raw(set.0);
        let vk_writes: Vec<vk::WriteDescriptorSet> = infos
            .iter()
            .map(|(binding, ty, info)| {
                let write = vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(*ty);
                match info {
                    Info::Buffer(buffer) => write.buffer_info(std::slice::from_ref(buffer)).build(),
                    Info::Image(image) => write.image_info(std::slice::from_ref(image)).build(),
                }
            })
            .collect();
        unsafe { self.device().update_descriptor_sets(&vk_writes, &[]) };
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<FenceHandle> {
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { self.device().create_fence(&info, None).map_err(VulkanError::Api)? };
        Ok(FenceHandle(fence.as_raw()))
    }

    fn wait_for_fence(&self, fence: FenceHandle, timeout_ns: u64) -> RenderResult<FenceStatus> {
        match unsafe { self.device().wait_for_fences(&[vk::Fence::from_raw(fence.0)], true, timeout_ns) } {
            Ok(()) => Ok(FenceStatus::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(FenceStatus::TimedOut),
            Err(e) => Err(VulkanError::Api(e).into()),
        }
    }

    fn reset_fence(&self, fence: FenceHandle) -> RenderResult<()> {
        unsafe {
            self.device()
                .reset_fences(&[vk::Fence::from_raw(fence.0)])
                .map_err(VulkanError::Api)?;
        }
        Ok(())
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        unsafe { self.device().destroy_fence(vk::Fence::from_raw(fence.0), None) };
    }

    fn create_semaphore(&self) -> RenderResult<SemaphoreHandle> {
        let info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe { self.device().create_semaphore(&info, None).map_err(VulkanError::Api)? };
        Ok(SemaphoreHandle(semaphore.as_raw()))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        unsafe { self.device().destroy_semaphore(vk::Semaphore::from_raw(semaphore.0), None) };
    }

    fn create_command_context(&self) -> RenderResult<CommandContext> {
        let device = self.device();
        let pool_info = vk::CommandPoolCreateInfo::builder().queue_family_index(self.shared.context.graphics_family());
        let pool = unsafe { device.create_command_pool(&pool_info, None).map_err(VulkanError::Api)? };

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffer = match unsafe { device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) if !buffers.is_empty() => buffers[0],
            result => {
                unsafe { device.destroy_command_pool(pool, None) };
                let error = result.err().unwrap_or(vk::Result::ERROR_UNKNOWN);
                return Err(VulkanError::Api(error).into());
            }
        };

        Ok(CommandContext {
            pool: CommandPoolHandle(pool.as_raw()),
            buffer: CommandBufferHandle(buffer.as_raw()),
        })
    }

    fn destroy_command_context(&self, context: CommandContext) {
        // Destroying the pool frees its command buffer.
        unsafe { self.device().destroy_command_pool(vk::CommandPool::from_raw(context.pool.0), None) };
    }

    fn begin_commands(&self, context: &CommandContext) -> RenderResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device()
                .reset_command_pool(vk::CommandPool::from_raw(context.pool.0), vk::CommandPoolResetFlags::empty())
                .map_err(VulkanError::Api)?;
            self.device()
                .begin_command_buffer(vk::CommandBuffer::from_raw(context.buffer.0), &begin_info)
                .map_err(VulkanError::Api)?;
        }
        Ok(())
    }

    fn end_commands(&self, context: &CommandContext) -> RenderResult<()> {
        unsafe {
            self.device()
                .end_command_buffer(vk::CommandBuffer::from_raw(context.buffer.0))
                .map_err(VulkanError::Api)?;
        }
        Ok(())
    }

    fn submit(&self, info: &SubmitInfo) -> RenderResult<()> {
        let command_buffers = [vk::CommandBuffer::from_raw(info.command_buffer.0)];
        let wait_semaphores: Vec<vk::Semaphore> =
            info.wait_semaphore.iter().map(|s| vk::Semaphore::from_raw(s.0)).collect();
        // The acquired image is first touched by the post-process blit.
        let wait_stages = vec![
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::TRANSFER;
            wait_semaphores.len()
        ];
        let signal_semaphores: Vec<vk::Semaphore> =
            info.signal_semaphore.iter().map(|s| vk::Semaphore::from_raw(s.0)).collect();

        let submit = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores)
            .build();
        unsafe {
            self.device()
                .queue_submit(self.shared.context.graphics_queue(), &[submit], vk::Fence::from_raw(info.fence.0))
                .map_err(VulkanError::Api)?;
        }
        Ok(())
    }

    fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device().device_wait_idle().map_err(VulkanError::Api)? };
        Ok(())
    }
}

fn target_key(target: RenderTargetHandle) -> TargetKey {
    TargetKey::from(KeyData::from_ffi(target.0))
}

fn attachment(format: vk::Format, final_layout: vk::ImageLayout) -> vk::AttachmentDescription {
    vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout,
        ..Default::default()
    }
}
