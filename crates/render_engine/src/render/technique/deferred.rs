//! Deferred technique
//!
//! The geometry pass writes world position, world normal and albedo into
//! three color attachments of the G-buffer plus depth. After transitioning
//! the three color images to shader-read, a fullscreen lighting pass into the
//! main target samples them together with this frame's point light block.
//!
//! Transparent items cannot be resolved from a G-buffer. They are skipped,
//! counted in [`FrameStats::skipped_transparent`] and reported once.

use std::mem;

use super::{
    build_pipeline, draw_fullscreen, draw_items, not_initialized, release_slot, BindingCache, DrawMode,
    FrameContext, RenderTechnique, TechniqueContext, TechniqueKind,
};
use crate::render::api::*;
use crate::render::material::MaterialPipeline;
use crate::render::resources::GpuOwned;
use crate::render::stats::FrameStats;
use crate::render::uniforms::PointLightBlock;
use crate::render::RenderResult;

/// G-buffer attachment formats: position, normal, albedo
pub const GBUFFER_FORMATS: [Format; 3] = [Format::Rgba16Float, Format::Rgba16Float, Format::Rgba8Unorm];

const POINT_LIGHT_BINDING: u32 = 3;

/// G-buffer renderer with a fullscreen lighting resolve
#[derive(Debug, Default)]
pub struct DeferredTechnique {
    gbuffer: Option<GpuOwned<RenderTargetHandle>>,
    gbuffer_extent: Extent2D,
    lighting_layout: Option<GpuOwned<DescriptorLayoutHandle>>,
    lighting_pipeline_layout: Option<GpuOwned<PipelineLayoutHandle>>,
    geometry_pipeline: Option<GpuOwned<PipelineHandle>>,
    lighting_pipeline: Option<GpuOwned<PipelineHandle>>,
    mesh_layout: PipelineLayoutHandle,
    warned_transparent: bool,
    cache: BindingCache,
}

impl DeferredTechnique {
    /// Create an uninitialized technique
    pub fn new() -> Self {
        Self::default()
    }

    fn create_gbuffer(&mut self, ctx: &TechniqueContext) -> RenderResult<RenderTargetHandle> {
        let target = ctx.device.create_render_target(&RenderTargetDesc {
            label: "gbuffer".to_string(),
            extent: ctx.extent,
            color_formats: GBUFFER_FORMATS.to_vec(),
            depth_format: Some(Format::Depth32Float),
        })?;
        self.gbuffer = Some(GpuOwned::new("gbuffer", target));
        self.gbuffer_extent = ctx.extent;
        Ok(target)
    }
}

impl RenderTechnique for DeferredTechnique {
    fn kind(&self) -> TechniqueKind {
        TechniqueKind::Deferred
    }

    fn init(&mut self, ctx: &TechniqueContext) -> RenderResult<()> {
        self.mesh_layout = ctx.shared.mesh_pipeline_layout();
        let gbuffer = self.create_gbuffer(ctx)?;

        let lighting_layout = ctx.device.create_descriptor_layout(&[
            DescriptorBinding::new(0, DescriptorType::CombinedImageSampler, ShaderStages::FRAGMENT),
            DescriptorBinding::new(1, DescriptorType::CombinedImageSampler, ShaderStages::FRAGMENT),
            DescriptorBinding::new(2, DescriptorType::CombinedImageSampler, ShaderStages::FRAGMENT),
            DescriptorBinding::new(POINT_LIGHT_BINDING, DescriptorType::UniformBuffer, ShaderStages::FRAGMENT),
        ])?;
        let lighting_layout = self
            .lighting_layout
            .insert(GpuOwned::new("deferred lighting set layout", lighting_layout))
            .handle();

        let pipeline_layout = ctx.device.create_pipeline_layout(&PipelineLayoutDesc {
            set_layouts: vec![ctx.shared.scene_layout(), lighting_layout],
            push_constant_size: 0,
        })?;
        let pipeline_layout = self
            .lighting_pipeline_layout
            .insert(GpuOwned::new("deferred lighting layout", pipeline_layout))
            .handle();

        let mesh_layout = self.mesh_layout;
        self.geometry_pipeline = Some(build_pipeline(
            ctx,
            "mesh.vert",
            Some("gbuffer.frag"),
            |vertex, fragment| GraphicsPipelineDesc {
                label: "deferred geometry".to_string(),
                vertex_shader: vertex,
                fragment_shader: fragment,
                layout: mesh_layout,
                target: gbuffer,
                blend: BlendMode::Opaque,
                depth: DepthState::READ_WRITE,
                cull: CullMode::Back,
                dynamic_depth_bias: false,
            },
        )?);

        let main_target = ctx.main_target;
        self.lighting_pipeline = Some(build_pipeline(
            ctx,
            "fullscreen.vert",
            Some("deferred_lighting.frag"),
            |vertex, fragment| GraphicsPipelineDesc {
                label: "deferred lighting".to_string(),
                vertex_shader: vertex,
                fragment_shader: fragment,
                layout: pipeline_layout,
                target: main_target,
                blend: BlendMode::Opaque,
                depth: DepthState::DISABLED,
                cull: CullMode::None,
                dynamic_depth_bias: false,
            },
        )?);

        log::info!("Deferred ready at {}x{}", ctx.extent.width, ctx.extent.height);
        Ok(())
    }

    fn resize(&mut self, ctx: &TechniqueContext) -> RenderResult<()> {
        if self.gbuffer.is_none() || self.gbuffer_extent == ctx.extent {
            return Ok(());
        }
        release_slot(&mut self.gbuffer, ctx.device);
        self.create_gbuffer(ctx)?;
        log::debug!("Resized G-buffer to {}x{}", ctx.extent.width, ctx.extent.height);
        Ok(())
    }

    fn cleanup(&mut self, device: &dyn GpuDevice) {
        release_slot(&mut self.lighting_pipeline, device);
        release_slot(&mut self.geometry_pipeline, device);
        release_slot(&mut self.lighting_pipeline_layout, device);
        release_slot(&mut self.lighting_layout, device);
        release_slot(&mut self.gbuffer, device);
    }

    fn render(&mut self, frame: &mut FrameContext) -> RenderResult<FrameStats> {
        let (Some(gbuffer), Some(lighting_layout), Some(pipeline_layout), Some(geometry), Some(lighting)) = (
            &self.gbuffer,
            &self.lighting_layout,
            &self.lighting_pipeline_layout,
            &self.geometry_pipeline,
            &self.lighting_pipeline,
        ) else {
            return Err(not_initialized(self.kind()));
        };
        let gbuffer = gbuffer.handle();
        let lighting_layout = lighting_layout.handle();
        let geometry = MaterialPipeline { pipeline: geometry.handle(), layout: self.mesh_layout };
        let lighting = MaterialPipeline { pipeline: lighting.handle(), layout: pipeline_layout.handle() };

        let mut stats = FrameStats::default();
        let cmd = frame.cmd();
        let device = frame.device;

        let skipped = frame.draw_list.transparent.len();
        if skipped > 0 {
            stats.skipped_transparent = skipped as u32;
            if !self.warned_transparent {
                log::warn!("Deferred technique cannot draw transparent items; skipping {skipped}");
                self.warned_transparent = true;
            }
        }

        // Geometry pass
        let scene_set = frame.scene_set(None)?;
        frame.begin_pass(&mut stats, gbuffer, self.gbuffer_extent);
        self.cache.reset();
        draw_items(
            device,
            cmd,
            &frame.draw_list.opaque,
            scene_set,
            DrawMode::with_pipeline(geometry),
            &mut self.cache,
            &mut stats,
        );
        device.cmd_end_pass(cmd);

        let attachments: Vec<ImageHandle> =
            (0..GBUFFER_FORMATS.len()).map(|i| device.render_target_color(gbuffer, i)).collect();
        for &image in &attachments {
            device.cmd_image_barrier(
                cmd,
                &ImageBarrier::color(image, ImageLayout::ColorAttachment, ImageLayout::ShaderRead),
            );
        }

        let block = PointLightBlock::from_environment(frame.lights);
        let light_buffer = frame.slot.light_buffer();
        device.write_buffer(light_buffer, 0, bytemuck::bytes_of(&block))?;

        let lighting_set = frame.slot.allocate_set(device, lighting_layout)?;
        let sampler = frame.shared.nearest_sampler();
        let mut writes: Vec<DescriptorWrite> = attachments
            .iter()
            .enumerate()
            .map(|(binding, &image)| DescriptorWrite::Image { binding: binding as u32, image, sampler })
            .collect();
        writes.push(DescriptorWrite::UniformBuffer {
            binding: POINT_LIGHT_BINDING,
            buffer: light_buffer,
            range: mem::size_of::<PointLightBlock>() as u64,
        });
        device.write_descriptor_set(lighting_set, &writes);

        // Lighting resolve
        frame.begin_pass(&mut stats, frame.main_target, frame.extent);
        draw_fullscreen(device, cmd, lighting, &[scene_set, lighting_set], &mut stats);
        device.cmd_end_pass(cmd);

        Ok(stats)
    }
}
