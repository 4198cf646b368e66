//! Rendering techniques
//!
//! A technique turns a [`DrawList`] into recorded passes. Exactly one is
//! active at a time; others may stay initialized so switching back is cheap.
//! Every technique records into the frame slot it is handed and allocates
//! its transient descriptor sets from that slot, so nothing it binds can be
//! recycled before the slot's fence signals.
//!
//! ## Attachment layouts
//!
//! A pass leaves its color attachments in [`ImageLayout::ColorAttachment`]
//! and its depth attachment in [`ImageLayout::DepthAttachment`]. Techniques
//! that sample an attachment afterwards record the transition themselves.
//! When `render` returns, color attachment 0 of the main target holds the
//! final image.
//!
//! ## Bind caching
//!
//! All mesh pipelines share one pipeline layout (set 0 scene, set 1
//! material, per-draw push constants). [`BindingCache`] skips binds whose
//! value did not change since the previous draw and rebinds set 0 whenever
//! the pipeline changes.

mod deferred;
mod forward;
mod shadow_forward;

pub use deferred::DeferredTechnique;
pub use forward::ForwardTechnique;
pub use shadow_forward::ShadowForwardTechnique;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::RendererConfig;
use crate::render::api::*;
use crate::render::frame::FrameSlot;
use crate::render::material::{Material, MaterialId, MaterialPipeline};
use crate::render::resources::{GpuOwned, GpuResource};
use crate::render::shared_resources::{
    load_shader_module, SharedResources, SCENE_UNIFORM_BINDING, SHADOW_MAP_BINDING,
};
use crate::render::stats::FrameStats;
use crate::render::uniforms::{DrawPushConstants, SceneUniformBlock};
use crate::render::{RenderError, RenderResult};
use crate::scene::{DrawItem, DrawList, LightingEnvironment};

/// Clear color of the main target
pub const CLEAR_COLOR: [f32; 4] = [0.02, 0.02, 0.03, 1.0];

/// The available techniques
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TechniqueKind {
    /// Single color and depth pass
    #[default]
    BasicForward,
    /// Depth pass from the sun, then a forward pass sampling it
    ShadowMappedForward,
    /// G-buffer pass, then a fullscreen lighting resolve
    Deferred,
}

impl TechniqueKind {
    /// Every technique, in switching order
    pub const ALL: [TechniqueKind; 3] = [
        TechniqueKind::BasicForward,
        TechniqueKind::ShadowMappedForward,
        TechniqueKind::Deferred,
    ];

    /// A new, uninitialized technique of this kind
    pub fn create(self) -> Box<dyn RenderTechnique> {
        match self {
            TechniqueKind::BasicForward => Box::new(ForwardTechnique::new()),
            TechniqueKind::ShadowMappedForward => Box::new(ShadowForwardTechnique::new()),
            TechniqueKind::Deferred => Box::new(DeferredTechnique::new()),
        }
    }

    /// Human readable name
    pub fn name(self) -> &'static str {
        match self {
            TechniqueKind::BasicForward => "basic forward",
            TechniqueKind::ShadowMappedForward => "shadow-mapped forward",
            TechniqueKind::Deferred => "deferred",
        }
    }
}

impl fmt::Display for TechniqueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a technique may need to create or resize its GPU state
pub struct TechniqueContext<'a> {
    /// Device
    pub device: &'a dyn GpuDevice,
    /// Shader loader
    pub shaders: &'a dyn ShaderSource,
    /// Shared layouts and defaults
    pub shared: &'a SharedResources,
    /// Target the technique's final pass renders into
    pub main_target: RenderTargetHandle,
    /// Size of the main target
    pub extent: Extent2D,
    /// Renderer settings
    pub config: &'a RendererConfig,
}

/// Per-frame input to [`RenderTechnique::render`]
pub struct FrameContext<'a> {
    /// Device
    pub device: &'a dyn GpuDevice,
    /// Slot being recorded; owns the command buffer and transient pools
    pub slot: &'a mut FrameSlot,
    /// Culled and sorted draws
    pub draw_list: &'a DrawList,
    /// Shared layouts and defaults
    pub shared: &'a SharedResources,
    /// Target the final pass renders into
    pub main_target: RenderTargetHandle,
    /// Size of the main target
    pub extent: Extent2D,
    /// Lights of the frame
    pub lights: &'a LightingEnvironment,
}

impl FrameContext<'_> {
    /// The slot's command buffer
    pub fn cmd(&self) -> CommandBufferHandle {
        self.slot.command_buffer()
    }

    /// Allocate and fill a set-0 descriptor set for this frame
    ///
    /// `shadow_map` is bound at the shadow binding; the default white
    /// texture stands in when there is none.
    pub fn scene_set(&mut self, shadow_map: Option<ImageHandle>) -> RenderResult<DescriptorSetHandle> {
        let set = self.slot.allocate_set(self.device, self.shared.scene_layout())?;
        self.device.write_descriptor_set(
            set,
            &[
                DescriptorWrite::UniformBuffer {
                    binding: SCENE_UNIFORM_BINDING,
                    buffer: self.slot.scene_buffer(),
                    range: std::mem::size_of::<SceneUniformBlock>() as u64,
                },
                DescriptorWrite::Image {
                    binding: SHADOW_MAP_BINDING,
                    image: shadow_map.unwrap_or_else(|| self.shared.white_texture()),
                    sampler: self.shared.nearest_sampler(),
                },
            ],
        );
        Ok(set)
    }

    /// Begin a render pass and count it
    pub fn begin_pass(&self, stats: &mut FrameStats, target: RenderTargetHandle, extent: Extent2D) {
        self.device.cmd_begin_pass(
            self.cmd(),
            &PassBeginInfo { target, extent, clear_color: CLEAR_COLOR, clear_depth: 1.0 },
        );
        stats.passes += 1;
    }
}

/// A swappable rendering strategy
pub trait RenderTechnique {
    /// Which technique this is
    fn kind(&self) -> TechniqueKind;

    /// Create pipelines and targets
    ///
    /// On failure the caller runs [`RenderTechnique::cleanup`], which must
    /// cope with partially created state.
    fn init(&mut self, ctx: &TechniqueContext) -> RenderResult<()>;

    /// Recreate size-dependent targets; the device is idle
    fn resize(&mut self, _ctx: &TechniqueContext) -> RenderResult<()> {
        Ok(())
    }

    /// Release everything; the device is idle
    fn cleanup(&mut self, device: &dyn GpuDevice);

    /// Record the frame's passes
    fn render(&mut self, frame: &mut FrameContext) -> RenderResult<FrameStats>;

    /// Whether the technique renders a shadow map this frame
    fn requires_shadow_pass(&self) -> bool {
        false
    }

    /// Show the shadow map instead of the shaded scene, where supported
    fn set_debug_view(&mut self, _enabled: bool) {}
}

/// Last bound pipeline, material and index buffer of a command buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindingCache {
    pipeline: Option<PipelineHandle>,
    layout: Option<PipelineLayoutHandle>,
    material: Option<MaterialId>,
    index_buffer: Option<BufferHandle>,
}

impl BindingCache {
    /// Forget everything; the next bind of each kind is always issued
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Bind `pipeline` unless already bound, rebinding `scene_set` at set 0
    pub fn bind_pipeline(
        &mut self,
        recorder: &dyn CommandRecorder,
        cmd: CommandBufferHandle,
        pipeline: MaterialPipeline,
        scene_set: DescriptorSetHandle,
        stats: &mut FrameStats,
    ) {
        if self.pipeline == Some(pipeline.pipeline) {
            return;
        }

        recorder.cmd_bind_pipeline(cmd, pipeline.pipeline);
        recorder.cmd_bind_descriptor_set(cmd, pipeline.layout, 0, scene_set);
        stats.pipeline_binds += 1;

        if self.layout != Some(pipeline.layout) {
            // Higher sets do not survive an incompatible layout.
            self.material = None;
        }
        self.pipeline = Some(pipeline.pipeline);
        self.layout = Some(pipeline.layout);
    }

    /// Bind the material's set 1 unless already bound
    pub fn bind_material(
        &mut self,
        recorder: &dyn CommandRecorder,
        cmd: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        material: &Material,
        stats: &mut FrameStats,
    ) {
        if self.material == Some(material.id) {
            return;
        }
        recorder.cmd_bind_descriptor_set(cmd, layout, 1, material.material_set);
        stats.material_binds += 1;
        self.material = Some(material.id);
    }

    /// Bind an index buffer unless already bound
    pub fn bind_index_buffer(
        &mut self,
        recorder: &dyn CommandRecorder,
        cmd: CommandBufferHandle,
        buffer: BufferHandle,
        stats: &mut FrameStats,
    ) {
        if self.index_buffer == Some(buffer) {
            return;
        }
        recorder.cmd_bind_index_buffer(cmd, buffer);
        stats.index_buffer_binds += 1;
        self.index_buffer = Some(buffer);
    }
}

/// How [`draw_items`] picks pipelines and materials
#[derive(Debug, Clone, Copy)]
pub struct DrawMode {
    /// Use this pipeline for every item instead of the material's
    pub pipeline_override: Option<MaterialPipeline>,
    /// Bind each item's material set
    pub bind_materials: bool,
}

impl DrawMode {
    /// Each item's own pipeline and material
    pub const MATERIAL: Self = Self { pipeline_override: None, bind_materials: true };

    /// One pipeline for all items, materials still bound
    pub const fn with_pipeline(pipeline: MaterialPipeline) -> Self {
        Self { pipeline_override: Some(pipeline), bind_materials: true }
    }

    /// One pipeline for all items, no material binds
    pub const fn depth_only(pipeline: MaterialPipeline) -> Self {
        Self { pipeline_override: Some(pipeline), bind_materials: false }
    }
}

/// Record one indexed draw per item through the binding cache
pub fn draw_items(
    recorder: &dyn CommandRecorder,
    cmd: CommandBufferHandle,
    items: &[DrawItem],
    scene_set: DescriptorSetHandle,
    mode: DrawMode,
    cache: &mut BindingCache,
    stats: &mut FrameStats,
) {
    for item in items {
        let pipeline = mode.pipeline_override.unwrap_or(item.material.pipeline);
        cache.bind_pipeline(recorder, cmd, pipeline, scene_set, stats);
        if mode.bind_materials {
            cache.bind_material(recorder, cmd, pipeline.layout, &item.material, stats);
        }
        cache.bind_index_buffer(recorder, cmd, item.index_buffer, stats);

        let constants = DrawPushConstants::new(&item.transform, item.vertex_address);
        recorder.cmd_push_constants(cmd, pipeline.layout, bytemuck::bytes_of(&constants));
        recorder.cmd_draw_indexed(cmd, item.index_count, item.first_index);
        stats.draws += 1;
    }
}

/// Bind a fullscreen pipeline with its sets and draw one covering triangle
pub fn draw_fullscreen(
    recorder: &dyn CommandRecorder,
    cmd: CommandBufferHandle,
    pipeline: MaterialPipeline,
    sets: &[DescriptorSetHandle],
    stats: &mut FrameStats,
) {
    recorder.cmd_bind_pipeline(cmd, pipeline.pipeline);
    stats.pipeline_binds += 1;
    for (index, &set) in sets.iter().enumerate() {
        recorder.cmd_bind_descriptor_set(cmd, pipeline.layout, index as u32, set);
    }
    recorder.cmd_draw(cmd, 3);
    stats.draws += 1;
}

/// Load shaders, build a pipeline from them and release the modules
///
/// `describe` receives the vertex and optional fragment module.
pub(crate) fn build_pipeline(
    ctx: &TechniqueContext,
    vertex: &str,
    fragment: Option<&str>,
    describe: impl FnOnce(ShaderModuleHandle, Option<ShaderModuleHandle>) -> GraphicsPipelineDesc,
) -> RenderResult<GpuOwned<PipelineHandle>> {
    let vertex = load_shader_module(ctx.device, ctx.shaders, vertex)?;
    let fragment = match fragment.map(|name| load_shader_module(ctx.device, ctx.shaders, name)).transpose() {
        Ok(fragment) => fragment,
        Err(e) => {
            vertex.release(ctx.device);
            return Err(e);
        }
    };

    let desc = describe(vertex.handle(), fragment.as_ref().map(GpuOwned::handle));
    let result = ctx.device.create_graphics_pipeline(&desc);

    // Modules are only needed while the pipeline is created.
    if let Some(fragment) = fragment {
        fragment.release(ctx.device);
    }
    vertex.release(ctx.device);

    let pipeline = result?;
    log::debug!("Built pipeline '{}'", desc.label);
    Ok(GpuOwned::new(desc.label, pipeline))
}

/// Release an optional owned handle
pub(crate) fn release_slot<H: GpuResource>(slot: &mut Option<GpuOwned<H>>, device: &dyn GpuDevice) {
    if let Some(owned) = slot.take() {
        owned.release(device);
    }
}

pub(crate) fn not_initialized(kind: TechniqueKind) -> RenderError {
    RenderError::RenderingFailed(format!("{kind} technique used before init"))
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Fixtures shared by the technique tests

    use std::sync::Arc;

    use super::*;
    use crate::foundation::math::{Mat4, Vec3};
    use crate::render::frame::FrameRing;
    use crate::render::material::MaterialPass;
    use crate::render::shared_resources::FRAME_POOL_RATIOS;
    use crate::render::testing::{RecordingDevice, StubShaderSource};
    use crate::scene::Aabb;

    pub struct Fixture {
        pub device: RecordingDevice,
        pub shared: SharedResources,
        pub main_target: RenderTargetHandle,
        pub ring: FrameRing,
        pub config: RendererConfig,
        pub extent: Extent2D,
    }

    impl Fixture {
        pub fn new() -> Self {
            let device = RecordingDevice::new();
            let shared = SharedResources::new(&device).unwrap();
            let extent = Extent2D::new(320, 240);
            let main_target = device
                .create_render_target(&RenderTargetDesc {
                    label: "main".to_string(),
                    extent,
                    color_formats: vec![Format::Rgba16Float],
                    depth_format: Some(Format::Depth32Float),
                })
                .unwrap();
            let config = RendererConfig::default().with_shadow_map_size(256);
            let ring = FrameRing::new(&device, &config, &FRAME_POOL_RATIOS, 1).unwrap();
            Self { device, shared, main_target, ring, config, extent }
        }

        pub fn init(&self, technique: &mut dyn RenderTechnique) {
            let ctx = TechniqueContext {
                device: &self.device,
                shaders: &StubShaderSource,
                shared: &self.shared,
                main_target: self.main_target,
                extent: self.extent,
                config: &self.config,
            };
            technique.init(&ctx).unwrap();
        }

        pub fn render(
            &mut self,
            technique: &mut dyn RenderTechnique,
            draw_list: &DrawList,
            lights: &LightingEnvironment,
        ) -> FrameStats {
            let slot = self.ring.begin_slot(&self.device).unwrap();
            slot.begin_recording(&self.device).unwrap();
            let mut frame = FrameContext {
                device: &self.device,
                slot,
                draw_list,
                shared: &self.shared,
                main_target: self.main_target,
                extent: self.extent,
                lights,
            };
            let stats = technique.render(&mut frame).unwrap();
            self.ring.submit_current(&self.device, 0).unwrap();
            self.ring.advance();
            stats
        }
    }

    pub fn material(id: u32, pass: MaterialPass, pipeline: u64) -> Arc<Material> {
        Arc::new(Material {
            id: MaterialId(id),
            name: format!("m{id}"),
            pipeline: MaterialPipeline { pipeline: PipelineHandle(pipeline), layout: PipelineLayoutHandle(900) },
            material_set: DescriptorSetHandle(800 + id as u64),
            pass,
        })
    }

    pub fn item(material: &Arc<Material>, index_buffer: u64) -> DrawItem {
        DrawItem {
            first_index: 0,
            index_count: 36,
            index_buffer: BufferHandle(index_buffer),
            vertex_address: 0x1000,
            material: Arc::clone(material),
            transform: Mat4::identity(),
            bounds: Aabb::from_center_extents(Vec3::zeros(), Vec3::new(0.5, 0.5, 0.5)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::render::material::MaterialPass;
    use crate::render::testing::{Command, RecordingDevice};

    fn draw_all(items: &[DrawItem]) -> (Vec<Command>, FrameStats) {
        let device = RecordingDevice::new();
        let mut cache = BindingCache::default();
        let mut stats = FrameStats::default();
        draw_items(
            &device,
            CommandBufferHandle(1),
            items,
            DescriptorSetHandle(50),
            DrawMode::MATERIAL,
            &mut cache,
            &mut stats,
        );
        (device.commands(), stats)
    }

    #[test]
    fn test_redundant_binds_skipped() {
        let m1 = material(1, MaterialPass::MainColor, 10);
        let m2 = material(2, MaterialPass::MainColor, 10);
        let items = [item(&m1, 5), item(&m1, 5), item(&m2, 5), item(&m2, 6)];

        let (commands, stats) = draw_all(&items);

        assert_eq!(stats.draws, 4);
        assert_eq!(stats.pipeline_binds, 1);
        assert_eq!(stats.material_binds, 2);
        assert_eq!(stats.index_buffer_binds, 2);
        let pipeline_binds = commands.iter().filter(|c| matches!(c, Command::BindPipeline(_))).count();
        assert_eq!(pipeline_binds, 1);
    }

    #[test]
    fn test_pipeline_change_rebinds_scene_set() {
        let opaque = material(1, MaterialPass::MainColor, 10);
        let glass = material(2, MaterialPass::Transparent, 11);
        let (commands, stats) = draw_all(&[item(&opaque, 5), item(&glass, 5)]);

        assert_eq!(stats.pipeline_binds, 2);
        let scene_binds = commands
            .iter()
            .filter(|c| matches!(c, Command::BindDescriptorSet { set_index: 0, .. }))
            .count();
        assert_eq!(scene_binds, 2);
        assert_eq!(stats.material_binds, 2);
    }

    #[test]
    fn test_depth_only_skips_materials() {
        let device = RecordingDevice::new();
        let m1 = material(1, MaterialPass::MainColor, 10);
        let m2 = material(2, MaterialPass::MainColor, 11);
        let depth = MaterialPipeline { pipeline: PipelineHandle(99), layout: PipelineLayoutHandle(900) };
        let mut cache = BindingCache::default();
        let mut stats = FrameStats::default();

        draw_items(
            &device,
            CommandBufferHandle(1),
            &[item(&m1, 5), item(&m2, 5)],
            DescriptorSetHandle(50),
            DrawMode::depth_only(depth),
            &mut cache,
            &mut stats,
        );

        assert_eq!(stats.pipeline_binds, 1);
        assert_eq!(stats.material_binds, 0);
        assert_eq!(device.commands()[0], Command::BindPipeline(PipelineHandle(99)));
    }

    #[test]
    fn test_reset_forces_rebind() {
        let device = RecordingDevice::new();
        let m = material(1, MaterialPass::MainColor, 10);
        let mut cache = BindingCache::default();
        let mut stats = FrameStats::default();
        let cmd = CommandBufferHandle(1);

        cache.bind_pipeline(&device, cmd, m.pipeline, DescriptorSetHandle(50), &mut stats);
        cache.bind_pipeline(&device, cmd, m.pipeline, DescriptorSetHandle(50), &mut stats);
        cache.reset();
        cache.bind_pipeline(&device, cmd, m.pipeline, DescriptorSetHandle(50), &mut stats);

        assert_eq!(stats.pipeline_binds, 2);
    }

    #[test]
    fn test_kind_round_trips_through_create() {
        for kind in TechniqueKind::ALL {
            assert_eq!(kind.create().kind(), kind);
        }
        assert_eq!(TechniqueKind::ShadowMappedForward.to_string(), "shadow-mapped forward");
    }
}
