//! Shadow-mapped forward technique
//!
//! Pass 1 renders opaque geometry depth-only from the sun into the shadow
//! map, with a dynamic depth bias against acne. The map is then transitioned
//! to shader-read. Pass 2 is the basic forward pass with the map bound in the
//! scene set. The debug view replaces pass 2's geometry with a fullscreen
//! triangle that shows the map.

use super::{
    build_pipeline, draw_fullscreen, draw_items, not_initialized, release_slot, BindingCache, DrawMode,
    FrameContext, RenderTechnique, TechniqueContext, TechniqueKind,
};
use crate::render::api::*;
use crate::render::material::MaterialPipeline;
use crate::render::resources::GpuOwned;
use crate::render::stats::FrameStats;
use crate::render::{RenderError, RenderResult};

/// Forward renderer with a directional shadow map
#[derive(Debug, Default)]
pub struct ShadowForwardTechnique {
    shadow_target: Option<GpuOwned<RenderTargetHandle>>,
    shadow_map: ImageHandle,
    map_extent: Extent2D,
    depth_pipeline: Option<GpuOwned<PipelineHandle>>,
    debug_pipeline: Option<GpuOwned<PipelineHandle>>,
    layout: PipelineLayoutHandle,
    depth_bias: f32,
    slope_bias: f32,
    debug_view: bool,
    cache: BindingCache,
}

impl ShadowForwardTechnique {
    /// Create an uninitialized technique
    pub fn new() -> Self {
        Self::default()
    }

    /// The shadow map image, null before init
    pub fn shadow_map(&self) -> ImageHandle {
        self.shadow_map
    }
}

impl RenderTechnique for ShadowForwardTechnique {
    fn kind(&self) -> TechniqueKind {
        TechniqueKind::ShadowMappedForward
    }

    fn init(&mut self, ctx: &TechniqueContext) -> RenderResult<()> {
        let size = ctx.config.shadow_map_size;
        self.map_extent = Extent2D::new(size, size);
        self.depth_bias = ctx.config.shadow_depth_bias;
        self.slope_bias = ctx.config.shadow_slope_bias;
        self.layout = ctx.shared.mesh_pipeline_layout();

        let target = ctx.device.create_render_target(&RenderTargetDesc {
            label: "shadow map".to_string(),
            extent: self.map_extent,
            color_formats: Vec::new(),
            depth_format: Some(Format::Depth32Float),
        })?;
        let target = self.shadow_target.insert(GpuOwned::new("shadow map target", target)).handle();
        self.shadow_map = ctx
            .device
            .render_target_depth(target)
            .ok_or_else(|| RenderError::InitializationFailed("shadow target has no depth image".to_string()))?;

        let layout = self.layout;
        self.depth_pipeline = Some(build_pipeline(ctx, "shadow.vert", None, |vertex, _| {
            GraphicsPipelineDesc {
                label: "shadow depth".to_string(),
                vertex_shader: vertex,
                fragment_shader: None,
                layout,
                target,
                blend: BlendMode::Opaque,
                depth: DepthState::READ_WRITE,
                cull: CullMode::None,
                dynamic_depth_bias: true,
            }
        })?);

        let main_target = ctx.main_target;
        self.debug_pipeline = Some(build_pipeline(
            ctx,
            "fullscreen.vert",
            Some("shadow_debug.frag"),
            |vertex, fragment| GraphicsPipelineDesc {
                label: "shadow debug".to_string(),
                vertex_shader: vertex,
                fragment_shader: fragment,
                layout,
                target: main_target,
                blend: BlendMode::Opaque,
                depth: DepthState::DISABLED,
                cull: CullMode::None,
                dynamic_depth_bias: false,
            },
        )?);

        log::info!("Shadow-mapped forward ready ({size}x{size} shadow map)");
        Ok(())
    }

    fn cleanup(&mut self, device: &dyn GpuDevice) {
        release_slot(&mut self.debug_pipeline, device);
        release_slot(&mut self.depth_pipeline, device);
        release_slot(&mut self.shadow_target, device);
        self.shadow_map = ImageHandle::NULL;
    }

    fn render(&mut self, frame: &mut FrameContext) -> RenderResult<FrameStats> {
        let (Some(target), Some(depth), Some(debug)) =
            (&self.shadow_target, &self.depth_pipeline, &self.debug_pipeline)
        else {
            return Err(not_initialized(self.kind()));
        };
        let shadow_target = target.handle();
        let depth = MaterialPipeline { pipeline: depth.handle(), layout: self.layout };
        let debug = MaterialPipeline { pipeline: debug.handle(), layout: self.layout };

        let mut stats = FrameStats::default();
        let cmd = frame.cmd();
        let device = frame.device;

        // Pass 1: depth from the sun. Without a sun the map is only cleared.
        let shadow_set = frame.scene_set(None)?;
        frame.begin_pass(&mut stats, shadow_target, self.map_extent);
        device.cmd_set_depth_bias(cmd, self.depth_bias, self.slope_bias);
        self.cache.reset();
        if frame.lights.sun().is_some() {
            draw_items(
                device,
                cmd,
                &frame.draw_list.opaque,
                shadow_set,
                DrawMode::depth_only(depth),
                &mut self.cache,
                &mut stats,
            );
        }
        device.cmd_end_pass(cmd);

        device.cmd_image_barrier(
            cmd,
            &ImageBarrier::depth(self.shadow_map, ImageLayout::DepthAttachment, ImageLayout::ShaderRead),
        );

        // Pass 2: shaded scene sampling the map.
        let main_set = frame.scene_set(Some(self.shadow_map))?;
        frame.begin_pass(&mut stats, frame.main_target, frame.extent);
        self.cache.reset();
        if self.debug_view {
            draw_fullscreen(device, cmd, debug, &[main_set], &mut stats);
        } else {
            for items in [&frame.draw_list.opaque, &frame.draw_list.transparent] {
                draw_items(device, cmd, items, main_set, DrawMode::MATERIAL, &mut self.cache, &mut stats);
            }
        }
        device.cmd_end_pass(cmd);

        Ok(stats)
    }

    fn requires_shadow_pass(&self) -> bool {
        true
    }

    fn set_debug_view(&mut self, enabled: bool) {
        self.debug_view = enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::foundation::math::Vec3;
    use crate::render::material::MaterialPass;
    use crate::render::testing::Command;
    use crate::scene::{DrawList, Light, LightingEnvironment};

    fn sunlit() -> LightingEnvironment {
        LightingEnvironment::new().add_light(Light::directional(
            Vec3::new(-0.3, -1.0, -0.2),
            Vec3::new(1.0, 1.0, 1.0),
            3.0,
        ))
    }

    fn pass_targets(commands: &[Command]) -> Vec<RenderTargetHandle> {
        commands
            .iter()
            .filter_map(|c| match c {
                Command::BeginPass { target, .. } => Some(*target),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_shadow_pass_precedes_main_pass() {
        let mut fixture = Fixture::new();
        let mut technique = ShadowForwardTechnique::new();
        fixture.init(&mut technique);

        let stone = material(1, MaterialPass::MainColor, 10);
        let list = DrawList::from_items([item(&stone, 5), item(&stone, 6)]);

        fixture.device.clear_events();
        let stats = fixture.render(&mut technique, &list, &sunlit());
        let commands = fixture.device.commands();

        let targets = pass_targets(&commands);
        assert_eq!(targets.len(), 2);
        assert_eq!(fixture.device.target_label(targets[0]).as_deref(), Some("shadow map"));
        assert_eq!(targets[1], fixture.main_target);

        let barrier = commands
            .iter()
            .position(|c| {
                matches!(c, Command::Barrier(b) if b.image == technique.shadow_map()
                    && b.new_layout == ImageLayout::ShaderRead)
            })
            .unwrap();
        let second_begin = commands
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, Command::BeginPass { .. }))
            .nth(1)
            .map(|(i, _)| i)
            .unwrap();
        let first_end = commands.iter().position(|c| *c == Command::EndPass).unwrap();
        assert!(first_end < barrier && barrier < second_begin);

        assert!(commands.contains(&Command::SetDepthBias));
        assert_eq!(stats.passes, 2);
        // Two depth draws plus two shaded draws.
        assert_eq!(stats.draws, 4);
        // Depth-only draws bind no materials.
        assert_eq!(stats.material_binds, 1);
    }

    #[test]
    fn test_no_sun_clears_map_without_draws() {
        let mut fixture = Fixture::new();
        let mut technique = ShadowForwardTechnique::new();
        fixture.init(&mut technique);

        let stone = material(1, MaterialPass::MainColor, 10);
        let list = DrawList::from_items([item(&stone, 5)]);
        let stats = fixture.render(&mut technique, &list, &LightingEnvironment::new());

        assert_eq!(stats.passes, 2);
        assert_eq!(stats.draws, 1);
    }

    #[test]
    fn test_debug_view_draws_fullscreen_triangle() {
        let mut fixture = Fixture::new();
        let mut technique = ShadowForwardTechnique::new();
        fixture.init(&mut technique);
        technique.set_debug_view(true);

        let stone = material(1, MaterialPass::MainColor, 10);
        let list = DrawList::from_items([item(&stone, 5)]);
        fixture.device.clear_events();
        fixture.render(&mut technique, &list, &sunlit());

        let commands = fixture.device.commands();
        assert!(commands.contains(&Command::Draw { vertex_count: 3 }));
        // The only indexed draw is the depth pass one.
        let indexed = commands.iter().filter(|c| matches!(c, Command::DrawIndexed { .. })).count();
        assert_eq!(indexed, 1);
    }

    #[test]
    fn test_failed_init_cleans_up() {
        let fixture = Fixture::new();
        let before = fixture.device.live_resources();
        fixture.device.fail_pipeline("shadow debug");

        let mut technique = ShadowForwardTechnique::new();
        let ctx = TechniqueContext {
            device: &fixture.device,
            shaders: &crate::render::testing::StubShaderSource,
            shared: &fixture.shared,
            main_target: fixture.main_target,
            extent: fixture.extent,
            config: &fixture.config,
        };
        assert!(technique.init(&ctx).is_err());
        technique.cleanup(&fixture.device);

        assert_eq!(fixture.device.live_resources(), before);
    }

    #[test]
    fn test_render_before_init_fails() {
        let mut fixture = Fixture::new();
        let slot = fixture.ring.begin_slot(&fixture.device).unwrap();
        slot.begin_recording(&fixture.device).unwrap();
        let list = DrawList::default();
        let lights = LightingEnvironment::new();
        let mut frame = FrameContext {
            device: &fixture.device,
            slot,
            draw_list: &list,
            shared: &fixture.shared,
            main_target: fixture.main_target,
            extent: fixture.extent,
            lights: &lights,
        };

        let result = ShadowForwardTechnique::new().render(&mut frame);
        assert!(matches!(result, Err(RenderError::RenderingFailed(_))));
    }
}
