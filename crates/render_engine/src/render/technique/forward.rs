//! Basic forward technique
//!
//! One color and depth pass into the main target. Opaque items are drawn
//! first in draw list order, then transparent items with their materials'
//! blend pipelines. The technique owns no GPU state of its own: the mesh
//! pipelines come from the materials.

use super::{draw_items, BindingCache, DrawMode, FrameContext, RenderTechnique, TechniqueContext, TechniqueKind};
use crate::render::api::GpuDevice;
use crate::render::stats::FrameStats;
use crate::render::RenderResult;

/// Single-pass forward renderer
#[derive(Debug, Default)]
pub struct ForwardTechnique {
    cache: BindingCache,
    initialized: bool,
}

impl ForwardTechnique {
    /// Create an uninitialized technique
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderTechnique for ForwardTechnique {
    fn kind(&self) -> TechniqueKind {
        TechniqueKind::BasicForward
    }

    fn init(&mut self, ctx: &TechniqueContext) -> RenderResult<()> {
        log::debug!("Basic forward ready at {}x{}", ctx.extent.width, ctx.extent.height);
        self.initialized = true;
        Ok(())
    }

    fn cleanup(&mut self, _device: &dyn GpuDevice) {
        self.initialized = false;
    }

    fn render(&mut self, frame: &mut FrameContext) -> RenderResult<FrameStats> {
        debug_assert!(self.initialized, "basic forward rendered before init");

        let mut stats = FrameStats::default();
        let scene_set = frame.scene_set(None)?;
        let cmd = frame.cmd();

        frame.begin_pass(&mut stats, frame.main_target, frame.extent);
        self.cache.reset();
        draw_items(
            frame.device,
            cmd,
            &frame.draw_list.opaque,
            scene_set,
            DrawMode::MATERIAL,
            &mut self.cache,
            &mut stats,
        );
        draw_items(
            frame.device,
            cmd,
            &frame.draw_list.transparent,
            scene_set,
            DrawMode::MATERIAL,
            &mut self.cache,
            &mut stats,
        );
        frame.device.cmd_end_pass(cmd);

        Ok(stats)
    }
}
