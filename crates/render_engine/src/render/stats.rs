//! Per-frame rendering statistics
//!
//! Techniques return a [`FrameStats`] from every `render()` call; the
//! orchestrator merges in the draw list and allocator counters. Nothing here
//! is global, so two renderers never share counters.

use std::fmt;
use std::ops::AddAssign;

use crate::scene::DrawListStats;

/// Counters for one rendered frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    /// Indexed and fullscreen draws issued
    pub draws: u32,
    /// Pipeline bind commands issued
    pub pipeline_binds: u32,
    /// Material (set 1) bind commands issued
    pub material_binds: u32,
    /// Index buffer bind commands issued
    pub index_buffer_binds: u32,
    /// Render passes begun
    pub passes: u32,
    /// Draw items rejected by culling
    pub culled: u32,
    /// Transparent items the technique could not draw
    pub skipped_transparent: u32,
    /// Transient descriptor sets allocated from the frame slot
    pub descriptor_sets_allocated: u32,
    /// Opaque items that survived culling
    pub visible_opaque: u32,
    /// Transparent items that survived culling
    pub visible_transparent: u32,
}

impl FrameStats {
    /// Copy the draw list counters in
    pub fn record_draw_list(&mut self, stats: &DrawListStats) {
        self.culled = stats.culled as u32;
        self.visible_opaque = stats.opaque as u32;
        self.visible_transparent = stats.transparent as u32;
    }
}

impl AddAssign for FrameStats {
    fn add_assign(&mut self, rhs: Self) {
        self.draws += rhs.draws;
        self.pipeline_binds += rhs.pipeline_binds;
        self.material_binds += rhs.material_binds;
        self.index_buffer_binds += rhs.index_buffer_binds;
        self.passes += rhs.passes;
        self.culled += rhs.culled;
        self.skipped_transparent += rhs.skipped_transparent;
        self.descriptor_sets_allocated += rhs.descriptor_sets_allocated;
        self.visible_opaque += rhs.visible_opaque;
        self.visible_transparent += rhs.visible_transparent;
    }
}

impl fmt::Display for FrameStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} draws in {} passes ({} pipeline, {} material, {} index binds), {} culled",
            self.draws,
            self.passes,
            self.pipeline_binds,
            self.material_binds,
            self.index_buffer_binds,
            self.culled
        )?;
        if self.skipped_transparent > 0 {
            write!(f, ", {} transparent skipped", self.skipped_transparent)?;
        }
        Ok(())
    }
}
