//! # Draw List
//!
//! Flattens the scene graph into the per-frame list of draws a rendering
//! technique consumes.
//!
//! ## Visibility
//!
//! Each surface's object-space bounds are pushed through
//! `view_proj × world`, perspective divided, and rejected when the resulting
//! box lies entirely outside the clip volume on one axis (x and y in
//! `[-1, 1]`, z in `[0, 1]`). This is a box test, not a plane test, so it
//! keeps some items a tighter test would cull. Boxes crossing the camera
//! plane are always kept.
//!
//! ## Ordering
//!
//! Opaque items are sorted by material, then index buffer, so consecutive
//! draws share binds. The sort is stable: equal keys keep scene order.
//! Transparent items stay in scene order; they are not depth sorted.

use std::sync::Arc;

use crate::foundation::math::{Mat4, Vec4};
use crate::render::api::BufferHandle;
use crate::render::material::{Material, MaterialId};
use crate::scene::{Aabb, SceneGraph};

/// One indexed draw
#[derive(Debug, Clone)]
pub struct DrawItem {
    /// First index in the index buffer
    pub first_index: u32,
    /// Number of indices
    pub index_count: u32,
    /// Index buffer
    pub index_buffer: BufferHandle,
    /// Device address of the vertex buffer
    pub vertex_address: u64,
    /// Material the surface is drawn with
    pub material: Arc<Material>,
    /// Object to world
    pub transform: Mat4,
    /// Object-space bounds
    pub bounds: Aabb,
}

impl DrawItem {
    /// Key the opaque list is sorted by
    pub fn sort_key(&self) -> (MaterialId, BufferHandle) {
        (self.material.id, self.index_buffer)
    }
}

/// Counters from the last build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawListStats {
    /// Surfaces considered
    pub visited: usize,
    /// Surfaces rejected by the visibility test
    pub culled: usize,
    /// Items in the opaque list
    pub opaque: usize,
    /// Items in the transparent list
    pub transparent: usize,
}

/// Sorted draws for one frame
#[derive(Debug, Clone, Default)]
pub struct DrawList {
    /// Opaque and `Other` items, sorted for bind locality
    pub opaque: Vec<DrawItem>,
    /// Transparent items in scene order
    pub transparent: Vec<DrawItem>,
    /// Build counters
    pub stats: DrawListStats,
}

impl DrawList {
    /// Refresh world transforms and collect every visible surface
    pub fn build(scene: &mut SceneGraph, view_proj: &Mat4) -> Self {
        scene.update_world_transforms();

        let mut list = Self::default();
        scene.visit_meshes(|_, world, mesh| {
            let clip_from_object = view_proj * world;
            for surface in &mesh.surfaces {
                list.stats.visited += 1;
                if !is_visible(&surface.bounds, &clip_from_object) {
                    list.stats.culled += 1;
                    continue;
                }

                let item = DrawItem {
                    first_index: surface.first_index,
                    index_count: surface.index_count,
                    index_buffer: mesh.index_buffer(),
                    vertex_address: mesh.vertex_address(),
                    material: Arc::clone(&surface.material),
                    transform: *world,
                    bounds: surface.bounds,
                };
                if surface.material.pass.is_transparent() {
                    list.transparent.push(item);
                } else {
                    list.opaque.push(item);
                }
            }
        });

        list.finish();
        log::trace!(
            "Draw list: {} opaque, {} transparent, {} culled of {}",
            list.stats.opaque,
            list.stats.transparent,
            list.stats.culled,
            list.stats.visited
        );
        list
    }

    /// Build from pre-culled items, splitting and sorting them
    pub fn from_items(items: impl IntoIterator<Item = DrawItem>) -> Self {
        let mut list = Self::default();
        for item in items {
            list.stats.visited += 1;
            if item.material.pass.is_transparent() {
                list.transparent.push(item);
            } else {
                list.opaque.push(item);
            }
        }
        list.finish();
        list
    }

    /// Total number of items
    pub fn len(&self) -> usize {
        self.opaque.len() + self.transparent.len()
    }

    /// Whether there is nothing to draw
    pub fn is_empty(&self) -> bool {
        self.opaque.is_empty() && self.transparent.is_empty()
    }

    fn finish(&mut self) {
        // Stable, so equal keys keep scene order.
        self.opaque.sort_by_key(DrawItem::sort_key);
        self.stats.opaque = self.opaque.len();
        self.stats.transparent = self.transparent.len();
    }
}

/// Conservative box-against-clip-volume test
pub fn is_visible(bounds: &Aabb, clip_from_object: &Mat4) -> bool {
    const W_EPSILON: f32 = 1e-6;

    let clip = bounds
        .corners()
        .map(|c| clip_from_object * Vec4::new(c.x, c.y, c.z, 1.0));

    let behind = clip.iter().filter(|p| p.w <= W_EPSILON).count();
    if behind == clip.len() {
        return false;
    }
    if behind > 0 {
        // Crosses the camera plane; the divide would fold it inside out.
        return true;
    }

    let mut min = [f32::MAX; 3];
    let mut max = [f32::MIN; 3];
    for p in &clip {
        let ndc = [p.x / p.w, p.y / p.w, p.z / p.w];
        for axis in 0..3 {
            min[axis] = min[axis].min(ndc[axis]);
            max[axis] = max[axis].max(ndc[axis]);
        }
    }

    let outside = min[0] > 1.0
        || max[0] < -1.0
        || min[1] > 1.0
        || max[1] < -1.0
        || min[2] > 1.0
        || max[2] < 0.0;
    !outside
}
