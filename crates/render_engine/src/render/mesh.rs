//! Meshes
//!
//! [`MeshData`] is CPU-side geometry; [`GpuMesh`] is the uploaded form the
//! draw list builder reads. Vertices are pulled in the vertex shader through
//! the buffer's device address, so the vertex layout only has to match the
//! shader's std430 struct.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::Vec3;
use crate::render::api::*;
use crate::render::material::Material;
use crate::render::resources::{DeletionQueue, GpuOwned};
use crate::render::{RenderError, RenderResult};
use crate::scene::Aabb;

/// Vertex as stored in the vertex buffer
///
/// The UV is split across the two padding slots of the `vec3`s.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Texture coordinate U
    pub uv_x: f32,
    /// Object-space normal
    pub normal: [f32; 3],
    /// Texture coordinate V
    pub uv_y: f32,
    /// Vertex color
    pub color: [f32; 4],
}

impl Vertex {
    /// Create a white vertex
    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            uv_x: uv[0],
            normal,
            uv_y: uv[1],
            color: [1.0; 4],
        }
    }
}

/// A range of indices drawn with one material
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceRange {
    /// First index
    pub first_index: u32,
    /// Number of indices
    pub index_count: u32,
}

/// CPU-side geometry
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshData {
    /// Vertices
    pub vertices: Vec<Vertex>,
    /// Triangle list indices
    pub indices: Vec<u32>,
    /// Index ranges, one per material slot
    pub surfaces: Vec<SurfaceRange>,
}

impl MeshData {
    /// Single-surface mesh covering every index
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        let index_count = indices.len() as u32;
        Self {
            vertices,
            indices,
            surfaces: vec![SurfaceRange { first_index: 0, index_count }],
        }
    }

    /// Axis-aligned cube with the given half extent, centered on the origin
    pub fn cube(half_extent: f32) -> Self {
        let h = half_extent;
        // (normal, tangent u, tangent v) per face
        let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (n, u, v) in faces {
            let (n, u, v) = (Vec3::from(n), Vec3::from(u), Vec3::from(v));
            let base = vertices.len() as u32;
            for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                let p = (n + u * su + v * sv) * h;
                vertices.push(Vertex::new(
                    [p.x, p.y, p.z],
                    [n.x, n.y, n.z],
                    [(su + 1.0) * 0.5, 1.0 - (sv + 1.0) * 0.5],
                ));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Self::new(vertices, indices)
    }

    /// Horizontal square plane facing +Y
    pub fn plane(half_size: f32) -> Self {
        let s = half_size;
        let n = [0.0, 1.0, 0.0];
        let vertices = vec![
            Vertex::new([-s, 0.0, s], n, [0.0, 1.0]),
            Vertex::new([s, 0.0, s], n, [1.0, 1.0]),
            Vertex::new([s, 0.0, -s], n, [1.0, 0.0]),
            Vertex::new([-s, 0.0, -s], n, [0.0, 0.0]),
        ];
        Self::new(vertices, vec![0, 1, 2, 0, 2, 3])
    }

    /// Bounds of the vertices one surface references
    pub fn surface_bounds(&self, surface: &SurfaceRange) -> Option<Aabb> {
        let start = surface.first_index as usize;
        let end = start + surface.index_count as usize;
        let indices = self.indices.get(start..end)?;
        Aabb::from_points(
            indices
                .iter()
                .filter_map(|&i| self.vertices.get(i as usize))
                .map(|v| Vec3::from(v.position)),
        )
    }
}

/// Part of a [`GpuMesh`] drawn with one material
#[derive(Debug, Clone)]
pub struct MeshSurface {
    /// First index
    pub first_index: u32,
    /// Number of indices
    pub index_count: u32,
    /// Material
    pub material: Arc<Material>,
    /// Object-space bounds of the surface
    pub bounds: Aabb,
}

/// Uploaded mesh
#[derive(Debug)]
pub struct GpuMesh {
    name: String,
    index_buffer: GpuOwned<BufferHandle>,
    vertex_buffer: GpuOwned<BufferHandle>,
    vertex_address: u64,
    /// Surfaces in draw order
    pub surfaces: Vec<MeshSurface>,
}

impl GpuMesh {
    /// Upload `data`, assigning `materials[i]` to surface `i`
    ///
    /// Surfaces beyond the end of `materials` reuse the last material.
    pub fn upload(
        device: &dyn GpuDevice,
        name: impl Into<String>,
        data: &MeshData,
        materials: &[Arc<Material>],
    ) -> RenderResult<Self> {
        let name = name.into();
        if data.vertices.is_empty() || data.indices.is_empty() {
            return Err(RenderError::ResourceCreationFailed(format!("mesh '{name}' has no geometry")));
        }
        let Some(fallback) = materials.last() else {
            return Err(RenderError::ResourceCreationFailed(format!("mesh '{name}' has no material")));
        };

        let vertex_bytes: &[u8] = bytemuck::cast_slice(&data.vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(&data.indices);

        let vertex_buffer = GpuOwned::new(
            format!("{name} vertices"),
            device.create_buffer(&BufferDesc {
                label: format!("{name} vertices"),
                size: vertex_bytes.len() as u64,
                usage: BufferUsage::STORAGE | BufferUsage::TRANSFER_DST | BufferUsage::DEVICE_ADDRESS,
                location: MemoryLocation::GpuOnly,
            })?,
        );
        let index_buffer = match device.create_buffer(&BufferDesc {
            label: format!("{name} indices"),
            size: index_bytes.len() as u64,
            usage: BufferUsage::INDEX | BufferUsage::TRANSFER_DST,
            location: MemoryLocation::GpuOnly,
        }) {
            Ok(buffer) => GpuOwned::new(format!("{name} indices"), buffer),
            Err(e) => {
                vertex_buffer.release(device);
                return Err(e);
            }
        };

        let uploaded = device
            .upload_buffer(vertex_buffer.handle(), vertex_bytes)
            .and_then(|()| device.upload_buffer(index_buffer.handle(), index_bytes));
        if let Err(e) = uploaded {
            index_buffer.release(device);
            vertex_buffer.release(device);
            return Err(e);
        }

        let surfaces = data
            .surfaces
            .iter()
            .enumerate()
            .map(|(i, range)| MeshSurface {
                first_index: range.first_index,
                index_count: range.index_count,
                material: Arc::clone(materials.get(i).unwrap_or(fallback)),
                bounds: data
                    .surface_bounds(range)
                    .unwrap_or_else(|| Aabb::new(Vec3::zeros(), Vec3::zeros())),
            })
            .collect();

        log::debug!(
            "Uploaded mesh '{}' ({} vertices, {} indices)",
            name,
            data.vertices.len(),
            data.indices.len()
        );

        Ok(Self {
            vertex_address: device.buffer_device_address(vertex_buffer.handle()),
            name,
            index_buffer,
            vertex_buffer,
            surfaces,
        })
    }

    /// Debug name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index buffer
    pub fn index_buffer(&self) -> BufferHandle {
        self.index_buffer.handle()
    }

    /// Device address of the vertex buffer
    pub fn vertex_address(&self) -> u64 {
        self.vertex_address
    }

    /// Queue both buffers for destruction
    pub fn defer_destroy(self, queue: &mut DeletionQueue) {
        // Vertex buffer first so the flush destroys indices before vertices.
        self.vertex_buffer.defer(queue);
        self.index_buffer.defer(queue);
    }
}
