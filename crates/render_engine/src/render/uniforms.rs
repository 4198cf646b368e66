//! GPU-visible data blocks
//!
//! Every struct here is `#[repr(C)]` and [`bytemuck::Pod`] so it can be
//! copied into buffers and push constants as raw bytes. Layouts follow std140
//! (only `vec4`/`mat4` members) so the same structs serve uniform and push
//! constant blocks.

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{to_cols_array, Mat4};
use crate::scene::{Camera, LightingEnvironment};

/// Maximum number of point lights the deferred lighting pass reads
pub const MAX_POINT_LIGHTS: usize = 16;

/// Shadow parameters written into [`SceneUniformBlock::shadow_params`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowSettings {
    /// The shadow map holds valid data this frame
    pub enabled: bool,
    /// Constant depth bias used when comparing against the map
    pub depth_bias: f32,
    /// Shadow map edge length in texels
    pub map_size: u32,
    /// Visualize the shadow map instead of shading
    pub debug_view: bool,
}

/// Per-frame scene data bound at set 0, binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneUniformBlock {
    /// World to view
    pub view: [[f32; 4]; 4],
    /// View to clip
    pub proj: [[f32; 4]; 4],
    /// World to clip
    pub view_proj: [[f32; 4]; 4],
    /// World to the sun's clip space
    pub light_view_proj: [[f32; 4]; 4],
    /// rgb = ambient color, a = intensity
    pub ambient_color: [f32; 4],
    /// xyz = direction light travels, w unused
    pub sun_direction: [f32; 4],
    /// rgb = color, a = intensity
    pub sun_color: [f32; 4],
    /// x = enabled, y = depth bias, z = texel size, w = debug view
    pub shadow_params: [f32; 4],
    /// xyz = camera position
    pub camera_position: [f32; 4],
}

impl SceneUniformBlock {
    /// Gather the frame's camera and lighting state
    pub fn new(camera: &Camera, lights: &LightingEnvironment, shadow: ShadowSettings) -> Self {
        let view = camera.get_view_matrix();
        let proj = camera.get_projection_matrix();

        let (sun_direction, sun_color) = match lights.sun() {
            Some(sun) => (
                [sun.direction.x, sun.direction.y, sun.direction.z, 0.0],
                [sun.color.x, sun.color.y, sun.color.z, sun.intensity],
            ),
            None => ([0.0, -1.0, 0.0, 0.0], [0.0; 4]),
        };

        let flag = |b: bool| if b { 1.0 } else { 0.0 };

        Self {
            view: to_cols_array(&view),
            proj: to_cols_array(&proj),
            view_proj: to_cols_array(&(proj * view)),
            light_view_proj: to_cols_array(&lights.sun_view_projection()),
            ambient_color: [
                lights.ambient_color.x,
                lights.ambient_color.y,
                lights.ambient_color.z,
                lights.ambient_intensity,
            ],
            sun_direction,
            sun_color,
            shadow_params: [
                flag(shadow.enabled && lights.sun().is_some()),
                shadow.depth_bias,
                1.0 / shadow.map_size.max(1) as f32,
                flag(shadow.debug_view),
            ],
            camera_position: [camera.position.x, camera.position.y, camera.position.z, 1.0],
        }
    }

    /// World-to-clip matrix as a nalgebra matrix
    pub fn view_proj_matrix(&self) -> Mat4 {
        Mat4::from(self.view_proj)
    }
}

/// One point light as the lighting shader reads it
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PointLightData {
    /// xyz = position, w = range
    pub position_range: [f32; 4],
    /// rgb = color, a = intensity
    pub color_intensity: [f32; 4],
}

/// Point lights for the deferred lighting pass
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PointLightBlock {
    /// x = number of valid entries
    pub count: [u32; 4],
    /// Light entries, only the first `count[0]` are read
    pub lights: [PointLightData; MAX_POINT_LIGHTS],
}

impl PointLightBlock {
    /// Pack the environment's point lights, dropping any beyond the limit
    pub fn from_environment(lights: &LightingEnvironment) -> Self {
        let mut block = Self::zeroed();
        let mut count = 0;
        for (slot, light) in block.lights.iter_mut().zip(lights.point_lights()) {
            *slot = PointLightData {
                position_range: [light.position.x, light.position.y, light.position.z, light.range],
                color_intensity: [light.color.x, light.color.y, light.color.z, light.intensity],
            };
            count += 1;
        }

        let total = lights.point_lights().count();
        if total > MAX_POINT_LIGHTS {
            log::warn!("{total} point lights in scene, only the first {MAX_POINT_LIGHTS} are shaded");
        }

        block.count[0] = count;
        block
    }
}

/// Per-material constants bound at set 1, binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialConstants {
    /// Base color multiplier
    pub base_color: [f32; 4],
    /// x = metallic, y = roughness, zw unused
    pub params: [f32; 4],
}

/// Per-draw push constants
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DrawPushConstants {
    /// Object to world
    pub world: [[f32; 4]; 4],
    /// Device address of the mesh's vertex buffer
    pub vertex_address: u64,
    /// Keeps the block a multiple of 16 bytes
    pub _padding: u64,
}

impl DrawPushConstants {
    /// Constants for one draw
    pub fn new(world: &Mat4, vertex_address: u64) -> Self {
        Self {
            world: to_cols_array(world),
            vertex_address,
            _padding: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;
    use crate::scene::Light;

    #[test]
    fn test_block_sizes_are_std140_friendly() {
        assert_eq!(std::mem::size_of::<SceneUniformBlock>() % 16, 0);
        assert_eq!(std::mem::size_of::<DrawPushConstants>(), 80);
        assert_eq!(std::mem::size_of::<PointLightBlock>(), 16 + 32 * MAX_POINT_LIGHTS);
    }

    #[test]
    fn test_shadow_flag_requires_sun() {
        let camera = Camera::default();
        let settings = ShadowSettings { enabled: true, depth_bias: 0.005, map_size: 1024, debug_view: false };

        let no_sun = SceneUniformBlock::new(&camera, &LightingEnvironment::new(), settings);
        assert_eq!(no_sun.shadow_params[0], 0.0);

        let lights = LightingEnvironment::new()
            .add_light(Light::directional(Vec3::new(0.0, -1.0, 0.0), Vec3::new(1.0, 1.0, 1.0), 2.0));
        let with_sun = SceneUniformBlock::new(&camera, &lights, settings);
        assert_eq!(with_sun.shadow_params[0], 1.0);
        assert_eq!(with_sun.shadow_params[2], 1.0 / 1024.0);
        assert_eq!(with_sun.sun_color[3], 2.0);
    }

    #[test]
    fn test_point_lights_truncated() {
        let mut lights = LightingEnvironment::new();
        for i in 0..(MAX_POINT_LIGHTS + 4) {
            lights = lights.add_light(Light::point(Vec3::new(i as f32, 1.0, 0.0), Vec3::new(1.0, 1.0, 1.0), 1.0, 5.0));
        }

        let block = PointLightBlock::from_environment(&lights);
        assert_eq!(block.count[0] as usize, MAX_POINT_LIGHTS);
        assert_eq!(block.lights[3].position_range[0], 3.0);
    }
}
