//! GPU state shared by every technique and material
//!
//! Descriptor set 0 carries per-frame scene data, set 1 carries per-material
//! data. All mesh pipelines share one pipeline layout built from those two
//! set layouts plus the per-draw push constant block, so binding a new
//! pipeline never disturbs a compatible set 1.

use crate::render::api::*;
use crate::render::resources::GpuOwned;
use crate::render::uniforms::DrawPushConstants;
use crate::render::RenderResult;

/// Descriptor counts per set for the frame slots' transient pools
///
/// Sized for the largest per-frame set, the deferred lighting set.
pub const FRAME_POOL_RATIOS: [PoolSizeRatio; 2] = [
    PoolSizeRatio { ty: DescriptorType::UniformBuffer, ratio: 2.0 },
    PoolSizeRatio { ty: DescriptorType::CombinedImageSampler, ratio: 4.0 },
];

/// Descriptor counts per set for material sets
pub const MATERIAL_POOL_RATIOS: [PoolSizeRatio; 2] = [
    PoolSizeRatio { ty: DescriptorType::UniformBuffer, ratio: 1.0 },
    PoolSizeRatio { ty: DescriptorType::CombinedImageSampler, ratio: 1.0 },
];

/// Binding of the scene uniform block in set 0
pub const SCENE_UNIFORM_BINDING: u32 = 0;
/// Binding of the shadow map in set 0
pub const SHADOW_MAP_BINDING: u32 = 1;
/// Binding of the material constants in set 1
pub const MATERIAL_CONSTANTS_BINDING: u32 = 0;
/// Binding of the albedo texture in set 1
pub const MATERIAL_TEXTURE_BINDING: u32 = 1;

/// Layouts, default texture and samplers created once per renderer
#[derive(Debug)]
pub struct SharedResources {
    scene_layout: GpuOwned<DescriptorLayoutHandle>,
    material_layout: GpuOwned<DescriptorLayoutHandle>,
    mesh_pipeline_layout: GpuOwned<PipelineLayoutHandle>,
    white_texture: GpuOwned<ImageHandle>,
    linear_sampler: GpuOwned<SamplerHandle>,
    nearest_sampler: GpuOwned<SamplerHandle>,
}

impl SharedResources {
    /// Create the shared layouts and defaults
    pub fn new(device: &dyn GpuDevice) -> RenderResult<Self> {
        let scene_layout = GpuOwned::new(
            "scene set layout",
            device.create_descriptor_layout(&[
                DescriptorBinding::new(SCENE_UNIFORM_BINDING, DescriptorType::UniformBuffer, ShaderStages::ALL_GRAPHICS),
                DescriptorBinding::new(SHADOW_MAP_BINDING, DescriptorType::CombinedImageSampler, ShaderStages::FRAGMENT),
            ])?,
        );
        let material_layout = GpuOwned::new(
            "material set layout",
            device.create_descriptor_layout(&[
                DescriptorBinding::new(MATERIAL_CONSTANTS_BINDING, DescriptorType::UniformBuffer, ShaderStages::ALL_GRAPHICS),
                DescriptorBinding::new(MATERIAL_TEXTURE_BINDING, DescriptorType::CombinedImageSampler, ShaderStages::FRAGMENT),
            ])?,
        );
        let mesh_pipeline_layout = GpuOwned::new(
            "mesh pipeline layout",
            device.create_pipeline_layout(&PipelineLayoutDesc {
                set_layouts: vec![scene_layout.handle(), material_layout.handle()],
                push_constant_size: std::mem::size_of::<DrawPushConstants>() as u32,
            })?,
        );

        let white_texture = GpuOwned::new(
            "default white texture",
            device.create_texture(
                &TextureDesc {
                    label: "default white".to_string(),
                    extent: Extent2D::new(1, 1),
                    format: Format::Rgba8Unorm,
                },
                &[255, 255, 255, 255],
            )?,
        );
        let linear_sampler = GpuOwned::new(
            "linear sampler",
            device.create_sampler(&SamplerDesc { filter: Filter::Linear, clamp_to_edge: false })?,
        );
        let nearest_sampler = GpuOwned::new(
            "nearest clamp sampler",
            device.create_sampler(&SamplerDesc { filter: Filter::Nearest, clamp_to_edge: true })?,
        );

        log::debug!("Created shared descriptor layouts and default resources");

        Ok(Self {
            scene_layout,
            material_layout,
            mesh_pipeline_layout,
            white_texture,
            linear_sampler,
            nearest_sampler,
        })
    }

    /// Set 0 layout: scene uniforms and shadow map
    pub fn scene_layout(&self) -> DescriptorLayoutHandle {
        self.scene_layout.handle()
    }

    /// Set 1 layout: material constants and albedo texture
    pub fn material_layout(&self) -> DescriptorLayoutHandle {
        self.material_layout.handle()
    }

    /// Pipeline layout shared by every mesh pipeline
    pub fn mesh_pipeline_layout(&self) -> PipelineLayoutHandle {
        self.mesh_pipeline_layout.handle()
    }

    /// 1x1 white texture, also bound as the shadow map when shadows are off
    pub fn white_texture(&self) -> ImageHandle {
        self.white_texture.handle()
    }

    /// Bilinear repeating sampler
    pub fn linear_sampler(&self) -> SamplerHandle {
        self.linear_sampler.handle()
    }

    /// Nearest clamping sampler for render target reads
    pub fn nearest_sampler(&self) -> SamplerHandle {
        self.nearest_sampler.handle()
    }

    /// Destroy everything, dependents before the layouts they use
    pub fn destroy(self, device: &dyn GpuDevice) {
        self.nearest_sampler.release(device);
        self.linear_sampler.release(device);
        self.white_texture.release(device);
        self.mesh_pipeline_layout.release(device);
        self.material_layout.release(device);
        self.scene_layout.release(device);
    }
}

/// Load a shader by name and create its module
pub fn load_shader_module(
    device: &dyn GpuDevice,
    shaders: &dyn ShaderSource,
    name: &str,
) -> RenderResult<GpuOwned<ShaderModuleHandle>> {
    let spirv = shaders.load(name)?;
    let module = device.create_shader_module(&spirv)?;
    Ok(GpuOwned::new(format!("shader {name}"), module))
}
