//! Materials
//!
//! A [`Material`] is the pipeline plus set-1 descriptor set a surface is drawn
//! with. Materials are immutable once created and shared through `Arc`; the
//! [`MaterialFactory`] owns the GPU resources behind them and releases them
//! at shutdown.
//!
//! Material ids are handed out in creation order. The draw list sorts opaque
//! items by id, so materials created together end up drawn together.

use std::sync::Arc;

use crate::config::RendererConfig;
use crate::render::api::*;
use crate::render::resources::{DescriptorAllocator, GpuOwned};
use crate::render::shared_resources::{
    load_shader_module, SharedResources, MATERIAL_CONSTANTS_BINDING, MATERIAL_POOL_RATIOS,
    MATERIAL_TEXTURE_BINDING,
};
use crate::render::uniforms::MaterialConstants;
use crate::render::RenderResult;

/// Unique identifier for materials, ordered by creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MaterialId(pub u32);

/// Pipeline and layout a material binds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialPipeline {
    /// Graphics pipeline
    pub pipeline: PipelineHandle,
    /// Layout the pipeline was built against
    pub layout: PipelineLayoutHandle,
}

/// Which list a material's surfaces are sorted into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MaterialPass {
    /// Opaque geometry, depth tested and written
    #[default]
    MainColor,
    /// Alpha blended geometry drawn after every opaque item
    Transparent,
    /// Anything else; drawn with the opaque items
    Other,
}

impl MaterialPass {
    /// Whether surfaces of this pass go to the transparent list
    pub fn is_transparent(self) -> bool {
        self == MaterialPass::Transparent
    }
}

/// A ready-to-bind material
#[derive(Debug)]
pub struct Material {
    /// Identifier, also the primary draw sort key
    pub id: MaterialId,
    /// Debug name
    pub name: String,
    /// Pipeline used in the main color pass
    pub pipeline: MaterialPipeline,
    /// Descriptor set bound at set 1
    pub material_set: DescriptorSetHandle,
    /// Opaque or transparent
    pub pass: MaterialPass,
}

/// Parameters for [`MaterialFactory::create_material`]
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialParams {
    /// Debug name
    pub name: String,
    /// Base color multiplier, alpha used by transparent materials
    pub base_color: [f32; 4],
    /// Metallic factor
    pub metallic: f32,
    /// Roughness factor
    pub roughness: f32,
    /// Albedo texture; the default white texture when `None`
    pub texture: Option<ImageHandle>,
    /// Opaque or transparent
    pub pass: MaterialPass,
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            name: "material".to_string(),
            base_color: [0.8, 0.8, 0.8, 1.0],
            metallic: 0.0,
            roughness: 0.5,
            texture: None,
            pass: MaterialPass::MainColor,
        }
    }
}

impl MaterialParams {
    /// Opaque material with a flat color
    pub fn opaque(name: impl Into<String>, base_color: [f32; 4]) -> Self {
        Self { name: name.into(), base_color, ..Self::default() }
    }

    /// Alpha blended material with a flat color
    pub fn transparent(name: impl Into<String>, base_color: [f32; 4]) -> Self {
        Self {
            name: name.into(),
            base_color,
            pass: MaterialPass::Transparent,
            ..Self::default()
        }
    }

    /// Builder-style texture
    pub fn with_texture(mut self, texture: ImageHandle) -> Self {
        self.texture = Some(texture);
        self
    }
}

/// Creates materials and owns their GPU resources
#[derive(Debug)]
pub struct MaterialFactory {
    vertex_shader: GpuOwned<ShaderModuleHandle>,
    fragment_shader: GpuOwned<ShaderModuleHandle>,
    opaque_pipeline: GpuOwned<PipelineHandle>,
    transparent_pipeline: GpuOwned<PipelineHandle>,
    layout: PipelineLayoutHandle,
    descriptors: DescriptorAllocator,
    constant_buffers: Vec<GpuOwned<BufferHandle>>,
    next_id: u32,
}

impl MaterialFactory {
    /// Build the opaque and transparent mesh pipelines against `main_target`
    pub fn new(
        device: &dyn GpuDevice,
        shaders: &dyn ShaderSource,
        shared: &SharedResources,
        main_target: RenderTargetHandle,
        config: &RendererConfig,
    ) -> RenderResult<Self> {
        let vertex_shader = load_shader_module(device, shaders, "mesh.vert")?;
        let fragment_shader = match load_shader_module(device, shaders, "mesh.frag") {
            Ok(module) => module,
            Err(e) => {
                vertex_shader.release(device);
                return Err(e);
            }
        };

        let layout = shared.mesh_pipeline_layout();
        let pipeline_desc = |label: &str, blend, depth, cull| GraphicsPipelineDesc {
            label: label.to_string(),
            vertex_shader: vertex_shader.handle(),
            fragment_shader: Some(fragment_shader.handle()),
            layout,
            target: main_target,
            blend,
            depth,
            cull,
            dynamic_depth_bias: false,
        };

        let built = device
            .create_graphics_pipeline(&pipeline_desc(
                "mesh opaque",
                BlendMode::Opaque,
                DepthState::READ_WRITE,
                CullMode::Back,
            ))
            .and_then(|opaque| {
                match device.create_graphics_pipeline(&pipeline_desc(
                    "mesh transparent",
                    BlendMode::AlphaBlend,
                    DepthState::READ_ONLY,
                    CullMode::None,
                )) {
                    Ok(transparent) => Ok((opaque, transparent)),
                    Err(e) => {
                        device.destroy_pipeline(opaque);
                        Err(e)
                    }
                }
            })
            .and_then(|(opaque, transparent)| {
                match DescriptorAllocator::new(
                    device,
                    "material descriptors",
                    config.initial_sets_per_pool,
                    config.max_sets_per_pool,
                    &MATERIAL_POOL_RATIOS,
                ) {
                    Ok(descriptors) => Ok((opaque, transparent, descriptors)),
                    Err(e) => {
                        device.destroy_pipeline(transparent);
                        device.destroy_pipeline(opaque);
                        Err(e)
                    }
                }
            });

        let (opaque, transparent, descriptors) = match built {
            Ok(parts) => parts,
            Err(e) => {
                fragment_shader.release(device);
                vertex_shader.release(device);
                return Err(e);
            }
        };

        log::debug!("Material factory ready");

        Ok(Self {
            vertex_shader,
            fragment_shader,
            opaque_pipeline: GpuOwned::new("mesh opaque pipeline", opaque),
            transparent_pipeline: GpuOwned::new("mesh transparent pipeline", transparent),
            layout,
            descriptors,
            constant_buffers: Vec::new(),
            next_id: 1,
        })
    }

    /// Create a material
    pub fn create_material(
        &mut self,
        device: &dyn GpuDevice,
        shared: &SharedResources,
        params: &MaterialParams,
    ) -> RenderResult<Arc<Material>> {
        let constants = MaterialConstants {
            base_color: params.base_color,
            params: [params.metallic, params.roughness, 0.0, 0.0],
        };
        let size = std::mem::size_of::<MaterialConstants>() as u64;

        let buffer = GpuOwned::new(
            format!("material '{}' constants", params.name),
            device.create_buffer(&BufferDesc::uniform(format!("{} constants", params.name), size))?,
        );
        let set = match device
            .write_buffer(buffer.handle(), 0, bytemuck::bytes_of(&constants))
            .and_then(|()| self.descriptors.allocate(device, shared.material_layout()))
        {
            Ok(set) => set,
            Err(e) => {
                buffer.release(device);
                return Err(e);
            }
        };

        device.write_descriptor_set(
            set,
            &[
                DescriptorWrite::UniformBuffer {
                    binding: MATERIAL_CONSTANTS_BINDING,
                    buffer: buffer.handle(),
                    range: size,
                },
                DescriptorWrite::Image {
                    binding: MATERIAL_TEXTURE_BINDING,
                    image: params.texture.unwrap_or_else(|| shared.white_texture()),
                    sampler: shared.linear_sampler(),
                },
            ],
        );
        self.constant_buffers.push(buffer);

        let pipeline = match params.pass {
            MaterialPass::Transparent => self.transparent_pipeline.handle(),
            MaterialPass::MainColor | MaterialPass::Other => self.opaque_pipeline.handle(),
        };

        let id = MaterialId(self.next_id);
        self.next_id += 1;
        log::debug!("Created material '{}' ({:?}, {:?})", params.name, id, params.pass);

        Ok(Arc::new(Material {
            id,
            name: params.name.clone(),
            pipeline: MaterialPipeline { pipeline, layout: self.layout },
            material_set: set,
            pass: params.pass,
        }))
    }

    /// Number of materials created
    pub fn material_count(&self) -> usize {
        self.constant_buffers.len()
    }

    /// Release every material resource
    ///
    /// Materials still referenced elsewhere keep dangling handles afterwards;
    /// the caller guarantees the device is idle and no further draws use them.
    pub fn destroy(mut self, device: &dyn GpuDevice) {
        for buffer in self.constant_buffers.drain(..).rev() {
            buffer.release(device);
        }
        self.descriptors.destroy_pools(device);
        self.transparent_pipeline.release(device);
        self.opaque_pipeline.release(device);
        self.fragment_shader.release(device);
        self.vertex_shader.release(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::testing::{RecordingDevice, StubShaderSource};
    use crate::render::RenderError;

    struct MissingShaders;

    impl ShaderSource for MissingShaders {
        fn load(&self, name: &str) -> RenderResult<Vec<u8>> {
            Err(RenderError::ShaderLoad { name: name.to_string(), reason: "not found".to_string() })
        }
    }

    fn setup(device: &RecordingDevice) -> (SharedResources, RenderTargetHandle) {
        let shared = SharedResources::new(device).unwrap();
        let target = device
            .create_render_target(&RenderTargetDesc {
                label: "main".to_string(),
                extent: Extent2D::new(64, 64),
                color_formats: vec![Format::Rgba16Float],
                depth_format: Some(Format::Depth32Float),
            })
            .unwrap();
        (shared, target)
    }

    #[test]
    fn test_materials_get_increasing_ids_and_pass_pipelines() {
        let device = RecordingDevice::new();
        let (shared, target) = setup(&device);
        let config = RendererConfig::default();
        let mut factory = MaterialFactory::new(&device, &StubShaderSource, &shared, target, &config).unwrap();

        let stone = factory
            .create_material(&device, &shared, &MaterialParams::opaque("stone", [0.5, 0.5, 0.5, 1.0]))
            .unwrap();
        let glass = factory
            .create_material(&device, &shared, &MaterialParams::transparent("glass", [0.2, 0.4, 1.0, 0.3]))
            .unwrap();

        assert!(stone.id < glass.id);
        assert_eq!(glass.pass, MaterialPass::Transparent);
        assert_eq!(device.pipeline_label(stone.pipeline.pipeline).as_deref(), Some("mesh opaque"));
        assert_eq!(device.pipeline_label(glass.pipeline.pipeline).as_deref(), Some("mesh transparent"));
        assert_eq!(stone.pipeline.layout, shared.mesh_pipeline_layout());
        assert_ne!(stone.material_set, glass.material_set);
        assert_eq!(factory.material_count(), 2);

        factory.destroy(&device);
        shared.destroy(&device);
        device.destroy_render_target(target);
        assert_eq!(device.live_resources(), 0);
    }

    #[test]
    fn test_missing_shader_leaks_nothing() {
        let device = RecordingDevice::new();
        let (shared, target) = setup(&device);
        let before = device.live_resources();

        let result = MaterialFactory::new(&device, &MissingShaders, &shared, target, &RendererConfig::default());
        assert!(matches!(result, Err(RenderError::ShaderLoad { .. })));
        assert_eq!(device.live_resources(), before);
    }

    #[test]
    fn test_pipeline_failure_leaks_nothing() {
        let device = RecordingDevice::new();
        let (shared, target) = setup(&device);
        let before = device.live_resources();
        device.fail_pipeline("mesh transparent");

        let result = MaterialFactory::new(&device, &StubShaderSource, &shared, target, &RendererConfig::default());
        assert!(result.is_err());
        assert_eq!(device.live_resources(), before);
    }
}
