//! Rendering system
//!
//! The renderer is split into a backend-agnostic core and a Vulkan backend:
//!
//! - [`api`]: handle types and the [`api::GpuDevice`] / [`api::PresentSurface`]
//!   traits every backend implements
//! - [`resources`]: transient descriptor pools, deferred destruction and
//!   owned GPU handles
//! - [`shared_resources`]: descriptor layouts and defaults every pipeline shares
//! - [`frame`]: the ring of per-frame slots that paces the CPU against the GPU
//! - [`technique`]: swappable rendering techniques (forward, shadow-mapped
//!   forward, deferred)
//! - [`orchestrator`]: the [`Renderer`] that ties a frame together
//! - [`backends::vulkan`]: the `ash` implementation of the device traits

pub mod api;
pub mod backends;
pub mod frame;
pub mod material;
pub mod mesh;
pub mod orchestrator;
pub mod resources;
pub mod shared_resources;
pub mod stats;
pub mod technique;
pub mod uniforms;

#[cfg(test)]
pub(crate) mod testing;

pub use material::{Material, MaterialFactory, MaterialId, MaterialParams, MaterialPass, MaterialPipeline};
pub use mesh::{GpuMesh, MeshData, MeshSurface, Vertex};
pub use orchestrator::Renderer;
pub use stats::FrameStats;
pub use technique::TechniqueKind;

use thiserror::Error;

/// Errors surfaced by the rendering core
///
/// Everything that reaches the caller is fatal for the current renderer:
/// transient conditions such as a single exhausted descriptor pool are
/// recovered internally and never show up here.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Renderer initialization failed during setup
    #[error("Renderer initialization failed: {0}")]
    InitializationFailed(String),

    /// A rendering operation failed during execution
    #[error("Rendering failed: {0}")]
    RenderingFailed(String),

    /// Resource creation or management failed
    #[error("Resource creation failed: {0}")]
    ResourceCreationFailed(String),

    /// The GPU stopped making progress; a frame fence did not signal in time
    #[error("Device lost: {0}")]
    DeviceLost(String),

    /// A descriptor set could not be allocated even after growing the pool
    #[error("Descriptor allocation failed: {0}")]
    DescriptorAllocation(String),

    /// A frame was requested before any technique was activated
    #[error("No active rendering technique")]
    NoActiveTechnique,

    /// A shader module could not be loaded
    #[error("Shader '{name}' could not be loaded: {reason}")]
    ShaderLoad {
        /// Shader name as requested by the technique
        name: String,
        /// Underlying cause
        reason: String,
    },

    /// Backend-specific error occurred
    #[error("Backend error: {0}")]
    BackendError(String),
}

/// Result type for rendering operations
pub type RenderResult<T> = Result<T, RenderError>;
