//! Plain descriptions passed to [`GpuDevice`](super::GpuDevice)
//!
//! These mirror the subset of Vulkan state the renderer actually uses. The
//! Vulkan backend translates them; the test device just records them.

use bitflags::bitflags;
use thiserror::Error;

use super::handles::*;
use crate::render::RenderError;

/// Width and height of an image or surface in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2D {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Extent2D {
    /// Create an extent
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width divided by height, `1.0` for a degenerate extent
    pub fn aspect_ratio(self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    /// Whether either dimension is zero (minimized window)
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Pixel formats used by the renderer's targets and textures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// 8-bit RGBA, linear
    Rgba8Unorm,
    /// 8-bit RGBA, sRGB encoded
    Rgba8Srgb,
    /// 8-bit BGRA, sRGB encoded (common swapchain format)
    Bgra8Srgb,
    /// 16-bit float RGBA
    Rgba16Float,
    /// 32-bit float depth
    Depth32Float,
}

impl Format {
    /// Whether the format is a depth format
    pub const fn is_depth(self) -> bool {
        matches!(self, Self::Depth32Float)
    }
}

bitflags! {
    /// How a buffer will be used
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Bound as an index buffer
        const INDEX = 1 << 0;
        /// Read as a uniform buffer
        const UNIFORM = 1 << 1;
        /// Read as a storage buffer (vertex pulling)
        const STORAGE = 1 << 2;
        /// Source of a copy
        const TRANSFER_SRC = 1 << 3;
        /// Destination of a copy
        const TRANSFER_DST = 1 << 4;
        /// Shaders read it through a buffer device address
        const DEVICE_ADDRESS = 1 << 5;
    }
}

bitflags! {
    /// Shader stages a binding or push constant range is visible to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        /// Vertex stage
        const VERTEX = 1 << 0;
        /// Fragment stage
        const FRAGMENT = 1 << 1;
        /// Both graphics stages
        const ALL_GRAPHICS = Self::VERTEX.bits() | Self::FRAGMENT.bits();
    }
}

/// Where buffer memory lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryLocation {
    /// Device local, filled through a staging upload
    GpuOnly,
    /// Host visible and coherent, written directly by the CPU
    CpuToGpu,
}

/// Buffer creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    /// Debug name
    pub label: String,
    /// Size in bytes
    pub size: u64,
    /// Usage flags
    pub usage: BufferUsage,
    /// Memory placement
    pub location: MemoryLocation,
}

impl BufferDesc {
    /// Host-visible uniform buffer of `size` bytes
    pub fn uniform(label: impl Into<String>, size: u64) -> Self {
        Self {
            label: label.into(),
            size,
            usage: BufferUsage::UNIFORM,
            location: MemoryLocation::CpuToGpu,
        }
    }
}

/// Sampled texture creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    /// Debug name
    pub label: String,
    /// Size in pixels
    pub extent: Extent2D,
    /// Pixel format
    pub format: Format,
}

/// Texture filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    /// Nearest texel
    Nearest,
    /// Bilinear
    Linear,
}

/// Sampler creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerDesc {
    /// Magnification and minification filter
    pub filter: Filter,
    /// Clamp to edge instead of repeating
    pub clamp_to_edge: bool,
}

/// Render target creation parameters
///
/// A render target bundles its attachments with the pass that writes them.
/// Every attachment is cleared when the pass begins and can be sampled or
/// blitted from once the pass has ended and a barrier has been recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTargetDesc {
    /// Debug name
    pub label: String,
    /// Size of every attachment
    pub extent: Extent2D,
    /// One format per color attachment, in attachment order
    pub color_formats: Vec<Format>,
    /// Optional depth attachment
    pub depth_format: Option<Format>,
}

/// Image layouts the renderer transitions between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    /// Contents are discarded
    Undefined,
    /// Written as a color attachment
    ColorAttachment,
    /// Written as a depth attachment
    DepthAttachment,
    /// Sampled by shaders
    ShaderRead,
    /// Source of a blit
    TransferSrc,
    /// Destination of a blit
    TransferDst,
    /// Handed to the presentation engine
    Present,
}

/// Which aspect of an image a barrier covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageAspect {
    /// Color
    Color,
    /// Depth
    Depth,
}

/// An image layout transition with the matching execution dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageBarrier {
    /// Image being transitioned
    pub image: ImageHandle,
    /// Aspect covered
    pub aspect: ImageAspect,
    /// Layout the image is in
    pub old_layout: ImageLayout,
    /// Layout the image moves to
    pub new_layout: ImageLayout,
}

impl ImageBarrier {
    /// Color image transition
    pub const fn color(image: ImageHandle, old_layout: ImageLayout, new_layout: ImageLayout) -> Self {
        Self { image, aspect: ImageAspect::Color, old_layout, new_layout }
    }

    /// Depth image transition
    pub const fn depth(image: ImageHandle, old_layout: ImageLayout, new_layout: ImageLayout) -> Self {
        Self { image, aspect: ImageAspect::Depth, old_layout, new_layout }
    }
}

/// Parameters for beginning a pass on a render target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassBeginInfo {
    /// Target whose attachments the pass writes
    pub target: RenderTargetHandle,
    /// Render area, also used for viewport and scissor
    pub extent: Extent2D,
    /// Clear color for every color attachment
    pub clear_color: [f32; 4],
    /// Clear depth value
    pub clear_depth: f32,
}

/// Color blending mode of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// No blending
    Opaque,
    /// Premultiplied-free standard alpha blending
    AlphaBlend,
}

/// Depth test and write state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthState {
    /// Compare against the depth buffer (less-or-equal)
    pub test: bool,
    /// Write depth
    pub write: bool,
}

impl DepthState {
    /// Test and write
    pub const READ_WRITE: Self = Self { test: true, write: true };
    /// Test without writing
    pub const READ_ONLY: Self = Self { test: true, write: false };
    /// No depth at all
    pub const DISABLED: Self = Self { test: false, write: false };
}

/// Face culling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    /// Draw both faces
    None,
    /// Cull back faces
    Back,
    /// Cull front faces
    Front,
}

/// Graphics pipeline creation parameters
///
/// Vertices are pulled in the shader through a buffer device address, so
/// pipelines declare no vertex input state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphicsPipelineDesc {
    /// Debug name
    pub label: String,
    /// Vertex shader
    pub vertex_shader: ShaderModuleHandle,
    /// Fragment shader; `None` for depth-only pipelines
    pub fragment_shader: Option<ShaderModuleHandle>,
    /// Pipeline layout
    pub layout: PipelineLayoutHandle,
    /// Target the pipeline renders into (attachment formats and pass compatibility)
    pub target: RenderTargetHandle,
    /// Blending
    pub blend: BlendMode,
    /// Depth state
    pub depth: DepthState,
    /// Face culling
    pub cull: CullMode,
    /// Depth bias is set dynamically with `cmd_set_depth_bias`
    pub dynamic_depth_bias: bool,
}

/// Descriptor kinds used by the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    /// Uniform buffer
    UniformBuffer,
    /// Storage buffer
    StorageBuffer,
    /// Image with its sampler
    CombinedImageSampler,
}

/// One binding in a descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorBinding {
    /// Binding index
    pub binding: u32,
    /// Descriptor kind
    pub ty: DescriptorType,
    /// Visible stages
    pub stages: ShaderStages,
}

impl DescriptorBinding {
    /// Create a binding
    pub const fn new(binding: u32, ty: DescriptorType, stages: ShaderStages) -> Self {
        Self { binding, ty, stages }
    }
}

/// Number of descriptors of one type to reserve per set in a pool
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolSizeRatio {
    /// Descriptor kind
    pub ty: DescriptorType,
    /// Descriptors of this kind per set
    pub ratio: f32,
}

/// A single descriptor update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorWrite {
    /// Uniform buffer range
    UniformBuffer {
        /// Binding index
        binding: u32,
        /// Buffer
        buffer: BufferHandle,
        /// Range size in bytes
        range: u64,
    },
    /// Sampled image in [`ImageLayout::ShaderRead`]
    Image {
        /// Binding index
        binding: u32,
        /// Image
        image: ImageHandle,
        /// Sampler
        sampler: SamplerHandle,
    },
}

/// Pipeline layout creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineLayoutDesc {
    /// Set layouts, index = set number
    pub set_layouts: Vec<DescriptorLayoutHandle>,
    /// Size of the push constant block in bytes, visible to all graphics stages
    pub push_constant_size: u32,
}

/// Why a descriptor set could not be allocated
#[derive(Error, Debug)]
pub enum AllocationError {
    /// The pool has no room left for another set
    #[error("descriptor pool out of memory")]
    OutOfPoolMemory,

    /// The pool has room but it is fragmented
    #[error("descriptor pool fragmented")]
    FragmentedPool,

    /// Any other device failure
    #[error(transparent)]
    Device(#[from] RenderError),
}

/// Result of waiting on a fence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The fence signaled within the timeout
    Signaled,
    /// The timeout elapsed first
    TimedOut,
}

/// A command pool with its single primary command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CommandContext {
    /// Pool, reset as a whole every time recording begins
    pub pool: CommandPoolHandle,
    /// Primary command buffer
    pub buffer: CommandBufferHandle,
}

/// A queue submission of one command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitInfo {
    /// Command buffer to execute
    pub command_buffer: CommandBufferHandle,
    /// Semaphore waited on before color output
    pub wait_semaphore: Option<SemaphoreHandle>,
    /// Semaphore signaled on completion
    pub signal_semaphore: Option<SemaphoreHandle>,
    /// Fence signaled on completion
    pub fence: FenceHandle,
}
