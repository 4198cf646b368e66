//! Device traits consumed by the rendering core
//!
//! All methods take `&self`: command recording and resource creation happen
//! on a single thread, and backends keep their resource tables behind
//! interior mutability. That lets deferred destruction closures receive a
//! plain `&dyn GpuDevice`.

use super::handles::*;
use super::types::*;
use crate::render::RenderResult;

/// Command recording into a primary command buffer
///
/// Recording calls never fail; invalid usage is a programmer error that the
/// validation layers report.
pub trait CommandRecorder {
    /// Begin the pass of a render target, clearing all attachments and
    /// setting viewport and scissor to the render area
    fn cmd_begin_pass(&self, cmd: CommandBufferHandle, info: &PassBeginInfo);

    /// End the current pass
    fn cmd_end_pass(&self, cmd: CommandBufferHandle);

    /// Bind a graphics pipeline
    fn cmd_bind_pipeline(&self, cmd: CommandBufferHandle, pipeline: PipelineHandle);

    /// Bind a descriptor set at `set_index`
    fn cmd_bind_descriptor_set(
        &self,
        cmd: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        set_index: u32,
        set: DescriptorSetHandle,
    );

    /// Bind a `u32` index buffer
    fn cmd_bind_index_buffer(&self, cmd: CommandBufferHandle, buffer: BufferHandle);

    /// Update push constants for all graphics stages
    fn cmd_push_constants(&self, cmd: CommandBufferHandle, layout: PipelineLayoutHandle, data: &[u8]);

    /// Indexed draw of one instance
    fn cmd_draw_indexed(&self, cmd: CommandBufferHandle, index_count: u32, first_index: u32);

    /// Non-indexed draw of one instance
    fn cmd_draw(&self, cmd: CommandBufferHandle, vertex_count: u32);

    /// Set the dynamic depth bias
    fn cmd_set_depth_bias(&self, cmd: CommandBufferHandle, constant_factor: f32, slope_factor: f32);

    /// Record an image layout transition
    fn cmd_image_barrier(&self, cmd: CommandBufferHandle, barrier: &ImageBarrier);

    /// Blit the whole of `src` onto the whole of `dst` with linear filtering
    fn cmd_blit_image(
        &self,
        cmd: CommandBufferHandle,
        src: ImageHandle,
        src_extent: Extent2D,
        dst: ImageHandle,
        dst_extent: Extent2D,
    );
}

/// Resource creation, synchronization and submission
pub trait GpuDevice: CommandRecorder {
    // --- buffers ---

    /// Create a buffer
    fn create_buffer(&self, desc: &BufferDesc) -> RenderResult<BufferHandle>;

    /// Write into a [`MemoryLocation::CpuToGpu`] buffer
    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()>;

    /// Fill a [`MemoryLocation::GpuOnly`] buffer through a staging copy
    ///
    /// Blocks until the copy has completed.
    fn upload_buffer(&self, buffer: BufferHandle, data: &[u8]) -> RenderResult<()>;

    /// Device address of a buffer created with [`BufferUsage::DEVICE_ADDRESS`]
    fn buffer_device_address(&self, buffer: BufferHandle) -> u64;

    /// Destroy a buffer
    fn destroy_buffer(&self, buffer: BufferHandle);

    // --- images ---

    /// Create a sampled texture and upload `pixels`, leaving it in
    /// [`ImageLayout::ShaderRead`]
    fn create_texture(&self, desc: &TextureDesc, pixels: &[u8]) -> RenderResult<ImageHandle>;

    /// Destroy a texture
    fn destroy_texture(&self, image: ImageHandle);

    /// Create a sampler
    fn create_sampler(&self, desc: &SamplerDesc) -> RenderResult<SamplerHandle>;

    /// Destroy a sampler
    fn destroy_sampler(&self, sampler: SamplerHandle);

    /// Create a render target
    fn create_render_target(&self, desc: &RenderTargetDesc) -> RenderResult<RenderTargetHandle>;

    /// Color attachment `index` of a render target
    fn render_target_color(&self, target: RenderTargetHandle, index: usize) -> ImageHandle;

    /// Depth attachment of a render target
    fn render_target_depth(&self, target: RenderTargetHandle) -> Option<ImageHandle>;

    /// Destroy a render target and its attachments
    fn destroy_render_target(&self, target: RenderTargetHandle);

    // --- shaders and pipelines ---

    /// Create a shader module from a SPIR-V byte blob
    fn create_shader_module(&self, spirv: &[u8]) -> RenderResult<ShaderModuleHandle>;

    /// Destroy a shader module
    fn destroy_shader_module(&self, module: ShaderModuleHandle);

    /// Create a descriptor set layout
    fn create_descriptor_layout(&self, bindings: &[DescriptorBinding]) -> RenderResult<DescriptorLayoutHandle>;

    /// Destroy a descriptor set layout
    fn destroy_descriptor_layout(&self, layout: DescriptorLayoutHandle);

    /// Create a pipeline layout
    fn create_pipeline_layout(&self, desc: &PipelineLayoutDesc) -> RenderResult<PipelineLayoutHandle>;

    /// Destroy a pipeline layout
    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle);

    /// Create a graphics pipeline
    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> RenderResult<PipelineHandle>;

    /// Destroy a pipeline
    fn destroy_pipeline(&self, pipeline: PipelineHandle);

    // --- descriptors ---

    /// Create a descriptor pool with room for `max_sets` sets
    fn create_descriptor_pool(&self, max_sets: u32, ratios: &[PoolSizeRatio]) -> RenderResult<DescriptorPoolHandle>;

    /// Allocate one set from a pool
    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorLayoutHandle,
    ) -> Result<DescriptorSetHandle, AllocationError>;

    /// Return every set of a pool to it
    fn reset_descriptor_pool(&self, pool: DescriptorPoolHandle) -> RenderResult<()>;

    /// Destroy a descriptor pool
    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle);

    /// Update bindings of a descriptor set
    fn write_descriptor_set(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]);

    // --- synchronization ---

    /// Create a fence, optionally already signaled
    fn create_fence(&self, signaled: bool) -> RenderResult<FenceHandle>;

    /// Wait for a fence to signal
    fn wait_for_fence(&self, fence: FenceHandle, timeout_ns: u64) -> RenderResult<FenceStatus>;

    /// Return a fence to the unsignaled state
    fn reset_fence(&self, fence: FenceHandle) -> RenderResult<()>;

    /// Destroy a fence
    fn destroy_fence(&self, fence: FenceHandle);

    /// Create a binary semaphore
    fn create_semaphore(&self) -> RenderResult<SemaphoreHandle>;

    /// Destroy a semaphore
    fn destroy_semaphore(&self, semaphore: SemaphoreHandle);

    // --- commands ---

    /// Create a command pool with one primary command buffer
    fn create_command_context(&self) -> RenderResult<CommandContext>;

    /// Destroy a command context
    fn destroy_command_context(&self, context: CommandContext);

    /// Reset the context's pool and begin one-time recording
    fn begin_commands(&self, context: &CommandContext) -> RenderResult<()>;

    /// Finish recording
    fn end_commands(&self, context: &CommandContext) -> RenderResult<()>;

    /// Submit to the graphics queue
    fn submit(&self, info: &SubmitInfo) -> RenderResult<()>;

    /// Block until the device has finished all work
    fn wait_idle(&self) -> RenderResult<()>;
}
