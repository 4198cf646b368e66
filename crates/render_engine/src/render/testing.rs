//! Test doubles for the device traits
//!
//! [`RecordingDevice`] hands out fresh handles, keeps a log of every call in
//! order and simulates just enough GPU behaviour to exercise the frame ring:
//! descriptor pools have a real capacity, fences signal when their
//! submission is made and stay unsignaled after a reset.
//!
//! Both doubles are cheap handles onto shared state, so a test can keep a
//! clone for inspection after boxing the other into a `Renderer`.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::rc::Rc;

use super::api::*;
use super::RenderResult;

/// Recorded command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginPass { target: RenderTargetHandle, extent: Extent2D },
    EndPass,
    BindPipeline(PipelineHandle),
    BindDescriptorSet { set_index: u32, set: DescriptorSetHandle },
    BindIndexBuffer(BufferHandle),
    PushConstants { size: usize },
    DrawIndexed { index_count: u32, first_index: u32 },
    Draw { vertex_count: u32 },
    SetDepthBias,
    Barrier(ImageBarrier),
    Blit { src: ImageHandle, dst: ImageHandle },
}

/// Recorded device call
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    PoolCreated { pool: DescriptorPoolHandle, max_sets: u32 },
    SetAllocated { pool: DescriptorPoolHandle, set: DescriptorSetHandle },
    PoolReset(DescriptorPoolHandle),
    FenceWait(FenceHandle),
    FenceReset(FenceHandle),
    BeginCommands(CommandBufferHandle),
    EndCommands(CommandBufferHandle),
    Submit { command_buffer: CommandBufferHandle, fence: FenceHandle, signal: Option<SemaphoreHandle> },
    BufferWrite(BufferHandle),
    Destroyed { kind: &'static str, raw: u64 },
    WaitIdle,
    Cmd(CommandBufferHandle, Command),
}

#[derive(Debug)]
struct PoolState {
    capacity: u32,
    used: u32,
}

#[derive(Debug)]
struct TargetState {
    label: String,
    colors: Vec<ImageHandle>,
    depth: Option<ImageHandle>,
}

#[derive(Debug, Default)]
pub struct DeviceState {
    next_handle: Cell<u64>,
    events: RefCell<Vec<Event>>,
    live: RefCell<HashSet<(&'static str, u64)>>,
    pools: RefCell<HashMap<DescriptorPoolHandle, PoolState>>,
    forced_allocation_failures: Cell<u32>,
    forced_fragmentation: Cell<bool>,
    signaled_fences: RefCell<HashSet<FenceHandle>>,
    hung_fences: RefCell<HashSet<FenceHandle>>,
    targets: RefCell<HashMap<RenderTargetHandle, TargetState>>,
    pipeline_labels: RefCell<HashMap<PipelineHandle, String>>,
    fail_pipelines: RefCell<HashSet<String>>,
}

/// Spy implementation of [`GpuDevice`]
#[derive(Debug, Clone)]
pub struct RecordingDevice {
    state: Rc<DeviceState>,
}

impl Deref for RecordingDevice {
    type Target = DeviceState;

    fn deref(&self) -> &DeviceState {
        &self.state
    }
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self {
            state: Rc::new(DeviceState { next_handle: Cell::new(1), ..Default::default() }),
        }
    }

    fn next(&self) -> u64 {
        let raw = self.next_handle.get();
        self.next_handle.set(raw + 1);
        raw
    }

    fn create(&self, kind: &'static str) -> u64 {
        let raw = self.next();
        self.live.borrow_mut().insert((kind, raw));
        raw
    }

    fn destroy(&self, kind: &'static str, raw: u64) {
        let removed = self.live.borrow_mut().remove(&(kind, raw));
        assert!(removed, "double destroy or unknown {kind} {raw}");
        self.push(Event::Destroyed { kind, raw });
    }

    fn push(&self, event: Event) {
        self.events.borrow_mut().push(event);
    }

    fn cmd(&self, cmd: CommandBufferHandle, command: Command) {
        self.push(Event::Cmd(cmd, command));
    }

    /// Snapshot of every recorded event
    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    /// Recorded commands, in order
    pub fn commands(&self) -> Vec<Command> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Cmd(_, c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count_events(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events.borrow().iter().filter(|e| predicate(e)).count()
    }

    pub fn clear_events(&self) {
        self.events.borrow_mut().clear();
    }

    /// Raw handles in destruction order
    pub fn destroyed_raw_handles(&self) -> Vec<u64> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Destroyed { raw, .. } => Some(*raw),
                _ => None,
            })
            .collect()
    }

    /// Resources created and not yet destroyed
    pub fn live_resources(&self) -> usize {
        self.live.borrow().len()
    }

    /// Make the next `count` set allocations report an exhausted pool
    pub fn fail_next_allocations(&self, count: u32) {
        self.forced_allocation_failures.set(count);
    }

    /// Make the next set allocation report a fragmented pool
    pub fn fragment_next_allocation(&self) {
        self.forced_fragmentation.set(true);
    }

    /// Make waits on `fence` time out
    pub fn hang_fence(&self, fence: FenceHandle) {
        self.hung_fences.borrow_mut().insert(fence);
    }

    /// Make pipeline creation fail for a label
    pub fn fail_pipeline(&self, label: &str) {
        self.fail_pipelines.borrow_mut().insert(label.to_string());
    }

    pub fn target_label(&self, target: RenderTargetHandle) -> Option<String> {
        self.targets.borrow().get(&target).map(|t| t.label.clone())
    }

    pub fn pipeline_label(&self, pipeline: PipelineHandle) -> Option<String> {
        self.pipeline_labels.borrow().get(&pipeline).cloned()
    }
}

impl CommandRecorder for RecordingDevice {
    fn cmd_begin_pass(&self, cmd: CommandBufferHandle, info: &PassBeginInfo) {
        self.cmd(cmd, Command::BeginPass { target: info.target, extent: info.extent });
    }

    fn cmd_end_pass(&self, cmd: CommandBufferHandle) {
        self.cmd(cmd, Command::EndPass);
    }

    fn cmd_bind_pipeline(&self, cmd: CommandBufferHandle, pipeline: PipelineHandle) {
        self.cmd(cmd, Command::BindPipeline(pipeline));
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: CommandBufferHandle,
        _layout: PipelineLayoutHandle,
        set_index: u32,
        set: DescriptorSetHandle,
    ) {
        self.cmd(cmd, Command::BindDescriptorSet { set_index, set });
    }

    fn cmd_bind_index_buffer(&self, cmd: CommandBufferHandle, buffer: BufferHandle) {
        self.cmd(cmd, Command::BindIndexBuffer(buffer));
    }

    fn cmd_push_constants(&self, cmd: CommandBufferHandle, _layout: PipelineLayoutHandle, data: &[u8]) {
        self.cmd(cmd, Command::PushConstants { size: data.len() });
    }

    fn cmd_draw_indexed(&self, cmd: CommandBufferHandle, index_count: u32, first_index: u32) {
        self.cmd(cmd, Command::DrawIndexed { index_count, first_index });
    }

    fn cmd_draw(&self, cmd: CommandBufferHandle, vertex_count: u32) {
        self.cmd(cmd, Command::Draw { vertex_count });
    }

    fn cmd_set_depth_bias(&self, cmd: CommandBufferHandle, _constant_factor: f32, _slope_factor: f32) {
        self.cmd(cmd, Command::SetDepthBias);
    }

    fn cmd_image_barrier(&self, cmd: CommandBufferHandle, barrier: &ImageBarrier) {
        self.cmd(cmd, Command::Barrier(*barrier));
    }

    fn cmd_blit_image(
        &self,
        cmd: CommandBufferHandle,
        src: ImageHandle,
        _src_extent: Extent2D,
        dst: ImageHandle,
        _dst_extent: Extent2D,
    ) {
        self.cmd(cmd, Command::Blit { src, dst });
    }
}

impl GpuDevice for RecordingDevice {
    fn create_buffer(&self, _desc: &BufferDesc) -> RenderResult<BufferHandle> {
        Ok(BufferHandle(self.create("buffer")))
    }

    fn write_buffer(&self, buffer: BufferHandle, _offset: u64, _data: &[u8]) -> RenderResult<()> {
        self.push(Event::BufferWrite(buffer));
        Ok(())
    }

    fn upload_buffer(&self, buffer: BufferHandle, _data: &[u8]) -> RenderResult<()> {
        self.push(Event::BufferWrite(buffer));
        Ok(())
    }

    fn buffer_device_address(&self, buffer: BufferHandle) -> u64 {
        0x1000_0000 + buffer.0 * 0x1000
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        self.destroy("buffer", buffer.0);
    }

    fn create_texture(&self, _desc: &TextureDesc, _pixels: &[u8]) -> RenderResult<ImageHandle> {
        Ok(ImageHandle(self.create("texture")))
    }

    fn destroy_texture(&self, image: ImageHandle) {
        self.destroy("texture", image.0);
    }

    fn create_sampler(&self, _desc: &SamplerDesc) -> RenderResult<SamplerHandle> {
        Ok(SamplerHandle(self.create("sampler")))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        self.destroy("sampler", sampler.0);
    }

    fn create_render_target(&self, desc: &RenderTargetDesc) -> RenderResult<RenderTargetHandle> {
        let handle = RenderTargetHandle(self.create("render_target"));
        let colors = desc.color_formats.iter().map(|_| ImageHandle(self.next())).collect();
        let depth = desc.depth_format.map(|_| ImageHandle(self.next()));
        self.targets.borrow_mut().insert(
            handle,
            TargetState { label: desc.label.clone(), colors, depth },
        );
        Ok(handle)
    }

    fn render_target_color(&self, target: RenderTargetHandle, index: usize) -> ImageHandle {
        self.targets.borrow()[&target].colors[index]
    }

    fn render_target_depth(&self, target: RenderTargetHandle) -> Option<ImageHandle> {
        self.targets.borrow()[&target].depth
    }

    fn destroy_render_target(&self, target: RenderTargetHandle) {
        self.targets.borrow_mut().remove(&target);
        self.destroy("render_target", target.0);
    }

    fn create_shader_module(&self, _spirv: &[u8]) -> RenderResult<ShaderModuleHandle> {
        Ok(ShaderModuleHandle(self.create("shader")))
    }

    fn destroy_shader_module(&self, module: ShaderModuleHandle) {
        self.destroy("shader", module.0);
    }

    fn create_descriptor_layout(&self, _bindings: &[DescriptorBinding]) -> RenderResult<DescriptorLayoutHandle> {
        Ok(DescriptorLayoutHandle(self.create("descriptor_layout")))
    }

    fn destroy_descriptor_layout(&self, layout: DescriptorLayoutHandle) {
        self.destroy("descriptor_layout", layout.0);
    }

    fn create_pipeline_layout(&self, _desc: &PipelineLayoutDesc) -> RenderResult<PipelineLayoutHandle> {
        Ok(PipelineLayoutHandle(self.create("pipeline_layout")))
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle) {
        self.destroy("pipeline_layout", layout.0);
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> RenderResult<PipelineHandle> {
        if self.fail_pipelines.borrow().contains(&desc.label) {
            return Err(super::RenderError::InitializationFailed(format!(
                "pipeline '{}' failed to compile",
                desc.label
            )));
        }
        let handle = PipelineHandle(self.create("pipeline"));
        self.pipeline_labels.borrow_mut().insert(handle, desc.label.clone());
        Ok(handle)
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        self.destroy("pipeline", pipeline.0);
    }

    fn create_descriptor_pool(&self, max_sets: u32, _ratios: &[PoolSizeRatio]) -> RenderResult<DescriptorPoolHandle> {
        let pool = DescriptorPoolHandle(self.create("descriptor_pool"));
        self.pools.borrow_mut().insert(pool, PoolState { capacity: max_sets, used: 0 });
        self.push(Event::PoolCreated { pool, max_sets });
        Ok(pool)
    }

    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        _layout: DescriptorLayoutHandle,
    ) -> Result<DescriptorSetHandle, AllocationError> {
        if self.forced_fragmentation.replace(false) {
            return Err(AllocationError::FragmentedPool);
        }
        let forced = self.forced_allocation_failures.get();
        if forced > 0 {
            self.forced_allocation_failures.set(forced - 1);
            return Err(AllocationError::OutOfPoolMemory);
        }

        let mut pools = self.pools.borrow_mut();
        let state = pools.get_mut(&pool).expect("allocation from unknown pool");
        if state.used >= state.capacity {
            return Err(AllocationError::OutOfPoolMemory);
        }
        state.used += 1;
        drop(pools);

        let set = DescriptorSetHandle(self.next());
        self.push(Event::SetAllocated { pool, set });
        Ok(set)
    }

    fn reset_descriptor_pool(&self, pool: DescriptorPoolHandle) -> RenderResult<()> {
        if let Some(state) = self.pools.borrow_mut().get_mut(&pool) {
            state.used = 0;
        }
        self.push(Event::PoolReset(pool));
        Ok(())
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        self.pools.borrow_mut().remove(&pool);
        self.destroy("descriptor_pool", pool.0);
    }

    fn write_descriptor_set(&self, _set: DescriptorSetHandle, _writes: &[DescriptorWrite]) {}

    fn create_fence(&self, signaled: bool) -> RenderResult<FenceHandle> {
        let fence = FenceHandle(self.create("fence"));
        if signaled {
            self.signaled_fences.borrow_mut().insert(fence);
        }
        Ok(fence)
    }

    fn wait_for_fence(&self, fence: FenceHandle, _timeout_ns: u64) -> RenderResult<FenceStatus> {
        self.push(Event::FenceWait(fence));
        if self.hung_fences.borrow().contains(&fence) || !self.signaled_fences.borrow().contains(&fence) {
            Ok(FenceStatus::TimedOut)
        } else {
            Ok(FenceStatus::Signaled)
        }
    }

    fn reset_fence(&self, fence: FenceHandle) -> RenderResult<()> {
        self.signaled_fences.borrow_mut().remove(&fence);
        self.push(Event::FenceReset(fence));
        Ok(())
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        self.signaled_fences.borrow_mut().remove(&fence);
        self.destroy("fence", fence.0);
    }

    fn create_semaphore(&self) -> RenderResult<SemaphoreHandle> {
        Ok(SemaphoreHandle(self.create("semaphore")))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        self.destroy("semaphore", semaphore.0);
    }

    fn create_command_context(&self) -> RenderResult<CommandContext> {
        let pool = CommandPoolHandle(self.create("command_pool"));
        let buffer = CommandBufferHandle(self.next());
        Ok(CommandContext { pool, buffer })
    }

    fn destroy_command_context(&self, context: CommandContext) {
        self.destroy("command_pool", context.pool.0);
    }

    fn begin_commands(&self, context: &CommandContext) -> RenderResult<()> {
        self.push(Event::BeginCommands(context.buffer));
        Ok(())
    }

    fn end_commands(&self, context: &CommandContext) -> RenderResult<()> {
        self.push(Event::EndCommands(context.buffer));
        Ok(())
    }

    fn submit(&self, info: &SubmitInfo) -> RenderResult<()> {
        // The fake GPU finishes instantly.
        self.signaled_fences.borrow_mut().insert(info.fence);
        self.push(Event::Submit {
            command_buffer: info.command_buffer,
            fence: info.fence,
            signal: info.signal_semaphore,
        });
        Ok(())
    }

    fn wait_idle(&self) -> RenderResult<()> {
        self.push(Event::WaitIdle);
        Ok(())
    }
}

/// Fake swapchain with a fixed set of images
#[derive(Debug, Clone)]
pub struct FakeSurface {
    state: Rc<RefCell<SurfaceState>>,
}

#[derive(Debug)]
struct SurfaceState {
    extent: Extent2D,
    images: Vec<ImageHandle>,
    next_image: u32,
    out_of_date_once: bool,
    presented: Vec<u32>,
    present_waits: Vec<SemaphoreHandle>,
    recreated: Vec<Extent2D>,
}

impl FakeSurface {
    pub fn new(extent: Extent2D, image_count: usize) -> Self {
        Self {
            state: Rc::new(RefCell::new(SurfaceState {
                extent,
                images: (0..image_count as u64).map(|i| ImageHandle(10_000 + i)).collect(),
                next_image: 0,
                out_of_date_once: false,
                presented: Vec::new(),
                present_waits: Vec::new(),
                recreated: Vec::new(),
            })),
        }
    }

    /// Report the next acquire as out of date
    pub fn force_out_of_date(&self) {
        self.state.borrow_mut().out_of_date_once = true;
    }

    pub fn presented(&self) -> Vec<u32> {
        self.state.borrow().presented.clone()
    }

    /// Semaphore each present waited on, in present order
    pub fn present_waits(&self) -> Vec<SemaphoreHandle> {
        self.state.borrow().present_waits.clone()
    }

    pub fn recreated(&self) -> Vec<Extent2D> {
        self.state.borrow().recreated.clone()
    }

    pub fn image(&self, index: u32) -> ImageHandle {
        self.state.borrow().images[index as usize]
    }
}

impl PresentSurface for FakeSurface {
    fn extent(&self) -> Extent2D {
        self.state.borrow().extent
    }

    fn image_count(&self) -> usize {
        self.state.borrow().images.len()
    }

    fn acquire_next_image(&mut self, _ready: SemaphoreHandle, _timeout_ns: u64) -> RenderResult<AcquireOutcome> {
        let mut state = self.state.borrow_mut();
        if state.out_of_date_once {
            state.out_of_date_once = false;
            return Ok(AcquireOutcome::NeedsResize);
        }
        let index = state.next_image;
        state.next_image = (index + 1) % state.images.len() as u32;
        Ok(AcquireOutcome::Image(SwapchainImage { index, image: state.images[index as usize] }))
    }

    fn present(&mut self, image_index: u32, wait: SemaphoreHandle) -> RenderResult<PresentOutcome> {
        let mut state = self.state.borrow_mut();
        state.presented.push(image_index);
        state.present_waits.push(wait);
        Ok(PresentOutcome::Presented)
    }

    fn recreate(&mut self, extent: Extent2D) -> RenderResult<()> {
        let mut state = self.state.borrow_mut();
        state.extent = extent;
        state.recreated.push(extent);
        Ok(())
    }
}

/// Shader source returning a dummy SPIR-V word for any name
#[derive(Debug, Default)]
pub struct StubShaderSource;

impl ShaderSource for StubShaderSource {
    fn load(&self, _name: &str) -> RenderResult<Vec<u8>> {
        Ok(0x0723_0203_u32.to_le_bytes().to_vec())
    }
}
