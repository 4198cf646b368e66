//! Frame ring
//!
//! A fixed ring of [`FrameSlot`]s lets the CPU record frame N+1 while the GPU
//! still executes frame N. Each slot owns everything a frame writes
//! (command buffer, transient descriptor pools, uniform buffers and a
//! deletion queue), so slots never share mutable GPU state.
//!
//! The semaphores present waits on are per swapchain image, not per slot.
//! The ring keeps one per image and is resized whenever the swapchain is
//! rebuilt.
//!
//! A slot goes `Idle → Recording → Submitted → Completed → Idle`. The
//! `Submitted → Completed` edge is only observed when the ring comes back to
//! the slot: [`FrameRing::begin_slot`] blocks on the slot's fence, and only
//! after the fence has signaled does it flush the slot's deletion queue and
//! reset its descriptor pools. That wait is the ring's only backpressure.
//!
//! The fence is reset right before submission rather than after the wait,
//! so a frame abandoned between the two (for example because the swapchain
//! went out of date) leaves the fence signaled and the next wait returns
//! immediately.

use std::mem;

use crate::config::RendererConfig;
use crate::render::api::*;
use crate::render::resources::{DeletionQueue, DescriptorAllocator};
use crate::render::uniforms::{PointLightBlock, SceneUniformBlock};
use crate::render::{RenderError, RenderResult};

/// Lifecycle state of a frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Ready to record
    Idle,
    /// Commands are being recorded
    Recording,
    /// Handed to the GPU, fence pending
    Submitted,
    /// Fence observed signaled, transient resources not yet recycled
    Completed,
}

/// Per-frame resources
#[derive(Debug)]
pub struct FrameSlot {
    index: usize,
    state: SlotState,
    frame_number: u64,
    commands: CommandContext,
    render_fence: FenceHandle,
    image_available: SemaphoreHandle,
    scene_buffer: BufferHandle,
    light_buffer: BufferHandle,
    /// Transient descriptor sets for this frame
    pub descriptors: DescriptorAllocator,
    /// Destructions to run once this slot's frame has retired
    pub deletion_queue: DeletionQueue,
}

impl FrameSlot {
    fn new(
        device: &dyn GpuDevice,
        index: usize,
        config: &RendererConfig,
        ratios: &[PoolSizeRatio],
    ) -> RenderResult<Self> {
        let commands = device.create_command_context()?;
        // Created signaled so the first wait on a fresh slot returns at once.
        let render_fence = device.create_fence(true)?;
        let image_available = device.create_semaphore()?;
        let scene_buffer = device.create_buffer(&BufferDesc::uniform(
            format!("frame{index} scene uniforms"),
            mem::size_of::<SceneUniformBlock>() as u64,
        ))?;
        let light_buffer = device.create_buffer(&BufferDesc::uniform(
            format!("frame{index} point lights"),
            mem::size_of::<PointLightBlock>() as u64,
        ))?;
        let descriptors = DescriptorAllocator::new(
            device,
            format!("frame{index} descriptors"),
            config.initial_sets_per_pool,
            config.max_sets_per_pool,
            ratios,
        )?;

        Ok(Self {
            index,
            state: SlotState::Idle,
            frame_number: 0,
            commands,
            render_fence,
            image_available,
            scene_buffer,
            light_buffer,
            descriptors,
            deletion_queue: DeletionQueue::new(),
        })
    }

    /// Position of the slot in the ring
    pub fn index(&self) -> usize {
        self.index
    }

    /// Current lifecycle state
    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Global number of the frame this slot is recording or last recorded
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Command buffer of this slot
    pub fn command_buffer(&self) -> CommandBufferHandle {
        self.commands.buffer
    }

    /// Fence signaled when this slot's submission completes
    pub fn render_fence(&self) -> FenceHandle {
        self.render_fence
    }

    /// Semaphore the swapchain signals when the acquired image is ready
    pub fn image_available(&self) -> SemaphoreHandle {
        self.image_available
    }

    /// Host-visible buffer holding this frame's [`SceneUniformBlock`]
    pub fn scene_buffer(&self) -> BufferHandle {
        self.scene_buffer
    }

    /// Host-visible buffer holding this frame's [`PointLightBlock`]
    pub fn light_buffer(&self) -> BufferHandle {
        self.light_buffer
    }

    /// Allocate a transient descriptor set for this frame
    pub fn allocate_set(
        &mut self,
        device: &dyn GpuDevice,
        layout: DescriptorLayoutHandle,
    ) -> RenderResult<DescriptorSetHandle> {
        self.descriptors.allocate(device, layout)
    }

    /// Start recording this frame's command buffer
    pub fn begin_recording(&mut self, device: &dyn GpuDevice) -> RenderResult<()> {
        debug_assert_eq!(self.state, SlotState::Idle, "slot {} is not idle", self.index);
        device.begin_commands(&self.commands)?;
        self.state = SlotState::Recording;
        Ok(())
    }

    /// Put the slot back to idle without submitting
    ///
    /// Used when a frame is dropped before recording started.
    pub fn abandon(&mut self) {
        if self.state != SlotState::Recording {
            self.state = SlotState::Idle;
        }
    }

    fn destroy(&mut self, device: &dyn GpuDevice) {
        self.deletion_queue.flush(device);
        self.descriptors.destroy_pools(device);
        device.destroy_buffer(self.light_buffer);
        device.destroy_buffer(self.scene_buffer);
        device.destroy_semaphore(self.image_available);
        device.destroy_fence(self.render_fence);
        device.destroy_command_context(self.commands);
    }
}

/// Ring of frame slots
#[derive(Debug)]
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    present_semaphores: Vec<SemaphoreHandle>,
    current: usize,
    frame_number: u64,
    fence_timeout_ns: u64,
}

impl FrameRing {
    /// Create `config.frames_in_flight` slots and one present semaphore per
    /// swapchain image
    pub fn new(
        device: &dyn GpuDevice,
        config: &RendererConfig,
        ratios: &[PoolSizeRatio],
        image_count: usize,
    ) -> RenderResult<Self> {
        let mut ring = Self {
            slots: Vec::new(),
            present_semaphores: Vec::new(),
            current: 0,
            frame_number: 0,
            fence_timeout_ns: config.fence_timeout_ns(),
        };
        if let Err(e) = ring.populate(device, config, ratios, image_count) {
            ring.destroy(device);
            return Err(e);
        }

        log::debug!(
            "Created frame ring with {} slots, {} present semaphores",
            ring.slots.len(),
            ring.present_semaphores.len()
        );
        Ok(ring)
    }

    fn populate(
        &mut self,
        device: &dyn GpuDevice,
        config: &RendererConfig,
        ratios: &[PoolSizeRatio],
        image_count: usize,
    ) -> RenderResult<()> {
        for index in 0..config.frames_in_flight.max(1) {
            self.slots.push(FrameSlot::new(device, index, config, ratios)?);
        }
        self.set_image_count(device, image_count)
    }

    /// Match the present semaphores to a new swapchain image count
    ///
    /// The caller guarantees the device is idle.
    pub fn set_image_count(&mut self, device: &dyn GpuDevice, image_count: usize) -> RenderResult<()> {
        while self.present_semaphores.len() > image_count {
            if let Some(semaphore) = self.present_semaphores.pop() {
                device.destroy_semaphore(semaphore);
            }
        }
        while self.present_semaphores.len() < image_count {
            self.present_semaphores.push(device.create_semaphore()?);
        }
        Ok(())
    }

    /// Semaphore present waits on for swapchain image `image_index`
    pub fn present_semaphore(&self, image_index: u32) -> Option<SemaphoreHandle> {
        self.present_semaphores.get(image_index as usize).copied()
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the ring has no slots (never true for a constructed ring)
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Index of the current slot
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Number of frames begun so far
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// The slot the next frame records into
    pub fn current_slot(&self) -> &FrameSlot {
        &self.slots[self.current]
    }

    /// Mutable access to the current slot
    pub fn current_slot_mut(&mut self) -> &mut FrameSlot {
        &mut self.slots[self.current]
    }

    /// The slot submitted most recently, if any
    pub fn last_submitted_mut(&mut self) -> Option<&mut FrameSlot> {
        let len = self.slots.len();
        let previous = (self.current + len - 1) % len;
        let slot = &mut self.slots[previous];
        (slot.state == SlotState::Submitted).then_some(slot)
    }

    /// Slots submitted and not yet observed complete
    pub fn in_flight_count(&self) -> usize {
        self.slots.iter().filter(|s| s.state == SlotState::Submitted).count()
    }

    /// Wait for the current slot's previous use to finish, then recycle its
    /// transient resources
    ///
    /// A fence that does not signal within the configured timeout means the
    /// GPU is hung; that is reported as [`RenderError::DeviceLost`].
    pub fn begin_slot(&mut self, device: &dyn GpuDevice) -> RenderResult<&mut FrameSlot> {
        let timeout = self.fence_timeout_ns;
        let frame_number = self.frame_number;
        let slot = &mut self.slots[self.current];

        match device.wait_for_fence(slot.render_fence, timeout)? {
            FenceStatus::Signaled => {}
            FenceStatus::TimedOut => {
                log::error!(
                    "Frame slot {} fence did not signal within {} ms",
                    slot.index,
                    timeout / 1_000_000
                );
                return Err(RenderError::DeviceLost(format!(
                    "fence of frame slot {} timed out",
                    slot.index
                )));
            }
        }
        if slot.state == SlotState::Submitted {
            slot.state = SlotState::Completed;
        }

        slot.deletion_queue.flush(device);
        slot.descriptors.clear_pools(device)?;
        slot.state = SlotState::Idle;
        slot.frame_number = frame_number;

        log::trace!("Frame {} begins on slot {}", frame_number, slot.index);
        Ok(slot)
    }

    /// Finish recording the current slot and submit it
    ///
    /// Returns the semaphore the submission signals, which present for
    /// `image_index` has to wait on.
    pub fn submit_current(&mut self, device: &dyn GpuDevice, image_index: u32) -> RenderResult<SemaphoreHandle> {
        let render_finished = self.present_semaphore(image_index).ok_or_else(|| {
            RenderError::RenderingFailed(format!(
                "no present semaphore for swapchain image {image_index} ({} known)",
                self.present_semaphores.len()
            ))
        })?;
        let slot = &mut self.slots[self.current];
        debug_assert_eq!(slot.state, SlotState::Recording);

        device.end_commands(&slot.commands)?;
        device.reset_fence(slot.render_fence)?;
        device.submit(&SubmitInfo {
            command_buffer: slot.commands.buffer,
            wait_semaphore: Some(slot.image_available),
            signal_semaphore: Some(render_finished),
            fence: slot.render_fence,
        })?;
        slot.state = SlotState::Submitted;
        Ok(render_finished)
    }

    /// Move on to the next slot
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
        self.frame_number += 1;
    }

    /// Destroy every slot's resources
    ///
    /// The caller guarantees the device is idle.
    pub fn destroy(&mut self, device: &dyn GpuDevice) {
        for slot in &mut self.slots {
            slot.destroy(device);
        }
        for semaphore in self.present_semaphores.drain(..) {
            device.destroy_semaphore(semaphore);
        }
        self.slots.clear();
        self.current = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::resources::GpuOwned;
    use crate::render::testing::{Event, RecordingDevice};

    const RATIOS: [PoolSizeRatio; 1] = [PoolSizeRatio { ty: DescriptorType::UniformBuffer, ratio: 1.0 }];
    const IMAGES: usize = 3;

    fn ring(device: &RecordingDevice, frames: usize) -> FrameRing {
        let config = RendererConfig::default().with_frames_in_flight(frames).with_pool_sizes(2, 16);
        FrameRing::new(device, &config, &RATIOS, IMAGES).unwrap()
    }

    fn run_frame(device: &RecordingDevice, ring: &mut FrameRing) {
        ring.begin_slot(device).unwrap().begin_recording(device).unwrap();
        ring.submit_current(device, 0).unwrap();
        ring.advance();
    }

    #[test]
    fn test_advance_wraps() {
        let device = RecordingDevice::new();
        let mut ring = ring(&device, 3);

        let indices: Vec<usize> = (0..7)
            .map(|_| {
                let index = ring.current_index();
                ring.advance();
                index
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(ring.frame_number(), 7);
    }

    #[test]
    fn test_slot_recycled_only_after_fence_wait() {
        let device = RecordingDevice::new();
        let mut ring = ring(&device, 2);
        let fence0 = ring.current_slot().render_fence();
        let pools0: Vec<_> = device
            .events()
            .iter()
            .filter_map(|e| match e {
                Event::PoolCreated { pool, .. } => Some(*pool),
                _ => None,
            })
            .take(1)
            .collect();

        // Frame 0 on slot 0, frame 1 on slot 1, frame 2 reuses slot 0.
        run_frame(&device, &mut ring);
        run_frame(&device, &mut ring);
        device.clear_events();
        run_frame(&device, &mut ring);

        let events = device.events();
        let wait = events.iter().position(|e| *e == Event::FenceWait(fence0)).unwrap();
        let reset = events.iter().position(|e| *e == Event::PoolReset(pools0[0])).unwrap();
        let fence_reset = events.iter().position(|e| *e == Event::FenceReset(fence0)).unwrap();
        let submit = events.iter().position(|e| matches!(e, Event::Submit { fence, .. } if *fence == fence0)).unwrap();

        assert!(wait < reset, "pool reset before fence wait");
        assert!(reset < fence_reset);
        assert!(fence_reset < submit);
    }

    #[test]
    fn test_deletion_queue_flushed_after_wait() {
        let device = RecordingDevice::new();
        let mut ring = ring(&device, 2);

        let slot = ring.begin_slot(&device).unwrap();
        let fence = slot.render_fence();
        let buffer = device.create_buffer(&BufferDesc::uniform("transient", 16)).unwrap();
        GpuOwned::new("transient", buffer).defer(&mut slot.deletion_queue);
        slot.begin_recording(&device).unwrap();
        ring.submit_current(&device, 0).unwrap();
        ring.advance();
        run_frame(&device, &mut ring);

        device.clear_events();
        ring.begin_slot(&device).unwrap();
        let events = device.events();
        let wait = events.iter().position(|e| *e == Event::FenceWait(fence)).unwrap();
        let destroy = events
            .iter()
            .position(|e| matches!(e, Event::Destroyed { raw, .. } if *raw == buffer.0))
            .unwrap();
        assert!(wait < destroy);
    }

    #[test]
    fn test_fence_timeout_is_device_lost() {
        let device = RecordingDevice::new();
        let mut ring = ring(&device, 2);
        device.hang_fence(ring.current_slot().render_fence());

        let result = ring.begin_slot(&device);
        assert!(matches!(result, Err(RenderError::DeviceLost(_))));
        // Nothing was recycled.
        assert_eq!(device.count_events(|e| matches!(e, Event::PoolReset(_))), 0);
    }

    #[test]
    fn test_abandoned_frame_keeps_fence_signaled() {
        let device = RecordingDevice::new();
        let mut ring = ring(&device, 1);

        ring.begin_slot(&device).unwrap().abandon();
        // Without a reset in between the wait succeeds again.
        assert!(ring.begin_slot(&device).is_ok());
    }

    #[test]
    fn test_in_flight_bounded_by_ring_size() {
        let device = RecordingDevice::new();
        let mut ring = ring(&device, 3);

        for _ in 0..10 {
            run_frame(&device, &mut ring);
            assert!(ring.in_flight_count() <= ring.len());
        }
        assert_eq!(ring.in_flight_count(), 3);
    }

    #[test]
    fn test_destroy_releases_everything() {
        let device = RecordingDevice::new();
        let mut ring = ring(&device, 2);
        run_frame(&device, &mut ring);

        ring.destroy(&device);
        assert_eq!(device.live_resources(), 0);
    }

    #[test]
    fn test_present_semaphores_follow_swapchain_images() {
        let device = RecordingDevice::new();
        let mut ring = ring(&device, 2);

        // Two slots cycling over three images: the signal semaphore is picked
        // by image, so image 0 gets the same one no matter which slot renders it.
        let mut signaled = Vec::new();
        for frame in 0..6_u32 {
            ring.begin_slot(&device).unwrap().begin_recording(&device).unwrap();
            signaled.push(ring.submit_current(&device, frame % 3).unwrap());
            ring.advance();
        }
        assert_eq!(signaled[0], signaled[3]);
        assert_ne!(signaled[0], signaled[1]);
        assert_ne!(signaled[1], signaled[2]);
        for (frame, semaphore) in signaled.iter().enumerate() {
            assert_eq!(ring.present_semaphore(frame as u32 % 3), Some(*semaphore));
        }

        let submitted: Vec<_> = device
            .events()
            .iter()
            .filter_map(|e| match e {
                Event::Submit { signal, .. } => *signal,
                _ => None,
            })
            .collect();
        assert_eq!(submitted, signaled);
    }

    #[test]
    fn test_image_count_change_resizes_present_semaphores() {
        let device = RecordingDevice::new();
        let mut ring = ring(&device, 2);
        let live = device.live_resources();

        ring.set_image_count(&device, 2).unwrap();
        assert_eq!(device.live_resources(), live - 1);
        assert!(ring.present_semaphore(2).is_none());

        ring.set_image_count(&device, 4).unwrap();
        assert_eq!(device.live_resources(), live + 1);
        assert!(ring.present_semaphore(3).is_some());

        ring.begin_slot(&device).unwrap().begin_recording(&device).unwrap();
        assert!(matches!(ring.submit_current(&device, 7), Err(RenderError::RenderingFailed(_))));
    }
}
