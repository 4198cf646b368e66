//! Owned GPU handles
//!
//! Raw handles are `Copy`, so nothing stops two owners from destroying the
//! same resource. [`GpuOwned`] is the single owner: it cannot be cloned, moving
//! it moves the destroy obligation, and [`GpuOwned::release`] or
//! [`GpuOwned::defer`] consume it exactly once.

use std::fmt;

use super::deletion_queue::DeletionQueue;
use crate::render::api::*;

/// A handle type the device knows how to destroy
pub trait GpuResource: Copy + fmt::Debug + 'static {
    /// Destroy the resource behind this handle
    fn destroy(self, device: &dyn GpuDevice);
}

macro_rules! impl_gpu_resource {
    ($($handle:ty => $method:ident),* $(,)?) => {
        $(
            impl GpuResource for $handle {
                fn destroy(self, device: &dyn GpuDevice) {
                    device.$method(self);
                }
            }
        )*
    };
}

impl_gpu_resource! {
    BufferHandle => destroy_buffer,
    ImageHandle => destroy_texture,
    SamplerHandle => destroy_sampler,
    PipelineHandle => destroy_pipeline,
    PipelineLayoutHandle => destroy_pipeline_layout,
    DescriptorLayoutHandle => destroy_descriptor_layout,
    DescriptorPoolHandle => destroy_descriptor_pool,
    FenceHandle => destroy_fence,
    SemaphoreHandle => destroy_semaphore,
    RenderTargetHandle => destroy_render_target,
    ShaderModuleHandle => destroy_shader_module,
}

impl GpuResource for CommandContext {
    fn destroy(self, device: &dyn GpuDevice) {
        device.destroy_command_context(self);
    }
}

/// Sole owner of a GPU resource
///
/// Dropping an armed `GpuOwned` leaks the resource and logs a warning; the
/// device is not reachable from `Drop`.
pub struct GpuOwned<H: GpuResource> {
    name: String,
    handle: Option<H>,
}

impl<H: GpuResource> GpuOwned<H> {
    /// Take ownership of `handle`
    pub fn new(name: impl Into<String>, handle: H) -> Self {
        Self {
            name: name.into(),
            handle: Some(handle),
        }
    }

    /// The owned handle, for use in commands and descriptor writes
    pub fn handle(&self) -> H {
        match self.handle {
            Some(handle) => handle,
            // Consuming methods take `self`, so an owned value is always armed.
            None => unreachable!("GpuOwned '{}' used after release", self.name),
        }
    }

    /// Debug name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Destroy the resource now
    ///
    /// Only valid once the GPU no longer uses it.
    pub fn release(mut self, device: &dyn GpuDevice) {
        if let Some(handle) = self.handle.take() {
            log::trace!("Releasing {} ({:?})", self.name, handle);
            handle.destroy(device);
        }
    }

    /// Move the destroy obligation into a deletion queue
    pub fn defer(self, queue: &mut DeletionQueue) {
        queue.push_resource(self);
    }

    /// Give up ownership without destroying
    pub fn into_raw(mut self) -> (String, H) {
        let handle = self.handle();
        self.handle = None;
        (std::mem::take(&mut self.name), handle)
    }
}

impl<H: GpuResource> fmt::Debug for GpuOwned<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuOwned")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .finish()
    }
}

impl<H: GpuResource> Drop for GpuOwned<H> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle {
            log::warn!("GPU resource '{}' ({:?}) dropped without being released", self.name, handle);
        }
    }
}
