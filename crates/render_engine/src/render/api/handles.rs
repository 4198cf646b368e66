//! Opaque GPU resource handles
//!
//! A handle is a plain `u64` newtype. `0` is reserved as the null handle so a
//! default-initialized handle never aliases a live resource.

macro_rules! gpu_handle {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
            pub struct $name(pub u64);

            impl $name {
                /// The null handle
                pub const NULL: Self = Self(0);

                /// Whether this is the null handle
                pub const fn is_null(self) -> bool {
                    self.0 == 0
                }
            }
        )*
    };
}

gpu_handle! {
    /// Handle to a GPU buffer
    BufferHandle,
    /// Handle to a sampled image (texture, render target attachment or swapchain image)
    ImageHandle,
    /// Handle to a sampler
    SamplerHandle,
    /// Handle to a compiled graphics pipeline
    PipelineHandle,
    /// Handle to a pipeline layout
    PipelineLayoutHandle,
    /// Handle to a descriptor set layout
    DescriptorLayoutHandle,
    /// Handle to a descriptor pool
    DescriptorPoolHandle,
    /// Handle to a descriptor set allocated from a pool
    DescriptorSetHandle,
    /// Handle to a fence
    FenceHandle,
    /// Handle to a binary semaphore
    SemaphoreHandle,
    /// Handle to a command pool
    CommandPoolHandle,
    /// Handle to a primary command buffer
    CommandBufferHandle,
    /// Handle to a render target (attachments plus the pass that writes them)
    RenderTargetHandle,
    /// Handle to a shader module
    ShaderModuleHandle,
}
