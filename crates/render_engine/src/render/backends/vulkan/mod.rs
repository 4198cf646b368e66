//! Vulkan backend
//!
//! [`VulkanDevice`] implements [`GpuDevice`](crate::render::api::GpuDevice)
//! and [`VulkanSwapchain`] implements
//! [`PresentSurface`](crate::render::api::PresentSurface). Both share one
//! [`VulkanContext`], which is destroyed when the last of them is dropped.
//!
//! Non-dispatchable Vulkan handles are used directly as the renderer's `u64`
//! handles. Buffers, images and render targets carry extra state (memory,
//! views, passes) kept in tables inside the device.

mod context;
mod conversions;
mod device;
mod resources;
mod swapchain;
mod window;

use ash::vk;
use thiserror::Error;

pub use context::{PhysicalDeviceInfo, VulkanContext};
pub use device::VulkanDevice;
pub use swapchain::VulkanSwapchain;
pub use window::{Window, WindowError, WindowResult};

use crate::config::RendererConfig;
use crate::render::RenderError;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Handle not known to the device
    #[error("Resource not found: {id:#x}")]
    ResourceNotFound {
        /// Raw handle value
        id: u64,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Why the operation is invalid
        reason: String,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No memory type satisfies the request
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

impl From<VulkanError> for RenderError {
    fn from(error: VulkanError) -> Self {
        match error {
            VulkanError::Api(vk::Result::ERROR_DEVICE_LOST) => RenderError::DeviceLost(error.to_string()),
            VulkanError::InitializationFailed(reason) => RenderError::InitializationFailed(reason),
            VulkanError::Api(
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            )
            | VulkanError::NoSuitableMemoryType => RenderError::ResourceCreationFailed(error.to_string()),
            other => RenderError::BackendError(other.to_string()),
        }
    }
}

impl From<WindowError> for RenderError {
    fn from(error: WindowError) -> Self {
        RenderError::InitializationFailed(error.to_string())
    }
}

/// Create the device and swapchain for `window`
pub fn create_backend(
    window: &Window,
    app_name: &str,
    config: &RendererConfig,
) -> VulkanResult<(VulkanDevice, VulkanSwapchain)> {
    let context = VulkanContext::new(window, app_name, config.enable_validation)?;
    let device = VulkanDevice::new(context)?;

    let (width, height) = window.framebuffer_size();
    let swapchain = VulkanSwapchain::new(&device, vk::Extent2D { width, height })?;
    Ok((device, swapchain))
}
