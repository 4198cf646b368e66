//! Presentation surface abstraction

use super::handles::{ImageHandle, SemaphoreHandle};
use super::types::Extent2D;
use crate::render::RenderResult;

/// A presentable image handed out by the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainImage {
    /// Index to pass back to [`PresentSurface::present`]
    pub index: u32,
    /// The image itself, usable as a blit destination
    pub image: ImageHandle,
}

/// Outcome of acquiring the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is available once the ready semaphore signals
    Image(SwapchainImage),
    /// The surface no longer matches the window and must be recreated
    NeedsResize,
}

/// Outcome of presenting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// The image was queued for presentation
    Presented,
    /// Presented, but the surface should be recreated before the next frame
    NeedsResize,
}

/// Source of presentable images (a swapchain)
pub trait PresentSurface {
    /// Current image size
    fn extent(&self) -> Extent2D;

    /// Number of images in the swapchain
    fn image_count(&self) -> usize;

    /// Acquire the next image; `ready` is signaled when it may be written
    fn acquire_next_image(&mut self, ready: SemaphoreHandle, timeout_ns: u64) -> RenderResult<AcquireOutcome>;

    /// Queue an image for presentation once `wait` signals
    fn present(&mut self, image_index: u32, wait: SemaphoreHandle) -> RenderResult<PresentOutcome>;

    /// Rebuild the swapchain for a new size
    ///
    /// The caller guarantees the device is idle.
    fn recreate(&mut self, extent: Extent2D) -> RenderResult<()>;
}
