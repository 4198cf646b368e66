//! Backend abstraction for the rendering core
//!
//! The frame ring, descriptor pools and techniques only ever talk to the GPU
//! through the traits in this module. Resources are referred to by opaque
//! `u64` handles so the same code drives the Vulkan backend and the
//! recording device used in tests.

pub mod device;
pub mod handles;
pub mod shader;
pub mod surface;
pub mod types;

pub use device::{CommandRecorder, GpuDevice};
pub use handles::*;
pub use shader::{FileShaderSource, ShaderSource};
pub use surface::{AcquireOutcome, PresentOutcome, PresentSurface, SwapchainImage};
pub use types::*;
