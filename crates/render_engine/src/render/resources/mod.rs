//! GPU resource lifetime management
//!
//! - [`DescriptorAllocator`]: growable pools of transient descriptor sets,
//!   reset wholesale once the frame that used them has retired
//! - [`DeletionQueue`]: destruction deferred until the GPU is done with a resource
//! - [`GpuOwned`]: a handle that carries the obligation to destroy it

pub mod deletion_queue;
pub mod descriptor_allocator;
pub mod owned;

pub use deletion_queue::DeletionQueue;
pub use descriptor_allocator::{DescriptorAllocator, POOL_GROWTH_FACTOR};
pub use owned::{GpuOwned, GpuResource};
