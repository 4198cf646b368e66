//! Backend implementations of the device traits

pub mod vulkan;
