//! # Render Engine
//!
//! A per-frame GPU resource lifecycle and rendering core written over Vulkan.
//!
//! ## Features
//!
//! - **Frame ring**: N frames in flight, each with its own fence, semaphores,
//!   command buffer, descriptor pools and deletion queue
//! - **Growable descriptor allocation**: pools are reset wholesale once their
//!   frame's fence signals
//! - **Deferred destruction**: resources are released in reverse creation
//!   order, only after the GPU has finished with them
//! - **Swappable techniques**: basic forward, shadow-mapped forward and
//!   deferred shading behind one trait
//! - **Scene graph and draw lists**: frustum culling and material sorting
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_engine::prelude::*;
//! use render_engine::render::backends::vulkan::{self, Window};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::default();
//!     let mut window = Window::new(&config.window)?;
//!     let (device, surface) = vulkan::create_backend(&window, "demo", &config.renderer)?;
//!
//!     let shaders = FileShaderSource::new(&config.renderer.shader_directory);
//!     let mut renderer = Renderer::new(Box::new(device), Box::new(surface), Box::new(shaders), config.renderer.clone())?;
//!     renderer.set_active_technique(config.renderer.technique)?;
//!
//!     let mut scene = SceneGraph::new();
//!     let camera = Camera::perspective(Vec3::new(0.0, 2.0, 6.0), 45.0, 16.0 / 9.0, 0.1, 100.0);
//!     let lighting = LightingEnvironment::new();
//!     while !window.should_close() {
//!         window.poll_events();
//!         renderer.render_frame(&mut scene, &camera, &lighting)?;
//!     }
//!     renderer.shutdown()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod render;
pub mod scene;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{Config, EngineConfig, LoggingConfig, RendererConfig, WindowConfig},
        foundation::math::{Mat4, Vec3, Vec4},
        render::{
            api::{FileShaderSource, GpuDevice, PresentSurface, ShaderSource},
            FrameStats, GpuMesh, MaterialParams, MaterialPass, MeshData, RenderError, RenderResult, Renderer,
            TechniqueKind,
        },
        scene::{Camera, Light, LightingEnvironment, NodeId, SceneGraph, SceneNode},
    };
}
