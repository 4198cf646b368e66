//! Scene representation and per-frame draw list construction
//!
//! The scene graph owns nodes with local transforms and optional meshes. Each
//! frame the draw list builder refreshes world transforms, culls against the
//! camera and produces the sorted opaque and transparent item lists a
//! rendering technique consumes.

pub mod bounds;
pub mod camera;
pub mod draw_list;
pub mod light;
pub mod scene_graph;

pub use bounds::Aabb;
pub use camera::Camera;
pub use draw_list::{DrawItem, DrawList, DrawListStats};
pub use light::{Light, LightType, LightingEnvironment};
pub use scene_graph::{NodeId, SceneGraph, SceneNode};
