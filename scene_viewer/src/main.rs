//! Scene viewer
//!
//! Renders a small lit scene and switches between the engine's techniques at
//! runtime:
//!
//! - `1` / `2` / `3`: basic forward, shadow-mapped forward, deferred
//! - `Tab`: next technique
//! - `F`: toggle the shadow map debug view
//! - `Escape`: quit
//!
//! The configuration is read from the path given as the first argument, or
//! `scene_viewer.toml` when it exists.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use glfw::{Action, Key, WindowEvent};
use thiserror::Error;

use render_engine::config::ConfigError;
use render_engine::foundation::logging;
use render_engine::prelude::*;
use render_engine::render::api::Extent2D;
use render_engine::render::backends::vulkan::{self, VulkanError, Window, WindowError};

const DEFAULT_CONFIG_PATH: &str = "scene_viewer.toml";
const CHECKER_SIZE: u32 = 64;

#[derive(Error, Debug)]
enum ViewerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error(transparent)]
    Vulkan(#[from] VulkanError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Viewer state
///
/// Field order is drop order: the renderer goes before the window whose
/// surface it presents to.
struct SceneViewer {
    renderer: Renderer,
    window: Window,
    scene: SceneGraph,
    camera: Camera,
    lighting: LightingEnvironment,
    meshes: Vec<Arc<GpuMesh>>,
    spinner: NodeId,
    start: Instant,
    title: String,
    last_title_update: f64,
    frames_since_title: u32,
}

impl SceneViewer {
    fn new(config: EngineConfig) -> Result<Self, ViewerError> {
        let mut window = Window::new(&config.window)?;
        window.wait_until_visible();

        let (device, surface) = vulkan::create_backend(&window, &config.window.title, &config.renderer)?;
        let shaders = FileShaderSource::new(&config.renderer.shader_directory);
        let mut renderer = Renderer::new(Box::new(device), Box::new(surface), Box::new(shaders), config.renderer.clone())?;
        renderer.set_active_technique(config.renderer.technique)?;

        let (width, height) = window.framebuffer_size();
        let camera = Camera::perspective(
            Vec3::new(0.0, 3.0, 7.0),
            45.0,
            width.max(1) as f32 / height.max(1) as f32,
            0.1,
            100.0,
        );

        let lighting = LightingEnvironment::new()
            .with_ambient(Vec3::new(0.6, 0.7, 1.0), 0.15)
            .add_light(Light::directional(Vec3::new(-0.4, -1.0, -0.3).normalize(), Vec3::new(1.0, 0.95, 0.85), 2.5))
            .add_light(Light::point(Vec3::new(2.0, 1.0, 2.0), Vec3::new(1.0, 0.4, 0.1), 4.0, 6.0))
            .add_light(Light::point(Vec3::new(-2.5, 1.5, -1.0), Vec3::new(0.2, 0.5, 1.0), 3.0, 6.0))
            .with_shadow_bounds(Vec3::zeros(), 8.0);

        let mut viewer = Self {
            renderer,
            window,
            scene: SceneGraph::new(),
            camera,
            lighting,
            meshes: Vec::new(),
            spinner: NodeId::default(),
            start: Instant::now(),
            title: config.window.title,
            last_title_update: 0.0,
            frames_since_title: 0,
        };
        viewer.build_scene()?;
        Ok(viewer)
    }

    fn build_scene(&mut self) -> Result<(), ViewerError> {
        let checker = self.renderer.create_texture(
            "checker",
            Extent2D::new(CHECKER_SIZE, CHECKER_SIZE),
            &checker_pixels(CHECKER_SIZE),
        )?;

        let ground = self
            .renderer
            .create_material(&MaterialParams::opaque("ground", [0.9, 0.9, 0.9, 1.0]).with_texture(checker))?;
        let stone = self.renderer.create_material(&MaterialParams {
            roughness: 0.3,
            ..MaterialParams::opaque("stone", [0.8, 0.35, 0.25, 1.0])
        })?;
        let glass = self
            .renderer
            .create_material(&MaterialParams::transparent("glass", [0.3, 0.6, 1.0, 0.4]))?;

        let plane = self.renderer.upload_mesh("ground", &MeshData::plane(6.0), &[ground])?;
        let cube = self.renderer.upload_mesh("stone cube", &MeshData::cube(0.75), &[stone])?;
        let glass_cube = self.renderer.upload_mesh("glass cube", &MeshData::cube(0.5), &[glass])?;

        self.scene.add_node(SceneNode::new("ground").with_mesh(Arc::clone(&plane)), None);
        self.spinner = self.scene.add_node(
            SceneNode::new("spinner")
                .with_transform(Mat4::new_translation(&Vec3::new(0.0, 0.75, 0.0)))
                .with_mesh(Arc::clone(&cube)),
            None,
        );
        // Orbits with the spinner.
        self.scene.add_node(
            SceneNode::new("satellite")
                .with_transform(Mat4::new_translation(&Vec3::new(2.0, 0.5, 0.0)))
                .with_mesh(Arc::clone(&glass_cube)),
            Some(self.spinner),
        );
        for (i, x) in [-3.0_f32, 3.0].into_iter().enumerate() {
            self.scene.add_node(
                SceneNode::new(format!("pillar {i}"))
                    .with_transform(Mat4::new_translation(&Vec3::new(x, 0.75, -2.0)))
                    .with_mesh(Arc::clone(&cube)),
                None,
            );
        }

        self.meshes = vec![plane, cube, glass_cube];
        log::info!("Scene ready with {} nodes", self.scene.len());
        Ok(())
    }

    fn run(&mut self) -> Result<(), ViewerError> {
        while !self.window.should_close() {
            self.window.poll_events();
            for event in self.window.flush_events() {
                self.handle_event(event)?;
            }

            let angle = self.start.elapsed().as_secs_f32() * 0.6;
            self.scene.set_local_transform(
                self.spinner,
                Mat4::new_translation(&Vec3::new(0.0, 0.75, 0.0)) * Mat4::new_rotation(Vec3::y() * angle),
            );

            let stats = self.renderer.render_frame(&mut self.scene, &self.camera, &self.lighting)?;
            self.update_title(&stats);
        }
        Ok(())
    }

    fn handle_event(&mut self, event: WindowEvent) -> Result<(), ViewerError> {
        match event {
            WindowEvent::Key(Key::Escape, _, Action::Press, _) => self.window.set_should_close(true),
            WindowEvent::Key(Key::Num1, _, Action::Press, _) => self.switch_technique(TechniqueKind::BasicForward)?,
            WindowEvent::Key(Key::Num2, _, Action::Press, _) => {
                self.switch_technique(TechniqueKind::ShadowMappedForward)?;
            }
            WindowEvent::Key(Key::Num3, _, Action::Press, _) => self.switch_technique(TechniqueKind::Deferred)?,
            WindowEvent::Key(Key::Tab, _, Action::Press, _) => {
                let current = self.renderer.active_technique().unwrap_or_default();
                let index = TechniqueKind::ALL.iter().position(|&kind| kind == current).unwrap_or(0);
                self.switch_technique(TechniqueKind::ALL[(index + 1) % TechniqueKind::ALL.len()])?;
            }
            WindowEvent::Key(Key::F, _, Action::Press, _) => {
                let enabled = !self.renderer.shadow_debug();
                self.renderer.set_shadow_debug(enabled);
                log::info!("Shadow debug view {}", if enabled { "on" } else { "off" });
            }
            WindowEvent::FramebufferSize(width, height) => {
                if width > 0 && height > 0 {
                    self.camera.set_aspect_ratio(width as f32 / height as f32);
                }
                self.renderer.resize(width.max(0) as u32, height.max(0) as u32)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn switch_technique(&mut self, kind: TechniqueKind) -> Result<(), ViewerError> {
        match self.renderer.set_active_technique(kind) {
            Ok(()) => Ok(()),
            // A technique that cannot start leaves the current one running.
            Err(e @ (RenderError::ShaderLoad { .. } | RenderError::ResourceCreationFailed(_))) => {
                log::error!("Cannot switch to {kind}: {e}");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn update_title(&mut self, stats: &FrameStats) {
        self.frames_since_title += 1;
        let now = self.window.time();
        let elapsed = now - self.last_title_update;
        if elapsed < 1.0 {
            return;
        }

        let technique = self.renderer.active_technique().map_or("none", TechniqueKind::name);
        let fps = f64::from(self.frames_since_title) / elapsed;
        let title = format!(
            "{} | {technique} | {fps:.0} fps | {} draws, {} culled",
            self.title, stats.draws, stats.culled
        );
        self.window.set_title(&title);
        self.last_title_update = now;
        self.frames_since_title = 0;
    }

    /// Release scene references, hand the meshes back and stop the renderer
    fn shutdown(&mut self) -> Result<(), ViewerError> {
        self.scene = SceneGraph::new();
        for mesh in self.meshes.drain(..) {
            if let Some(mesh) = self.renderer.retire_mesh(mesh) {
                log::warn!("Mesh '{}' still shared at shutdown", mesh.name());
            }
        }
        self.renderer.shutdown()?;
        Ok(())
    }
}

/// RGBA8 checkerboard, 8 texels per square
fn checker_pixels(size: u32) -> Vec<u8> {
    (0..size * size)
        .flat_map(|i| {
            let (x, y) = (i % size, i / size);
            let value = if (x / 8 + y / 8) % 2 == 0 { 230 } else { 90 };
            [value, value, value, 255]
        })
        .collect()
}

fn load_config() -> Result<EngineConfig, ConfigError> {
    match std::env::args().nth(1) {
        Some(path) => EngineConfig::load_from_file(path),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => EngineConfig::load_from_file(DEFAULT_CONFIG_PATH),
        None => Ok(EngineConfig::default()),
    }
}

fn main() -> Result<(), ViewerError> {
    let config = load_config()?;
    logging::init(&config.logging.level);
    log::info!("Starting scene viewer with {}", config.renderer.technique);

    let mut viewer = SceneViewer::new(config)?;
    let result = viewer.run();
    if let Err(e) = &result {
        log::error!("Viewer stopped: {e}");
    }
    let shutdown = viewer.shutdown();
    result.and(shutdown)
}
