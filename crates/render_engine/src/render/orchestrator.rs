//! # Frame Orchestrator
//!
//! [`Renderer`] ties the frame ring, the draw list builder and the active
//! rendering technique together. One call to [`Renderer::render_frame`]:
//!
//! 1. waits for the current frame slot's previous submission and recycles
//!    its transient pools and deferred destructions
//! 2. acquires a swapchain image (an out-of-date swapchain skips the frame
//!    and recreates it)
//! 3. writes the slot's scene uniform block and builds the draw list
//! 4. lets the active technique record its passes into the main target
//! 5. blits the main target into the swapchain image, submits and presents
//! 6. advances the ring
//!
//! The renderer owns the device and surface. Everything it creates is
//! released by [`Renderer::shutdown`], which also runs on drop.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::RendererConfig;
use crate::render::api::*;
use crate::render::frame::FrameRing;
use crate::render::material::{Material, MaterialFactory, MaterialParams};
use crate::render::mesh::{GpuMesh, MeshData};
use crate::render::resources::{DeletionQueue, GpuOwned};
use crate::render::shared_resources::{SharedResources, FRAME_POOL_RATIOS};
use crate::render::stats::FrameStats;
use crate::render::technique::{FrameContext, RenderTechnique, TechniqueContext, TechniqueKind};
use crate::render::uniforms::{SceneUniformBlock, ShadowSettings};
use crate::render::{RenderError, RenderResult};
use crate::scene::{Camera, DrawList, LightingEnvironment, SceneGraph};

/// Format of the main color target the techniques render into
pub const MAIN_COLOR_FORMAT: Format = Format::Rgba16Float;

/// Format of the main depth target
pub const MAIN_DEPTH_FORMAT: Format = Format::Depth32Float;

/// Depth offset applied when comparing against the shadow map
const SHADOW_COMPARE_BIAS: f32 = 0.0015;

/// Frame orchestrator
pub struct Renderer {
    device: Box<dyn GpuDevice>,
    surface: Box<dyn PresentSurface>,
    shaders: Box<dyn ShaderSource>,
    config: RendererConfig,
    frames: FrameRing,
    shared: Option<SharedResources>,
    main_target: Option<GpuOwned<RenderTargetHandle>>,
    extent: Extent2D,
    requested_extent: Extent2D,
    materials: Option<MaterialFactory>,
    techniques: HashMap<TechniqueKind, Box<dyn RenderTechnique>>,
    active: Option<TechniqueKind>,
    deletion_queue: DeletionQueue,
    shadow_debug: bool,
    last_stats: FrameStats,
    is_lost: bool,
    is_shutdown: bool,
}

impl Renderer {
    /// Create the renderer over an initialized device and surface
    ///
    /// No technique is active afterwards; call
    /// [`Renderer::set_active_technique`] before the first frame.
    pub fn new(
        device: Box<dyn GpuDevice>,
        surface: Box<dyn PresentSurface>,
        shaders: Box<dyn ShaderSource>,
        config: RendererConfig,
    ) -> RenderResult<Self> {
        config
            .validate()
            .map_err(|e| RenderError::InitializationFailed(format!("invalid renderer config: {e}")))?;

        let shared = SharedResources::new(&*device)?;
        let frames = match FrameRing::new(&*device, &config, &FRAME_POOL_RATIOS, surface.image_count()) {
            Ok(frames) => frames,
            Err(e) => {
                shared.destroy(&*device);
                return Err(e);
            }
        };

        let extent = surface.extent();
        let mut renderer = Self {
            device,
            surface,
            shaders,
            config,
            frames,
            shared: Some(shared),
            main_target: None,
            extent,
            requested_extent: extent,
            materials: None,
            techniques: HashMap::new(),
            active: None,
            deletion_queue: DeletionQueue::new(),
            shadow_debug: false,
            last_stats: FrameStats::default(),
            is_lost: false,
            is_shutdown: false,
        };

        // From here on a failure drops `renderer`, which releases what exists.
        renderer.main_target = Some(create_main_target(&*renderer.device, extent)?);
        let factory = MaterialFactory::new(
            &*renderer.device,
            &*renderer.shaders,
            renderer.shared()?,
            renderer.main_target()?,
            &renderer.config,
        )?;
        renderer.materials = Some(factory);

        log::info!(
            "Renderer ready: {}x{}, {} frames in flight",
            extent.width,
            extent.height,
            renderer.frames.len()
        );
        Ok(renderer)
    }

    /// Create a technique's GPU state without activating it
    ///
    /// Already initialized techniques are left alone. A failed init releases
    /// whatever the technique created and leaves the renderer unchanged.
    pub fn init_technique(&mut self, kind: TechniqueKind) -> RenderResult<()> {
        self.ensure_running()?;
        if self.techniques.contains_key(&kind) {
            return Ok(());
        }

        let mut technique = kind.create();
        let result = {
            let ctx = TechniqueContext {
                device: &*self.device,
                shaders: &*self.shaders,
                shared: self.shared()?,
                main_target: self.main_target()?,
                extent: self.extent,
                config: &self.config,
            };
            technique.init(&ctx)
        };

        if let Err(e) = result {
            log::error!("Failed to initialize {kind} technique: {e}");
            technique.cleanup(&*self.device);
            return Err(e);
        }

        technique.set_debug_view(self.shadow_debug);
        self.techniques.insert(kind, technique);
        log::debug!("Initialized {kind} technique");
        Ok(())
    }

    /// Make `kind` the technique used by the next frame, initializing it first
    /// if needed
    pub fn set_active_technique(&mut self, kind: TechniqueKind) -> RenderResult<()> {
        self.init_technique(kind)?;
        if self.active != Some(kind) {
            log::info!("Active technique: {kind}");
        }
        self.active = Some(kind);
        Ok(())
    }

    /// Render and present one frame
    ///
    /// A frame skipped because the swapchain went out of date, or because
    /// the window is minimized, returns empty statistics. An error after the
    /// swapchain image was acquired loses the renderer: every later call
    /// except [`Renderer::shutdown`] returns [`RenderError::DeviceLost`].
    pub fn render_frame(
        &mut self,
        scene: &mut SceneGraph,
        camera: &Camera,
        lights: &LightingEnvironment,
    ) -> RenderResult<FrameStats> {
        self.ensure_running()?;
        let kind = self.active.ok_or(RenderError::NoActiveTechnique)?;
        if self.requested_extent.is_empty() {
            return Ok(FrameStats::default());
        }

        let device = &*self.device;
        let slot = self.frames.begin_slot(device)?;

        let image = match self
            .surface
            .acquire_next_image(slot.image_available(), self.config.fence_timeout_ns())?
        {
            AcquireOutcome::Image(image) => image,
            AcquireOutcome::NeedsResize => {
                log::debug!("Swapchain out of date, skipping frame {}", slot.frame_number());
                slot.abandon();
                self.recreate_swapchain()?;
                return Ok(FrameStats::default());
            }
        };

        // The acquired image and the slot's wait semaphore now belong to this
        // frame. If it fails before presenting, neither can be recovered.
        let (stats, presented) = match self.record_and_present(kind, image, scene, camera, lights) {
            Ok(done) => done,
            Err(e) => {
                log::error!(
                    "Frame {} failed after acquiring image {}, renderer is lost: {e}",
                    self.frames.frame_number(),
                    image.index
                );
                self.is_lost = true;
                return Err(e);
            }
        };

        if presented == PresentOutcome::NeedsResize {
            self.recreate_swapchain()?;
        }

        log::trace!("Frame {}: {}", self.frames.frame_number(), stats);
        self.last_stats = stats;
        Ok(stats)
    }

    /// Record a new window size; the swapchain is recreated right away
    ///
    /// A zero-sized window pauses rendering until it is resized again.
    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        self.ensure_running()?;
        self.requested_extent = Extent2D::new(width, height);
        if self.requested_extent.is_empty() || self.requested_extent == self.extent {
            return Ok(());
        }
        self.recreate_swapchain()
    }

    /// Upload a mesh, assigning `materials[i]` to surface `i`
    pub fn upload_mesh(
        &self,
        name: impl Into<String>,
        data: &MeshData,
        materials: &[Arc<Material>],
    ) -> RenderResult<Arc<GpuMesh>> {
        self.ensure_running()?;
        Ok(Arc::new(GpuMesh::upload(&*self.device, name, data, materials)?))
    }

    /// Create a material drawn by every forward technique
    pub fn create_material(&mut self, params: &MaterialParams) -> RenderResult<Arc<Material>> {
        self.ensure_running()?;
        let shared = self.shared.as_ref().ok_or_else(shut_down_error)?;
        let factory = self.materials.as_mut().ok_or_else(shut_down_error)?;
        factory.create_material(&*self.device, shared, params)
    }

    /// Upload an RGBA8 texture that lives until shutdown
    pub fn create_texture(&mut self, name: &str, extent: Extent2D, pixels: &[u8]) -> RenderResult<ImageHandle> {
        self.ensure_running()?;
        let image = self.device.create_texture(
            &TextureDesc { label: name.to_string(), extent, format: Format::Rgba8Unorm },
            pixels,
        )?;
        GpuOwned::new(format!("texture '{name}'"), image).defer(&mut self.deletion_queue);
        Ok(image)
    }

    /// Destroy a mesh once no submitted frame can still read it
    ///
    /// The mesh is handed back when other references to it still exist.
    pub fn retire_mesh(&mut self, mesh: Arc<GpuMesh>) -> Option<Arc<GpuMesh>> {
        let mesh = match Arc::try_unwrap(mesh) {
            Ok(mesh) => mesh,
            Err(shared) => {
                log::warn!("Mesh '{}' is still referenced, not retired", shared.name());
                return Some(shared);
            }
        };

        log::debug!("Retiring mesh '{}'", mesh.name());
        match self.frames.last_submitted_mut() {
            // Submissions complete in order, so the newest fence covers every
            // frame that could have drawn the mesh.
            Some(slot) => mesh.defer_destroy(&mut slot.deletion_queue),
            None => {
                let mut queue = DeletionQueue::new();
                mesh.defer_destroy(&mut queue);
                queue.flush(&*self.device);
            }
        }
        None
    }

    /// Show the shadow map instead of the shaded scene
    pub fn set_shadow_debug(&mut self, enabled: bool) {
        self.shadow_debug = enabled;
        for technique in self.techniques.values_mut() {
            technique.set_debug_view(enabled);
        }
    }

    /// Whether the shadow debug view is on
    pub fn shadow_debug(&self) -> bool {
        self.shadow_debug
    }

    /// The technique the next frame uses
    pub fn active_technique(&self) -> Option<TechniqueKind> {
        self.active
    }

    /// Whether `kind` has been initialized
    pub fn is_technique_initialized(&self, kind: TechniqueKind) -> bool {
        self.techniques.contains_key(&kind)
    }

    /// Size of the main target and swapchain
    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    /// Number of frames begun so far
    pub fn frame_number(&self) -> u64 {
        self.frames.frame_number()
    }

    /// Statistics of the last presented frame
    pub fn last_stats(&self) -> FrameStats {
        self.last_stats
    }

    /// Renderer settings
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Wait for the GPU, then release every GPU resource the renderer owns
    ///
    /// Calling it again does nothing. Every other operation fails afterwards.
    /// It also releases a renderer lost to a failed frame.
    pub fn shutdown(&mut self) -> RenderResult<()> {
        if self.is_shutdown {
            return Ok(());
        }
        self.is_shutdown = true;

        log::info!("Shutting down renderer after {} frames", self.frames.frame_number());
        // Release even if the wait failed; the device is unusable either way.
        let idle = self.device.wait_idle();
        let device = &*self.device;

        for (kind, mut technique) in self.techniques.drain() {
            log::debug!("Cleaning up {kind} technique");
            technique.cleanup(device);
        }
        self.active = None;

        self.frames.destroy(device);
        if let Some(materials) = self.materials.take() {
            materials.destroy(device);
        }
        self.deletion_queue.flush(device);
        if let Some(target) = self.main_target.take() {
            target.release(device);
        }
        if let Some(shared) = self.shared.take() {
            shared.destroy(device);
        }

        idle
    }

    /// Record the current slot into `image`, submit it and present
    fn record_and_present(
        &mut self,
        kind: TechniqueKind,
        image: SwapchainImage,
        scene: &mut SceneGraph,
        camera: &Camera,
        lights: &LightingEnvironment,
    ) -> RenderResult<(FrameStats, PresentOutcome)> {
        let device = &*self.device;
        let technique = self.techniques.get_mut(&kind).ok_or(RenderError::NoActiveTechnique)?;
        let shared = self.shared.as_ref().ok_or_else(shut_down_error)?;
        let main_target = self.main_target.as_ref().map(GpuOwned::handle).ok_or_else(shut_down_error)?;
        let extent = self.extent;
        let slot = self.frames.current_slot_mut();

        let mut camera = camera.clone();
        camera.set_aspect_ratio(extent.aspect_ratio());
        let shadow = ShadowSettings {
            enabled: technique.requires_shadow_pass(),
            depth_bias: SHADOW_COMPARE_BIAS,
            map_size: self.config.shadow_map_size,
            debug_view: self.shadow_debug,
        };
        let block = SceneUniformBlock::new(&camera, lights, shadow);
        device.write_buffer(slot.scene_buffer(), 0, bytemuck::bytes_of(&block))?;

        let draw_list = DrawList::build(scene, &block.view_proj_matrix());

        slot.begin_recording(device)?;
        let mut stats = {
            let mut frame = FrameContext {
                device,
                slot: &mut *slot,
                draw_list: &draw_list,
                shared,
                main_target,
                extent,
                lights,
            };
            technique.render(&mut frame)?
        };

        // Post: copy the main color target into the swapchain image.
        let cmd = slot.command_buffer();
        let color = device.render_target_color(main_target, 0);
        device.cmd_image_barrier(
            cmd,
            &ImageBarrier::color(color, ImageLayout::ColorAttachment, ImageLayout::TransferSrc),
        );
        device.cmd_image_barrier(
            cmd,
            &ImageBarrier::color(image.image, ImageLayout::Undefined, ImageLayout::TransferDst),
        );
        device.cmd_blit_image(cmd, color, extent, image.image, self.surface.extent());
        device.cmd_image_barrier(
            cmd,
            &ImageBarrier::color(image.image, ImageLayout::TransferDst, ImageLayout::Present),
        );

        stats.record_draw_list(&draw_list.stats);
        stats.descriptor_sets_allocated = slot.descriptors.allocated_since_clear();

        let render_finished = self.frames.submit_current(device, image.index)?;
        let presented = self.surface.present(image.index, render_finished)?;
        self.frames.advance();
        Ok((stats, presented))
    }

    fn recreate_swapchain(&mut self) -> RenderResult<()> {
        self.device.wait_idle()?;
        self.surface.recreate(self.requested_extent)?;
        self.frames.set_image_count(&*self.device, self.surface.image_count())?;

        let extent = self.surface.extent();
        if extent.is_empty() || extent == self.extent {
            return Ok(());
        }

        let device = &*self.device;
        if let Some(old) = self.main_target.take() {
            old.release(device);
        }
        let main_target = create_main_target(device, extent)?;
        let handle = main_target.handle();
        self.main_target = Some(main_target);
        self.extent = extent;

        let shared = self.shared.as_ref().ok_or_else(shut_down_error)?;
        let ctx = TechniqueContext {
            device,
            shaders: &*self.shaders,
            shared,
            main_target: handle,
            extent,
            config: &self.config,
        };
        for technique in self.techniques.values_mut() {
            technique.resize(&ctx)?;
        }

        log::info!("Resized to {}x{}", extent.width, extent.height);
        Ok(())
    }

    fn ensure_running(&self) -> RenderResult<()> {
        if self.is_shutdown {
            Err(shut_down_error())
        } else if self.is_lost {
            Err(RenderError::DeviceLost(
                "an earlier frame failed after acquiring its swapchain image".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn shared(&self) -> RenderResult<&SharedResources> {
        self.shared.as_ref().ok_or_else(shut_down_error)
    }

    fn main_target(&self) -> RenderResult<RenderTargetHandle> {
        self.main_target.as_ref().map(GpuOwned::handle).ok_or_else(shut_down_error)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("Renderer shutdown failed: {e}");
        }
    }
}

fn create_main_target(device: &dyn GpuDevice, extent: Extent2D) -> RenderResult<GpuOwned<RenderTargetHandle>> {
    let target = device.create_render_target(&RenderTargetDesc {
        label: "main".to_string(),
        extent,
        color_formats: vec![MAIN_COLOR_FORMAT],
        depth_format: Some(MAIN_DEPTH_FORMAT),
    })?;
    Ok(GpuOwned::new("main target", target))
}

fn shut_down_error() -> RenderError {
    RenderError::RenderingFailed("renderer has been shut down".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Mat4, Vec3};
    use crate::render::testing::{Command, Event, FakeSurface, RecordingDevice, StubShaderSource};
    use crate::scene::{Light, SceneNode};

    struct Harness {
        device: RecordingDevice,
        surface: FakeSurface,
        renderer: Renderer,
    }

    fn harness() -> Harness {
        let device = RecordingDevice::new();
        let surface = FakeSurface::new(Extent2D::new(800, 600), 3);
        let config = RendererConfig::default().with_frames_in_flight(2);
        let renderer = Renderer::new(
            Box::new(device.clone()),
            Box::new(surface.clone()),
            Box::new(StubShaderSource),
            config,
        )
        .unwrap();
        Harness { device, surface, renderer }
    }

    fn camera() -> Camera {
        Camera::perspective(Vec3::new(0.0, 2.0, 6.0), 60.0, 4.0 / 3.0, 0.1, 100.0)
    }

    fn sunlit() -> LightingEnvironment {
        LightingEnvironment::new().add_light(Light::directional(
            Vec3::new(-0.4, -1.0, -0.3),
            Vec3::new(1.0, 1.0, 1.0),
            2.0,
        ))
    }

    fn cube_scene(renderer: &mut Renderer) -> (SceneGraph, Arc<GpuMesh>) {
        let material = renderer
            .create_material(&MaterialParams::opaque("stone", [0.6, 0.6, 0.6, 1.0]))
            .unwrap();
        let mesh = renderer.upload_mesh("cube", &MeshData::cube(0.5), &[material]).unwrap();
        let mut scene = SceneGraph::new();
        scene.add_node(
            SceneNode::new("cube")
                .with_transform(Mat4::new_translation(&Vec3::new(0.0, 0.5, 0.0)))
                .with_mesh(Arc::clone(&mesh)),
            None,
        );
        (scene, mesh)
    }

    fn begin_pass_targets(device: &RecordingDevice) -> Vec<RenderTargetHandle> {
        device
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::BeginPass { target, .. } => Some(*target),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_shadow_mapped_frame_has_two_passes_in_order() {
        let Harness { device, surface, mut renderer } = harness();
        renderer.set_active_technique(TechniqueKind::ShadowMappedForward).unwrap();
        let (mut scene, _mesh) = cube_scene(&mut renderer);

        device.clear_events();
        let stats = renderer.render_frame(&mut scene, &camera(), &sunlit()).unwrap();

        let targets = begin_pass_targets(&device);
        assert_eq!(targets.len(), 2);
        assert_eq!(device.target_label(targets[0]).as_deref(), Some("shadow map"));
        assert_eq!(device.target_label(targets[1]).as_deref(), Some("main"));

        assert_eq!(stats.passes, 2);
        assert_eq!(stats.draws, 2);
        assert_eq!(stats.visible_opaque, 1);
        assert_eq!(stats.culled, 0);
        assert_eq!(stats.descriptor_sets_allocated, 2);

        // Post stage blits into the acquired image, then the frame is submitted and presented.
        assert!(device.commands().contains(&Command::Blit {
            src: device.render_target_color(targets[1], 0),
            dst: surface.image(0),
        }));
        assert_eq!(device.count_events(|e| matches!(e, Event::Submit { .. })), 1);
        assert_eq!(surface.presented(), vec![0]);
        assert_eq!(renderer.frame_number(), 1);
    }

    #[test]
    fn test_render_without_active_technique() {
        let Harness { mut renderer, .. } = harness();
        let mut scene = SceneGraph::new();

        let result = renderer.render_frame(&mut scene, &camera(), &sunlit());
        assert!(matches!(result, Err(RenderError::NoActiveTechnique)));
    }

    #[test]
    fn test_out_of_date_swapchain_skips_frame() {
        let Harness { device, surface, mut renderer } = harness();
        renderer.set_active_technique(TechniqueKind::BasicForward).unwrap();
        let (mut scene, _mesh) = cube_scene(&mut renderer);

        renderer.resize(1024, 768).unwrap();
        surface.force_out_of_date();
        device.clear_events();

        let skipped = renderer.render_frame(&mut scene, &camera(), &sunlit()).unwrap();
        assert_eq!(skipped, FrameStats::default());
        assert_eq!(device.count_events(|e| matches!(e, Event::Submit { .. })), 0);
        assert_eq!(surface.recreated().last(), Some(&Extent2D::new(1024, 768)));

        // The abandoned slot's fence is still signaled, so the next frame runs.
        let stats = renderer.render_frame(&mut scene, &camera(), &sunlit()).unwrap();
        assert_eq!(stats.passes, 1);
        assert_eq!(surface.presented().len(), 1);
        assert_eq!(renderer.extent(), Extent2D::new(1024, 768));
    }

    #[test]
    fn test_switching_keeps_previous_technique() {
        let Harness { device, mut renderer, .. } = harness();
        let (mut scene, _mesh) = cube_scene(&mut renderer);

        renderer.set_active_technique(TechniqueKind::Deferred).unwrap();
        renderer.render_frame(&mut scene, &camera(), &sunlit()).unwrap();
        renderer.set_active_technique(TechniqueKind::BasicForward).unwrap();

        assert!(renderer.is_technique_initialized(TechniqueKind::Deferred));
        assert_eq!(renderer.active_technique(), Some(TechniqueKind::BasicForward));

        device.clear_events();
        let stats = renderer.render_frame(&mut scene, &camera(), &sunlit()).unwrap();
        assert_eq!(begin_pass_targets(&device).len(), 1);
        assert_eq!(stats.passes, 1);
    }

    #[test]
    fn test_failed_init_leaves_renderer_unchanged() {
        let Harness { device, mut renderer, .. } = harness();
        renderer.set_active_technique(TechniqueKind::BasicForward).unwrap();
        let live = device.live_resources();
        device.fail_pipeline("deferred lighting");

        assert!(renderer.set_active_technique(TechniqueKind::Deferred).is_err());
        assert_eq!(device.live_resources(), live);
        assert!(!renderer.is_technique_initialized(TechniqueKind::Deferred));
        assert_eq!(renderer.active_technique(), Some(TechniqueKind::BasicForward));
    }

    #[test]
    fn test_retired_mesh_outlives_in_flight_frames() {
        let Harness { device, mut renderer, .. } = harness();
        renderer.set_active_technique(TechniqueKind::BasicForward).unwrap();
        let (mut scene, mesh) = cube_scene(&mut renderer);
        renderer.render_frame(&mut scene, &camera(), &sunlit()).unwrap();

        let index_buffer = mesh.index_buffer();
        scene = SceneGraph::new();
        assert!(renderer.retire_mesh(mesh).is_none());
        assert!(!device.destroyed_raw_handles().contains(&index_buffer.0));

        // The mesh went to the slot of the first frame; it is destroyed when
        // that slot comes around again.
        renderer.render_frame(&mut scene, &camera(), &sunlit()).unwrap();
        assert!(!device.destroyed_raw_handles().contains(&index_buffer.0));
        renderer.render_frame(&mut scene, &camera(), &sunlit()).unwrap();
        assert!(device.destroyed_raw_handles().contains(&index_buffer.0));
    }

    #[test]
    fn test_shared_mesh_is_handed_back() {
        let Harness { mut renderer, .. } = harness();
        let (scene, mesh) = cube_scene(&mut renderer);

        let returned = renderer.retire_mesh(mesh);
        assert!(returned.is_some());
        drop(scene);
        assert!(renderer.retire_mesh(returned.unwrap()).is_none());
    }

    #[test]
    fn test_shutdown_releases_everything_once() {
        let Harness { device, mut renderer, .. } = harness();
        renderer.set_active_technique(TechniqueKind::ShadowMappedForward).unwrap();
        renderer.init_technique(TechniqueKind::Deferred).unwrap();
        let (mut scene, mesh) = cube_scene(&mut renderer);
        renderer.create_texture("checker", Extent2D::new(2, 2), &[255; 16]).unwrap();
        renderer.render_frame(&mut scene, &camera(), &sunlit()).unwrap();

        drop(scene);
        assert!(renderer.retire_mesh(mesh).is_none());
        renderer.shutdown().unwrap();
        assert_eq!(device.live_resources(), 0);
        assert_eq!(device.count_events(|e| *e == Event::WaitIdle), 1);

        renderer.shutdown().unwrap();
        assert_eq!(device.count_events(|e| *e == Event::WaitIdle), 1);
        assert!(renderer.set_active_technique(TechniqueKind::BasicForward).is_err());
    }

    #[test]
    fn test_minimized_window_skips_rendering() {
        let Harness { device, mut renderer, .. } = harness();
        renderer.set_active_technique(TechniqueKind::BasicForward).unwrap();
        let mut scene = SceneGraph::new();

        renderer.resize(0, 0).unwrap();
        device.clear_events();
        let stats = renderer.render_frame(&mut scene, &camera(), &sunlit()).unwrap();

        assert_eq!(stats, FrameStats::default());
        assert!(device.events().is_empty());
    }

    #[test]
    fn test_shadow_debug_reaches_techniques() {
        let Harness { device, mut renderer, .. } = harness();
        renderer.set_active_technique(TechniqueKind::ShadowMappedForward).unwrap();
        let (mut scene, _mesh) = cube_scene(&mut renderer);

        renderer.set_shadow_debug(true);
        device.clear_events();
        renderer.render_frame(&mut scene, &camera(), &sunlit()).unwrap();

        assert!(device.commands().contains(&Command::Draw { vertex_count: 3 }));
    }

    #[test]
    fn test_failure_after_acquire_loses_renderer() {
        let Harness { device, surface, mut renderer } = harness();
        renderer.set_active_technique(TechniqueKind::BasicForward).unwrap();
        let (mut scene, mesh) = cube_scene(&mut renderer);

        device.fail_next_allocations(2);
        let first = renderer.render_frame(&mut scene, &camera(), &sunlit());
        assert!(matches!(first, Err(RenderError::DescriptorAllocation(_))));

        // The acquired image was never presented, so no further frame may run.
        let second = renderer.render_frame(&mut scene, &camera(), &sunlit());
        assert!(matches!(second, Err(RenderError::DeviceLost(_))));
        assert!(matches!(renderer.resize(640, 480), Err(RenderError::DeviceLost(_))));
        assert!(surface.presented().is_empty());
        assert_eq!(device.count_events(|e| matches!(e, Event::Submit { .. })), 0);

        drop(scene);
        assert!(renderer.retire_mesh(mesh).is_none());
        renderer.shutdown().unwrap();
        assert_eq!(device.live_resources(), 0);
    }

    #[test]
    fn test_present_waits_on_per_image_semaphore() {
        let Harness { surface, mut renderer, .. } = harness();
        renderer.set_active_technique(TechniqueKind::BasicForward).unwrap();
        let (mut scene, _mesh) = cube_scene(&mut renderer);

        // Two frames in flight over three swapchain images.
        for _ in 0..6 {
            renderer.render_frame(&mut scene, &camera(), &sunlit()).unwrap();
        }

        assert_eq!(surface.presented(), vec![0, 1, 2, 0, 1, 2]);
        let waits = surface.present_waits();
        assert_eq!(waits[0], waits[3]);
        assert_eq!(waits[1], waits[4]);
        assert_eq!(waits[2], waits[5]);
        assert_ne!(waits[0], waits[1]);
        assert_ne!(waits[0], waits[2]);
        assert_ne!(waits[1], waits[2]);
    }
}
