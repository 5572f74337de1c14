// scene/scene.rs

use std::cell::Cell;
use std::rc::Rc;

use glam::Vec3;
use thiserror::Error;

use crate::culling::Plane;
use crate::engine::{Color4, Engine, EngineError, EngineResult};
use crate::events::Observable;
use crate::material::{Material, MaterialDirtyFlags, MaterialHandle};
use crate::particles::ParticleSystem;
use crate::rendering::{
    AutoClearSetup, DepthPeelingRenderer, DrawContext, GroupHooks, PassOptions, PrePassRenderer,
    RenderTargetHandle, RenderTargetTexture, RenderingGroupInfo, RenderingManager, SortCompare,
};
use crate::scene::camera::{Camera, CameraHandle};
use crate::scene::frame::FrameRenderContext;
use crate::scene::light::Light;
use crate::scene::mesh::{LodSelection, Mesh, MeshHandle};
use crate::scene::skeleton::{Skeleton, SkeletonHandle};
use crate::settings::SceneConfig;
use crate::sprites::SpriteManager;
use crate::stats::FrameStats;
use crate::store::Pool;
use crate::time::Instant;

/// Fatal frame-loop failures. Resources that are merely not ready yet are
/// skipped for the frame and surface through [`Scene::is_ready`] instead.
#[derive(Debug, Error)]
pub enum SceneError {
    #[error("no active camera set on the scene")]
    NoActiveCamera,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Enter or exit notification for a mesh pair with registered intersection
/// targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshIntersectionEvent {
    pub mesh: MeshHandle,
    pub other: MeshHandle,
    pub entering: bool,
}

/// Cancellation flag handed to out-of-band loaders. Flips when the scene is
/// disposed while the request is still tracked.
#[derive(Debug, Clone)]
pub struct AbortSignal(Rc<Cell<bool>>);

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        self.0.get()
    }
}

enum PendingDisposal {
    Mesh(MeshHandle),
    RenderTarget(RenderTargetHandle),
}

/// Replaces the default all-meshes candidate walk of the evaluation pass.
pub type MeshCandidateProvider = Box<dyn Fn(&Pool<Mesh>) -> Vec<MeshHandle>>;

/// Overrides per-mesh LOD chains for the whole scene.
pub type LodSelector = Box<dyn Fn(&Mesh, &Camera) -> LodSelection>;

/// Top-level coordinator: owns the object stores and drives the frame loop.
///
/// The GPU engine is borrowed per call rather than stored, which keeps the
/// stores freely mutable between frames.
pub struct Scene {
    pub meshes: Pool<Mesh>,
    pub cameras: Pool<Camera>,
    pub materials: Pool<dyn Material>,
    pub render_targets: Pool<RenderTargetTexture>,
    pub skeletons: Pool<Skeleton>,
    pub lights: Vec<Light>,
    pub particle_systems: Vec<ParticleSystem>,
    pub sprite_managers: Vec<SpriteManager>,

    /// Rendered in order when non-empty; the single active camera otherwise.
    pub active_cameras: Vec<CameraHandle>,
    /// Offscreen targets rendered once per frame before the camera passes.
    pub custom_render_targets: Vec<RenderTargetHandle>,
    /// Joins every camera's render-target pass when set.
    pub environment_texture: Option<RenderTargetHandle>,

    pub auto_clear: bool,
    pub auto_clear_depth_and_stencil: bool,
    pub clear_color: Color4,

    pub skip_frustum_clipping: bool,
    pub dispatch_all_sub_meshes_of_active_meshes: bool,
    pub particles_enabled: bool,
    pub sprites_enabled: bool,
    pub skeletons_enabled: bool,
    /// Requests per-target debug dumps for the next render call only.
    pub dump_next_render_targets: bool,
    pub custom_lod_selector: Option<LodSelector>,
    pub mesh_candidate_provider: Option<MeshCandidateProvider>,

    pub on_before_render: Observable<u64>,
    pub on_after_render: Observable<u64>,
    pub on_animate: Observable<u64>,
    pub on_before_camera_render: Observable<CameraHandle>,
    pub on_after_camera_render: Observable<CameraHandle>,
    pub on_before_render_targets: Observable<u64>,
    pub on_after_render_targets: Observable<u64>,
    pub on_before_draw_phase: Observable<CameraHandle>,
    pub on_after_draw_phase: Observable<CameraHandle>,
    pub on_before_rendering_group: Observable<RenderingGroupInfo>,
    pub on_after_rendering_group: Observable<RenderingGroupInfo>,
    pub on_material_dirty: Observable<MaterialDirtyFlags>,
    pub on_mesh_intersection: Observable<MeshIntersectionEvent>,
    pub on_pre_active_mesh: Observable<MeshHandle>,
    pub on_ready: Observable<()>,

    pub(crate) active_camera: Option<CameraHandle>,
    pub(crate) frame: FrameRenderContext,
    pub(crate) stats: FrameStats,
    pub(crate) active_meshes: Vec<MeshHandle>,
    pub(crate) rendering_manager: RenderingManager,

    active_skeletons: Vec<SkeletonHandle>,
    software_skinned_meshes: Vec<MeshHandle>,
    intersection_candidates: Vec<MeshHandle>,
    active_particle_systems: Vec<usize>,
    frozen_active_meshes: bool,
    default_framebuffer_cleared: bool,

    depth_peeling: Option<DepthPeelingRenderer>,
    prepass: Option<PrePassRenderer>,

    disposed: bool,
    ready_pending: bool,
    pending_requests: Vec<(String, Rc<Cell<bool>>)>,
    deferred_disposals: Vec<PendingDisposal>,

    config: SceneConfig,
}

impl Scene {
    pub fn new() -> Self {
        Self::from_config(SceneConfig::default())
    }

    /// Builds a scene taking clear behavior and dispatch mode from `config`.
    pub fn from_config(config: SceneConfig) -> Self {
        let [r, g, b, a] = config.clear_color;
        Self {
            meshes: Pool::new(),
            cameras: Pool::new(),
            materials: Pool::new(),
            render_targets: Pool::new(),
            skeletons: Pool::new(),
            lights: Vec::new(),
            particle_systems: Vec::new(),
            sprite_managers: Vec::new(),
            active_cameras: Vec::new(),
            custom_render_targets: Vec::new(),
            environment_texture: None,
            auto_clear: config.auto_clear,
            auto_clear_depth_and_stencil: config.auto_clear_depth_and_stencil,
            clear_color: Color4::new(r, g, b, a),
            skip_frustum_clipping: false,
            dispatch_all_sub_meshes_of_active_meshes: false,
            particles_enabled: true,
            sprites_enabled: true,
            skeletons_enabled: true,
            dump_next_render_targets: false,
            custom_lod_selector: None,
            mesh_candidate_provider: None,
            on_before_render: Observable::new(),
            on_after_render: Observable::new(),
            on_animate: Observable::new(),
            on_before_camera_render: Observable::new(),
            on_after_camera_render: Observable::new(),
            on_before_render_targets: Observable::new(),
            on_after_render_targets: Observable::new(),
            on_before_draw_phase: Observable::new(),
            on_after_draw_phase: Observable::new(),
            on_before_rendering_group: Observable::new(),
            on_after_rendering_group: Observable::new(),
            on_material_dirty: Observable::new(),
            on_mesh_intersection: Observable::new(),
            on_pre_active_mesh: Observable::new(),
            on_ready: Observable::new(),
            active_camera: None,
            frame: FrameRenderContext::new(),
            stats: FrameStats::default(),
            active_meshes: Vec::new(),
            rendering_manager: RenderingManager::new(config.dispatch_mode()),
            active_skeletons: Vec::new(),
            software_skinned_meshes: Vec::new(),
            intersection_candidates: Vec::new(),
            active_particle_systems: Vec::new(),
            frozen_active_meshes: false,
            default_framebuffer_cleared: false,
            depth_peeling: None,
            prepass: None,
            disposed: false,
            ready_pending: false,
            pending_requests: Vec::new(),
            deferred_disposals: Vec::new(),
            config,
        }
    }

    /// Adds a camera and makes it the active one when none is set.
    pub fn add_camera(&mut self, camera: Camera) -> CameraHandle {
        let handle = self.cameras.add(camera);
        if self.active_camera.is_none() {
            self.active_camera = Some(handle);
        }
        handle
    }

    pub fn active_camera(&self) -> Option<CameraHandle> {
        self.active_camera
    }

    pub fn set_active_camera(&mut self, camera: Option<CameraHandle>) {
        self.active_camera = camera;
    }

    pub fn frame(&self) -> &FrameRenderContext {
        &self.frame
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Meshes selected by the most recent evaluation pass.
    pub fn active_meshes(&self) -> &[MeshHandle] {
        &self.active_meshes
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Installs sort comparators for a rendering group.
    pub fn set_rendering_order(
        &mut self,
        group_id: u32,
        opaque: Option<SortCompare>,
        alpha_test: Option<SortCompare>,
        transparent: Option<SortCompare>,
    ) {
        self.rendering_manager
            .set_rendering_order(group_id, opaque, alpha_test, transparent);
    }

    /// Overrides the automatic depth/stencil clear run before a group draws.
    pub fn set_rendering_auto_clear_depth_stencil(&mut self, group_id: u32, setup: AutoClearSetup) {
        self.rendering_manager
            .set_rendering_auto_clear_depth_stencil(group_id, setup);
    }

    /// Reuses the current active-mesh selection for subsequent frames until
    /// unfrozen. World matrices and particle animation still refresh.
    pub fn freeze_active_meshes(&mut self) {
        self.frozen_active_meshes = true;
    }

    pub fn unfreeze_active_meshes(&mut self) {
        self.frozen_active_meshes = false;
    }

    pub fn active_meshes_frozen(&self) -> bool {
        self.frozen_active_meshes
    }

    /// Switches transparent rendering to dual depth peeling. Pass count and
    /// render-pass usage come from the scene configuration.
    pub fn enable_order_independent_transparency(
        &mut self,
        engine: &mut dyn Engine,
    ) -> EngineResult<()> {
        if self.depth_peeling.is_some() {
            return Ok(());
        }
        let renderer = DepthPeelingRenderer::new(
            engine,
            &mut self.prepass,
            self.config.depth_peeling_pass_count,
            self.config.use_render_passes,
        )?;
        self.depth_peeling = Some(renderer);
        Ok(())
    }

    pub fn disable_order_independent_transparency(&mut self, engine: &mut dyn Engine) {
        if let Some(mut peeling) = self.depth_peeling.take() {
            peeling.dispose(engine);
        }
    }

    pub fn depth_peeling(&self) -> Option<&DepthPeelingRenderer> {
        self.depth_peeling.as_ref()
    }

    pub fn depth_peeling_mut(&mut self) -> Option<&mut DepthPeelingRenderer> {
        self.depth_peeling.as_mut()
    }

    pub fn prepass(&self) -> Option<&PrePassRenderer> {
        self.prepass.as_ref()
    }

    pub fn prepass_mut(&mut self) -> Option<&mut PrePassRenderer> {
        self.prepass.as_mut()
    }

    /// Registers an out-of-band load; the scene reports not ready until the
    /// request is untracked. The returned signal flips on dispose.
    pub fn track_pending_request(&mut self, name: impl Into<String>) -> AbortSignal {
        let flag = Rc::new(Cell::new(false));
        self.pending_requests.push((name.into(), flag.clone()));
        AbortSignal(flag)
    }

    pub fn untrack_pending_request(&mut self, signal: &AbortSignal) {
        self.pending_requests
            .retain(|(_, flag)| !Rc::ptr_eq(flag, &signal.0));
    }

    pub fn pending_request_count(&self) -> usize {
        self.pending_requests.len()
    }

    /// Defers mesh removal to the end of the current frame so handles held
    /// by in-flight passes stay valid while drawing.
    pub fn schedule_mesh_disposal(&mut self, mesh: MeshHandle) {
        self.deferred_disposals.push(PendingDisposal::Mesh(mesh));
    }

    pub fn schedule_render_target_disposal(&mut self, target: RenderTargetHandle) {
        self.deferred_disposals
            .push(PendingDisposal::RenderTarget(target));
    }

    /// Flags every material and resets the per-frame bind cache so the next
    /// draw rebinds from scratch.
    pub fn mark_materials_dirty(&mut self, flags: MaterialDirtyFlags) {
        for (_, material) in self.materials.iter_mut() {
            material.mark_dirty(flags);
        }
        self.frame.reset_cached_material();
        let mut payload = flags;
        self.on_material_dirty.notify_observers(&mut payload);
    }

    /// Queues `callback` for the end of the first frame where `is_ready`
    /// reports true.
    pub fn execute_when_ready<F>(&mut self, callback: F)
    where
        F: FnMut() + 'static,
    {
        let mut callback = callback;
        self.on_ready.add_once(move |_, _| callback());
        self.ready_pending = true;
    }

    /// Aggregate readiness: pending requests drained, every mesh unblocked
    /// with compiled materials, every render target allocated, depth peeling
    /// ready when enabled.
    pub fn is_ready(&self, engine: &dyn Engine) -> bool {
        if self.disposed || !self.pending_requests.is_empty() {
            return false;
        }
        for (_, mesh) in self.meshes.iter() {
            if mesh.blocked || !mesh.ready {
                return false;
            }
            for sub in &mesh.sub_meshes {
                let Some(material) = sub.material.or(mesh.material) else {
                    continue;
                };
                if !self.materials.get(material).is_some_and(|material| {
                    material.is_ready_for_submesh(mesh, sub, mesh.has_instances(), engine)
                }) {
                    return false;
                }
            }
        }
        for (_, texture) in self.render_targets.iter() {
            if texture.target().is_none() {
                return false;
            }
        }
        if let Some(peeling) = &self.depth_peeling {
            if peeling.enabled() && !peeling.is_ready(engine) {
                return false;
            }
        }
        true
    }

    /// Renders one frame with camera updates on and animations enabled.
    pub fn render(&mut self, engine: &mut dyn Engine) -> Result<(), SceneError> {
        self.render_with(engine, true, false)
    }

    /// Runs the full frame sequence: animation tick, camera updates, custom
    /// render targets, per-camera rendering, intersection checks and deferred
    /// disposal. A disposed scene returns without side effects.
    pub fn render_with(
        &mut self,
        engine: &mut dyn Engine,
        update_cameras: bool,
        ignore_animations: bool,
    ) -> Result<(), SceneError> {
        if self.disposed {
            return Ok(());
        }
        self.stats.reset();
        self.frame.frame_id += 1;
        self.default_framebuffer_cleared = false;
        for (_, camera) in self.cameras.iter_mut() {
            camera.framebuffer_cleared = false;
        }
        // LOD picks from the previous frame must not leak into this frame's
        // offscreen passes.
        for (_, mesh) in self.meshes.iter_mut() {
            mesh.lod_up_to_date = false;
        }

        if !ignore_animations {
            let mut frame_payload = self.frame.frame_id;
            self.on_animate.notify_observers(&mut frame_payload);
        }
        if update_cameras {
            for (_, camera) in self.cameras.iter_mut() {
                camera.update();
            }
        }

        let mut frame_payload = self.frame.frame_id;
        self.on_before_render.notify_observers(&mut frame_payload);

        let restore_camera = self.active_camera;
        self.render_custom_render_targets(engine)?;

        // The first camera pass draws over this clear; later cameras bind
        // and clear for themselves.
        let current_active = if self.active_cameras.is_empty() {
            self.active_camera
        } else {
            self.active_cameras.first().copied()
        };
        let prepass_defers = self
            .prepass
            .as_ref()
            .is_some_and(|stage| stage.defers_binding());
        if let Some(camera_handle) = current_active {
            if !prepass_defers {
                self.bind_camera_framebuffer(engine, camera_handle);
                self.clear_camera_framebuffer(engine, camera_handle);
            }
        }

        if self.active_cameras.is_empty() {
            let Some(camera_handle) = self.active_camera else {
                return Err(SceneError::NoActiveCamera);
            };
            let bind = self
                .cameras
                .get(camera_handle)
                .is_some_and(|camera| camera.output_render_target.is_some());
            self.process_sub_cameras(engine, camera_handle, bind)?;
        } else {
            let cameras = self.active_cameras.clone();
            for (index, camera_handle) in cameras.into_iter().enumerate() {
                self.process_sub_cameras(engine, camera_handle, index > 0)?;
            }
        }
        self.active_camera = restore_camera;

        self.check_mesh_intersections();

        let mut frame_payload = self.frame.frame_id;
        self.on_after_render.notify_observers(&mut frame_payload);

        self.flush_deferred_disposals(engine);
        self.dump_next_render_targets = false;

        if self.ready_pending && self.is_ready(engine) {
            self.ready_pending = false;
            self.on_ready.notify_observers(&mut ());
        }
        Ok(())
    }

    /// Releases every engine-owned resource and empties the stores. Later
    /// render calls are no-ops.
    pub fn dispose(&mut self, engine: &mut dyn Engine) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        if !self.pending_requests.is_empty() {
            log::debug!(
                "aborting {} pending requests on scene dispose",
                self.pending_requests.len()
            );
        }
        for (_, flag) in self.pending_requests.drain(..) {
            flag.set(true);
        }

        for handle in self.render_targets.handles() {
            if let Some(mut texture) = self.render_targets.take(handle) {
                texture.dispose(engine);
            }
        }
        if let Some(mut peeling) = self.depth_peeling.take() {
            peeling.dispose(engine);
        }
        self.prepass = None;
        self.rendering_manager.dispose();

        self.meshes = Pool::new();
        self.cameras = Pool::new();
        self.materials = Pool::new();
        self.render_targets = Pool::new();
        self.skeletons = Pool::new();
        self.lights.clear();
        self.particle_systems.clear();
        self.sprite_managers.clear();
        self.active_camera = None;
        self.active_cameras.clear();
        self.custom_render_targets.clear();
        self.environment_texture = None;
        self.active_meshes.clear();
        self.active_skeletons.clear();
        self.software_skinned_meshes.clear();
        self.intersection_candidates.clear();
        self.active_particle_systems.clear();
        self.deferred_disposals.clear();

        self.on_before_render.clear();
        self.on_after_render.clear();
        self.on_animate.clear();
        self.on_before_camera_render.clear();
        self.on_after_camera_render.clear();
        self.on_before_render_targets.clear();
        self.on_after_render_targets.clear();
        self.on_before_draw_phase.clear();
        self.on_after_draw_phase.clear();
        self.on_before_rendering_group.clear();
        self.on_after_rendering_group.clear();
        self.on_material_dirty.clear();
        self.on_mesh_intersection.clear();
        self.on_pre_active_mesh.clear();
        self.on_ready.clear();
    }

    /// Renders the scene-level custom targets that are due this frame. Each
    /// target substitutes its own camera when it carries one; having no
    /// camera at all is fatal.
    fn render_custom_render_targets(&mut self, engine: &mut dyn Engine) -> Result<(), SceneError> {
        if self.custom_render_targets.is_empty() {
            return Ok(());
        }
        let restore_camera = self.active_camera;
        let current_active = if self.active_cameras.is_empty() {
            self.active_camera
        } else {
            self.active_cameras.first().copied()
        };
        let target_start = Instant::now();
        let dump = self.dump_next_render_targets;
        let mut rendered_any = false;
        let targets = self.custom_render_targets.clone();
        for handle in targets {
            let due = self
                .render_targets
                .get_mut(handle)
                .is_some_and(|texture| texture.should_render());
            if !due {
                continue;
            }
            let substitute = self
                .render_targets
                .get(handle)
                .and_then(|texture| texture.active_camera)
                .or(current_active);
            let Some(camera_handle) = substitute else {
                self.active_camera = restore_camera;
                return Err(SceneError::NoActiveCamera);
            };
            self.active_camera = Some(camera_handle);
            if let Some(camera) = self.cameras.get(camera_handle) {
                engine.set_viewport(camera.viewport);
            }
            let Some(mut texture) = self.render_targets.take(handle) else {
                continue;
            };
            let result = texture.render(engine, self, dump);
            self.render_targets.put_back(handle, texture);
            if let Err(error) = result {
                self.active_camera = restore_camera;
                return Err(error.into());
            }
            rendered_any = true;
        }
        self.active_camera = restore_camera;
        if rendered_any {
            self.frame.render_id += 1;
        }
        self.stats.render_targets_ms += target_start.elapsed().as_secs_f32() * 1000.0;
        Ok(())
    }

    /// Renders a camera, or each of its rig sub-cameras when it drives a rig.
    fn process_sub_cameras(
        &mut self,
        engine: &mut dyn Engine,
        camera_handle: CameraHandle,
        bind_frame_buffer: bool,
    ) -> Result<(), SceneError> {
        let rig: Vec<CameraHandle> = self
            .cameras
            .get(camera_handle)
            .map(|camera| camera.rig_cameras.clone())
            .unwrap_or_default();
        if rig.is_empty() {
            return self.render_for_camera(engine, camera_handle, None, bind_frame_buffer);
        }
        for sub_camera in rig {
            self.render_for_camera(engine, sub_camera, Some(camera_handle), true)?;
        }
        // The rig parent becomes the camera the frame context tracks again.
        self.active_camera = Some(camera_handle);
        if let Some(camera) = self.cameras.get(camera_handle) {
            self.frame.update_transform_matrix(camera_handle, camera);
        }
        let mut camera_payload = camera_handle;
        self.on_after_camera_render
            .notify_observers(&mut camera_payload);
        Ok(())
    }

    fn render_for_camera(
        &mut self,
        engine: &mut dyn Engine,
        camera_handle: CameraHandle,
        rig_parent: Option<CameraHandle>,
        bind_frame_buffer: bool,
    ) -> Result<(), SceneError> {
        let Some(camera) = self.cameras.get(camera_handle) else {
            return Err(SceneError::NoActiveCamera);
        };
        if camera.skip_rendering {
            return Ok(());
        }
        let viewport = camera.viewport;
        let camera_position = camera.position;
        let camera_layer_mask = camera.layer_mask;

        self.active_camera = Some(camera_handle);

        engine.set_viewport(viewport);
        self.frame.reset_cached_material();
        self.frame.render_id += 1;

        let prepass_defers = self
            .prepass
            .as_ref()
            .is_some_and(|stage| stage.defers_binding());
        if bind_frame_buffer && !prepass_defers {
            self.bind_camera_framebuffer(engine, camera_handle);
            self.clear_camera_framebuffer(engine, camera_handle);
        }
        if let Some(camera) = self.cameras.get(camera_handle) {
            self.frame.update_transform_matrix(camera_handle, camera);
        }

        let mut camera_payload = camera_handle;
        self.on_before_camera_render
            .notify_observers(&mut camera_payload);

        let evaluation_start = Instant::now();
        self.evaluate_active_meshes(camera_handle, camera_position, camera_layer_mask);
        self.stats.evaluation_ms += evaluation_start.elapsed().as_secs_f32() * 1000.0;

        // Software skinning runs after evaluation so the offscreen passes
        // below see final vertex positions.
        for index in 0..self.software_skinned_meshes.len() {
            let handle = self.software_skinned_meshes[index];
            if let Some(mesh) = self.meshes.get_mut(handle) {
                mesh.apply_software_skinning();
            }
        }

        let mut render_id_payload = self.frame.render_id;
        self.on_before_render_targets
            .notify_observers(&mut render_id_payload);

        let target_start = Instant::now();
        let targets = self.collect_render_targets(camera_handle, rig_parent);
        let dump = self.dump_next_render_targets;
        let mut rebind_needed = false;
        for handle in targets {
            let due = self
                .render_targets
                .get_mut(handle)
                .is_some_and(|texture| texture.should_render());
            if !due {
                continue;
            }
            let Some(mut texture) = self.render_targets.take(handle) else {
                continue;
            };
            let result = texture.render(engine, self, dump);
            self.render_targets.put_back(handle, texture);
            result?;
            rebind_needed = true;
        }
        if rebind_needed {
            self.frame.render_id += 1;
            if !prepass_defers {
                self.bind_camera_framebuffer(engine, camera_handle);
                engine.set_viewport(viewport);
            }
            if let Some(camera) = self.cameras.get(camera_handle) {
                self.frame.update_transform_matrix(camera_handle, camera);
            }
        }
        self.stats.render_targets_ms += target_start.elapsed().as_secs_f32() * 1000.0;

        let mut render_id_payload = self.frame.render_id;
        self.on_after_render_targets
            .notify_observers(&mut render_id_payload);

        let mut camera_payload = camera_handle;
        self.on_before_draw_phase
            .notify_observers(&mut camera_payload);
        {
            let options = PassOptions {
                custom_render: None,
                depth_peeling: self.depth_peeling.as_mut(),
                prepass: self.prepass.as_ref(),
                hooks: Some(GroupHooks {
                    before: &mut self.on_before_rendering_group,
                    after: &mut self.on_after_rendering_group,
                    camera: Some(camera_handle),
                }),
                scene_auto_clear: None,
                active_meshes: Some(&self.active_meshes),
                render_particles: self.particles_enabled,
                render_sprites: self.sprites_enabled,
            };
            let mut ctx = DrawContext {
                meshes: &self.meshes,
                materials: &self.materials,
                frame: &mut self.frame,
                particles: &mut self.particle_systems,
                sprites: &mut self.sprite_managers,
                camera_position,
                camera_layer_mask,
                viewport,
                stats: &mut self.stats,
            };
            self.rendering_manager.render(engine, &mut ctx, options)?;
        }
        let mut camera_payload = camera_handle;
        self.on_after_draw_phase
            .notify_observers(&mut camera_payload);

        let mut camera_payload = camera_handle;
        self.on_after_camera_render
            .notify_observers(&mut camera_payload);
        Ok(())
    }

    fn bind_camera_framebuffer(&self, engine: &mut dyn Engine, camera_handle: CameraHandle) {
        let target = self
            .cameras
            .get(camera_handle)
            .and_then(|camera| camera.output_render_target)
            .and_then(|handle| self.render_targets.get(handle))
            .and_then(|texture| texture.target());
        match target {
            Some(id) => engine.bind_framebuffer(id, 0, 0),
            None => engine.restore_default_framebuffer(),
        }
    }

    /// Color-clears each surface at most once per frame; repeated clears of
    /// the same surface fall back to depth and stencil only.
    fn clear_camera_framebuffer(&mut self, engine: &mut dyn Engine, camera_handle: CameraHandle) {
        if !self.auto_clear && !self.auto_clear_depth_and_stencil {
            return;
        }
        let output = self
            .cameras
            .get(camera_handle)
            .and_then(|camera| camera.output_render_target);
        if let Some(output_handle) = output {
            let Some(mut texture) = self.render_targets.take(output_handle) else {
                return;
            };
            if texture.on_clear.has_observers() {
                texture.on_clear.notify_observers(engine);
            } else if !texture.skip_initial_clear {
                if self.auto_clear {
                    let color = texture.clear_color.unwrap_or(self.clear_color);
                    let cleared = self
                        .cameras
                        .get(camera_handle)
                        .is_some_and(|camera| camera.framebuffer_cleared);
                    engine.clear(Some(color), !cleared, true, true);
                }
                if let Some(camera) = self.cameras.get_mut(camera_handle) {
                    camera.framebuffer_cleared = true;
                }
            }
            self.render_targets.put_back(output_handle, texture);
        } else if !self.default_framebuffer_cleared {
            self.default_framebuffer_cleared = true;
            let color = self.auto_clear.then_some(self.clear_color);
            engine.clear(
                color,
                self.auto_clear,
                self.auto_clear_depth_and_stencil,
                self.auto_clear_depth_and_stencil,
            );
        } else {
            engine.clear(None, false, true, true);
        }
    }

    /// Offscreen targets due for this camera: targets referenced by active
    /// materials, then the camera's own list, the rig parent's list and the
    /// environment texture. Order is preserved, duplicates dropped.
    fn collect_render_targets(
        &self,
        camera_handle: CameraHandle,
        rig_parent: Option<CameraHandle>,
    ) -> Vec<RenderTargetHandle> {
        let mut targets: Vec<RenderTargetHandle> = Vec::new();
        let mut seen_materials: Vec<MaterialHandle> = Vec::new();
        for &mesh_handle in &self.active_meshes {
            let Some(mesh) = self.meshes.get(mesh_handle) else {
                continue;
            };
            for sub in &mesh.sub_meshes {
                let Some(material_handle) = sub.material.or(mesh.material) else {
                    continue;
                };
                if seen_materials.contains(&material_handle) {
                    continue;
                }
                seen_materials.push(material_handle);
                let Some(material) = self.materials.get(material_handle) else {
                    continue;
                };
                if !material.has_render_target_textures() {
                    continue;
                }
                for &target in material.render_target_textures() {
                    if !targets.contains(&target) {
                        targets.push(target);
                    }
                }
            }
        }
        if let Some(camera) = self.cameras.get(camera_handle) {
            for &target in &camera.custom_render_targets {
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }
        if let Some(parent) = rig_parent.and_then(|handle| self.cameras.get(handle)) {
            for &target in &parent.custom_render_targets {
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }
        if let Some(environment) = self.environment_texture {
            if !targets.contains(&environment) {
                targets.push(environment);
            }
        }
        targets
    }

    /// Rebuilds the active-mesh list for one camera and fills the dispatch
    /// buckets. Frozen scenes reuse the previous list and only refresh world
    /// matrices, particle animation and sprite lists.
    fn evaluate_active_meshes(
        &mut self,
        camera_handle: CameraHandle,
        camera_position: Vec3,
        camera_layer_mask: u32,
    ) {
        let camera_vectors = self.cameras.get(camera_handle).map(|camera| camera.vectors());

        if self.frozen_active_meshes && !self.active_meshes.is_empty() {
            for index in 0..self.active_meshes.len() {
                let handle = self.active_meshes[index];
                if let Some(mesh) = self.meshes.get_mut(handle) {
                    mesh.compute_world_matrix(camera_vectors.as_ref());
                }
            }
            for index in 0..self.active_particle_systems.len() {
                let system_index = self.active_particle_systems[index];
                if let Some(system) = self.particle_systems.get_mut(system_index) {
                    system.animate();
                }
            }
            self.stats.active_meshes = self.active_meshes.len() as u32;
            self.rendering_manager.reset_sprites();
            return;
        }

        self.active_meshes.clear();
        self.active_skeletons.clear();
        self.software_skinned_meshes.clear();
        self.intersection_candidates.clear();
        self.active_particle_systems.clear();
        if let Some(camera) = self.cameras.get_mut(camera_handle) {
            camera.active_meshes.clear();
        }
        self.rendering_manager.reset();

        let render_id = self.frame.render_id;
        let frustum = self.frame.frustum;
        let candidates = match &self.mesh_candidate_provider {
            Some(provider) => provider(&self.meshes),
            None => self.meshes.handles(),
        };

        for handle in candidates {
            // Selection needs a mutable mesh; the borrow stays scoped so the
            // dispatch below can re-borrow the pool.
            let to_render = {
                let Some(mesh) = self.meshes.get_mut(handle) else {
                    continue;
                };
                if mesh.blocked {
                    continue;
                }
                self.stats.total_vertices += mesh.vertex_count;
                if !mesh.ready || !mesh.enabled || mesh.transform.has_zero_scale() {
                    continue;
                }
                mesh.compute_world_matrix(camera_vectors.as_ref());

                if !mesh.intersection_targets.is_empty()
                    && !self.intersection_candidates.contains(&handle)
                {
                    self.intersection_candidates.push(handle);
                }

                let selection = match (&self.custom_lod_selector, self.cameras.get(camera_handle))
                {
                    (Some(select), Some(camera)) => select(&*mesh, camera),
                    _ => {
                        let distance =
                            camera_position.distance(mesh.bounding.sphere.center_world);
                        mesh.lod_for_distance(distance)
                    }
                };
                mesh.current_lod = selection;
                mesh.lod_up_to_date = true;
                match selection {
                    LodSelection::Skip => continue,
                    LodSelection::Source => handle,
                    LodSelection::Substitute(proxy) => proxy,
                }
            };

            if to_render != handle {
                if let Some(proxy) = self.meshes.get_mut(to_render) {
                    if proxy.billboard_mode.is_enabled() {
                        proxy.compute_world_matrix(camera_vectors.as_ref());
                    }
                }
            }

            let passes = {
                let Some(mesh) = self.meshes.get_mut(handle) else {
                    continue;
                };
                mesh.pre_activate(render_id);
                mesh.visible
                    && mesh.visibility > 0.0
                    && (mesh.layer_mask & camera_layer_mask) != 0
                    && (self.skip_frustum_clipping
                        || mesh.always_select_as_active_mesh
                        || mesh.is_in_frustum(&frustum))
            };
            if !passes {
                continue;
            }

            self.active_meshes.push(handle);
            self.stats.active_meshes += 1;
            if let Some(camera) = self.cameras.get_mut(camera_handle) {
                camera.active_meshes.push(handle);
            }

            if to_render != handle {
                if let Some(proxy) = self.meshes.get_mut(to_render) {
                    proxy.activate(render_id, true);
                }
            }

            let mut pre_active = handle;
            self.on_pre_active_mesh.notify_observers(&mut pre_active);

            let (activates, is_instance, act_as_regular) = {
                let Some(mesh) = self.meshes.get_mut(handle) else {
                    continue;
                };
                (
                    mesh.activate(render_id, false),
                    mesh.is_instance,
                    mesh.act_as_regular_mesh,
                )
            };
            if !activates {
                continue;
            }
            let rendered = if is_instance && act_as_regular {
                handle
            } else {
                to_render
            };
            if let Some(mesh) = self.meshes.get_mut(rendered) {
                if !is_instance {
                    mesh.only_for_instances = false;
                }
                mesh.is_active = true;
            }
            self.dispatch_active_mesh(handle, rendered, render_id, &frustum);
        }

        if self.particles_enabled {
            for index in 0..self.particle_systems.len() {
                if !self.particle_systems[index].is_emitting(&self.meshes) {
                    continue;
                }
                self.active_particle_systems.push(index);
                let group_id = {
                    let system = &mut self.particle_systems[index];
                    system.animate();
                    system.rendering_group_id
                };
                self.rendering_manager.dispatch_particles(index, group_id);
            }
        }
    }

    /// Routes one selected mesh into the manager: skeleton prep, then one
    /// dispatch per sub-mesh that survives sub-mesh culling.
    fn dispatch_active_mesh(
        &mut self,
        source: MeshHandle,
        rendered: MeshHandle,
        render_id: u64,
        frustum: &[Plane; 6],
    ) {
        if self.skeletons_enabled {
            let skeleton = self.meshes.get(rendered).and_then(|mesh| mesh.skeleton);
            if let Some(skeleton_handle) = skeleton {
                if !self.active_skeletons.contains(&skeleton_handle) {
                    self.active_skeletons.push(skeleton_handle);
                    if let Some(skeleton) = self.skeletons.get_mut(skeleton_handle) {
                        skeleton.prepare(render_id);
                        self.stats.active_bones += skeleton.bone_count;
                    }
                }
                let software = self
                    .meshes
                    .get(rendered)
                    .is_some_and(|mesh| !mesh.compute_bones_using_shaders);
                if software && !self.software_skinned_meshes.contains(&rendered) {
                    self.software_skinned_meshes.push(rendered);
                }
            }
        }

        let (force_dispatch, sub_count) = {
            let Some(source_mesh) = self.meshes.get(source) else {
                return;
            };
            let Some(rendered_mesh) = self.meshes.get(rendered) else {
                return;
            };
            let force = source_mesh.has_instances()
                || source_mesh.is_instance
                || self.dispatch_all_sub_meshes_of_active_meshes
                || self.skip_frustum_clipping
                || rendered_mesh.always_select_as_active_mesh
                || rendered_mesh.sub_meshes.len() == 1;
            (force, rendered_mesh.sub_meshes.len())
        };

        for sub_index in 0..sub_count {
            let dispatch = {
                let Some(mesh) = self.meshes.get(rendered) else {
                    return;
                };
                let Some(sub) = mesh.sub_meshes.get(sub_index) else {
                    continue;
                };
                if force_dispatch || sub.is_in_frustum(&mesh.bounding, frustum) {
                    sub.material
                        .or(mesh.material)
                        .map(|material| (material, sub.index_count))
                } else {
                    None
                }
            };
            if let Some((material, index_count)) = dispatch {
                self.stats.active_indices += index_count;
                self.rendering_manager.dispatch(
                    rendered,
                    sub_index,
                    material,
                    &mut self.meshes,
                    &self.materials,
                );
            }
        }
    }

    /// Fires enter/exit events for meshes registered with intersection
    /// targets, comparing world-space bounding spheres.
    fn check_mesh_intersections(&mut self) {
        if self.intersection_candidates.is_empty() {
            return;
        }
        let mut events: Vec<MeshIntersectionEvent> = Vec::new();
        for index in 0..self.intersection_candidates.len() {
            let handle = self.intersection_candidates[index];
            let Some(mesh) = self.meshes.get(handle) else {
                continue;
            };
            for &other in &mesh.intersection_targets {
                if other == handle {
                    continue;
                }
                let intersects = self.meshes.get(other).is_some_and(|other_mesh| {
                    mesh.bounding.sphere.intersects(&other_mesh.bounding.sphere)
                });
                let was_intersecting = mesh.active_intersections.contains(&other);
                if intersects != was_intersecting {
                    events.push(MeshIntersectionEvent {
                        mesh: handle,
                        other,
                        entering: intersects,
                    });
                }
            }
        }
        for event in &events {
            if let Some(mesh) = self.meshes.get_mut(event.mesh) {
                if event.entering {
                    mesh.active_intersections.push(event.other);
                } else {
                    mesh.active_intersections.retain(|&other| other != event.other);
                }
            }
        }
        for mut event in events {
            self.on_mesh_intersection.notify_observers(&mut event);
        }
    }

    fn flush_deferred_disposals(&mut self, engine: &mut dyn Engine) {
        if self.deferred_disposals.is_empty() {
            return;
        }
        for pending in std::mem::take(&mut self.deferred_disposals) {
            match pending {
                PendingDisposal::Mesh(handle) => {
                    self.meshes.remove(handle);
                }
                PendingDisposal::RenderTarget(handle) => {
                    if let Some(mut texture) = self.render_targets.remove(handle) {
                        texture.dispose(engine);
                    }
                    self.custom_render_targets.retain(|&target| target != handle);
                    if self.environment_texture == Some(handle) {
                        self.environment_texture = None;
                    }
                }
            }
        }
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::null::{GpuCall, NullEngine};
    use crate::engine::{RenderTargetKind, RenderTargetSize};
    use crate::material::StandardMaterial;
    use crate::scene::mesh::SubMesh;
    use std::cell::RefCell;

    fn scene_with_camera() -> Scene {
        let mut scene = Scene::new();
        scene.add_camera(Camera::new("main"));
        scene
    }

    fn unit_mesh(scene: &mut Scene, engine: &mut NullEngine, name: &str) -> MeshHandle {
        let material = scene
            .materials
            .insert(Box::new(StandardMaterial::new(name, engine)));
        let mesh = Mesh::new(name)
            .with_sub_mesh(SubMesh::new(0, 36))
            .with_material(material);
        scene.meshes.add(mesh)
    }

    #[test]
    fn render_without_a_camera_is_fatal() {
        let mut engine = NullEngine::new();
        let mut scene = Scene::new();
        assert!(matches!(
            scene.render(&mut engine),
            Err(SceneError::NoActiveCamera)
        ));
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn disposed_scene_render_is_a_silent_no_op() {
        let mut engine = NullEngine::new();
        let mut scene = scene_with_camera();
        unit_mesh(&mut scene, &mut engine, "cube");
        scene.render(&mut engine).unwrap();
        scene.dispose(&mut engine);

        engine.clear_calls();
        let frame_id = scene.frame().frame_id;
        scene.render(&mut engine).unwrap();
        assert!(engine.calls().is_empty());
        assert_eq!(scene.frame().frame_id, frame_id);
    }

    #[test]
    fn active_mesh_is_selected_and_drawn() {
        let mut engine = NullEngine::new();
        let mut scene = scene_with_camera();
        unit_mesh(&mut scene, &mut engine, "cube");
        scene.render(&mut engine).unwrap();

        assert_eq!(scene.active_meshes().len(), 1);
        assert_eq!(scene.stats().active_meshes, 1);
        assert_eq!(scene.stats().active_indices, 36);
        assert_eq!(scene.stats().draw_calls, 1);
        assert!(engine
            .calls()
            .iter()
            .any(|call| matches!(call, GpuCall::DrawIndexed { index_count: 36, .. })));
    }

    #[test]
    fn frozen_scenes_reuse_the_active_list() {
        let mut engine = NullEngine::new();
        let mut scene = scene_with_camera();
        let mesh = unit_mesh(&mut scene, &mut engine, "cube");
        scene.render(&mut engine).unwrap();
        assert_eq!(scene.active_meshes().len(), 1);

        scene.meshes.get_mut(mesh).unwrap().enabled = false;
        scene.freeze_active_meshes();
        scene.render(&mut engine).unwrap();
        assert_eq!(scene.active_meshes().len(), 1);
        assert_eq!(scene.stats().active_meshes, 1);

        scene.unfreeze_active_meshes();
        scene.render(&mut engine).unwrap();
        assert!(scene.active_meshes().is_empty());
        assert_eq!(scene.stats().active_meshes, 0);
    }

    #[test]
    fn deferred_disposals_flush_after_the_frame() {
        let mut engine = NullEngine::new();
        let mut scene = scene_with_camera();
        let mesh = unit_mesh(&mut scene, &mut engine, "cube");
        let texture = RenderTargetTexture::new(
            &mut engine,
            "mirror",
            RenderTargetKind::Simple,
            RenderTargetSize::new(64, 64),
            false,
        )
        .unwrap();
        let target = scene.render_targets.add(texture);
        scene.custom_render_targets.push(target);

        scene.schedule_mesh_disposal(mesh);
        scene.schedule_render_target_disposal(target);
        assert!(scene.meshes.get(mesh).is_some());

        scene.render(&mut engine).unwrap();
        assert!(scene.meshes.get(mesh).is_none());
        assert!(scene.render_targets.get(target).is_none());
        assert!(scene.custom_render_targets.is_empty());
        assert_eq!(engine.live_render_targets(), 0);
        assert_eq!(engine.outstanding_render_pass_ids(), 0);
    }

    #[test]
    fn dispose_aborts_pending_requests() {
        let mut engine = NullEngine::new();
        let mut scene = scene_with_camera();
        let signal = scene.track_pending_request("texture load");
        let finished = scene.track_pending_request("mesh load");
        scene.untrack_pending_request(&finished);
        assert_eq!(scene.pending_request_count(), 1);
        assert!(!scene.is_ready(&engine));
        assert!(!signal.is_aborted());

        scene.dispose(&mut engine);
        assert!(signal.is_aborted());
        assert!(!finished.is_aborted());
        assert_eq!(scene.pending_request_count(), 0);
    }

    #[test]
    fn mark_materials_dirty_resets_the_bind_cache() {
        let mut engine = NullEngine::new();
        let mut scene = scene_with_camera();
        unit_mesh(&mut scene, &mut engine, "cube");
        scene.render(&mut engine).unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        scene
            .on_material_dirty
            .add(move |flags, _| sink.borrow_mut().push(*flags));

        let resets = scene.frame().cache_resets();
        scene.mark_materials_dirty(MaterialDirtyFlags::TEXTURE);
        assert_eq!(scene.frame().cache_resets(), resets + 1);
        assert_eq!(seen.borrow().as_slice(), &[MaterialDirtyFlags::TEXTURE]);
    }

    #[test]
    fn execute_when_ready_fires_once_the_scene_is_ready() {
        let mut engine = NullEngine::new();
        engine.set_effects_ready_by_default(false);
        let mut scene = scene_with_camera();
        unit_mesh(&mut scene, &mut engine, "cube");

        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        scene.execute_when_ready(move || flag.set(true));

        scene.render(&mut engine).unwrap();
        assert!(!fired.get());

        let effect = engine.find_effect("cube").unwrap();
        engine.set_effect_ready(effect, true);
        scene.render(&mut engine).unwrap();
        assert!(fired.get());
    }
}
