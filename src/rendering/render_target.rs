// rendering/render_target.rs

use glam::Vec3;

use crate::engine::{
    Color4, Engine, EngineResult, RenderPassId, RenderTargetDescriptor, RenderTargetId,
    RenderTargetKind, RenderTargetSize, Viewport,
};
use crate::events::{EngineObservable, Observable};
use crate::scene::camera::CameraHandle;
use crate::scene::mesh::{LodSelection, Mesh, MeshHandle};
use crate::scene::Scene;
use crate::store::{Handle, Pool};

use super::group::{CustomRenderFn, DrawContext};
use super::manager::{DispatchMode, PassOptions, RenderingManager};

pub type RenderTargetHandle = Handle<RenderTargetTexture>;

/// Per-face hook that can replace the candidate list. `None` falls back to
/// the explicit `render_list`, then to the scene's active meshes.
pub type RenderListProvider = Box<dyn Fn(u32, &Pool<Mesh>) -> Option<Vec<MeshHandle>>>;

/// Offscreen texture that renders a chosen slice of the scene, possibly
/// several times per call (six cube faces, N array layers).
///
/// The texture owns its GPU handles: the render target itself plus one
/// render-pass id per face or layer. `dispose` releases both, `resize`
/// releases and recreates them; the backing store is never resized in place.
pub struct RenderTargetTexture {
    pub name: String,
    kind: RenderTargetKind,
    size: RenderTargetSize,
    generate_mip_maps: bool,
    target: Option<RenderTargetId>,
    pass_ids: Vec<RenderPassId>,
    refresh_rate: u32,
    current_refresh_id: i64,
    /// Explicit candidate meshes; `None` renders the scene's active meshes.
    pub render_list: Option<Vec<MeshHandle>>,
    pub render_list_provider: Option<RenderListProvider>,
    /// Replaces the per-group bucket draw when set.
    pub custom_render_fn: Option<CustomRenderFn>,
    /// Camera the target renders with when it differs from the scene's.
    pub active_camera: Option<CameraHandle>,
    pub render_particles: bool,
    pub render_sprites: bool,
    pub skip_initial_clear: bool,
    /// `None` clears with the scene's clear color.
    pub clear_color: Option<Color4>,
    /// Apply the scene's per-group auto-clear setups instead of this
    /// texture's own manager defaults.
    pub use_scene_auto_clear_setup: bool,
    /// Fires with the face or layer index about to render.
    pub on_before_render: Observable<u32>,
    /// Fires with the face or layer index just rendered.
    pub on_after_render: Observable<u32>,
    /// When observed, replaces the default clear entirely.
    pub on_clear: EngineObservable,
    pub on_after_unbind: Observable<()>,
    pub on_resize: Observable<RenderTargetSize>,
    /// Own dispatch buckets so rendering between scene evaluation and the
    /// main draw never clobbers the scene's buckets.
    rendering_manager: RenderingManager,
    prepared_list: Vec<MeshHandle>,
    default_render_list_prepared: bool,
}

impl RenderTargetTexture {
    /// Renders on the next `should_render` call, then waits for
    /// `reset_refresh_counter`. This is the default rate.
    pub const REFRESH_RATE_RENDER_ONCE: u32 = 0;

    pub fn new(
        engine: &mut dyn Engine,
        name: impl Into<String>,
        kind: RenderTargetKind,
        size: RenderTargetSize,
        generate_mip_maps: bool,
    ) -> EngineResult<Self> {
        let name = name.into();
        let descriptor = RenderTargetDescriptor {
            kind,
            size,
            attachment_count: 1,
            generate_mip_maps,
        };
        let target = engine.create_render_target(&name, &descriptor)?;
        let mut texture = Self {
            name,
            kind,
            size,
            generate_mip_maps,
            target: Some(target),
            pass_ids: Vec::new(),
            refresh_rate: Self::REFRESH_RATE_RENDER_ONCE,
            current_refresh_id: -1,
            render_list: None,
            render_list_provider: None,
            custom_render_fn: None,
            active_camera: None,
            render_particles: true,
            render_sprites: false,
            skip_initial_clear: false,
            clear_color: None,
            use_scene_auto_clear_setup: true,
            on_before_render: Observable::new(),
            on_after_render: Observable::new(),
            on_clear: EngineObservable::new(),
            on_after_unbind: Observable::new(),
            on_resize: Observable::new(),
            rendering_manager: RenderingManager::new(DispatchMode::PerFrameReset),
            prepared_list: Vec::new(),
            default_render_list_prepared: false,
        };
        texture.create_render_pass_ids(engine);
        Ok(texture)
    }

    pub fn target(&self) -> Option<RenderTargetId> {
        self.target
    }

    pub fn kind(&self) -> RenderTargetKind {
        self.kind
    }

    pub fn size(&self) -> RenderTargetSize {
        self.size
    }

    /// Faces for cube targets, layers for array and volume targets.
    pub fn pass_count(&self) -> u32 {
        self.kind.pass_count(self.size.layers)
    }

    pub fn refresh_rate(&self) -> u32 {
        self.refresh_rate
    }

    pub fn set_refresh_rate(&mut self, rate: u32) {
        self.refresh_rate = rate;
        self.reset_refresh_counter();
    }

    /// Rewinds the cadence so the next `should_render` returns true.
    pub fn reset_refresh_counter(&mut self) {
        self.current_refresh_id = -1;
    }

    /// Cadence gate called once per scene frame. A rate of N renders on
    /// calls 0, N+1, 2(N+1), ...; rate 0 renders on call 0 only.
    pub(crate) fn should_render(&mut self) -> bool {
        if self.current_refresh_id == -1 {
            self.current_refresh_id = 0;
            return true;
        }
        if self.refresh_rate == Self::REFRESH_RATE_RENDER_ONCE {
            return false;
        }
        self.current_refresh_id += 1;
        if self.current_refresh_id > self.refresh_rate as i64 {
            self.current_refresh_id = 0;
            return true;
        }
        false
    }

    fn descriptor(&self) -> RenderTargetDescriptor {
        RenderTargetDescriptor {
            kind: self.kind,
            size: self.size,
            attachment_count: 1,
            generate_mip_maps: self.generate_mip_maps,
        }
    }

    fn create_render_pass_ids(&mut self, engine: &mut dyn Engine) {
        for index in 0..self.pass_count() {
            self.pass_ids
                .push(engine.create_render_pass_id(&format!("{} #{index}", self.name)));
        }
    }

    fn release_render_pass_ids(&mut self, engine: &mut dyn Engine) {
        for id in self.pass_ids.drain(..) {
            engine.release_render_pass_id(id);
        }
    }

    /// Drops the backing target and allocates a fresh one at `size`. Pass
    /// ids are rebuilt too since a layer change alters the pass count.
    pub fn resize(&mut self, engine: &mut dyn Engine, size: RenderTargetSize) -> EngineResult<()> {
        if let Some(target) = self.target.take() {
            engine.release_render_target(target);
        }
        self.release_render_pass_ids(engine);
        self.size = size;
        let descriptor = self.descriptor();
        self.target = Some(engine.create_render_target(&self.name, &descriptor)?);
        self.create_render_pass_ids(engine);
        let mut resized = size;
        self.on_resize.notify_observers(&mut resized);
        Ok(())
    }

    /// Resize keeping the aspect ratio and layer count.
    pub fn scale(&mut self, engine: &mut dyn Engine, ratio: f32) -> EngineResult<()> {
        let width = ((self.size.width as f32 * ratio) as u32).max(1);
        let height = ((self.size.height as f32 * ratio) as u32).max(1);
        self.resize(
            engine,
            RenderTargetSize::with_layers(width, height, self.size.layers),
        )
    }

    /// Readiness sweep that issues no GPU work. An unready mesh or material
    /// reports false and rewinds the cadence so render-once targets retry.
    pub fn is_ready_for_rendering(&mut self, engine: &dyn Engine, scene: &Scene) -> bool {
        let list: &[MeshHandle] = match &self.render_list {
            Some(list) => list,
            None => &scene.active_meshes,
        };
        let mut ready = true;
        for &handle in list {
            let Some(mesh) = scene.meshes.get(handle) else {
                continue;
            };
            if mesh.blocked {
                continue;
            }
            if !mesh.ready {
                ready = false;
                continue;
            }
            for sub in &mesh.sub_meshes {
                let Some(material) = sub.material.or(mesh.material) else {
                    continue;
                };
                if !scene.materials.get(material).is_some_and(|material| {
                    material.is_ready_for_submesh(mesh, sub, mesh.has_instances(), engine)
                }) {
                    ready = false;
                }
            }
        }
        if !ready {
            self.reset_refresh_counter();
        }
        ready
    }

    /// Renders every face or layer of the target. The camera is the
    /// texture's own when set, the scene's active camera otherwise; with
    /// neither this is a no-op.
    pub fn render(
        &mut self,
        engine: &mut dyn Engine,
        scene: &mut Scene,
        dump_for_debug: bool,
    ) -> EngineResult<()> {
        if self.target.is_none() {
            return Ok(());
        }
        let Some(camera_handle) = self.active_camera.or(scene.active_camera) else {
            return Ok(());
        };
        let Some(camera) = scene.cameras.get_mut(camera_handle) else {
            return Ok(());
        };
        camera.update();
        let camera_position = camera.position;
        let camera_layer_mask = camera.layer_mask;
        scene.frame.update_transform_matrix(camera_handle, camera);

        self.default_render_list_prepared = false;
        let pass_count = self.pass_count();
        for pass_index in 0..pass_count {
            let (face, layer) = match self.kind {
                RenderTargetKind::Simple => (0, 0),
                RenderTargetKind::Cube => (pass_index, 0),
                RenderTargetKind::Array2D | RenderTargetKind::Volume3D => (0, pass_index),
            };
            self.render_to_target(
                engine,
                scene,
                camera_handle,
                camera_position,
                camera_layer_mask,
                pass_index,
                face,
                layer,
                dump_for_debug,
            )?;
        }
        self.on_after_unbind.notify_observers(&mut ());

        // Put the scene camera's matrices back when this target used its own.
        if let Some(scene_camera) = scene.active_camera {
            if scene_camera != camera_handle {
                if let Some(camera) = scene.cameras.get(scene_camera) {
                    scene.frame.update_transform_matrix(scene_camera, camera);
                }
            }
        }
        scene.frame.reset_cached_material();
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn render_to_target(
        &mut self,
        engine: &mut dyn Engine,
        scene: &mut Scene,
        camera_handle: CameraHandle,
        camera_position: Vec3,
        camera_layer_mask: u32,
        pass_index: u32,
        face: u32,
        layer: u32,
        dump_for_debug: bool,
    ) -> EngineResult<()> {
        let Some(target) = self.target else {
            return Ok(());
        };
        scene.frame.render_id += 1;

        engine.bind_framebuffer(target, face, layer);
        if let Some(&pass_id) = self.pass_ids.get(pass_index as usize) {
            engine.set_current_render_pass_id(pass_id);
        }
        let mut pass_payload = pass_index;
        self.on_before_render.notify_observers(&mut pass_payload);

        // Engines replaying a recorded snapshot skip list preparation and
        // drawing; the target is only bound and cleared.
        let fast_path = engine.snapshot_rendering();
        if !fast_path {
            let provided = self
                .render_list_provider
                .as_ref()
                .and_then(|provider| provider(pass_index, &scene.meshes));
            if let Some(list) = provided {
                self.prepared_list = list;
                self.default_render_list_prepared = false;
                self.prepare_rendering_manager(
                    scene,
                    camera_handle,
                    camera_position,
                    camera_layer_mask,
                    false,
                );
            } else if !self.default_render_list_prepared {
                self.prepared_list = match &self.render_list {
                    Some(list) => list.clone(),
                    None => scene.active_meshes.clone(),
                };
                // Explicit lists were picked by hand, so only the default
                // list is filtered by the camera's layer mask.
                let check_layer_mask = self.render_list.is_none();
                self.prepare_rendering_manager(
                    scene,
                    camera_handle,
                    camera_position,
                    camera_layer_mask,
                    check_layer_mask,
                );
                self.default_render_list_prepared = true;
            }
        }

        engine.set_viewport(Viewport::FULL);

        if self.on_clear.has_observers() {
            self.on_clear.notify_observers(engine);
        } else if !self.skip_initial_clear {
            let color = self.clear_color.unwrap_or(scene.clear_color);
            engine.clear(Some(color), true, true, true);
        }

        if let Some(camera) = scene.cameras.get(camera_handle) {
            scene.frame.update_transform_matrix(camera_handle, camera);
        }

        if !fast_path {
            let scene_setups = scene.rendering_manager.auto_clear_setups();
            let options = PassOptions {
                custom_render: self.custom_render_fn.as_mut(),
                depth_peeling: None,
                prepass: None,
                hooks: None,
                scene_auto_clear: self
                    .use_scene_auto_clear_setup
                    .then_some(&scene_setups),
                active_meshes: Some(&self.prepared_list),
                render_particles: self.render_particles,
                render_sprites: self.render_sprites,
            };
            let mut ctx = DrawContext {
                meshes: &scene.meshes,
                materials: &scene.materials,
                frame: &mut scene.frame,
                particles: &mut scene.particle_systems,
                sprites: &mut scene.sprite_managers,
                camera_position,
                camera_layer_mask,
                viewport: Viewport::FULL,
                stats: &mut scene.stats,
            };
            self.rendering_manager.render(engine, &mut ctx, options)?;
        }
        scene.stats.render_target_renders += 1;

        if dump_for_debug {
            log::debug!(
                "render target '{}' pass {pass_index}: {}x{} rendered",
                self.name,
                self.size.width,
                self.size.height
            );
        }

        self.on_after_render.notify_observers(&mut pass_payload);

        engine.unbind_framebuffer(target);
        if self.generate_mip_maps && pass_index + 1 == self.pass_count() {
            engine.generate_mip_maps(target);
        }
        scene.frame.reset_cached_material();
        Ok(())
    }

    /// Fills the texture's own dispatch buckets from `prepared_list`.
    /// Frustum clipping is skipped on purpose: the list is the contract.
    fn prepare_rendering_manager(
        &mut self,
        scene: &mut Scene,
        camera_handle: CameraHandle,
        camera_position: Vec3,
        camera_layer_mask: u32,
        check_layer_mask: bool,
    ) {
        self.rendering_manager.reset();
        let camera_vectors = scene
            .cameras
            .get(camera_handle)
            .map(|camera| camera.vectors());
        let render_id = scene.frame.render_id;

        for index in 0..self.prepared_list.len() {
            let handle = self.prepared_list[index];
            let to_render = {
                let Some(mesh) = scene.meshes.get_mut(handle) else {
                    continue;
                };
                if mesh.blocked {
                    continue;
                }
                if !mesh.ready {
                    // Retry next frame even for render-once targets, so the
                    // content is not missing forever.
                    self.reset_refresh_counter();
                    continue;
                }
                if !mesh.lod_up_to_date {
                    let selection =
                        match (&scene.custom_lod_selector, scene.cameras.get(camera_handle)) {
                            (Some(select), Some(camera)) => select(&*mesh, camera),
                            _ => {
                                let distance =
                                    camera_position.distance(mesh.bounding.sphere.center_world);
                                mesh.lod_for_distance(distance)
                            }
                        };
                    mesh.current_lod = selection;
                    mesh.lod_up_to_date = true;
                }
                let masked = check_layer_mask && (mesh.layer_mask & camera_layer_mask) == 0;
                if !mesh.enabled || !mesh.visible || masked {
                    continue;
                }
                match mesh.current_lod {
                    LodSelection::Skip => continue,
                    LodSelection::Source => handle,
                    LodSelection::Substitute(proxy) => proxy,
                }
            };

            if to_render != handle {
                if let Some(proxy) = scene.meshes.get_mut(to_render) {
                    proxy.compute_world_matrix(camera_vectors.as_ref());
                }
            }
            let sub_count = {
                let Some(mesh) = scene.meshes.get_mut(to_render) else {
                    continue;
                };
                mesh.activate(render_id, true);
                mesh.sub_meshes.len()
            };
            for sub_index in 0..sub_count {
                let material = scene
                    .meshes
                    .get(to_render)
                    .and_then(|mesh| mesh.sub_meshes[sub_index].material.or(mesh.material));
                let Some(material) = material else {
                    continue;
                };
                self.rendering_manager.dispatch(
                    to_render,
                    sub_index,
                    material,
                    &mut scene.meshes,
                    &scene.materials,
                );
            }
        }

        for (index, system) in scene.particle_systems.iter().enumerate() {
            if !system.is_emitting(&scene.meshes) {
                continue;
            }
            self.rendering_manager
                .dispatch_particles(index, system.rendering_group_id);
        }
    }

    pub fn dispose(&mut self, engine: &mut dyn Engine) {
        if let Some(target) = self.target.take() {
            engine.release_render_target(target);
        }
        self.release_render_pass_ids(engine);
        self.rendering_manager.dispose();
        self.on_before_render.clear();
        self.on_after_render.clear();
        self.on_clear.clear();
        self.on_after_unbind.clear();
        self.on_resize.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::null::NullEngine;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn probe(
        engine: &mut NullEngine,
        kind: RenderTargetKind,
        size: RenderTargetSize,
    ) -> RenderTargetTexture {
        RenderTargetTexture::new(engine, "probe", kind, size, false).unwrap()
    }

    #[test]
    fn refresh_rate_renders_on_a_fixed_cadence() {
        let mut engine = NullEngine::new();
        let mut texture = probe(
            &mut engine,
            RenderTargetKind::Simple,
            RenderTargetSize::new(64, 64),
        );
        texture.set_refresh_rate(2);
        let rendered: Vec<u32> = (0..9u32).filter(|_| texture.should_render()).collect();
        assert_eq!(rendered, vec![0, 3, 6]);
    }

    #[test]
    fn render_once_waits_for_a_counter_reset() {
        let mut engine = NullEngine::new();
        let mut texture = probe(
            &mut engine,
            RenderTargetKind::Simple,
            RenderTargetSize::new(64, 64),
        );
        assert_eq!(texture.refresh_rate(), RenderTargetTexture::REFRESH_RATE_RENDER_ONCE);
        assert!(texture.should_render());
        assert!(!texture.should_render());
        assert!(!texture.should_render());

        texture.reset_refresh_counter();
        assert!(texture.should_render());
        assert!(!texture.should_render());
    }

    #[test]
    fn faces_and_layers_get_their_own_pass_ids() {
        let mut engine = NullEngine::new();
        let _cube = probe(
            &mut engine,
            RenderTargetKind::Cube,
            RenderTargetSize::new(32, 32),
        );
        assert_eq!(engine.outstanding_render_pass_ids(), 6);

        let mut engine = NullEngine::new();
        let _array = probe(
            &mut engine,
            RenderTargetKind::Array2D,
            RenderTargetSize::with_layers(32, 32, 4),
        );
        assert_eq!(engine.outstanding_render_pass_ids(), 4);

        let mut engine = NullEngine::new();
        let _simple = probe(
            &mut engine,
            RenderTargetKind::Simple,
            RenderTargetSize::new(32, 32),
        );
        assert_eq!(engine.outstanding_render_pass_ids(), 1);
    }

    #[test]
    fn resize_recreates_the_target_and_pass_ids() {
        let mut engine = NullEngine::new();
        let mut texture = probe(
            &mut engine,
            RenderTargetKind::Cube,
            RenderTargetSize::new(64, 64),
        );
        let old_target = texture.target().unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sizes = seen.clone();
        texture.on_resize.add(move |size, _| sizes.borrow_mut().push(*size));

        texture
            .resize(&mut engine, RenderTargetSize::new(128, 128))
            .unwrap();
        assert_ne!(texture.target(), Some(old_target));
        assert_eq!(texture.size(), RenderTargetSize::new(128, 128));
        assert_eq!(engine.live_render_targets(), 1);
        assert_eq!(engine.outstanding_render_pass_ids(), 6);
        assert_eq!(&*seen.borrow(), &[RenderTargetSize::new(128, 128)]);
    }

    #[test]
    fn dispose_releases_gpu_resources_and_is_idempotent() {
        let mut engine = NullEngine::new();
        let mut texture = probe(
            &mut engine,
            RenderTargetKind::Cube,
            RenderTargetSize::new(64, 64),
        );
        texture.dispose(&mut engine);
        texture.dispose(&mut engine);
        assert!(texture.target().is_none());
        assert_eq!(engine.live_render_targets(), 0);
        assert_eq!(engine.outstanding_render_pass_ids(), 0);
    }
}
