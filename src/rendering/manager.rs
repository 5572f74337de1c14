// rendering/manager.rs

use std::sync::atomic::{AtomicU32, Ordering};

use crate::engine::{Engine, EngineResult};
use crate::events::Observable;
use crate::material::{Material, MaterialHandle};
use crate::scene::camera::CameraHandle;
use crate::scene::mesh::{Mesh, MeshHandle};
use crate::store::Pool;

use super::depth_peeling::DepthPeelingRenderer;
use super::group::{CustomRenderFn, DrawContext, DrawItem, RenderingGroup, SortCompare};
use super::prepass::PrePassRenderer;

/// Clear behavior applied before a group is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoClearSetup {
    pub auto_clear: bool,
    pub depth: bool,
    pub stencil: bool,
}

impl Default for AutoClearSetup {
    fn default() -> Self {
        Self {
            auto_clear: true,
            depth: true,
            stencil: true,
        }
    }
}

/// Whether dispatch buckets are rebuilt from scratch every frame or kept
/// alive between frames for static scenes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    PerFrameReset,
    Persistent,
}

/// Payload passed to the per-group observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderingGroupInfo {
    pub group_id: u32,
    pub camera: Option<CameraHandle>,
}

/// Observers fired around every non-empty group, with the group id encoded
/// into the notification mask.
pub struct GroupHooks<'a> {
    pub before: &'a mut Observable<RenderingGroupInfo>,
    pub after: &'a mut Observable<RenderingGroupInfo>,
    pub camera: Option<CameraHandle>,
}

/// Collaborators and switches for one `RenderingManager::render` pass.
#[derive(Default)]
pub struct PassOptions<'a> {
    pub custom_render: Option<&'a mut CustomRenderFn>,
    pub depth_peeling: Option<&'a mut DepthPeelingRenderer>,
    pub prepass: Option<&'a PrePassRenderer>,
    pub hooks: Option<GroupHooks<'a>>,
    /// Overrides the manager's own auto-clear setups, used when a render
    /// target borrows the scene's configuration.
    pub scene_auto_clear: Option<&'a [AutoClearSetup; RenderingManager::MAX_RENDERING_GROUPS as usize]>,
    /// When set, mesh-attached particle emitters outside this list are skipped.
    pub active_meshes: Option<&'a [MeshHandle]>,
    pub render_particles: bool,
    pub render_sprites: bool,
}

#[derive(Clone, Copy, Default)]
struct GroupSorts {
    opaque: Option<SortCompare>,
    alpha_test: Option<SortCompare>,
    transparent: Option<SortCompare>,
}

/// Routes dispatched sub-meshes, particle systems and sprite batches into a
/// fixed range of rendering groups and draws them in ascending group order.
pub struct RenderingManager {
    groups: Vec<Option<RenderingGroup>>,
    sorts: Vec<GroupSorts>,
    auto_clear: Vec<AutoClearSetup>,
    mode: DispatchMode,
    /// Identifies this manager in sub-mesh dispatch marks. The scene and
    /// every render target texture each own a manager over the same meshes.
    id: u32,
    cycle: u64,
}

static NEXT_MANAGER_ID: AtomicU32 = AtomicU32::new(1);

impl RenderingManager {
    pub const MIN_RENDERING_GROUPS: u32 = 0;
    pub const MAX_RENDERING_GROUPS: u32 = 4;

    pub fn new(mode: DispatchMode) -> Self {
        let count = Self::MAX_RENDERING_GROUPS as usize;
        let mut groups = Vec::with_capacity(count);
        groups.resize_with(count, || None);
        Self {
            groups,
            sorts: vec![GroupSorts::default(); count],
            auto_clear: vec![AutoClearSetup::default(); count],
            mode,
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
            cycle: 0,
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    fn clamp_group_id(group_id: u32) -> usize {
        group_id.min(Self::MAX_RENDERING_GROUPS - 1) as usize
    }

    fn group_for(&mut self, group_id: u32) -> &mut RenderingGroup {
        let index = Self::clamp_group_id(group_id);
        let sorts = self.sorts[index];
        self.groups[index].get_or_insert_with(|| {
            RenderingGroup::new(sorts.opaque, sorts.alpha_test, sorts.transparent)
        })
    }

    /// Queues one sub-mesh into its mesh's rendering group. A sub-mesh
    /// already dispatched in this manager's current cycle is skipped, which
    /// keeps persistent buckets free of duplicates. Marks are scoped per
    /// manager; the scene's manager and a render target's never collide.
    pub fn dispatch(
        &mut self,
        mesh_handle: MeshHandle,
        sub_mesh_index: usize,
        material_handle: MaterialHandle,
        meshes: &mut Pool<Mesh>,
        materials: &Pool<dyn Material>,
    ) {
        let Some(mesh) = meshes.get_mut(mesh_handle) else {
            return;
        };
        let Some(sub) = mesh.sub_meshes.get_mut(sub_mesh_index) else {
            return;
        };
        let mark = (self.id, self.cycle);
        if sub.dispatched == Some(mark) {
            return;
        }
        let Some(material) = materials.get(material_handle) else {
            return;
        };
        let transparent = material.needs_alpha_blending() || mesh.visibility < 1.0;
        let alpha_test = material.needs_alpha_testing();
        let group_id = mesh.rendering_group_id;
        sub.dispatched = Some(mark);

        let item = DrawItem {
            mesh: mesh_handle,
            sub_mesh_index,
            material: material_handle,
            alpha_index: 0.0,
            distance_to_camera: 0.0,
        };
        self.group_for(group_id).dispatch_item(item, transparent, alpha_test);
    }

    pub fn dispatch_particles(&mut self, index: usize, group_id: u32) {
        self.group_for(group_id).dispatch_particles(index);
    }

    pub fn dispatch_sprites(&mut self, index: usize, group_id: u32) {
        self.group_for(group_id).dispatch_sprites(index);
    }

    /// Prepares every group for a new dispatch cycle. Mesh buckets survive
    /// in `Persistent` mode, where the cycle also stays put so stale marks
    /// keep deduplicating; particle and sprite lists never survive.
    pub fn reset(&mut self) {
        let rebuild = self.mode == DispatchMode::PerFrameReset;
        if rebuild {
            self.cycle += 1;
        }
        for group in self.groups.iter_mut().flatten() {
            if rebuild {
                group.prepare();
            } else {
                group.prepare_transients();
            }
        }
    }

    /// Clears the sprite lists only. Sprites are re-dispatched on every
    /// render call, so frames that skip the full reset still need this.
    pub fn reset_sprites(&mut self) {
        for group in self.groups.iter_mut().flatten() {
            group.prepare_sprites();
        }
    }

    /// Installs sort comparators for a group, applied immediately when the
    /// group exists and remembered for its lazy creation otherwise.
    pub fn set_rendering_order(
        &mut self,
        group_id: u32,
        opaque: Option<SortCompare>,
        alpha_test: Option<SortCompare>,
        transparent: Option<SortCompare>,
    ) {
        let index = Self::clamp_group_id(group_id);
        self.sorts[index] = GroupSorts {
            opaque,
            alpha_test,
            transparent,
        };
        if let Some(group) = self.groups[index].as_mut() {
            group.set_opaque_sort(opaque);
            group.set_alpha_test_sort(alpha_test);
            group.set_transparent_sort(transparent);
        }
    }

    pub fn set_rendering_auto_clear_depth_stencil(&mut self, group_id: u32, setup: AutoClearSetup) {
        self.auto_clear[Self::clamp_group_id(group_id)] = setup;
    }

    pub fn get_auto_clear_depth_stencil_setup(&self, group_id: u32) -> AutoClearSetup {
        self.auto_clear[Self::clamp_group_id(group_id)]
    }

    /// Snapshot of all per-group clear setups, in group order.
    pub fn auto_clear_setups(&self) -> [AutoClearSetup; Self::MAX_RENDERING_GROUPS as usize] {
        let mut setups = [AutoClearSetup::default(); Self::MAX_RENDERING_GROUPS as usize];
        setups.copy_from_slice(&self.auto_clear);
        setups
    }

    /// Draws all non-empty groups in ascending index order. Sprite batches
    /// are dispatched here since sprites are not part of mesh evaluation.
    pub fn render(
        &mut self,
        engine: &mut dyn Engine,
        ctx: &mut DrawContext<'_>,
        mut options: PassOptions<'_>,
    ) -> EngineResult<()> {
        if options.render_sprites {
            for index in 0..ctx.sprites.len() {
                let group_id = ctx.sprites[index].rendering_group_id;
                self.group_for(group_id).dispatch_sprites(index);
            }
        }

        for group_id in Self::MIN_RENDERING_GROUPS..Self::MAX_RENDERING_GROUPS {
            let first_group = group_id == Self::MIN_RENDERING_GROUPS;
            let index = group_id as usize;
            let setup = options
                .scene_auto_clear
                .map(|setups| setups[index])
                .unwrap_or(self.auto_clear[index]);
            let Some(group) = self.groups[index].as_mut() else {
                continue;
            };
            if group.is_empty() {
                continue;
            }

            let mask = 1_i64 << group_id;
            let mut info = RenderingGroupInfo {
                group_id,
                camera: options.hooks.as_ref().and_then(|hooks| hooks.camera),
            };
            if let Some(hooks) = options.hooks.as_mut() {
                hooks.before.notify_observers_with_mask(&mut info, mask);
            }

            if setup.auto_clear && !first_group {
                engine.clear(None, false, setup.depth, setup.stencil);
            }

            group.render(
                engine,
                ctx,
                options.custom_render.as_deref_mut(),
                options.depth_peeling.as_deref_mut(),
                options.prepass,
                options.render_particles,
                options.render_sprites,
                options.active_meshes,
            )?;

            if let Some(hooks) = options.hooks.as_mut() {
                hooks.after.notify_observers_with_mask(&mut info, mask);
            }
        }
        Ok(())
    }

    pub fn dispose(&mut self) {
        for slot in &mut self.groups {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::null::{GpuCall, NullEngine};
    use crate::material::StandardMaterial;
    use crate::scene::frame::FrameRenderContext;
    use crate::scene::mesh::SubMesh;
    use crate::stats::FrameStats;
    use glam::Vec3;

    fn test_scene(
        group_id: u32,
    ) -> (NullEngine, Pool<Mesh>, Pool<dyn Material>, MeshHandle, MaterialHandle) {
        let mut engine = NullEngine::new();
        let mut materials: Pool<dyn Material> = Pool::new();
        let material = materials.insert(Box::new(StandardMaterial::new("mat", &mut engine)));
        let mut meshes = Pool::new();
        let mut mesh = Mesh::new("mesh");
        mesh.rendering_group_id = group_id;
        mesh.sub_meshes.push(SubMesh::new(0, 36));
        let handle = meshes.add(mesh);
        (engine, meshes, materials, handle, material)
    }

    fn draw_context<'a>(
        meshes: &'a Pool<Mesh>,
        materials: &'a Pool<dyn Material>,
        frame: &'a mut FrameRenderContext,
        stats: &'a mut FrameStats,
    ) -> DrawContext<'a> {
        DrawContext {
            meshes,
            materials,
            frame,
            particles: &mut [],
            sprites: &mut [],
            camera_position: Vec3::ZERO,
            camera_layer_mask: 0x0FFF_FFFF,
            viewport: crate::engine::Viewport::FULL,
            stats,
        }
    }

    #[test]
    fn dispatch_deduplicates_sub_meshes() {
        let (mut engine, mut meshes, materials, mesh, material) = test_scene(0);
        let mut manager = RenderingManager::new(DispatchMode::PerFrameReset);
        manager.dispatch(mesh, 0, material, &mut meshes, &materials);
        manager.dispatch(mesh, 0, material, &mut meshes, &materials);

        let mut frame = FrameRenderContext::new();
        let mut stats = FrameStats::default();
        let mut ctx = draw_context(&meshes, &materials, &mut frame, &mut stats);
        manager
            .render(&mut engine, &mut ctx, PassOptions::default())
            .unwrap();
        assert_eq!(stats.draw_calls, 1);
    }

    #[test]
    fn managers_dedup_independently() {
        let (mut engine, mut meshes, materials, mesh, material) = test_scene(0);
        let mut offscreen = RenderingManager::new(DispatchMode::PerFrameReset);
        let mut main = RenderingManager::new(DispatchMode::PerFrameReset);
        offscreen.dispatch(mesh, 0, material, &mut meshes, &materials);
        main.dispatch(mesh, 0, material, &mut meshes, &materials);

        let mut frame = FrameRenderContext::new();
        let mut stats = FrameStats::default();
        let mut ctx = draw_context(&meshes, &materials, &mut frame, &mut stats);
        main.render(&mut engine, &mut ctx, PassOptions::default())
            .unwrap();
        assert_eq!(stats.draw_calls, 1);
    }

    #[test]
    fn reset_clears_buckets_per_frame_but_keeps_them_persistent() {
        for (mode, expected_draws) in [
            (DispatchMode::PerFrameReset, 0),
            (DispatchMode::Persistent, 1),
        ] {
            let (mut engine, mut meshes, materials, mesh, material) = test_scene(0);
            let mut manager = RenderingManager::new(mode);
            manager.dispatch(mesh, 0, material, &mut meshes, &materials);
            manager.reset();

            let mut frame = FrameRenderContext::new();
            let mut stats = FrameStats::default();
            let mut ctx = draw_context(&meshes, &materials, &mut frame, &mut stats);
            manager
                .render(&mut engine, &mut ctx, PassOptions::default())
                .unwrap();
            assert_eq!(stats.draw_calls, expected_draws);
        }
    }

    #[test]
    fn group_ids_clamp_into_the_supported_range() {
        let (mut engine, mut meshes, materials, mesh, material) = test_scene(99);
        let mut manager = RenderingManager::new(DispatchMode::PerFrameReset);
        manager.dispatch(mesh, 0, material, &mut meshes, &materials);
        assert!(manager.groups[RenderingManager::MAX_RENDERING_GROUPS as usize - 1].is_some());
    }

    #[test]
    fn later_groups_clear_depth_before_drawing() {
        let (mut engine, mut meshes, materials, mesh, material) = test_scene(2);
        let mut manager = RenderingManager::new(DispatchMode::PerFrameReset);
        manager.dispatch(mesh, 0, material, &mut meshes, &materials);

        let mut frame = FrameRenderContext::new();
        let mut stats = FrameStats::default();
        let mut ctx = draw_context(&meshes, &materials, &mut frame, &mut stats);
        manager
            .render(&mut engine, &mut ctx, PassOptions::default())
            .unwrap();
        assert!(engine.calls().iter().any(|call| matches!(
            call,
            GpuCall::Clear {
                color: None,
                back_buffer: false,
                depth: true,
                stencil: true,
            }
        )));
    }

    #[test]
    fn first_group_never_auto_clears() {
        let (mut engine, mut meshes, materials, mesh, material) = test_scene(0);
        let mut manager = RenderingManager::new(DispatchMode::PerFrameReset);
        manager.dispatch(mesh, 0, material, &mut meshes, &materials);

        let mut frame = FrameRenderContext::new();
        let mut stats = FrameStats::default();
        let mut ctx = draw_context(&meshes, &materials, &mut frame, &mut stats);
        manager
            .render(&mut engine, &mut ctx, PassOptions::default())
            .unwrap();
        assert!(!engine
            .calls()
            .iter()
            .any(|call| matches!(call, GpuCall::Clear { .. })));
    }

    #[test]
    fn group_hooks_fire_with_the_group_mask() {
        let (mut engine, mut meshes, materials, mesh, material) = test_scene(1);
        let mut manager = RenderingManager::new(DispatchMode::PerFrameReset);
        manager.dispatch(mesh, 0, material, &mut meshes, &materials);

        let mut before: Observable<RenderingGroupInfo> = Observable::new();
        let mut after: Observable<RenderingGroupInfo> = Observable::new();
        let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let seen_before = seen.clone();
        before.add(move |info, _| seen_before.borrow_mut().push(("before", info.group_id)));
        // Mask 1 << 3 never matches group 1, so this observer stays silent.
        let seen_masked = seen.clone();
        before.add_with_mask(
            move |info, _| seen_masked.borrow_mut().push(("masked", info.group_id)),
            1 << 3,
        );
        let seen_after = seen.clone();
        after.add(move |info, _| seen_after.borrow_mut().push(("after", info.group_id)));

        let mut frame = FrameRenderContext::new();
        let mut stats = FrameStats::default();
        let mut ctx = draw_context(&meshes, &materials, &mut frame, &mut stats);
        manager
            .render(
                &mut engine,
                &mut ctx,
                PassOptions {
                    hooks: Some(GroupHooks {
                        before: &mut before,
                        after: &mut after,
                        camera: None,
                    }),
                    ..PassOptions::default()
                },
            )
            .unwrap();
        assert_eq!(&*seen.borrow(), &[("before", 1), ("after", 1)]);
    }
}
