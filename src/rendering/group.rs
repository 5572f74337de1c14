// rendering/group.rs

use std::cmp::Ordering;

use glam::Vec3;

use crate::engine::{AlphaMode, Engine, EngineResult, Viewport};
use crate::material::{Material, MaterialHandle};
use crate::particles::{ParticleEmitter, ParticleSystem};
use crate::scene::frame::FrameRenderContext;
use crate::scene::mesh::{Mesh, MeshHandle};
use crate::sprites::SpriteManager;
use crate::stats::FrameStats;
use crate::store::Pool;

use super::depth_peeling::DepthPeelingRenderer;
use super::prepass::PrePassRenderer;

/// One dispatched sub-mesh, queued into a bucket until the draw phase.
#[derive(Debug, Clone, Copy)]
pub struct DrawItem {
    pub mesh: MeshHandle,
    pub sub_mesh_index: usize,
    pub material: MaterialHandle,
    /// Manual ordering key for transparent sorting.
    pub alpha_index: f32,
    /// Squared-free distance from the camera, filled in before transparent sorting.
    pub distance_to_camera: f32,
}

pub type SortCompare = fn(&DrawItem, &DrawItem) -> Ordering;

/// Replaces the built-in bucket rendering of a whole group when set.
/// Receives the opaque, alpha-tested and transparent buckets in that order.
pub type CustomRenderFn = Box<dyn FnMut(&[DrawItem], &[DrawItem], &[DrawItem], &mut dyn Engine)>;

/// Everything the draw phase reads from the scene, split out so the
/// rendering manager can run while the scene is otherwise borrowed.
pub struct DrawContext<'a> {
    pub meshes: &'a Pool<Mesh>,
    pub materials: &'a Pool<dyn Material>,
    pub frame: &'a mut FrameRenderContext,
    pub particles: &'a mut [ParticleSystem],
    pub sprites: &'a mut [SpriteManager],
    pub camera_position: Vec3,
    pub camera_layer_mask: u32,
    pub viewport: Viewport,
    pub stats: &'a mut FrameStats,
}

/// Sorts by alpha index first, then far-to-near camera distance.
pub fn default_transparent_sort_compare(a: &DrawItem, b: &DrawItem) -> Ordering {
    match a.alpha_index.partial_cmp(&b.alpha_index) {
        Some(Ordering::Equal) | None => back_to_front_sort_compare(a, b),
        Some(ordering) => ordering,
    }
}

pub fn back_to_front_sort_compare(a: &DrawItem, b: &DrawItem) -> Ordering {
    b.distance_to_camera
        .partial_cmp(&a.distance_to_camera)
        .unwrap_or(Ordering::Equal)
}

pub fn front_to_back_sort_compare(a: &DrawItem, b: &DrawItem) -> Ordering {
    a.distance_to_camera
        .partial_cmp(&b.distance_to_camera)
        .unwrap_or(Ordering::Equal)
}

/// Groups items sharing a material so state changes are minimized.
pub fn painter_sort_compare(a: &DrawItem, b: &DrawItem) -> Ordering {
    a.material.index().cmp(&b.material.index())
}

/// One rendering layer: buckets of dispatched sub-meshes plus the particle
/// systems and sprite batches assigned to it, drawn opaque first, then
/// alpha-tested, sprites, particles and finally sorted transparents.
pub struct RenderingGroup {
    opaque: Vec<DrawItem>,
    alpha_test: Vec<DrawItem>,
    transparent: Vec<DrawItem>,
    particle_systems: Vec<usize>,
    sprite_managers: Vec<usize>,
    opaque_sort: Option<SortCompare>,
    alpha_test_sort: Option<SortCompare>,
    transparent_sort: SortCompare,
}

impl RenderingGroup {
    pub(crate) fn new(
        opaque_sort: Option<SortCompare>,
        alpha_test_sort: Option<SortCompare>,
        transparent_sort: Option<SortCompare>,
    ) -> Self {
        Self {
            opaque: Vec::new(),
            alpha_test: Vec::new(),
            transparent: Vec::new(),
            particle_systems: Vec::new(),
            sprite_managers: Vec::new(),
            opaque_sort,
            alpha_test_sort,
            transparent_sort: transparent_sort.unwrap_or(default_transparent_sort_compare),
        }
    }

    pub(crate) fn set_opaque_sort(&mut self, compare: Option<SortCompare>) {
        self.opaque_sort = compare;
    }

    pub(crate) fn set_alpha_test_sort(&mut self, compare: Option<SortCompare>) {
        self.alpha_test_sort = compare;
    }

    pub(crate) fn set_transparent_sort(&mut self, compare: Option<SortCompare>) {
        self.transparent_sort = compare.unwrap_or(default_transparent_sort_compare);
    }

    pub(crate) fn dispatch_item(&mut self, item: DrawItem, transparent: bool, alpha_test: bool) {
        if transparent {
            self.transparent.push(item);
        } else if alpha_test {
            self.alpha_test.push(item);
        } else {
            self.opaque.push(item);
        }
    }

    // Cube targets draw the same prepared buckets once per face, so the
    // transient pushes dedup instead of accumulating.
    pub(crate) fn dispatch_particles(&mut self, index: usize) {
        if !self.particle_systems.contains(&index) {
            self.particle_systems.push(index);
        }
    }

    pub(crate) fn dispatch_sprites(&mut self, index: usize) {
        if !self.sprite_managers.contains(&index) {
            self.sprite_managers.push(index);
        }
    }

    /// Clears every bucket for a fresh dispatch cycle.
    pub(crate) fn prepare(&mut self) {
        self.opaque.clear();
        self.alpha_test.clear();
        self.transparent.clear();
        self.prepare_transients();
    }

    /// Clears only the per-frame particle and sprite lists. Used when mesh
    /// buckets persist across frames.
    pub(crate) fn prepare_transients(&mut self) {
        self.particle_systems.clear();
        self.sprite_managers.clear();
    }

    pub(crate) fn prepare_sprites(&mut self) {
        self.sprite_managers.clear();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.opaque.is_empty()
            && self.alpha_test.is_empty()
            && self.transparent.is_empty()
            && self.particle_systems.is_empty()
            && self.sprite_managers.is_empty()
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn render(
        &mut self,
        engine: &mut dyn Engine,
        ctx: &mut DrawContext<'_>,
        custom_render: Option<&mut CustomRenderFn>,
        depth_peeling: Option<&mut DepthPeelingRenderer>,
        prepass: Option<&PrePassRenderer>,
        render_particles: bool,
        render_sprites: bool,
        active_meshes: Option<&[MeshHandle]>,
    ) -> EngineResult<()> {
        if let Some(custom) = custom_render {
            custom(&self.opaque, &self.alpha_test, &self.transparent, engine);
            return Ok(());
        }

        Self::render_bucket(&mut self.opaque, self.opaque_sort, false, engine, ctx)?;
        Self::render_bucket(&mut self.alpha_test, self.alpha_test_sort, false, engine, ctx)?;

        if render_sprites {
            self.render_sprites(engine, ctx);
        }
        if render_particles {
            self.render_particles(engine, ctx, active_meshes);
        }

        let mut alpha_section_ran = false;
        match depth_peeling {
            Some(peeling) if peeling.enabled() => {
                let mut excluded = peeling.render(engine, ctx, &self.transparent, prepass)?;
                if !excluded.is_empty() {
                    Self::render_bucket(
                        &mut excluded,
                        Some(self.transparent_sort),
                        true,
                        engine,
                        ctx,
                    )?;
                }
                alpha_section_ran = true;
            }
            _ => {
                if !self.transparent.is_empty() {
                    Self::render_bucket(
                        &mut self.transparent,
                        Some(self.transparent_sort),
                        true,
                        engine,
                        ctx,
                    )?;
                    alpha_section_ran = true;
                }
            }
        }
        if alpha_section_ran {
            engine.set_alpha_mode(AlphaMode::Disable);
        }
        Ok(())
    }

    fn render_sprites(&self, engine: &mut dyn Engine, ctx: &mut DrawContext<'_>) {
        for &index in &self.sprite_managers {
            let Some(manager) = ctx.sprites.get_mut(index) else {
                continue;
            };
            if manager.layer_mask & ctx.camera_layer_mask == 0 {
                continue;
            }
            manager.render(engine);
        }
    }

    /// When `active_meshes` is provided, mesh-attached emitters only render
    /// if their mesh is part of that list.
    fn render_particles(
        &self,
        engine: &mut dyn Engine,
        ctx: &mut DrawContext<'_>,
        active_meshes: Option<&[MeshHandle]>,
    ) {
        for &index in &self.particle_systems {
            let Some(system) = ctx.particles.get_mut(index) else {
                continue;
            };
            if let (Some(list), Some(ParticleEmitter::Mesh(handle))) =
                (active_meshes, system.emitter)
            {
                if !list.contains(&handle) {
                    continue;
                }
            }
            ctx.stats.active_particles += system.render(engine);
        }
    }

    fn render_bucket(
        items: &mut Vec<DrawItem>,
        compare: Option<SortCompare>,
        transparent: bool,
        engine: &mut dyn Engine,
        ctx: &mut DrawContext<'_>,
    ) -> EngineResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        if transparent {
            for item in items.iter_mut() {
                let Some(mesh) = ctx.meshes.get(item.mesh) else {
                    continue;
                };
                item.alpha_index = mesh.alpha_index;
                let bounds = mesh
                    .sub_meshes
                    .get(item.sub_mesh_index)
                    .and_then(|sub| sub.bounds.as_ref())
                    .unwrap_or(&mesh.bounding);
                item.distance_to_camera =
                    bounds.sphere.center_world.distance(ctx.camera_position);
            }
        }
        if let Some(compare) = compare {
            items.sort_by(compare);
        }

        if transparent {
            engine.set_depth_write(false);
        }
        for item in items.iter() {
            Self::draw_item(engine, ctx, item, transparent)?;
        }
        if transparent {
            engine.set_depth_write(true);
        }
        Ok(())
    }

    /// Binds the item's material (full bind only when the cached material
    /// state is stale) and issues the indexed draw.
    pub(crate) fn draw_item(
        engine: &mut dyn Engine,
        ctx: &mut DrawContext<'_>,
        item: &DrawItem,
        enable_alpha_mode: bool,
    ) -> EngineResult<()> {
        let Some(mesh) = ctx.meshes.get(item.mesh) else {
            return Ok(());
        };
        let Some(sub) = mesh.sub_meshes.get(item.sub_mesh_index) else {
            return Ok(());
        };
        let Some(material) = ctx.materials.get(item.material) else {
            return Ok(());
        };
        if mesh.visibility <= 0.0 {
            return Ok(());
        }
        let Some(effect) = material.effect() else {
            return Ok(());
        };
        if !engine.is_effect_ready(effect) {
            return Ok(());
        }

        let world = *mesh.world_matrix();
        if ctx
            .frame
            .is_cached_material_invalid(item.material, effect, mesh.visibility)
        {
            engine.enable_effect(effect);
            material.bind(&world, mesh, engine);
            ctx.frame
                .note_bound_material(item.material, effect, mesh.visibility);
        } else {
            material.bind_world(&world, engine);
        }
        if enable_alpha_mode {
            engine.set_alpha_mode(material.alpha_mode());
        }
        engine.draw_indexed(
            sub.index_start,
            sub.index_count,
            mesh.instance_count.max(1),
        );
        ctx.stats.draw_calls += 1;
        Ok(())
    }
}
