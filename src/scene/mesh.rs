// scene/mesh.rs

use glam::Mat4;

use crate::culling::{BoundingInfo, Plane};
use crate::material::MaterialHandle;
use crate::scene::skeleton::SkeletonHandle;
use crate::scene::transform::{billboard_world_matrix, BillboardMode, CameraVectors, Transform};
use crate::store::Handle;

pub type MeshHandle = Handle<Mesh>;

/// Contiguous index range of a mesh drawn with one material pass.
pub struct SubMesh {
    pub index_start: u32,
    pub index_count: u32,
    /// Overrides the mesh material when set.
    pub material: Option<MaterialHandle>,
    /// Own bounds; `None` falls back to the mesh bounds for frustum tests.
    pub bounds: Option<BoundingInfo>,
    /// Last dispatch mark, scoped to one manager's dispatch cycle.
    pub(crate) dispatched: Option<(u32, u64)>,
}

impl SubMesh {
    pub fn new(index_start: u32, index_count: u32) -> Self {
        Self {
            index_start,
            index_count,
            material: None,
            bounds: None,
            dispatched: None,
        }
    }

    pub fn with_material(mut self, material: MaterialHandle) -> Self {
        self.material = Some(material);
        self
    }

    pub fn with_bounds(mut self, bounds: BoundingInfo) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn is_in_frustum(&self, mesh_bounds: &BoundingInfo, planes: &[Plane; 6]) -> bool {
        self.bounds.as_ref().unwrap_or(mesh_bounds).is_in_frustum(planes)
    }
}

/// Outcome of level-of-detail selection for one mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LodSelection {
    /// Render the mesh itself.
    Source,
    /// Render a coarser stand-in.
    Substitute(MeshHandle),
    /// Nothing to render at this distance.
    Skip,
}

pub struct LodLevel {
    pub distance: f32,
    pub mesh: Option<MeshHandle>,
}

pub struct Mesh {
    pub name: String,
    pub transform: Transform,
    pub billboard_mode: BillboardMode,
    pub bounding: BoundingInfo,
    pub sub_meshes: Vec<SubMesh>,
    pub material: Option<MaterialHandle>,
    pub skeleton: Option<SkeletonHandle>,
    pub compute_bones_using_shaders: bool,
    pub vertex_count: u32,
    pub visibility: f32,
    pub visible: bool,
    pub enabled: bool,
    pub ready: bool,
    /// Blocked meshes wait on something external (e.g. a source mesh still
    /// loading) and are skipped wholesale during evaluation.
    pub blocked: bool,
    pub layer_mask: u32,
    pub rendering_group_id: u32,
    /// Manual transparent-sort key; lower values draw first.
    pub alpha_index: f32,
    pub always_select_as_active_mesh: bool,
    pub is_instance: bool,
    /// Lets an instance bypass batching and render like a plain mesh.
    pub act_as_regular_mesh: bool,
    pub instance_count: u32,
    pub lod_levels: Vec<LodLevel>,
    /// Meshes tested against this one for enter/exit intersection events.
    pub intersection_targets: Vec<MeshHandle>,
    pub(crate) active_intersections: Vec<MeshHandle>,
    pub(crate) current_lod: LodSelection,
    pub(crate) lod_up_to_date: bool,
    pub(crate) only_for_instances: bool,
    pub(crate) is_active: bool,
    world_matrix: Mat4,
    render_id: u64,
    intermediate_render_id: u64,
    pre_activate_id: Option<u64>,
    software_skinning_passes: u64,
}

impl Mesh {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: Transform::default(),
            billboard_mode: BillboardMode::NONE,
            bounding: BoundingInfo::default(),
            sub_meshes: Vec::new(),
            material: None,
            skeleton: None,
            compute_bones_using_shaders: true,
            vertex_count: 0,
            visibility: 1.0,
            visible: true,
            enabled: true,
            ready: true,
            blocked: false,
            layer_mask: 0x0FFF_FFFF,
            rendering_group_id: 0,
            alpha_index: f32::MAX,
            always_select_as_active_mesh: false,
            is_instance: false,
            act_as_regular_mesh: false,
            instance_count: 0,
            lod_levels: Vec::new(),
            intersection_targets: Vec::new(),
            active_intersections: Vec::new(),
            current_lod: LodSelection::Source,
            lod_up_to_date: false,
            only_for_instances: false,
            is_active: false,
            world_matrix: Mat4::IDENTITY,
            render_id: 0,
            intermediate_render_id: 0,
            pre_activate_id: None,
            software_skinning_passes: 0,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_sub_mesh(mut self, sub_mesh: SubMesh) -> Self {
        self.sub_meshes.push(sub_mesh);
        self
    }

    pub fn with_material(mut self, material: MaterialHandle) -> Self {
        self.material = Some(material);
        self
    }

    pub fn has_instances(&self) -> bool {
        self.instance_count > 0
    }

    pub fn world_matrix(&self) -> &Mat4 {
        &self.world_matrix
    }

    pub fn render_id(&self) -> u64 {
        self.render_id
    }

    pub fn intermediate_render_id(&self) -> u64 {
        self.intermediate_render_id
    }

    pub fn only_for_instances(&self) -> bool {
        self.only_for_instances
    }

    pub fn software_skinning_passes(&self) -> u64 {
        self.software_skinning_passes
    }

    /// Rebuilds the world matrix and the world-space bounds of the mesh and
    /// its submeshes. Billboard modes need the camera to orient toward.
    pub fn compute_world_matrix(&mut self, camera: Option<&CameraVectors>) -> &Mat4 {
        self.world_matrix = match camera {
            Some(camera) if self.billboard_mode.is_enabled() => {
                billboard_world_matrix(&self.transform, camera, self.billboard_mode)
            }
            _ => self.transform.matrix(),
        };
        self.bounding.update(&self.world_matrix);
        for sub_mesh in &mut self.sub_meshes {
            if let Some(bounds) = sub_mesh.bounds.as_mut() {
                bounds.update(&self.world_matrix);
            }
        }
        &self.world_matrix
    }

    pub fn is_in_frustum(&self, planes: &[Plane; 6]) -> bool {
        self.bounding.is_in_frustum(planes)
    }

    /// Registers a coarser stand-in used from `distance` outward; `None`
    /// culls the mesh entirely beyond that distance.
    pub fn add_lod_level(&mut self, distance: f32, mesh: Option<MeshHandle>) {
        self.lod_levels.push(LodLevel { distance, mesh });
        self.lod_levels.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    pub fn lod_for_distance(&self, distance: f32) -> LodSelection {
        let mut selected = LodSelection::Source;
        for level in &self.lod_levels {
            if distance < level.distance {
                break;
            }
            selected = match level.mesh {
                Some(handle) => LodSelection::Substitute(handle),
                None => LodSelection::Skip,
            };
        }
        selected
    }

    /// Once-per-render-pass reset that runs before the visibility test.
    pub(crate) fn pre_activate(&mut self, render_id: u64) {
        if self.pre_activate_id == Some(render_id) {
            return;
        }
        self.pre_activate_id = Some(render_id);
        self.only_for_instances = false;
    }

    /// Render-id bookkeeping. Returns whether the mesh renders its own
    /// submeshes; plain instances are handled through their source batch.
    pub(crate) fn activate(&mut self, render_id: u64, intermediate: bool) -> bool {
        self.render_id = render_id;
        if intermediate {
            self.intermediate_render_id = render_id;
        }
        !self.is_instance || self.act_as_regular_mesh
    }

    pub(crate) fn apply_software_skinning(&mut self) {
        self.software_skinning_passes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn lod_chain_picks_level_by_distance() {
        let coarse = Handle::new(9);
        let mut mesh = Mesh::new("tree");
        mesh.add_lod_level(50.0, None);
        mesh.add_lod_level(10.0, Some(coarse));

        assert_eq!(mesh.lod_for_distance(5.0), LodSelection::Source);
        assert_eq!(mesh.lod_for_distance(20.0), LodSelection::Substitute(coarse));
        assert_eq!(mesh.lod_for_distance(80.0), LodSelection::Skip);
    }

    #[test]
    fn world_matrix_moves_bounds() {
        let mut mesh = Mesh::new("box");
        mesh.transform = Transform::from_translation(Vec3::new(10.0, 0.0, 0.0));
        mesh.compute_world_matrix(None);
        assert!((mesh.bounding.sphere.center_world.x - 10.0).abs() < 1e-6);
    }

    #[test]
    fn sub_mesh_frustum_test_falls_back_to_mesh_bounds() {
        let mut mesh = Mesh::new("two-parts");
        mesh.sub_meshes.push(SubMesh::new(0, 36));
        mesh.sub_meshes.push(
            SubMesh::new(36, 36)
                .with_bounds(BoundingInfo::new(Vec3::splat(99.0), Vec3::splat(100.0))),
        );
        mesh.compute_world_matrix(None);

        let camera = crate::scene::camera::Camera::new("main");
        let planes = crate::culling::frustum_planes(
            &(*camera.projection_matrix() * *camera.view_matrix()),
        );
        assert!(mesh.sub_meshes[0].is_in_frustum(&mesh.bounding, &planes));
        assert!(!mesh.sub_meshes[1].is_in_frustum(&mesh.bounding, &planes));
    }

    #[test]
    fn pre_activate_resets_once_per_pass() {
        let mut mesh = Mesh::new("m");
        mesh.only_for_instances = true;
        mesh.pre_activate(3);
        assert!(!mesh.only_for_instances);

        mesh.only_for_instances = true;
        mesh.pre_activate(3);
        assert!(mesh.only_for_instances);
    }

    #[test]
    fn plain_instances_do_not_self_render() {
        let mut instance = Mesh::new("leaf-instance");
        instance.is_instance = true;
        assert!(!instance.activate(1, false));

        instance.act_as_regular_mesh = true;
        assert!(instance.activate(2, false));
        assert_eq!(instance.render_id(), 2);
    }
}
