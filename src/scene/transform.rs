use glam::{Mat3, Mat4, Quat, Vec3};

/// Local translation / rotation / scale of a mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Transform {
    pub fn from_trs(translation: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            translation,
            rotation,
            scale,
        }
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Default::default()
        }
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    /// A zero scale component collapses the mesh; such meshes are skipped
    /// during active-mesh evaluation.
    pub fn has_zero_scale(&self) -> bool {
        self.scale.x == 0.0 || self.scale.y == 0.0 || self.scale.z == 0.0
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

bitflags::bitflags! {
    /// Billboard axis mask. `ALL` faces the camera fully, `Y` keeps the mesh
    /// upright and only yaws it toward the camera.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BillboardMode: u32 {
        const X = 1;
        const Y = 2;
        const Z = 4;
        const ALL = Self::X.bits() | Self::Y.bits() | Self::Z.bits();
    }
}

impl BillboardMode {
    pub const NONE: BillboardMode = BillboardMode::empty();

    pub fn is_enabled(&self) -> bool {
        !self.is_empty()
    }
}

/// The camera vectors a billboard orients against.
#[derive(Debug, Clone, Copy)]
pub struct CameraVectors {
    pub position: Vec3,
    pub up: Vec3,
}

pub(crate) fn safe_normalize(v: Vec3, fallback: Vec3) -> Vec3 {
    if v.length_squared() < 1e-6 {
        fallback
    } else {
        v.normalize()
    }
}

fn basis_from_forward_up(forward: Vec3, up: Vec3) -> Mat3 {
    let z = safe_normalize(forward, Vec3::Z);
    let mut x = up.cross(z);
    if x.length_squared() < 1e-6 {
        x = Vec3::Y.cross(z);
    }
    let x = safe_normalize(x, Vec3::X);
    let y = z.cross(x);
    Mat3::from_cols(x, y, z)
}

fn basis_from_up_forward(up: Vec3, forward: Vec3) -> Mat3 {
    let y = safe_normalize(up, Vec3::Y);
    let mut z = forward - y * forward.dot(y);
    if z.length_squared() < 1e-6 {
        z = Vec3::Z - y * Vec3::Z.dot(y);
    }
    let z = safe_normalize(z, Vec3::Z);
    let x = y.cross(z);
    Mat3::from_cols(x, y, z)
}

/// World matrix of a billboarded mesh: translation and scale are kept, the
/// rotation is replaced by a camera-facing basis.
pub(crate) fn billboard_world_matrix(
    transform: &Transform,
    camera: &CameraVectors,
    mode: BillboardMode,
) -> Mat4 {
    if !mode.is_enabled() {
        return transform.matrix();
    }
    let to_camera = camera.position - transform.translation;
    let y_only = mode.contains(BillboardMode::Y)
        && !mode.contains(BillboardMode::X)
        && !mode.contains(BillboardMode::Z);
    let basis = if y_only {
        basis_from_up_forward(Vec3::Y, to_camera)
    } else {
        basis_from_forward_up(to_camera, camera.up)
    };
    Mat4::from_translation(transform.translation)
        * Mat4::from_mat3(basis)
        * Mat4::from_scale(transform.scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_vec3_close(a: Vec3, b: Vec3) {
        assert!((a - b).length() < 1e-5, "{a:?} != {b:?}");
    }

    #[test]
    fn default_transform_is_identity() {
        let transform = Transform::default();
        assert_eq!(transform.matrix(), Mat4::IDENTITY);
        assert!(!transform.has_zero_scale());
    }

    #[test]
    fn trs_matrix_matches_components() {
        let transform = Transform::from_trs(
            Vec3::new(1.0, 2.0, 3.0),
            Quat::from_rotation_y(std::f32::consts::FRAC_PI_2),
            Vec3::splat(2.0),
        );
        let m = transform.matrix();
        let moved = m.transform_point3(Vec3::ZERO);
        assert_vec3_close(moved, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn zero_scale_is_detected() {
        let mut transform = Transform::default();
        transform.scale = Vec3::new(1.0, 0.0, 1.0);
        assert!(transform.has_zero_scale());
    }

    #[test]
    fn full_billboard_faces_the_camera() {
        let transform = Transform::default();
        let camera = CameraVectors {
            position: Vec3::new(0.0, 0.0, 5.0),
            up: Vec3::Y,
        };
        let world = billboard_world_matrix(&transform, &camera, BillboardMode::ALL);
        let facing = world.transform_vector3(Vec3::Z);
        assert_vec3_close(facing, Vec3::Z);
    }

    #[test]
    fn y_billboard_keeps_the_mesh_upright() {
        let transform = Transform::default();
        let camera = CameraVectors {
            position: Vec3::new(3.0, 10.0, 3.0),
            up: Vec3::Y,
        };
        let world = billboard_world_matrix(&transform, &camera, BillboardMode::Y);
        let up = world.transform_vector3(Vec3::Y);
        assert_vec3_close(up, Vec3::Y);
        let forward = world.transform_vector3(Vec3::Z);
        assert!(forward.y.abs() < 1e-5);
    }

    #[test]
    fn disabled_billboard_returns_transform_matrix() {
        let transform = Transform::from_translation(Vec3::X);
        let camera = CameraVectors {
            position: Vec3::new(0.0, 0.0, 5.0),
            up: Vec3::Y,
        };
        let world = billboard_world_matrix(&transform, &camera, BillboardMode::NONE);
        assert_eq!(world, transform.matrix());
    }
}
