use glam::{Mat4, Vec3, Vec4, Vec4Swizzles};

/// A plane in the form `normal . p + d = 0`, normal pointing inside the
/// accepted half-space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    pub fn from_vec4(coefficients: Vec4) -> Self {
        let normal = coefficients.xyz();
        let length = normal.length();
        if length <= f32::EPSILON {
            return Self {
                normal: Vec3::Z,
                d: coefficients.w,
            };
        }
        Self {
            normal: normal / length,
            d: coefficients.w / length,
        }
    }

    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.d
    }
}

/// Extracts the six frustum planes from a combined view-projection matrix
/// (Gribb/Hartmann, adjusted for the 0..1 clip depth used by glam's
/// `perspective_rh`). Order: left, right, bottom, top, near, far.
pub fn frustum_planes(view_projection: &Mat4) -> [Plane; 6] {
    let r0 = view_projection.row(0);
    let r1 = view_projection.row(1);
    let r2 = view_projection.row(2);
    let r3 = view_projection.row(3);
    [
        Plane::from_vec4(r3 + r0),
        Plane::from_vec4(r3 - r0),
        Plane::from_vec4(r3 + r1),
        Plane::from_vec4(r3 - r1),
        Plane::from_vec4(r2),
        Plane::from_vec4(r3 - r2),
    ]
}

/// Bounding sphere holding both the local shape and its world-space image,
/// refreshed by [`BoundingSphere::update`].
#[derive(Debug, Clone, Copy)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
    pub center_world: Vec3,
    pub radius_world: f32,
}

impl BoundingSphere {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self {
            center,
            radius,
            center_world: center,
            radius_world: radius,
        }
    }

    pub fn update(&mut self, world: &Mat4) {
        self.center_world = world.transform_point3(self.center);
        let scale = world
            .x_axis
            .xyz()
            .length()
            .max(world.y_axis.xyz().length())
            .max(world.z_axis.xyz().length());
        self.radius_world = self.radius * scale;
    }

    pub fn is_in_frustum(&self, planes: &[Plane; 6]) -> bool {
        for plane in planes {
            if plane.signed_distance(self.center_world) <= -self.radius_world {
                return false;
            }
        }
        true
    }

    pub fn intersects(&self, other: &BoundingSphere) -> bool {
        let distance = self.center_world.distance(other.center_world);
        distance <= self.radius_world + other.radius_world
    }
}

/// Axis-aligned extents plus the derived bounding sphere.
#[derive(Debug, Clone, Copy)]
pub struct BoundingInfo {
    pub min: Vec3,
    pub max: Vec3,
    pub sphere: BoundingSphere,
}

impl BoundingInfo {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        let center = (min + max) * 0.5;
        let radius = (max - center).length();
        Self {
            min,
            max,
            sphere: BoundingSphere::new(center, radius),
        }
    }

    pub fn from_center_radius(center: Vec3, radius: f32) -> Self {
        Self {
            min: center - Vec3::splat(radius),
            max: center + Vec3::splat(radius),
            sphere: BoundingSphere::new(center, radius),
        }
    }

    pub fn update(&mut self, world: &Mat4) {
        self.sphere.update(world);
    }

    pub fn is_in_frustum(&self, planes: &[Plane; 6]) -> bool {
        self.sphere.is_in_frustum(planes)
    }
}

impl Default for BoundingInfo {
    fn default() -> Self {
        Self::new(Vec3::splat(-0.5), Vec3::splat(0.5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn look_down_z_frustum() -> [Plane; 6] {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(60f32.to_radians(), 16.0 / 9.0, 0.1, 100.0);
        frustum_planes(&(proj * view))
    }

    #[test]
    fn sphere_at_focus_is_inside() {
        let planes = look_down_z_frustum();
        let sphere = BoundingSphere::new(Vec3::ZERO, 0.5);
        assert!(sphere.is_in_frustum(&planes));
    }

    #[test]
    fn sphere_far_to_the_side_is_outside() {
        let planes = look_down_z_frustum();
        let sphere = BoundingSphere::new(Vec3::new(1000.0, 0.0, 0.0), 0.5);
        assert!(!sphere.is_in_frustum(&planes));
    }

    #[test]
    fn sphere_behind_camera_is_outside() {
        let planes = look_down_z_frustum();
        let sphere = BoundingSphere::new(Vec3::new(0.0, 0.0, 50.0), 0.5);
        assert!(!sphere.is_in_frustum(&planes));
    }

    #[test]
    fn world_update_scales_radius() {
        let mut sphere = BoundingSphere::new(Vec3::ZERO, 1.0);
        let world = Mat4::from_scale(Vec3::new(3.0, 1.0, 1.0)) * Mat4::from_translation(Vec3::X);
        sphere.update(&world);
        assert!((sphere.radius_world - 3.0).abs() < 1e-5);
        assert!((sphere.center_world.x - 3.0).abs() < 1e-5);
    }

    #[test]
    fn spheres_overlap_by_world_distance() {
        let mut a = BoundingSphere::new(Vec3::ZERO, 1.0);
        let mut b = BoundingSphere::new(Vec3::new(1.5, 0.0, 0.0), 1.0);
        a.update(&Mat4::IDENTITY);
        b.update(&Mat4::IDENTITY);
        assert!(a.intersects(&b));
        let mut c = BoundingSphere::new(Vec3::new(10.0, 0.0, 0.0), 1.0);
        c.update(&Mat4::IDENTITY);
        assert!(!a.intersects(&c));
    }

    #[test]
    fn bounding_info_derives_sphere_from_extents() {
        let info = BoundingInfo::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        assert_eq!(info.sphere.center, Vec3::ZERO);
        assert!((info.sphere.radius - 3f32.sqrt()).abs() < 1e-5);
    }
}
