use glam::{Mat4, Vec3};

use crate::engine::Viewport;
use crate::rendering::render_target::RenderTargetHandle;
use crate::scene::mesh::MeshHandle;
use crate::scene::transform::CameraVectors;
use crate::store::Handle;

pub type CameraHandle = Handle<Camera>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraMode {
    Perspective,
    Orthographic,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrthoBounds {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
}

impl Default for OrthoBounds {
    fn default() -> Self {
        Self {
            left: -1.0,
            right: 1.0,
            bottom: -1.0,
            top: 1.0,
        }
    }
}

/// Look-at camera with lazily recomputed matrices.
///
/// `view_flag`/`projection_flag` bump whenever the respective matrix
/// actually changes, letting the frame context skip frustum rebuilds.
pub struct Camera {
    pub name: String,
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_radians: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub mode: CameraMode,
    pub ortho: OrthoBounds,
    pub viewport: Viewport,
    pub layer_mask: u32,
    pub skip_rendering: bool,
    /// When set, camera output goes to this texture instead of the default
    /// framebuffer.
    pub output_render_target: Option<RenderTargetHandle>,
    /// Non-empty for rig setups (e.g. stereo); the scene then renders the
    /// sub cameras instead of this one.
    pub rig_cameras: Vec<CameraHandle>,
    pub custom_render_targets: Vec<RenderTargetHandle>,
    /// Meshes this camera selected during the last evaluation.
    pub(crate) active_meshes: Vec<MeshHandle>,
    /// Per-frame guard so the camera's output target gets one color clear.
    pub(crate) framebuffer_cleared: bool,
    view: Mat4,
    projection: Mat4,
    view_flag: u64,
    projection_flag: u64,
    view_inputs: (Vec3, Vec3, Vec3),
    projection_inputs: (CameraMode, f32, f32, f32, f32, OrthoBounds),
}

impl Camera {
    pub fn new(name: impl Into<String>) -> Self {
        let mut camera = Self {
            name: name.into(),
            position: Vec3::new(0.0, 0.0, 3.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y_radians: 60f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 100.0,
            mode: CameraMode::Perspective,
            ortho: OrthoBounds::default(),
            viewport: Viewport::FULL,
            layer_mask: 0x0FFFFFFF,
            skip_rendering: false,
            output_render_target: None,
            rig_cameras: Vec::new(),
            custom_render_targets: Vec::new(),
            active_meshes: Vec::new(),
            framebuffer_cleared: false,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            view_flag: 0,
            projection_flag: 0,
            view_inputs: (Vec3::NAN, Vec3::NAN, Vec3::NAN),
            projection_inputs: (
                CameraMode::Perspective,
                f32::NAN,
                f32::NAN,
                f32::NAN,
                f32::NAN,
                OrthoBounds::default(),
            ),
        };
        camera.update();
        camera
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self.update();
        self
    }

    /// Recomputes view and projection if their inputs changed since the last
    /// call, bumping the matching update flag.
    pub fn update(&mut self) {
        let view_inputs = (self.position, self.target, self.up);
        if view_inputs != self.view_inputs {
            self.view = Mat4::look_at_rh(self.position, self.target, self.up);
            self.view_inputs = view_inputs;
            self.view_flag += 1;
        }
        let projection_inputs = (
            self.mode,
            self.fov_y_radians,
            self.aspect,
            self.near,
            self.far,
            self.ortho,
        );
        if projection_inputs != self.projection_inputs {
            self.projection = match self.mode {
                CameraMode::Perspective => {
                    Mat4::perspective_rh(self.fov_y_radians, self.aspect, self.near, self.far)
                }
                CameraMode::Orthographic => Mat4::orthographic_rh(
                    self.ortho.left,
                    self.ortho.right,
                    self.ortho.bottom,
                    self.ortho.top,
                    self.near,
                    self.far,
                ),
            };
            self.projection_inputs = projection_inputs;
            self.projection_flag += 1;
        }
    }

    pub fn view_matrix(&self) -> &Mat4 {
        &self.view
    }

    pub fn projection_matrix(&self) -> &Mat4 {
        &self.projection
    }

    pub fn view_flag(&self) -> u64 {
        self.view_flag
    }

    pub fn projection_flag(&self) -> u64 {
        self.projection_flag
    }

    pub fn vectors(&self) -> CameraVectors {
        CameraVectors {
            position: self.position,
            up: self.up,
        }
    }

    pub fn has_rig(&self) -> bool {
        !self.rig_cameras.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_proj_is_reasonable() {
        let camera = Camera::new("main");
        let vp = *camera.projection_matrix() * *camera.view_matrix();
        // Just ensure it's invertible and finite
        let roundtrip = vp * vp.inverse();
        assert!(roundtrip.abs_diff_eq(Mat4::IDENTITY, 1e-4));
    }

    #[test]
    fn update_flags_bump_only_on_change() {
        let mut camera = Camera::new("main");
        let view_flag = camera.view_flag();
        let projection_flag = camera.projection_flag();
        camera.update();
        assert_eq!(camera.view_flag(), view_flag);
        assert_eq!(camera.projection_flag(), projection_flag);

        camera.position = Vec3::new(1.0, 2.0, 3.0);
        camera.update();
        assert_eq!(camera.view_flag(), view_flag + 1);
        assert_eq!(camera.projection_flag(), projection_flag);

        camera.fov_y_radians = 45f32.to_radians();
        camera.update();
        assert_eq!(camera.projection_flag(), projection_flag + 1);
    }

    #[test]
    fn orthographic_mode_switches_projection() {
        let mut camera = Camera::new("ortho");
        camera.mode = CameraMode::Orthographic;
        camera.update();
        let projected = camera.projection_matrix().transform_point3(Vec3::ZERO);
        assert!(projected.is_finite());
    }
}
