use glam::Mat4;

use crate::culling::{frustum_planes, Plane};
use crate::engine::EffectId;
use crate::material::MaterialHandle;
use crate::scene::camera::{Camera, CameraHandle};

/// Per-frame render state threaded through the draw call chain.
///
/// The cached material/effect/visibility triple exists to skip redundant GPU
/// binds. It is reset at documented points (start of every camera render,
/// after render-target passes); nothing may assume it survives across them.
pub struct FrameRenderContext {
    /// Incremented once per top-level `Scene::render` call.
    pub frame_id: u64,
    /// Incremented once per distinct render pass, never reset.
    pub render_id: u64,
    pub view_matrix: Mat4,
    pub projection_matrix: Mat4,
    /// view × projection of the camera currently rendered.
    pub transform_matrix: Mat4,
    pub frustum: [Plane; 6],
    transform_source: Option<(CameraHandle, u64, u64)>,
    cached_material: Option<MaterialHandle>,
    cached_effect: Option<EffectId>,
    cached_visibility: Option<f32>,
    cache_resets: u64,
}

impl FrameRenderContext {
    pub fn new() -> Self {
        let transform = Mat4::IDENTITY;
        Self {
            frame_id: 0,
            render_id: 0,
            view_matrix: Mat4::IDENTITY,
            projection_matrix: Mat4::IDENTITY,
            transform_matrix: transform,
            frustum: frustum_planes(&transform),
            transform_source: None,
            cached_material: None,
            cached_effect: None,
            cached_visibility: None,
            cache_resets: 0,
        }
    }

    /// Adopts `camera`'s matrices, rebuilding the frustum planes only when
    /// the camera or one of its update flags actually changed.
    pub fn update_transform_matrix(&mut self, handle: CameraHandle, camera: &Camera) {
        let source = (handle, camera.view_flag(), camera.projection_flag());
        if self.transform_source == Some(source) {
            return;
        }
        self.transform_source = Some(source);
        self.view_matrix = *camera.view_matrix();
        self.projection_matrix = *camera.projection_matrix();
        self.transform_matrix = self.projection_matrix * self.view_matrix;
        self.frustum = frustum_planes(&self.transform_matrix);
    }

    pub fn is_cached_material_invalid(
        &self,
        material: MaterialHandle,
        effect: EffectId,
        visibility: f32,
    ) -> bool {
        self.cached_effect != Some(effect)
            || self.cached_material != Some(material)
            || self.cached_visibility != Some(visibility)
    }

    pub(crate) fn note_bound_material(
        &mut self,
        material: MaterialHandle,
        effect: EffectId,
        visibility: f32,
    ) {
        self.cached_material = Some(material);
        self.cached_effect = Some(effect);
        self.cached_visibility = Some(visibility);
    }

    /// Forces the next material bind to re-apply full GPU state.
    pub fn reset_cached_material(&mut self) {
        self.cached_material = None;
        self.cached_effect = None;
        self.cached_visibility = None;
        self.cache_resets += 1;
    }

    pub fn cached_material(&self) -> Option<MaterialHandle> {
        self.cached_material
    }

    pub fn cached_effect(&self) -> Option<EffectId> {
        self.cached_effect
    }

    pub fn cache_resets(&self) -> u64 {
        self.cache_resets
    }
}

impl Default for FrameRenderContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Handle;
    use glam::Vec3;

    #[test]
    fn transform_updates_gate_on_camera_flags() {
        let mut frame = FrameRenderContext::new();
        let handle = Handle::new(0);
        let mut camera = Camera::new("main");

        frame.update_transform_matrix(handle, &camera);
        let first = frame.transform_matrix;

        // Same camera, same flags: the gate holds even if we poke the field.
        frame.transform_matrix = Mat4::ZERO;
        frame.update_transform_matrix(handle, &camera);
        assert_eq!(frame.transform_matrix, Mat4::ZERO);

        camera.position = Vec3::new(5.0, 1.0, 8.0);
        camera.update();
        frame.update_transform_matrix(handle, &camera);
        assert_ne!(frame.transform_matrix, Mat4::ZERO);
        assert_ne!(frame.transform_matrix, first);
    }

    #[test]
    fn cached_material_triple_round_trip() {
        let mut frame = FrameRenderContext::new();
        let material = Handle::new(2);
        let effect = EffectId(7);

        assert!(frame.is_cached_material_invalid(material, effect, 1.0));
        frame.note_bound_material(material, effect, 1.0);
        assert!(!frame.is_cached_material_invalid(material, effect, 1.0));
        assert!(frame.is_cached_material_invalid(material, effect, 0.5));

        let resets = frame.cache_resets();
        frame.reset_cached_material();
        assert!(frame.is_cached_material_invalid(material, effect, 1.0));
        assert_eq!(frame.cache_resets(), resets + 1);
    }
}
