use glam::Mat4;

use crate::engine::{AlphaMode, EffectId, Engine};
use crate::rendering::render_target::RenderTargetHandle;
use crate::scene::mesh::{Mesh, SubMesh};
use crate::store::Handle;

pub type MaterialHandle = Handle<dyn Material>;

bitflags::bitflags! {
    /// Aspects of a material that were invalidated and need rebinding or a
    /// shader rebuild.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MaterialDirtyFlags: u32 {
        const TEXTURE = 1 << 0;
        const LIGHT = 1 << 1;
        const FRESNEL = 1 << 2;
        const ATTRIBUTE = 1 << 3;
        const MISC = 1 << 4;
        const PREPASS = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    Triangle,
    TriangleStrip,
    TriangleFan,
    Wireframe,
    Point,
}

impl FillMode {
    /// Depth peeling only handles triangle topologies.
    pub fn is_triangle_fill(&self) -> bool {
        matches!(
            self,
            FillMode::Triangle | FillMode::TriangleStrip | FillMode::TriangleFan
        )
    }
}

/// Surface description consulted while dispatching and drawing submeshes.
pub trait Material {
    fn name(&self) -> &str;

    fn effect(&self) -> Option<EffectId>;

    /// Effects compile asynchronously; readiness may depend on the submesh
    /// geometry and on whether instancing is in play.
    fn is_ready_for_submesh(
        &self,
        _mesh: &Mesh,
        _sub_mesh: &SubMesh,
        _use_instances: bool,
        engine: &dyn Engine,
    ) -> bool {
        self.effect().is_some_and(|effect| engine.is_effect_ready(effect))
    }

    fn needs_alpha_blending(&self) -> bool {
        false
    }

    fn needs_alpha_testing(&self) -> bool {
        false
    }

    fn alpha_mode(&self) -> AlphaMode {
        AlphaMode::Combine
    }

    fn fill_mode(&self) -> FillMode {
        FillMode::Triangle
    }

    /// Render targets this material samples from; they are rendered before
    /// the camera draw phase.
    fn render_target_textures(&self) -> &[RenderTargetHandle] {
        &[]
    }

    fn has_render_target_textures(&self) -> bool {
        !self.render_target_textures().is_empty()
    }

    fn mark_dirty(&mut self, _flags: MaterialDirtyFlags) {}

    /// Full bind when the effect was just switched to.
    fn bind(&self, _world: &Mat4, _mesh: &Mesh, _engine: &mut dyn Engine) {}

    /// Cheap per-draw bind while the effect stays enabled.
    fn bind_world(&self, _world: &Mat4, _engine: &mut dyn Engine) {}
}

/// Straightforward material with a single effect and explicit transparency
/// switches.
pub struct StandardMaterial {
    pub name: String,
    pub alpha: f32,
    pub alpha_mode: AlphaMode,
    pub fill_mode: FillMode,
    pub use_alpha_test: bool,
    pub render_targets: Vec<RenderTargetHandle>,
    effect: Option<EffectId>,
    dirty: MaterialDirtyFlags,
}

impl StandardMaterial {
    pub fn new(name: impl Into<String>, engine: &mut dyn Engine) -> Self {
        let name = name.into();
        let effect = engine.create_effect(&name);
        Self {
            name,
            alpha: 1.0,
            alpha_mode: AlphaMode::Combine,
            fill_mode: FillMode::Triangle,
            use_alpha_test: false,
            render_targets: Vec::new(),
            effect: Some(effect),
            dirty: MaterialDirtyFlags::empty(),
        }
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_alpha_mode(mut self, mode: AlphaMode) -> Self {
        self.alpha_mode = mode;
        self
    }

    pub fn with_alpha_test(mut self) -> Self {
        self.use_alpha_test = true;
        self
    }

    pub fn with_fill_mode(mut self, fill_mode: FillMode) -> Self {
        self.fill_mode = fill_mode;
        self
    }

    pub fn with_render_target(mut self, target: RenderTargetHandle) -> Self {
        self.render_targets.push(target);
        self
    }

    pub fn dirty_flags(&self) -> MaterialDirtyFlags {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = MaterialDirtyFlags::empty();
    }
}

impl Material for StandardMaterial {
    fn name(&self) -> &str {
        &self.name
    }

    fn effect(&self) -> Option<EffectId> {
        self.effect
    }

    fn needs_alpha_blending(&self) -> bool {
        self.alpha < 1.0
    }

    fn needs_alpha_testing(&self) -> bool {
        self.use_alpha_test
    }

    fn alpha_mode(&self) -> AlphaMode {
        self.alpha_mode
    }

    fn fill_mode(&self) -> FillMode {
        self.fill_mode
    }

    fn render_target_textures(&self) -> &[RenderTargetHandle] {
        &self.render_targets
    }

    fn mark_dirty(&mut self, flags: MaterialDirtyFlags) {
        self.dirty |= flags;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NullEngine;

    #[test]
    fn dirty_flags_combine() {
        let mut flags = MaterialDirtyFlags::TEXTURE;
        flags |= MaterialDirtyFlags::LIGHT;
        assert!(flags.contains(MaterialDirtyFlags::TEXTURE));
        assert!(flags.contains(MaterialDirtyFlags::LIGHT));
        assert!(!flags.contains(MaterialDirtyFlags::PREPASS));
        assert!(MaterialDirtyFlags::all().contains(flags));
    }

    #[test]
    fn alpha_below_one_needs_blending() {
        let mut engine = NullEngine::new();
        let opaque = StandardMaterial::new("opaque", &mut engine);
        let glass = StandardMaterial::new("glass", &mut engine).with_alpha(0.5);
        assert!(!opaque.needs_alpha_blending());
        assert!(glass.needs_alpha_blending());
    }

    #[test]
    fn mark_dirty_accumulates() {
        let mut engine = NullEngine::new();
        let mut material = StandardMaterial::new("m", &mut engine);
        material.mark_dirty(MaterialDirtyFlags::TEXTURE);
        material.mark_dirty(MaterialDirtyFlags::MISC);
        assert!(material
            .dirty_flags()
            .contains(MaterialDirtyFlags::TEXTURE | MaterialDirtyFlags::MISC));
        material.clear_dirty();
        assert!(material.dirty_flags().is_empty());
    }

    #[test]
    fn only_triangle_topologies_peel() {
        assert!(FillMode::Triangle.is_triangle_fill());
        assert!(FillMode::TriangleStrip.is_triangle_fill());
        assert!(!FillMode::Wireframe.is_triangle_fill());
        assert!(!FillMode::Point.is_triangle_fill());
    }
}
