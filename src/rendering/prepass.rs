use crate::engine::{Engine, RenderTargetId};

/// Geometry-buffer stage gate. Carries only what the transparency pipeline
/// needs: a capability check at creation and an optional composition output
/// that replaces the default framebuffer.
pub struct PrePassRenderer {
    custom_output: Option<RenderTargetId>,
}

impl PrePassRenderer {
    /// Fails when the device cannot bind enough simultaneous draw buffers
    /// for the geometry attachments.
    pub fn try_new(engine: &dyn Engine) -> Option<Self> {
        if engine.caps().max_draw_buffers < 4 {
            return None;
        }
        Some(Self {
            custom_output: None,
        })
    }

    /// Whether scene framebuffer binds should be left to this renderer.
    /// This implementation never takes them over.
    pub fn defers_binding(&self) -> bool {
        false
    }

    pub fn set_custom_output(&mut self, target: Option<RenderTargetId>) {
        self.custom_output = target;
    }

    /// Target the transparency composition writes to instead of the default
    /// framebuffer.
    pub fn custom_output(&self) -> Option<RenderTargetId> {
        self.custom_output
    }

    pub fn is_ready(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::null::NullEngine;
    use crate::engine::EngineCapabilities;

    #[test]
    fn creation_requires_enough_draw_buffers() {
        let capable = NullEngine::new();
        assert!(PrePassRenderer::try_new(&capable).is_some());

        let weak = NullEngine::with_caps(EngineCapabilities {
            max_draw_buffers: 2,
            ..EngineCapabilities::default()
        });
        assert!(PrePassRenderer::try_new(&weak).is_none());
    }
}
